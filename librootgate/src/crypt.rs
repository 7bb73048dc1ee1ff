//! The system's crypt(3) from libxcrypt
//!
//! Used for shadow hash schemes that have no Rust implementation in this
//! crate, most importantly yescrypt (`$y$`), the default on current
//! Debian, Ubuntu and Fedora.

use std::ffi::{c_char, c_int, c_ulong, c_void, CStr, CString};
use zeroize::Zeroizing;

/// `sizeof(struct crypt_data)` in libxcrypt.
const CRYPT_DATA_SIZE: usize = 32768;
/// `CRYPT_GENSALT_OUTPUT_SIZE` in libxcrypt.
const GENSALT_OUTPUT_SIZE: usize = 192;

#[link(name = "crypt")]
extern "C" {
    fn crypt_rn(
        phrase: *const c_char,
        setting: *const c_char,
        data: *mut c_void,
        size: c_int,
    ) -> *mut c_char;

    fn crypt_gensalt_rn(
        prefix: *const c_char,
        count: c_ulong,
        rbytes: *const c_char,
        nrbytes: c_int,
        output: *mut c_char,
        output_size: c_int,
    ) -> *mut c_char;
}

/// Prefixes handed to the system crypt(3).
pub const SYSTEM_PREFIXES: &[&str] = &["$y$", "$gy$", "$7$"];

/// Hash `phrase` with `setting`, which may be a full hash string.
///
/// Returns `None` when libxcrypt rejects the setting or the phrase contains
/// a NUL byte.
pub fn crypt(phrase: &str, setting: &str) -> Option<String> {
    if phrase.as_bytes().contains(&0) {
        return None;
    }
    let mut phrase_c = Zeroizing::new(Vec::with_capacity(phrase.len() + 1));
    phrase_c.extend_from_slice(phrase.as_bytes());
    phrase_c.push(0);
    let setting_c = CString::new(setting).ok()?;

    let mut data = Zeroizing::new(vec![0u8; CRYPT_DATA_SIZE]);
    // SAFETY: both strings are NUL terminated and `data` is a writable buffer
    // of the size passed, which crypt_rn uses as its `struct crypt_data`.
    let hashed = unsafe {
        crypt_rn(
            phrase_c.as_ptr().cast(),
            setting_c.as_ptr(),
            data.as_mut_ptr().cast(),
            CRYPT_DATA_SIZE as c_int,
        )
    };
    if hashed.is_null() {
        return None;
    }

    // SAFETY: on success crypt_rn returns a NUL terminated string stored
    // inside `data`, which is still alive here.
    let hashed = unsafe { CStr::from_ptr(hashed) }.to_str().ok()?.to_string();
    if hashed.starts_with('*') {
        return None;
    }
    Some(hashed)
}

/// Fresh setting string for `prefix` with the library's default cost and
/// OS-provided randomness.
pub fn gensalt(prefix: &str) -> Option<String> {
    let prefix_c = CString::new(prefix).ok()?;
    let mut output = vec![0u8; GENSALT_OUTPUT_SIZE];
    // SAFETY: a null `rbytes` asks libxcrypt for its own randomness; `output`
    // is writable for the size passed.
    let setting = unsafe {
        crypt_gensalt_rn(
            prefix_c.as_ptr(),
            0,
            std::ptr::null(),
            0,
            output.as_mut_ptr().cast(),
            GENSALT_OUTPUT_SIZE as c_int,
        )
    };
    if setting.is_null() {
        return None;
    }
    // SAFETY: on success the NUL terminated setting lives in `output`.
    let setting = unsafe { CStr::from_ptr(setting) }.to_str().ok()?.to_string();
    Some(setting)
}

/// Byte comparison that does not stop at the first difference.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (a_byte, b_byte) in a.bytes().zip(b.bytes()) {
        result |= a_byte ^ b_byte;
    }

    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yescrypt_round_trip() {
        let setting = gensalt("$y$").unwrap();
        assert!(setting.starts_with("$y$"));

        let hash = crypt("correct horse", &setting).unwrap();
        assert_eq!(crypt("correct horse", &hash).as_deref(), Some(hash.as_str()));
        assert_ne!(crypt("wrong", &hash).as_deref(), Some(hash.as_str()));
    }

    #[test]
    fn test_rejects_garbage_setting_and_nul() {
        assert_eq!(crypt("pw", "$y$not-a-setting"), None);
        assert_eq!(crypt("p\0w", "$y$j9T$abc$"), None);
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq("$y$abc", "$y$abc"));
        assert!(!constant_time_eq("$y$abc", "$y$abd"));
        assert!(!constant_time_eq("$y$abc", "$y$ab"));
    }
}
