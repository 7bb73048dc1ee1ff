//! Password verification against the system shadow database
//!
//! One prompt per invocation. Every failure, whatever its cause, is reported
//! to the caller as the same "authentication failed"; the specific reason only
//! reaches debug logs and the audit record.

use crate::crypt;
use crate::identity::Identity;
use argon2::password_hash::{PasswordHash, PasswordVerifier};
use argon2::Argon2;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::sys::termios::{tcgetattr, tcsetattr, LocalFlags, SetArg, Termios};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use thiserror::Error;
use tracing::debug;
use zeroize::Zeroizing;

/// Message shown for every authentication failure.
pub const AUTH_FAILED_MESSAGE: &str = "authentication failed";

/// Salt used to burn the same sha512-crypt work for unknown users.
const DUMMY_SETTING: &str = "$6$rootgatedummy$";

/// Longest secret accepted from the terminal, in bytes.
const MAX_SECRET_LEN: usize = 4096;

/// Signals that would otherwise leave the terminal without echo.
const RESTORE_ON: [Signal; 4] = [
    Signal::SIGINT,
    Signal::SIGTERM,
    Signal::SIGHUP,
    Signal::SIGQUIT,
];

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("no controlling terminal: {0}")]
    NoTerminal(#[source] io::Error),

    #[error("reading password: {0}")]
    Read(#[source] io::Error),

    #[error("terminal mode: {0}")]
    Terminal(#[source] nix::Error),

    #[error("reading credential database {path}: {source}")]
    Database {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no credential entry for user")]
    UnknownUser,

    #[error("account locked or without password")]
    Locked,

    #[error("unsupported password hash format")]
    UnsupportedHash,

    #[error("password mismatch")]
    Mismatch,
}

/// How an identity proved itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    Password,
    /// Real uid 0 already holds every privilege; no prompt.
    RootCaller,
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::Password => "password",
            AuthMethod::RootCaller => "root",
        }
    }
}

/// What the decision engine sees of authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Authenticated,
    Failed,
}

impl<T> From<&Result<T, AuthError>> for AuthOutcome {
    fn from(result: &Result<T, AuthError>) -> Self {
        match result {
            Ok(_) => AuthOutcome::Authenticated,
            Err(_) => AuthOutcome::Failed,
        }
    }
}

pub trait Authenticator {
    fn authenticate(&self, identity: &Identity) -> Result<AuthMethod, AuthError>;
}

/// Prompts on the controlling terminal and checks the shadow file.
pub struct ShadowAuthenticator {
    shadow_path: PathBuf,
    tty_path: PathBuf,
}

impl ShadowAuthenticator {
    pub fn new(shadow_path: impl Into<PathBuf>) -> Self {
        Self {
            shadow_path: shadow_path.into(),
            tty_path: PathBuf::from("/dev/tty"),
        }
    }

    fn prompt(&self, user: &str) -> Result<Zeroizing<String>, AuthError> {
        let mut tty = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.tty_path)
            .map_err(AuthError::NoTerminal)?;

        write!(tty, "[rootgate] password for {}: ", user).map_err(AuthError::Read)?;
        tty.flush().map_err(AuthError::Read)?;

        let secret = {
            let _echo_off = EchoGuard::disable(&tty)?;
            read_line(&mut tty)
        };
        // Echo was off, so the user's Enter never reached the screen.
        let _ = tty.write_all(b"\n");
        secret
    }
}

impl Authenticator for ShadowAuthenticator {
    fn authenticate(&self, identity: &Identity) -> Result<AuthMethod, AuthError> {
        if identity.is_root() {
            return Ok(AuthMethod::RootCaller);
        }

        let secret = self.prompt(&identity.name)?;
        verify_against_shadow(&self.shadow_path, &identity.name, &secret)?;
        Ok(AuthMethod::Password)
    }
}

/// Check `secret` against the shadow entry of `user`.
pub fn verify_against_shadow(path: &Path, user: &str, secret: &str) -> Result<(), AuthError> {
    let database = Zeroizing::new(fs::read_to_string(path).map_err(|source| {
        AuthError::Database {
            path: path.to_path_buf(),
            source,
        }
    })?);

    let hash = database.lines().find_map(|line| {
        let mut fields = line.splitn(3, ':');
        match (fields.next(), fields.next()) {
            (Some(name), Some(hash)) if name == user => Some(hash),
            _ => None,
        }
    });

    match hash {
        Some(hash) => verify_hash(secret, hash),
        None => {
            burn_dummy_hash(secret);
            Err(AuthError::UnknownUser)
        }
    }
}

/// One sha512-crypt round, for failures that have no usable hash.
fn burn_dummy_hash(secret: &str) {
    let _ = pwhash::sha512_crypt::hash_with(DUMMY_SETTING, secret.as_bytes());
}

/// Verify `secret` against one crypt(3) or PHC hash string.
pub fn verify_hash(secret: &str, hash: &str) -> Result<(), AuthError> {
    if hash.is_empty() || hash.starts_with('!') || hash.starts_with('*') {
        burn_dummy_hash(secret);
        return Err(AuthError::Locked);
    }

    if hash.starts_with("$argon2") {
        let parsed = PasswordHash::new(hash).map_err(|_| AuthError::UnsupportedHash)?;
        return Argon2::default()
            .verify_password(secret.as_bytes(), &parsed)
            .map_err(|_| AuthError::Mismatch);
    }

    if crypt::SYSTEM_PREFIXES.iter().any(|prefix| hash.starts_with(prefix)) {
        let computed = crypt::crypt(secret, hash).ok_or(AuthError::UnsupportedHash)?;
        return if crypt::constant_time_eq(&computed, hash) {
            Ok(())
        } else {
            Err(AuthError::Mismatch)
        };
    }

    let crypt_family = ["$1$", "$5$", "$6$", "$2a$", "$2b$", "$2y$"];
    if !crypt_family.iter().any(|prefix| hash.starts_with(prefix)) {
        debug!("unsupported hash prefix");
        burn_dummy_hash(secret);
        return Err(AuthError::UnsupportedHash);
    }

    if pwhash::unix::verify(secret, hash) {
        Ok(())
    } else {
        Err(AuthError::Mismatch)
    }
}

fn read_line<R: Read>(input: &mut R) -> Result<Zeroizing<String>, AuthError> {
    // Sized for the cap so no unzeroed copy is left by a reallocation.
    let mut bytes = Zeroizing::new(Vec::with_capacity(MAX_SECRET_LEN));
    let mut byte = [0u8; 1];
    loop {
        match input.read(&mut byte) {
            Ok(0) => break,
            Ok(_) if byte[0] == b'\n' => break,
            Ok(_) if bytes.len() == MAX_SECRET_LEN => {
                return Err(AuthError::Read(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "password too long",
                )));
            }
            Ok(_) => bytes.push(byte[0]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(AuthError::Read(e)),
        }
    }

    if bytes.last() == Some(&b'\r') {
        bytes.pop();
    }
    let text = std::str::from_utf8(&bytes)
        .map_err(|e| AuthError::Read(io::Error::new(io::ErrorKind::InvalidData, e)))?;
    Ok(Zeroizing::new(text.to_string()))
}

struct SavedMode {
    fd: RawFd,
    mode: libc::termios,
}

/// Terminal mode the signal handler puts back. Null outside a prompt.
static SAVED_MODE: AtomicPtr<SavedMode> = AtomicPtr::new(ptr::null_mut());

extern "C" fn restore_and_reraise(signal: libc::c_int) {
    let saved = SAVED_MODE.load(Ordering::SeqCst);
    // SAFETY: tcsetattr, signal and raise are async-signal-safe; `saved` is
    // only freed after it has been swapped out of SAVED_MODE.
    unsafe {
        if !saved.is_null() {
            libc::tcsetattr((*saved).fd, libc::TCSANOW, &(*saved).mode);
        }
        libc::signal(signal, libc::SIG_DFL);
        libc::raise(signal);
    }
}

/// Echo disabled for as long as this lives.
struct EchoGuard {
    tty: File,
    saved: Termios,
    previous: Vec<(Signal, SigAction)>,
}

impl EchoGuard {
    fn disable(tty: &File) -> Result<Self, AuthError> {
        let tty = tty.try_clone().map_err(AuthError::Read)?;
        let saved = tcgetattr(tty.as_fd()).map_err(AuthError::Terminal)?;

        let restore = Box::new(SavedMode {
            fd: tty.as_raw_fd(),
            mode: saved.clone().into(),
        });
        let old = SAVED_MODE.swap(Box::into_raw(restore), Ordering::SeqCst);
        if !old.is_null() {
            // SAFETY: pointer came from Box::into_raw and is no longer published.
            drop(unsafe { Box::from_raw(old) });
        }

        let mut guard = Self {
            tty,
            saved: saved.clone(),
            previous: Vec::with_capacity(RESTORE_ON.len()),
        };

        let handler = SigAction::new(
            SigHandler::Handler(restore_and_reraise),
            SaFlags::empty(),
            SigSet::empty(),
        );
        for signal in RESTORE_ON {
            // SAFETY: the handler only calls async-signal-safe functions.
            let previous = unsafe { sigaction(signal, &handler) }.map_err(AuthError::Terminal)?;
            guard.previous.push((signal, previous));
        }

        let mut silent = saved;
        silent.local_flags.remove(LocalFlags::ECHO | LocalFlags::ECHONL);
        silent.local_flags.insert(LocalFlags::ICANON);
        tcsetattr(guard.tty.as_fd(), SetArg::TCSAFLUSH, &silent).map_err(AuthError::Terminal)?;

        Ok(guard)
    }
}

impl Drop for EchoGuard {
    fn drop(&mut self) {
        let _ = tcsetattr(self.tty.as_fd(), SetArg::TCSAFLUSH, &self.saved);

        for (signal, previous) in self.previous.drain(..) {
            // SAFETY: reinstalling the disposition that was active before.
            let _ = unsafe { sigaction(signal, &previous) };
        }

        let saved = SAVED_MODE.swap(ptr::null_mut(), Ordering::SeqCst);
        if !saved.is_null() {
            // SAFETY: pointer came from Box::into_raw and is no longer published.
            drop(unsafe { Box::from_raw(saved) });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use argon2::password_hash::{PasswordHasher, SaltString};

    fn shadow_with(entries: &[(&str, &str)]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for (user, hash) in entries {
            writeln!(file, "{}:{}:19000:0:99999:7:::", user, hash).unwrap();
        }
        file
    }

    #[test]
    fn test_sha512_crypt_hash() {
        let hash = pwhash::sha512_crypt::hash("correct horse").unwrap();
        assert!(verify_hash("correct horse", &hash).is_ok());
        assert!(matches!(verify_hash("wrong", &hash), Err(AuthError::Mismatch)));
    }

    #[test]
    fn test_md5_and_sha256_crypt_hashes() {
        let md5 = pwhash::md5_crypt::hash("pw").unwrap();
        let sha256 = pwhash::sha256_crypt::hash("pw").unwrap();
        assert!(verify_hash("pw", &md5).is_ok());
        assert!(verify_hash("pw", &sha256).is_ok());
    }

    #[test]
    fn test_argon2_hash() {
        let salt = SaltString::from_b64("cm9vdGdhdGVzYWx0MTIz").unwrap();
        let hash = Argon2::default()
            .hash_password(b"battery staple", &salt)
            .unwrap()
            .to_string();

        assert!(verify_hash("battery staple", &hash).is_ok());
        assert!(matches!(verify_hash("nope", &hash), Err(AuthError::Mismatch)));
    }

    #[test]
    fn test_locked_and_empty_hashes_fail() {
        let hash = pwhash::sha512_crypt::hash("pw").unwrap();
        let locked = format!("!{}", hash);
        assert!(matches!(verify_hash("pw", &locked), Err(AuthError::Locked)));
        assert!(matches!(verify_hash("pw", "*"), Err(AuthError::Locked)));
        assert!(matches!(verify_hash("", ""), Err(AuthError::Locked)));
    }

    #[test]
    fn test_yescrypt_hash() {
        let setting = crypt::gensalt("$y$").unwrap();
        let hash = crypt::crypt("tr0ub4dor", &setting).unwrap();

        assert!(verify_hash("tr0ub4dor", &hash).is_ok());
        assert!(matches!(verify_hash("tr0ub4door", &hash), Err(AuthError::Mismatch)));
    }

    #[test]
    fn test_yescrypt_shadow_entry() {
        let setting = crypt::gensalt("$y$").unwrap();
        let hash = crypt::crypt("alice-pw", &setting).unwrap();
        let shadow = shadow_with(&[("alice", &hash)]);

        assert!(verify_against_shadow(shadow.path(), "alice", "alice-pw").is_ok());
        assert!(verify_against_shadow(shadow.path(), "alice", "bob-pw").is_err());
    }

    #[test]
    fn test_unknown_hash_format_fails() {
        assert!(matches!(
            verify_hash("pw", "$9$abc$def"),
            Err(AuthError::UnsupportedHash)
        ));
        assert!(matches!(
            verify_hash("pw", "abJnggxhB/yWI"),
            Err(AuthError::UnsupportedHash)
        ));
    }

    #[test]
    fn test_shadow_lookup() {
        let alice = pwhash::sha512_crypt::hash("alice-pw").unwrap();
        let bob = pwhash::sha512_crypt::hash("bob-pw").unwrap();
        let shadow = shadow_with(&[("alice", &alice), ("bob", &bob), ("daemon", "*")]);

        assert!(verify_against_shadow(shadow.path(), "alice", "alice-pw").is_ok());
        assert!(verify_against_shadow(shadow.path(), "alice", "bob-pw").is_err());
        assert!(verify_against_shadow(shadow.path(), "bob", "bob-pw").is_ok());
        assert!(matches!(
            verify_against_shadow(shadow.path(), "daemon", ""),
            Err(AuthError::Locked)
        ));
        assert!(matches!(
            verify_against_shadow(shadow.path(), "mallory", "alice-pw"),
            Err(AuthError::UnknownUser)
        ));
    }

    #[test]
    fn test_username_must_match_whole_field() {
        let hash = pwhash::sha512_crypt::hash("pw").unwrap();
        let shadow = shadow_with(&[("alice2", &hash)]);
        assert!(matches!(
            verify_against_shadow(shadow.path(), "alice", "pw"),
            Err(AuthError::UnknownUser)
        ));
    }

    #[test]
    fn test_missing_database_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = verify_against_shadow(&dir.path().join("shadow"), "alice", "pw").unwrap_err();
        assert!(matches!(err, AuthError::Database { .. }));
    }

    #[test]
    fn test_root_caller_is_not_prompted() {
        let authenticator = ShadowAuthenticator {
            shadow_path: PathBuf::from("/nonexistent/shadow"),
            tty_path: PathBuf::from("/nonexistent/tty"),
        };
        let root = Identity {
            name: "root".to_string(),
            uid: 0,
            gid: 0,
        };
        assert_eq!(authenticator.authenticate(&root).unwrap(), AuthMethod::RootCaller);
    }

    #[test]
    fn test_missing_terminal_fails_closed() {
        let authenticator = ShadowAuthenticator {
            shadow_path: PathBuf::from("/nonexistent/shadow"),
            tty_path: PathBuf::from("/nonexistent/tty"),
        };
        let alice = Identity {
            name: "alice".to_string(),
            uid: 1000,
            gid: 1000,
        };
        let result = authenticator.authenticate(&alice);
        assert!(matches!(result, Err(AuthError::NoTerminal(_))));
        assert_eq!(AuthOutcome::from(&result), AuthOutcome::Failed);
    }

    #[test]
    fn test_read_line_strips_line_ending() {
        let mut input: &[u8] = b"s3cret\r\nleftover";
        assert_eq!(read_line(&mut input).unwrap().as_str(), "s3cret");

        let mut input: &[u8] = b"no newline";
        assert_eq!(read_line(&mut input).unwrap().as_str(), "no newline");
    }

    #[test]
    fn test_read_line_caps_length() {
        let mut long = vec![b'a'; MAX_SECRET_LEN];
        let mut input: &[u8] = &long;
        assert_eq!(read_line(&mut input).unwrap().len(), MAX_SECRET_LEN);

        long.extend_from_slice(b"a\n");
        let mut input: &[u8] = &long;
        assert!(matches!(read_line(&mut input), Err(AuthError::Read(_))));
    }
}
