//! Ownership and mode checks for root-administered files

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::{MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Group and world access of any kind.
pub const NO_GROUP_OR_WORLD_ACCESS: u32 = 0o077;
/// Group and world write only.
pub const NO_GROUP_OR_WORLD_WRITE: u32 = 0o022;

#[derive(Error, Debug)]
pub enum TrustError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{0}: not a regular file")]
    NotRegular(PathBuf),

    #[error("{path}: owned by uid {found}, expected uid {expected}")]
    WrongOwner { path: PathBuf, found: u32, expected: u32 },

    #[error("{path}: insecure mode {mode:04o}")]
    InsecureMode { path: PathBuf, mode: u32 },
}

impl TrustError {
    /// True when the file simply does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, TrustError::Io { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}

/// Open `path` for reading and verify the opened handle is a regular file,
/// owned by `owner`, with none of `forbidden_bits` set.
///
/// The final path component is opened with `O_NOFOLLOW` and every check runs
/// against the open descriptor, so the file cannot be swapped between check
/// and read.
pub fn open_trusted(path: &Path, owner: u32, forbidden_bits: u32) -> Result<File, TrustError> {
    let file = OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NOFOLLOW | libc::O_CLOEXEC)
        .open(path)
        .map_err(|source| TrustError::Io {
            path: path.to_path_buf(),
            source,
        })?;

    verify_handle(&file, path, owner, forbidden_bits)?;
    Ok(file)
}

/// Check an already open `file`: regular, owned by `owner`, none of
/// `forbidden_bits` set.
pub fn verify_handle(
    file: &File,
    path: &Path,
    owner: u32,
    forbidden_bits: u32,
) -> Result<(), TrustError> {
    let meta = file.metadata().map_err(|source| TrustError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    if !meta.is_file() {
        return Err(TrustError::NotRegular(path.to_path_buf()));
    }
    if meta.uid() != owner {
        return Err(TrustError::WrongOwner {
            path: path.to_path_buf(),
            found: meta.uid(),
            expected: owner,
        });
    }
    let mode = meta.permissions().mode() & 0o7777;
    if mode & forbidden_bits != 0 {
        return Err(TrustError::InsecureMode {
            path: path.to_path_buf(),
            mode,
        });
    }

    Ok(())
}
