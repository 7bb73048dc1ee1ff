//! Command execution requests and path canonicalization
//!
//! The path produced here is the one the decision engine compares, the audit
//! log records and the executor runs. Nothing downstream re-resolves it.

use crate::identity::Identity;
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum RequestError {
    #[error("{0}: command not found")]
    NotFound(String),

    #[error("{0}: relative command paths are not allowed")]
    Relative(String),

    #[error("{0}: path is not valid UTF-8")]
    NonUtf8(String),

    #[error("{path}: {source}")]
    Unresolvable {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// A single "run this as root" ask.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRequest {
    pub identity: Identity,
    /// Canonical absolute path, symlinks resolved.
    pub command: String,
    pub args: Vec<String>,
}

impl AuthRequest {
    /// Resolve `command` to a canonical absolute path.
    ///
    /// Absolute paths are canonicalized directly. Bare names are looked up in
    /// `secure_path` only. Anything else with a slash in it is rejected since
    /// it would depend on the caller's working directory.
    pub fn resolve(
        identity: Identity,
        command: &str,
        args: Vec<String>,
        secure_path: &[PathBuf],
    ) -> Result<Self, RequestError> {
        let located = if command.starts_with('/') {
            PathBuf::from(command)
        } else if command.contains('/') {
            return Err(RequestError::Relative(command.to_string()));
        } else {
            search(command, secure_path).ok_or_else(|| RequestError::NotFound(command.to_string()))?
        };

        let canonical = canonicalize_command(&located).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                RequestError::NotFound(command.to_string())
            } else {
                RequestError::Unresolvable {
                    path: command.to_string(),
                    source,
                }
            }
        })?;

        let command_path = canonical
            .to_str()
            .ok_or_else(|| RequestError::NonUtf8(canonical.display().to_string()))?
            .to_string();

        debug!(requested = command, resolved = %command_path, "resolved command");

        Ok(Self {
            identity,
            command: command_path,
            args,
        })
    }

    /// Resolved command followed by its arguments, space separated.
    pub fn command_line(&self) -> String {
        if self.args.is_empty() {
            self.command.clone()
        } else {
            format!("{} {}", self.command, self.args.join(" "))
        }
    }
}

/// Resolve every symlink and `..` in `path`, requiring the result to be a
/// regular file.
pub fn canonicalize_command(path: &Path) -> io::Result<PathBuf> {
    let canonical = fs::canonicalize(path)?;
    if !fs::metadata(&canonical)?.is_file() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "not a regular file",
        ));
    }
    Ok(canonical)
}

/// Normalize a command entry read from the policy file.
///
/// Entries that exist on disk are canonicalized the same way requests are.
/// Entries that do not exist are normalized lexically; those containing
/// `..` are refused since their meaning depends on symlinks we cannot see.
pub fn canonicalize_policy_entry(entry: &str) -> Option<String> {
    let path = Path::new(entry);
    if !path.is_absolute() {
        return None;
    }

    if let Ok(canonical) = canonicalize_command(path) {
        return canonical.to_str().map(str::to_string);
    }

    let mut normalized = PathBuf::from("/");
    for component in path.components() {
        match component {
            Component::RootDir | Component::CurDir => {}
            Component::Normal(part) => normalized.push(part),
            Component::ParentDir | Component::Prefix(_) => return None,
        }
    }
    if normalized == Path::new("/") {
        return None;
    }
    normalized.to_str().map(str::to_string)
}

fn search(name: &str, secure_path: &[PathBuf]) -> Option<PathBuf> {
    if name.is_empty() || name == "." || name == ".." {
        return None;
    }
    secure_path
        .iter()
        .filter(|dir| dir.is_absolute())
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable_file(candidate))
}

fn is_executable_file(path: &Path) -> bool {
    fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}
