//! `-e`: edit the policy file in place, atomically

use crate::identity::Identity;
use crate::policy::{ParseWarning, Policy};
use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::{fchown, PermissionsExt};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum EditError {
    #[error("only root may edit the policy file")]
    NotRoot,

    #[error("policy path {0} has no parent directory")]
    NoParent(PathBuf),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("editor '{editor}' exited with {status}")]
    EditorFailed { editor: String, status: ExitStatus },

    #[error("editor command is empty")]
    NoEditor,
}

fn io_err(context: impl Into<String>) -> impl FnOnce(io::Error) -> EditError {
    let context = context.into();
    move |source| EditError::Io { context, source }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditOutcome {
    Unchanged,
    /// New file in place; warnings describe lines that will be skipped.
    Installed { warnings: Vec<ParseWarning> },
}

/// Let root edit `policy_path` with `editor`.
///
/// The edit happens on a temporary copy next to the policy file which is
/// renamed over it at the end, so concurrent readers see either the old or
/// the new file.
pub fn edit_policy(
    identity: &Identity,
    policy_path: &Path,
    editor: &str,
) -> Result<EditOutcome, EditError> {
    if !identity.is_root() {
        return Err(EditError::NotRoot);
    }
    edit_file(policy_path, editor, true)
}

fn edit_file(policy_path: &Path, editor: &str, chown_root: bool) -> Result<EditOutcome, EditError> {
    let dir = policy_path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .ok_or_else(|| EditError::NoParent(policy_path.to_path_buf()))?;

    let original = match fs::read_to_string(policy_path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(io_err(format!("reading {}", policy_path.display()))(e)),
    };

    let mut scratch = tempfile::Builder::new()
        .prefix(".policy.")
        .tempfile_in(dir)
        .map_err(io_err(format!("creating temporary file in {}", dir.display())))?;
    scratch
        .write_all(original.as_bytes())
        .and_then(|_| scratch.flush())
        .map_err(io_err("writing temporary copy"))?;

    let mut words = editor.split_whitespace();
    let program = words.next().ok_or(EditError::NoEditor)?;
    let status = Command::new(program)
        .args(words)
        .arg(scratch.path())
        .status()
        .map_err(io_err(format!("running editor '{}'", editor)))?;
    if !status.success() {
        return Err(EditError::EditorFailed {
            editor: editor.to_string(),
            status,
        });
    }

    let edited = fs::read_to_string(scratch.path()).map_err(io_err("reading edited copy"))?;
    if edited == original {
        return Ok(EditOutcome::Unchanged);
    }

    let (_, warnings) = Policy::parse(&edited);

    let file = scratch.as_file();
    file.set_permissions(fs::Permissions::from_mode(0o600))
        .map_err(io_err("setting policy mode"))?;
    if chown_root {
        fchown(file, Some(0), Some(0)).map_err(io_err("setting policy owner"))?;
    }
    file.sync_all().map_err(io_err("syncing edited policy"))?;

    scratch
        .persist(policy_path)
        .map_err(|e| io_err(format!("installing {}", policy_path.display()))(e.error))?;

    info!(path = %policy_path.display(), skipped = warnings.len(), "installed edited policy");
    Ok(EditOutcome::Installed { warnings })
}
