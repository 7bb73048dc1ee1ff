//! Audit logging for rootgate decisions
//!
//! One JSON object per line, appended with `O_APPEND` in a single write and
//! synced to disk before `record` returns.

use crate::auth::{AuthError, AuthMethod};
use crate::decision::Decision;
use crate::fsperm::{self, TrustError};
use crate::identity::Identity;
use crate::request::AuthRequest;
use chrono::Utc;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("cannot open audit log {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot write audit log {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("refusing audit log: {0}")]
    Untrusted(#[source] TrustError),

    #[error("cannot encode audit record: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Authentication,
    Decision,
    RequestRejected,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub timestamp: String,
    pub session: String,
    pub event_type: EventType,
    pub user: String,
    pub uid: u32,
    pub command: String,
    pub cwd: String,
    pub result: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Appends records for one invocation. Every record carries the same
/// session id so an authentication line can be paired with its decision.
pub struct AuditLogger {
    path: PathBuf,
    session: Uuid,
    owner: u32,
}

impl AuditLogger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            session: Uuid::new_v4(),
            owner: 0,
        }
    }

    /// Require a different owner than root. Only used by tests.
    pub fn owned_by(mut self, owner: u32) -> Self {
        self.owner = owner;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn session(&self) -> Uuid {
        self.session
    }

    /// Append `event` and flush it to stable storage.
    ///
    /// An existing log must belong to the expected owner and must not be
    /// group or world writable; nothing is written otherwise.
    pub fn record(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .mode(0o600)
            .custom_flags(libc::O_NOFOLLOW | libc::O_CLOEXEC)
            .open(&self.path)
            .map_err(|source| AuditError::Open {
                path: self.path.clone(),
                source,
            })?;
        fsperm::verify_handle(&file, &self.path, self.owner, fsperm::NO_GROUP_OR_WORLD_WRITE)
            .map_err(AuditError::Untrusted)?;

        file.write_all(&line)
            .and_then(|_| file.sync_data())
            .map_err(|source| AuditError::Write {
                path: self.path.clone(),
                source,
            })
    }

    pub fn log_authentication(
        &self,
        request: &AuthRequest,
        result: &Result<AuthMethod, AuthError>,
    ) -> Result<(), AuditError> {
        let (outcome, detail) = match result {
            Ok(method) => ("success", format!("method={}", method.as_str())),
            Err(e) => ("failure", e.to_string()),
        };
        let event = self.event(
            EventType::Authentication,
            &request.identity,
            request.command_line(),
            outcome.to_string(),
            Some(detail),
        );
        self.record(&event)
    }

    pub fn log_decision(
        &self,
        request: &AuthRequest,
        decision: &Decision,
        detail: Option<String>,
    ) -> Result<(), AuditError> {
        let event = self.event(
            EventType::Decision,
            &request.identity,
            request.command_line(),
            decision.outcome().as_str().to_string(),
            detail,
        );
        self.record(&event)
    }

    /// A command that could not be resolved never reaches a decision.
    pub fn log_rejected_request(
        &self,
        identity: &Identity,
        command: &str,
        args: &[String],
        reason: &str,
    ) -> Result<(), AuditError> {
        let mut command_line = command.to_string();
        for arg in args {
            command_line.push(' ');
            command_line.push_str(arg);
        }
        let event = self.event(
            EventType::RequestRejected,
            identity,
            command_line,
            "rejected".to_string(),
            Some(reason.to_string()),
        );
        self.record(&event)
    }

    fn event(
        &self,
        event_type: EventType,
        identity: &Identity,
        command: String,
        result: String,
        detail: Option<String>,
    ) -> AuditEvent {
        let cwd = std::env::current_dir()
            .map(|dir| dir.display().to_string())
            .unwrap_or_else(|_| "?".to_string());

        AuditEvent {
            timestamp: Utc::now().to_rfc3339(),
            session: self.session.to_string(),
            event_type,
            user: identity.name.clone(),
            uid: identity.uid,
            command,
            cwd,
            result,
            detail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthOutcome;
    use crate::decision::decide;
    use crate::policy::Policy;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    fn request() -> AuthRequest {
        AuthRequest {
            identity: Identity {
                name: "alice".to_string(),
                uid: 1000,
                gid: 1000,
            },
            command: "/usr/bin/apt".to_string(),
            args: vec!["update".to_string()],
        }
    }

    fn logger(path: impl Into<PathBuf>) -> AuditLogger {
        AuditLogger::new(path).owned_by(nix::unistd::getuid().as_raw())
    }

    fn lines(path: &Path) -> Vec<serde_json::Value> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn test_decision_record_contents() {
        let dir = tempfile::tempdir().unwrap();
        let logger = logger(dir.path().join("audit.log"));
        let (policy, _) = Policy::parse("alice:all\n");
        let decision = decide(&request(), &policy, AuthOutcome::Authenticated);

        logger.log_decision(&request(), &decision, None).unwrap();

        let records = lines(logger.path());
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record["event_type"], "decision");
        assert_eq!(record["user"], "alice");
        assert_eq!(record["uid"], 1000);
        assert_eq!(record["command"], "/usr/bin/apt update");
        assert_eq!(record["result"], "granted");
        assert_eq!(record["session"], logger.session().to_string());
        assert!(record.get("detail").is_none());
        assert!(chrono::DateTime::parse_from_rfc3339(record["timestamp"].as_str().unwrap()).is_ok());
    }

    #[test]
    fn test_appends_and_never_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        fs::write(&path, "{\"previous\":true}\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600)).unwrap();

        let logger = logger(&path);
        logger
            .log_authentication(&request(), &Ok(AuthMethod::Password))
            .unwrap();
        logger
            .log_authentication(&request(), &Err(AuthError::Mismatch))
            .unwrap();

        let records = lines(&path);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0]["previous"], true);
        assert_eq!(records[1]["result"], "success");
        assert_eq!(records[1]["detail"], "method=password");
        assert_eq!(records[2]["result"], "failure");
        assert_eq!(records[2]["detail"], "password mismatch");
    }

    #[test]
    fn test_new_log_is_owner_only() {
        let dir = tempfile::tempdir().unwrap();
        let logger = logger(dir.path().join("audit.log"));
        logger
            .log_rejected_request(&request().identity, "vim", &["x".to_string()], "not found")
            .unwrap();

        let mode = fs::metadata(logger.path()).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode & 0o077, 0);

        let records = lines(logger.path());
        assert_eq!(records[0]["event_type"], "request_rejected");
        assert_eq!(records[0]["command"], "vim x");
    }

    #[test]
    fn test_unwritable_location_fails() {
        let dir = tempfile::tempdir().unwrap();
        let logger = logger(dir.path().join("missing-dir").join("audit.log"));
        let err = logger
            .log_authentication(&request(), &Ok(AuthMethod::Password))
            .unwrap_err();
        assert!(matches!(err, AuditError::Open { .. }));
    }

    #[test]
    fn test_refuses_symlinked_log() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("elsewhere");
        let link = dir.path().join("audit.log");
        fs::write(&target, "").unwrap();
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let logger = logger(&link);
        assert!(logger
            .log_authentication(&request(), &Ok(AuthMethod::Password))
            .is_err());
        assert_eq!(fs::read_to_string(&target).unwrap(), "");
    }

    #[test]
    fn test_refuses_writable_by_others() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        fs::write(&path, "").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o662)).unwrap();

        let err = logger(&path)
            .log_authentication(&request(), &Ok(AuthMethod::Password))
            .unwrap_err();
        assert!(matches!(err, AuditError::Untrusted(TrustError::InsecureMode { .. })));
        assert_eq!(fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn test_refuses_foreign_owner() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        fs::write(&path, "").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600)).unwrap();

        let stranger = nix::unistd::getuid().as_raw().wrapping_add(1);
        let err = AuditLogger::new(&path)
            .owned_by(stranger)
            .log_authentication(&request(), &Ok(AuthMethod::Password))
            .unwrap_err();
        assert!(matches!(err, AuditError::Untrusted(TrustError::WrongOwner { .. })));
        assert_eq!(fs::read_to_string(&path).unwrap(), "");
    }
}
