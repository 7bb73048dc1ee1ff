//! rootgate core library
//!
//! Policy parsing, identity resolution, password verification, the allow/deny
//! decision, audit logging and the final privileged exec.

pub mod audit;
pub mod auth;
pub mod config;
pub mod crypt;
pub mod decision;
pub mod edit;
pub mod exec;
pub mod fsperm;
pub mod grant;
pub mod identity;
pub mod invocation;
pub mod policy;
pub mod request;

use thiserror::Error;

pub use audit::{AuditEvent, AuditLogger};
pub use auth::{AuthOutcome, Authenticator, ShadowAuthenticator};
pub use config::{ConfigLoader, RootGateConfig};
pub use decision::{decide, Decision, Outcome};
pub use exec::{ExecPlan, Executor, ProcessExecutor};
pub use grant::Grant;
pub use identity::Identity;
pub use invocation::Invocation;
pub use policy::{GrantLookup, Policy};
pub use request::AuthRequest;

/// Exit status for a denied request (`DeniedUnauthorized` and `DeniedPolicyMissing`).
pub const EXIT_UNAUTHORIZED: i32 = 1;
pub const EXIT_AUTH_FAILED: i32 = 3;
pub const EXIT_NOT_ROOT: i32 = 4;
/// sysexits `EX_CONFIG`.
pub const EXIT_CONFIG: i32 = 78;
pub const EXIT_EXEC: i32 = 126;
pub const EXIT_NOT_FOUND: i32 = 127;

#[derive(Error, Debug)]
pub enum RootGateError {
    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Policy(#[from] policy::PolicyLoadError),

    #[error(transparent)]
    Identity(#[from] identity::IdentityError),

    #[error(transparent)]
    Request(#[from] request::RequestError),

    #[error(transparent)]
    Audit(#[from] audit::AuditError),

    #[error(transparent)]
    Exec(#[from] exec::ExecError),

    #[error(transparent)]
    Edit(#[from] edit::EditError),

    #[error("rootgate must be installed setuid root (effective uid is {0})")]
    NotPrivileged(u32),
}

impl RootGateError {
    /// Process exit status reported for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            RootGateError::Config(_)
            | RootGateError::Policy(_)
            | RootGateError::Identity(_)
            | RootGateError::Audit(_)
            | RootGateError::NotPrivileged(_) => EXIT_CONFIG,
            RootGateError::Request(_) => EXIT_NOT_FOUND,
            RootGateError::Exec(_) => EXIT_EXEC,
            RootGateError::Edit(edit::EditError::NotRoot) => EXIT_NOT_ROOT,
            RootGateError::Edit(_) => EXIT_CONFIG,
        }
    }
}

pub type Result<T> = std::result::Result<T, RootGateError>;
