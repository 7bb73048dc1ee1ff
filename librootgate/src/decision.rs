//! Allow/deny decision for a resolved request

use crate::auth::AuthOutcome;
use crate::grant::Grant;
use crate::policy::GrantLookup;
use crate::request::AuthRequest;
use serde::Serialize;
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Granted,
    DeniedUnauthorized,
    DeniedAuthFailed,
    DeniedPolicyMissing,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Granted => "granted",
            Outcome::DeniedUnauthorized => "denied_unauthorized",
            Outcome::DeniedAuthFailed => "denied_auth_failed",
            Outcome::DeniedPolicyMissing => "denied_policy_missing",
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::Granted => 0,
            Outcome::DeniedAuthFailed => crate::EXIT_AUTH_FAILED,
            Outcome::DeniedUnauthorized | Outcome::DeniedPolicyMissing => crate::EXIT_UNAUTHORIZED,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of [`decide`]. Fields are private so a decision cannot be altered
/// after it has been logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    outcome: Outcome,
}

impl Decision {
    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    pub fn is_granted(&self) -> bool {
        self.outcome == Outcome::Granted
    }
}

/// Decide whether `request` may run.
///
/// A failed authentication returns before the policy is consulted at all.
/// `request.command` is already canonical; the comparison is an exact string
/// match against the canonical entries of the user's grant.
pub fn decide<P: GrantLookup + ?Sized>(
    request: &AuthRequest,
    policy: &P,
    auth: AuthOutcome,
) -> Decision {
    if auth != AuthOutcome::Authenticated {
        return Decision {
            outcome: Outcome::DeniedAuthFailed,
        };
    }

    let outcome = match policy.lookup(&request.identity.name) {
        None => Outcome::DeniedPolicyMissing,
        Some(Grant::AllCommands) => Outcome::Granted,
        Some(grant @ Grant::CommandSet(_)) => {
            if grant.permits(&request.command) {
                Outcome::Granted
            } else {
                Outcome::DeniedUnauthorized
            }
        }
    };

    debug!(user = %request.identity.name, command = %request.command, %outcome, "decided");
    Decision { outcome }
}
