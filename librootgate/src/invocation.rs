//! One run of rootgate: resolve, authenticate, decide, log, exec

use crate::audit::AuditLogger;
use crate::auth::{AuthOutcome, Authenticator};
use crate::config::RootGateConfig;
use crate::decision::{decide, Decision, Outcome};
use crate::edit::{self, EditOutcome};
use crate::exec::{ExecPlan, Executor};
use crate::identity::Identity;
use crate::policy::{GrantLookup, ParseWarning, Policy, PolicyLoadError};
use crate::request::AuthRequest;
use crate::{Result, RootGateError};
use nix::unistd::geteuid;
use tracing::{debug, error, info, warn};

/// Refuse to do anything unless installed setuid root.
pub fn ensure_privileged() -> Result<()> {
    let euid = geteuid();
    if euid.is_root() {
        Ok(())
    } else {
        Err(RootGateError::NotPrivileged(euid.as_raw()))
    }
}

/// State for a single invocation. Nothing here outlives the process.
pub struct Invocation {
    config: RootGateConfig,
    identity: Identity,
    audit: AuditLogger,
    trusted_owner: u32,
}

impl Invocation {
    pub fn new(config: RootGateConfig, identity: Identity) -> Self {
        let audit = AuditLogger::new(&config.audit_log_path);
        Self {
            config,
            identity,
            audit,
            trusted_owner: 0,
        }
    }

    /// Require a different owner than root for the policy file and the
    /// audit log. Only used by tests.
    pub fn with_trusted_owner(mut self, owner: u32) -> Self {
        self.trusted_owner = owner;
        self.audit = AuditLogger::new(&self.config.audit_log_path).owned_by(owner);
        self
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }

    fn load_policy(&self) -> std::result::Result<Policy, PolicyLoadError> {
        let (policy, warnings) =
            Policy::load_with_warnings(&self.config.policy_path, self.trusted_owner)?;
        self.report_skipped(&warnings);
        Ok(policy)
    }

    /// Skipped rules name users and commands; only root gets to read them.
    fn report_skipped(&self, warnings: &[ParseWarning]) {
        if warnings.is_empty() {
            return;
        }
        if self.identity.is_root() {
            for warning in warnings {
                warn!(
                    path = %self.config.policy_path.display(),
                    line = warning.line,
                    "skipping policy rule: {}",
                    warning.reason
                );
            }
        } else {
            debug!(skipped = warnings.len(), "policy has skipped rules");
        }
    }

    /// Commands the caller may run. No authentication: the answer only
    /// concerns the caller's own real identity.
    pub fn list(&self) -> Result<Vec<String>> {
        let policy = self.load_policy()?;
        Ok(policy
            .lookup(&self.identity.name)
            .map(|grant| grant.listing())
            .unwrap_or_default())
    }

    /// Authenticate, authorize and run `command`.
    ///
    /// Returns the decision when it was a denial. With a real executor a
    /// grant never returns.
    pub fn run(
        &self,
        command: &str,
        args: Vec<String>,
        authenticator: &dyn Authenticator,
        executor: &dyn Executor,
    ) -> Result<Decision> {
        let request = match AuthRequest::resolve(
            self.identity.clone(),
            command,
            args.clone(),
            &self.config.secure_path,
        ) {
            Ok(request) => request,
            Err(e) => {
                self.audit
                    .log_rejected_request(&self.identity, command, &args, &e.to_string())
                    .inspect_err(|audit_err| error!("{}", audit_err))?;
                return Err(e.into());
            }
        };

        let auth_result = authenticator.authenticate(&self.identity);
        if let Err(e) = &auth_result {
            debug!(user = %self.identity.name, error = %e, "authentication failed");
        }
        self.audit
            .log_authentication(&request, &auth_result)
            .inspect_err(|audit_err| error!("{}", audit_err))?;

        // The policy is only read once the caller has proven who they are.
        let (policy, policy_error) = if auth_result.is_ok() {
            match self.load_policy() {
                Ok(policy) => (policy, None),
                Err(e) => {
                    if self.identity.is_root() {
                        warn!("{}", e);
                    }
                    (Policy::default(), Some(e))
                }
            }
        } else {
            (Policy::default(), None)
        };

        let decision = decide(&request, &policy, AuthOutcome::from(&auth_result));

        let detail = match decision.outcome() {
            Outcome::DeniedAuthFailed => auth_result.as_ref().err().map(|e| e.to_string()),
            Outcome::DeniedPolicyMissing => policy_error.as_ref().map(|e| e.to_string()),
            Outcome::Granted | Outcome::DeniedUnauthorized => None,
        };
        self.audit
            .log_decision(&request, &decision, detail)
            .inspect_err(|audit_err| error!("{}", audit_err))?;

        if !decision.is_granted() {
            info!(user = %request.identity.name, command = %request.command, outcome = %decision.outcome(), "denied");
            if decision.outcome() == Outcome::DeniedPolicyMissing {
                if let Some(e) = policy_error {
                    return Err(e.into());
                }
            }
            return Ok(decision);
        }

        let plan = ExecPlan::prepare(
            &decision,
            &request,
            std::env::vars_os(),
            &self.config.env_policy(),
        )?;
        info!(user = %request.identity.name, command = %request.command, "executing");
        executor.exec(&plan)?;
        Ok(decision)
    }

    /// Edit the policy file. Only for a real uid of 0.
    pub fn edit(&self) -> Result<EditOutcome> {
        Ok(edit::edit_policy(
            &self.identity,
            &self.config.policy_path,
            &self.config.editor,
        )?)
    }
}
