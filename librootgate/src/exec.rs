//! Replace the process image with an approved command running as root

use crate::decision::Decision;
use crate::request::AuthRequest;
use nix::unistd::{setgroups, Gid};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::Command;
use thiserror::Error;
use tracing::debug;

/// Variables removed by exact name.
const DANGEROUS_NAMES: &[&str] = &[
    "IFS",
    "ENV",
    "BASH_ENV",
    "SHELLOPTS",
    "BASHOPTS",
    "PS4",
    "GLOBIGNORE",
    "CDPATH",
    "PERLLIB",
    "PERL5LIB",
    "PERL5OPT",
    "PYTHONHOME",
    "PYTHONPATH",
    "PYTHONSTARTUP",
    "RUBYLIB",
    "RUBYOPT",
    "NODE_OPTIONS",
    "GCONV_PATH",
    "LOCPATH",
    "NLSPATH",
    "HOSTALIASES",
    "RESOLV_HOST_CONF",
];

/// Variables removed by prefix.
const DANGEROUS_PREFIXES: &[&str] = &["LD_", "DYLD_", "MALLOC_", "BASH_FUNC_", "ROOTGATE_"];

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("refusing to execute {0}: request was not granted")]
    NotGranted(String),

    #[error("cannot set root group list: {0}")]
    Groups(#[source] nix::Error),

    #[error("{command}: {source}")]
    Exec {
        command: String,
        #[source]
        source: io::Error,
    },
}

/// Which environment the target gets.
#[derive(Debug, Clone, Default)]
pub struct EnvPolicy {
    pub secure_path: Vec<PathBuf>,
    pub reset_path: bool,
    pub extra_remove: Vec<String>,
}

/// True when `name=value` could redirect dynamic linking or shell startup.
pub fn is_dangerous_env_var(name: &str, value: &str) -> bool {
    DANGEROUS_NAMES.contains(&name)
        || DANGEROUS_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
        || value.starts_with("() {")
}

/// Everything needed to exec, computed up front so it can be inspected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecPlan {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: BTreeMap<OsString, OsString>,
}

impl ExecPlan {
    /// Build the plan for a granted request. The program is the canonical
    /// path the decision was made on.
    pub fn prepare<I>(
        decision: &Decision,
        request: &AuthRequest,
        inherited: I,
        policy: &EnvPolicy,
    ) -> Result<Self, ExecError>
    where
        I: IntoIterator<Item = (OsString, OsString)>,
    {
        if !decision.is_granted() {
            return Err(ExecError::NotGranted(request.command.clone()));
        }

        let mut env = BTreeMap::new();
        for (name, value) in inherited {
            let keep = match name.to_str() {
                Some(n) => {
                    !is_dangerous_env_var(n, &value.to_string_lossy())
                        && !policy.extra_remove.iter().any(|x| x == n)
                }
                None => false,
            };
            if keep {
                env.insert(name, value);
            } else {
                debug!(variable = ?name, "removed from target environment");
            }
        }

        if policy.reset_path {
            let joined = std::env::join_paths(&policy.secure_path)
                .unwrap_or_else(|_| OsString::from("/usr/sbin:/usr/bin:/sbin:/bin"));
            env.insert(OsString::from("PATH"), joined);
        }

        let identity = &request.identity;
        env.insert("ROOTGATE_USER".into(), identity.name.clone().into());
        env.insert("ROOTGATE_UID".into(), identity.uid.to_string().into());
        env.insert("ROOTGATE_GID".into(), identity.gid.to_string().into());
        env.insert("ROOTGATE_COMMAND".into(), request.command_line().into());

        Ok(Self {
            program: PathBuf::from(&request.command),
            args: request.args.clone(),
            env,
        })
    }

    /// The command as it will be exec'd: clean environment, uid and gid 0.
    pub fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .env_clear()
            .envs(&self.env)
            .uid(0)
            .gid(0);
        command
    }
}

pub trait Executor {
    /// Run the plan. A real executor only returns on failure.
    fn exec(&self, plan: &ExecPlan) -> Result<(), ExecError>;
}

/// Replaces the current process with the planned command.
pub struct ProcessExecutor;

impl Executor for ProcessExecutor {
    fn exec(&self, plan: &ExecPlan) -> Result<(), ExecError> {
        setgroups(&[Gid::from_raw(0)]).map_err(ExecError::Groups)?;

        let source = plan.command().exec();
        Err(ExecError::Exec {
            command: plan.program.display().to_string(),
            source,
        })
    }
}
