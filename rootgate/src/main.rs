//! rootgate: run an allow-listed command as root
//!
//! Installed setuid root. Every decision is appended to the audit log before
//! anything is executed.

mod cli;

use anyhow::{anyhow, Context};
use clap::Parser;
use cli::{Cli, Mode};
use librootgate::auth::AUTH_FAILED_MESSAGE;
use librootgate::decision::Outcome;
use librootgate::edit::EditOutcome;
use librootgate::invocation::ensure_privileged;
use librootgate::{
    ConfigLoader, Identity, Invocation, ProcessExecutor, RootGateError, ShadowAuthenticator,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

fn main() {
    let mode = Cli::parse().mode();
    std::process::exit(run(mode));
}

fn run(mode: Mode) -> i32 {
    if let Err(e) = ensure_privileged() {
        eprintln!("rootgate: {}", e);
        return e.exit_code();
    }

    let config = match ConfigLoader::new().load() {
        Ok(config) => config,
        Err(e) => {
            let e = RootGateError::from(e);
            eprintln!("rootgate: {}", e);
            return e.exit_code();
        }
    };

    if let Err(e) = init_logging(&config.log_level) {
        eprintln!("rootgate: {:#}", e);
    }

    let identity = match Identity::resolve() {
        Ok(identity) => identity,
        Err(e) => {
            let e = RootGateError::from(e);
            eprintln!("rootgate: {}", e);
            return e.exit_code();
        }
    };

    debug!(user = %identity.name, uid = identity.uid, ?mode, "starting");

    let shadow_path = config.shadow_path.clone();
    let invocation = Invocation::new(config, identity);
    let verbose = invocation.identity().is_root();

    let result = match mode {
        Mode::List => invocation.list().map(|commands| {
            for command in commands {
                println!("{}", command);
            }
            0
        }),
        Mode::Edit => invocation.edit().map(|outcome| {
            match outcome {
                EditOutcome::Unchanged => eprintln!("rootgate: policy unchanged"),
                EditOutcome::Installed { warnings } => {
                    for warning in warnings {
                        eprintln!("rootgate: policy {} (rule will be ignored)", warning);
                    }
                }
            }
            0
        }),
        Mode::Run { command, args } => {
            let authenticator = ShadowAuthenticator::new(shadow_path);
            invocation
                .run(&command, args, &authenticator, &ProcessExecutor)
                .map(|decision| {
                    match decision.outcome() {
                        Outcome::Granted => {}
                        Outcome::DeniedAuthFailed => eprintln!("rootgate: {}", AUTH_FAILED_MESSAGE),
                        Outcome::DeniedUnauthorized | Outcome::DeniedPolicyMissing => {
                            eprintln!("rootgate: permission denied")
                        }
                    }
                    decision.outcome().exit_code()
                })
        }
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            report(&e, verbose);
            e.exit_code()
        }
    }
}

/// Callers other than root get no configuration details; those are in the
/// audit log and the diagnostic log.
fn report(error: &RootGateError, verbose: bool) {
    match error {
        RootGateError::Request(e) => eprintln!("rootgate: {}", e),
        RootGateError::Exec(e) => eprintln!("rootgate: {}", e),
        RootGateError::Edit(e) => eprintln!("rootgate: {}", e),
        _ if verbose => eprintln!("rootgate: {}", error),
        _ => eprintln!("rootgate: permission denied (configuration error)"),
    }
}

/// The filter comes from the root-owned configuration, not `RUST_LOG`.
fn init_logging(level: &str) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_new(level).with_context(|| format!("invalid log_level '{}'", level))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow!(e))
}
