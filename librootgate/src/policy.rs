//! Policy store: the allow-list of users and the commands they may run
//!
//! File grammar, one rule per line:
//!
//! ```text
//! # comment
//! alice:all
//! bob:/usr/bin/apt,/bin/systemctl
//! ```
//!
//! Malformed lines are skipped with a warning so one typo cannot lock every
//! user out. A user left with no valid rule is simply absent, which denies.

use crate::fsperm::{self, TrustError};
use crate::grant::{Grant, ALL_KEYWORD};
use crate::request::canonicalize_policy_entry;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum PolicyLoadError {
    #[error("policy file {0} does not exist")]
    Missing(PathBuf),

    #[error("refusing policy file: {0}")]
    Untrusted(#[source] TrustError),

    #[error("cannot read policy file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A skipped line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseWarning {
    pub line: usize,
    pub reason: String,
}

impl fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.reason)
    }
}

/// Where the decision engine asks for a user's grant.
pub trait GrantLookup {
    fn lookup(&self, username: &str) -> Option<&Grant>;
}

/// Parsed allow-list. Built fresh on every invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Policy {
    grants: BTreeMap<String, Grant>,
}

impl Policy {
    /// Load a root-owned policy file with no group or world access.
    pub fn load(path: &Path) -> Result<Self, PolicyLoadError> {
        Self::load_owned_by(path, 0)
    }

    /// Like [`Policy::load`] but with an explicit required owner.
    pub fn load_owned_by(path: &Path, owner: u32) -> Result<Self, PolicyLoadError> {
        let (policy, warnings) = Self::load_with_warnings(path, owner)?;
        for warning in &warnings {
            debug!(
                path = %path.display(),
                line = warning.line,
                "skipping policy rule: {}",
                warning.reason
            );
        }
        Ok(policy)
    }

    /// Load and hand back the skipped lines instead of logging them. They
    /// name users and commands, so the caller decides who gets to see them.
    pub fn load_with_warnings(
        path: &Path,
        owner: u32,
    ) -> Result<(Self, Vec<ParseWarning>), PolicyLoadError> {
        let mut file = fsperm::open_trusted(path, owner, fsperm::NO_GROUP_OR_WORLD_ACCESS)
            .map_err(|e| {
                if e.is_not_found() {
                    PolicyLoadError::Missing(path.to_path_buf())
                } else {
                    PolicyLoadError::Untrusted(e)
                }
            })?;

        let mut text = String::new();
        file.read_to_string(&mut text)
            .map_err(|source| PolicyLoadError::Read {
                path: path.to_path_buf(),
                source,
            })?;

        let (policy, warnings) = Self::parse(&text);
        debug!(path = %path.display(), users = policy.grants.len(), "loaded policy");
        Ok((policy, warnings))
    }

    /// Parse policy text, returning the policy and every skipped line.
    pub fn parse(text: &str) -> (Self, Vec<ParseWarning>) {
        let mut policy = Policy::default();
        let mut warnings = Vec::new();

        for (index, raw) in text.lines().enumerate() {
            match parse_line(raw) {
                Ok(Some((user, grant))) => policy.insert(user, grant),
                Ok(None) => {}
                Err(reason) => warnings.push(ParseWarning {
                    line: index + 1,
                    reason,
                }),
            }
        }

        (policy, warnings)
    }

    /// Merge `grant` into whatever `user` already has.
    pub fn insert(&mut self, user: String, grant: Grant) {
        match self.grants.get_mut(&user) {
            Some(existing) => existing.merge(grant),
            None => {
                self.grants.insert(user, grant);
            }
        }
    }

    pub fn users(&self) -> impl Iterator<Item = &str> {
        self.grants.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }
}

impl GrantLookup for Policy {
    fn lookup(&self, username: &str) -> Option<&Grant> {
        self.grants.get(username)
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (user, grant) in &self.grants {
            writeln!(f, "{}:{}", user, grant)?;
        }
        Ok(())
    }
}

fn parse_line(raw: &str) -> Result<Option<(String, Grant)>, String> {
    let line = raw.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let (user, rule) = line
        .split_once(':')
        .ok_or_else(|| "missing ':' separator".to_string())?;

    let user = user.trim();
    if user.is_empty() {
        return Err("empty username".to_string());
    }
    if user.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(format!("invalid username '{}'", user));
    }

    let rule = rule.trim();
    if rule == ALL_KEYWORD {
        return Ok(Some((user.to_string(), Grant::AllCommands)));
    }
    if rule.is_empty() {
        return Err(format!("no commands listed for '{}'", user));
    }

    let mut commands = BTreeSet::new();
    for entry in rule.split(',').map(str::trim) {
        if entry.is_empty() {
            return Err("empty command entry".to_string());
        }
        let canonical = canonicalize_policy_entry(entry)
            .ok_or_else(|| format!("'{}' is not an absolute command path", entry))?;
        commands.insert(canonical);
    }

    Ok(Some((user.to_string(), Grant::CommandSet(commands))))
}
