//! rootgate runtime configuration
//!
//! A single optional TOML file. Defaults are baked in at build time and the
//! file may only override them if it is root-owned and not group or world
//! writable. The caller's environment is never consulted: it belongs to the
//! unprivileged user.

use crate::exec::EnvPolicy;
use crate::fsperm::{self, TrustError};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Config file location, overridable when building.
pub const DEFAULT_CONFIG_PATH: &str = match option_env!("ROOTGATE_CONFIG_PATH") {
    Some(path) => path,
    None => "/etc/rootgate/rootgate.toml",
};

const DEFAULT_POLICY_PATH: &str = match option_env!("ROOTGATE_POLICY_PATH") {
    Some(path) => path,
    None => "/etc/rootgate/policy",
};

const DEFAULT_AUDIT_PATH: &str = match option_env!("ROOTGATE_AUDIT_PATH") {
    Some(path) => path,
    None => "/var/log/rootgate/audit.log",
};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("refusing configuration file: {0}")]
    Untrusted(#[source] TrustError),

    #[error("cannot read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RootGateConfig {
    /// Allow-list of users and commands
    #[serde(default = "default_policy_path")]
    pub policy_path: PathBuf,

    /// Append-only decision log
    #[serde(default = "default_audit_path")]
    pub audit_log_path: PathBuf,

    /// Credential database
    #[serde(default = "default_shadow_path")]
    pub shadow_path: PathBuf,

    /// Directories searched for bare command names, and the target's PATH
    #[serde(default = "default_secure_path")]
    pub secure_path: Vec<PathBuf>,

    /// Replace the caller's PATH with `secure_path`
    #[serde(default = "default_true")]
    pub reset_path: bool,

    /// Extra variable names stripped before exec
    #[serde(default)]
    pub env_remove: Vec<String>,

    /// tracing filter directive (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Editor used by `-e`
    #[serde(default = "default_editor")]
    pub editor: String,
}

fn default_policy_path() -> PathBuf { PathBuf::from(DEFAULT_POLICY_PATH) }
fn default_audit_path() -> PathBuf { PathBuf::from(DEFAULT_AUDIT_PATH) }
fn default_shadow_path() -> PathBuf { PathBuf::from("/etc/shadow") }
fn default_secure_path() -> Vec<PathBuf> {
    ["/usr/local/sbin", "/usr/local/bin", "/usr/sbin", "/usr/bin", "/sbin", "/bin"]
        .iter()
        .map(PathBuf::from)
        .collect()
}
fn default_true() -> bool { true }
fn default_log_level() -> String { "warn".to_string() }
fn default_editor() -> String { "vi".to_string() }

impl Default for RootGateConfig {
    fn default() -> Self {
        Self {
            policy_path: default_policy_path(),
            audit_log_path: default_audit_path(),
            shadow_path: default_shadow_path(),
            secure_path: default_secure_path(),
            reset_path: default_true(),
            env_remove: Vec::new(),
            log_level: default_log_level(),
            editor: default_editor(),
        }
    }
}

impl RootGateConfig {
    pub fn env_policy(&self) -> EnvPolicy {
        EnvPolicy {
            secure_path: self.secure_path.clone(),
            reset_path: self.reset_path,
            extra_remove: self.env_remove.clone(),
        }
    }

    /// Parse TOML text. Unknown keys are an error so typos do not silently
    /// fall back to defaults.
    pub fn from_toml(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })
    }
}

/// Loads the configuration file, or defaults if it does not exist.
pub struct ConfigLoader {
    path: PathBuf,
    owner: u32,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::at(DEFAULT_CONFIG_PATH)
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            owner: 0,
        }
    }

    /// Require a different owner than root. Only used by tests.
    pub fn owned_by(mut self, owner: u32) -> Self {
        self.owner = owner;
        self
    }

    pub fn load(&self) -> Result<RootGateConfig, ConfigError> {
        let mut file = match fsperm::open_trusted(&self.path, self.owner, fsperm::NO_GROUP_OR_WORLD_WRITE) {
            Ok(file) => file,
            Err(e) if e.is_not_found() => {
                debug!(path = %self.path.display(), "no configuration file, using defaults");
                let config = RootGateConfig::default();
                Self::validate(&config)?;
                return Ok(config);
            }
            Err(e) => return Err(ConfigError::Untrusted(e)),
        };

        let mut text = String::new();
        file.read_to_string(&mut text)
            .map_err(|source| ConfigError::Read {
                path: self.path.clone(),
                source,
            })?;

        let config = RootGateConfig::from_toml(&text, &self.path)?;
        Self::validate(&config)?;
        debug!(path = %self.path.display(), "loaded configuration");
        Ok(config)
    }

    /// Every path must be absolute; a relative one would resolve against the
    /// caller's working directory.
    pub fn validate(config: &RootGateConfig) -> Result<(), ConfigError> {
        let named = [
            ("policy_path", &config.policy_path),
            ("audit_log_path", &config.audit_log_path),
            ("shadow_path", &config.shadow_path),
        ];
        for (key, path) in named {
            if !path.is_absolute() {
                return Err(ConfigError::Invalid(format!(
                    "{} must be absolute, got {}",
                    key,
                    path.display()
                )));
            }
        }

        if config.secure_path.is_empty() {
            return Err(ConfigError::Invalid("secure_path must not be empty".to_string()));
        }
        if let Some(dir) = config.secure_path.iter().find(|dir| !dir.is_absolute()) {
            return Err(ConfigError::Invalid(format!(
                "secure_path entries must be absolute, got {}",
                dir.display()
            )));
        }

        if config.editor.trim().is_empty() {
            return Err(ConfigError::Invalid("editor must not be empty".to_string()));
        }

        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    fn me() -> u32 {
        nix::unistd::getuid().as_raw()
    }

    fn write_config(dir: &Path, text: &str, mode: u32) -> PathBuf {
        let path = dir.join("rootgate.toml");
        fs::write(&path, text).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(mode)).unwrap();
        path
    }

    #[test]
    fn test_defaults() {
        let config = RootGateConfig::default();
        assert_eq!(config.shadow_path, PathBuf::from("/etc/shadow"));
        assert_eq!(config.log_level, "warn");
        assert!(config.reset_path);
        assert!(config.secure_path.contains(&PathBuf::from("/usr/bin")));
        assert!(ConfigLoader::validate(&config).is_ok());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigLoader::at(dir.path().join("absent.toml"))
            .owned_by(me())
            .load()
            .unwrap();
        assert_eq!(config, RootGateConfig::default());
    }

    #[test]
    fn test_partial_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            "policy_path = \"/srv/rootgate/policy\"\nlog_level = \"debug\"\nenv_remove = [\"HTTP_PROXY\"]\n",
            0o644,
        );

        let config = ConfigLoader::at(&path).owned_by(me()).load().unwrap();
        assert_eq!(config.policy_path, PathBuf::from("/srv/rootgate/policy"));
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.env_remove, vec!["HTTP_PROXY".to_string()]);
        assert_eq!(config.audit_log_path, RootGateConfig::default().audit_log_path);
    }

    #[test]
    fn test_writable_by_others_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), "log_level = \"trace\"\n", 0o666);

        let err = ConfigLoader::at(&path).owned_by(me()).load().unwrap_err();
        assert!(matches!(err, ConfigError::Untrusted(_)));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), "polcy_path = \"/x\"\n", 0o600);

        let err = ConfigLoader::at(&path).owned_by(me()).load().unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_relative_paths_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), "audit_log_path = \"audit.log\"\n", 0o600);
        let err = ConfigLoader::at(&path).owned_by(me()).load().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let path = write_config(dir.path(), "secure_path = [\"/usr/bin\", \"bin\"]\n", 0o600);
        let err = ConfigLoader::at(&path).owned_by(me()).load().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_env_policy_carries_settings() {
        let config = RootGateConfig {
            reset_path: false,
            env_remove: vec!["FOO".to_string()],
            ..RootGateConfig::default()
        };
        let policy = config.env_policy();
        assert!(!policy.reset_path);
        assert_eq!(policy.extra_remove, vec!["FOO".to_string()]);
        assert_eq!(policy.secure_path, config.secure_path);
    }
}
