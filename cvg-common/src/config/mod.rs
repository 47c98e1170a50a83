//! Configuration system for cvg.
//!
//! Configuration is layered: built-in defaults, then the TOML file, then
//! `CVG_*` environment variables. Every override is recorded with its
//! source so `cvg` can explain where a value came from.

pub mod env;
pub mod source;

pub use env::{EnvError, EnvParser, expand_home, is_valid_log_level};
pub use source::{ConfigSource, ConfigValueSource, Sourced};

use crate::errors::ErrorCode;
use crate::types::TargetOs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Default location of the local trusted certificate directory.
pub const DEFAULT_TRUSTED_CERTS_DIR: &str = "~/.chef/trusted_certs";

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("Invalid environment: {}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    Env(Vec<EnvError>),
}

impl ConfigError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::ConfigNotFound,
            Self::Read { .. } => ErrorCode::ConfigReadError,
            Self::Parse { .. } => ErrorCode::ConfigParseError,
            Self::Validation(_) => ErrorCode::ConfigValidationError,
            Self::Env(_) => ErrorCode::ConfigEnvError,
        }
    }
}

/// Severity of a configuration finding that does not block a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
}

/// Non-fatal finding produced by [`CvgConfig::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigWarning {
    pub key: String,
    pub message: String,
    pub severity: Severity,
}

/// cvg configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CvgConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub target: TargetConfig,
    #[serde(default)]
    pub converge: ConvergeSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Local log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// Connection settings for the target host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// SSH hostname or IP address.
    #[serde(default)]
    pub host: Option<String>,
    /// SSH username.
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Path to SSH private key.
    #[serde(default)]
    pub identity_file: Option<PathBuf>,
    #[serde(default)]
    pub os: TargetOs,
    /// Prefix posix commands with sudo.
    #[serde(default)]
    pub sudo: bool,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Upper bound on the remote client run. 0 waits indefinitely.
    #[serde(default)]
    pub command_timeout_secs: u64,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            host: None,
            user: None,
            port: default_port(),
            identity_file: None,
            os: TargetOs::default(),
            sudo: false,
            connect_timeout_secs: default_connect_timeout(),
            command_timeout_secs: 0,
        }
    }
}

impl TargetConfig {
    /// `user@host` or just `host`.
    pub fn ssh_destination(&self) -> Option<String> {
        let host = self.host.as_deref()?;
        Some(match self.user.as_deref() {
            Some(user) => format!("{}@{}", user, host),
            None => host.to_string(),
        })
    }
}

/// Settings that shape the convergence itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvergeSettings {
    /// Log level passed to the remote client. Unset leaves the client default.
    #[serde(default)]
    pub target_log_level: Option<String>,
    #[serde(default = "default_trusted_certs_dir")]
    pub trusted_certs_dir: PathBuf,
    /// Overrides the target's own cache path.
    #[serde(default)]
    pub cache_path: Option<String>,
    /// Overrides the bundled run reporter.
    #[serde(default)]
    pub run_reporter_path: Option<PathBuf>,
    #[serde(default)]
    pub data_collector: DataCollectorConfig,
}

impl Default for ConvergeSettings {
    fn default() -> Self {
        Self {
            target_log_level: None,
            trusted_certs_dir: default_trusted_certs_dir(),
            cache_path: None,
            run_reporter_path: None,
            data_collector: DataCollectorConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataCollectorConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_port() -> u16 {
    22
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_trusted_certs_dir() -> PathBuf {
    expand_home(DEFAULT_TRUSTED_CERTS_DIR)
}

/// Default configuration file location (`~/.config/cvg/config.toml`).
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("cvg").join("config.toml"))
}

impl CvgConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.converge.trusted_certs_dir =
            expand_home(&config.converge.trusted_certs_dir.to_string_lossy());
        if let Some(identity) = config.target.identity_file.take() {
            config.target.identity_file = Some(expand_home(&identity.to_string_lossy()));
        }
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load the file at `path` if given, else the default location if it
    /// exists, else built-in defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => match default_config_path() {
                Some(default) if default.exists() => Self::load(&default),
                _ => Ok(Self::default()),
            },
        }
    }

    /// Apply `CVG_*` environment overrides on top of the loaded values.
    ///
    /// Returns the keys that were overridden. All invalid variables are
    /// reported together.
    pub fn apply_env_overrides(&mut self) -> Result<Vec<ConfigValueSource>, ConfigError> {
        let mut env = EnvParser::new();
        let mut applied = Vec::new();

        fn take<T>(
            applied: &mut Vec<ConfigValueSource>,
            key: &str,
            sourced: Sourced<T>,
            slot: &mut T,
        ) {
            if sourced.is_default() {
                return;
            }
            debug!(
                "{} overridden by {}",
                key,
                sourced.origin.as_deref().unwrap_or("environment")
            );
            applied.push(ConfigValueSource {
                key: key.to_string(),
                source: sourced.source,
                origin: sourced.origin,
            });
            *slot = sourced.value;
        }

        let general = &mut self.general;
        let level = env.log_level("LOG_LEVEL", &general.log_level);
        take(&mut applied, "general.log_level", level, &mut general.log_level);

        let target = &mut self.target;
        let host = env.optional("TARGET_HOST", target.host.clone());
        take(&mut applied, "target.host", host, &mut target.host);
        let user = env.optional("TARGET_USER", target.user.clone());
        take(&mut applied, "target.user", user, &mut target.user);

        let port = env.parsed("TARGET_PORT", target.port, "a port between 1 and 65535");
        take(&mut applied, "target.port", port, &mut target.port);

        let identity = env
            .optional(
                "TARGET_IDENTITY_FILE",
                target
                    .identity_file
                    .as_ref()
                    .map(|path| path.to_string_lossy().into_owned()),
            )
            .map(|path| path.as_deref().map(expand_home));
        take(&mut applied, "target.identity_file", identity, &mut target.identity_file);

        let os = env.parsed("TARGET_OS", target.os, "windows, linux, macos or other");
        take(&mut applied, "target.os", os, &mut target.os);
        let sudo = env.flag("TARGET_SUDO", target.sudo);
        take(&mut applied, "target.sudo", sudo, &mut target.sudo);

        let connect = env.number("CONNECT_TIMEOUT_SECS", target.connect_timeout_secs, 1..=600);
        take(
            &mut applied,
            "target.connect_timeout_secs",
            connect,
            &mut target.connect_timeout_secs,
        );
        let command = env.number(
            "COMMAND_TIMEOUT_SECS",
            target.command_timeout_secs,
            0..=7 * 24 * 3600,
        );
        take(
            &mut applied,
            "target.command_timeout_secs",
            command,
            &mut target.command_timeout_secs,
        );

        let converge = &mut self.converge;
        let target_level = env.optional("TARGET_LOG_LEVEL", converge.target_log_level.clone());
        take(
            &mut applied,
            "converge.target_log_level",
            target_level,
            &mut converge.target_log_level,
        );
        let certs = env.path("TRUSTED_CERTS_DIR", &converge.trusted_certs_dir);
        take(
            &mut applied,
            "converge.trusted_certs_dir",
            certs,
            &mut converge.trusted_certs_dir,
        );
        let cache = env.optional("CACHE_PATH", converge.cache_path.clone());
        take(&mut applied, "converge.cache_path", cache, &mut converge.cache_path);

        let dc = &mut converge.data_collector;
        let url = env.optional("DATA_COLLECTOR_URL", dc.url.clone());
        take(&mut applied, "converge.data_collector.url", url, &mut dc.url);
        let token = env.optional("DATA_COLLECTOR_TOKEN", dc.token.clone());
        take(&mut applied, "converge.data_collector.token", token, &mut dc.token);

        env.finish().map_err(ConfigError::Env)?;
        Ok(applied)
    }

    /// Check the configuration is usable for a converge.
    ///
    /// Hard problems are returned as [`ConfigError::Validation`]; anything
    /// that only changes behaviour comes back as a warning.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, ConfigError> {
        let mut problems = Vec::new();
        let mut warnings = Vec::new();

        match self.target.host.as_deref() {
            None => problems.push("target.host is not set".to_string()),
            Some(host) if host.trim().is_empty() => {
                problems.push("target.host is empty".to_string())
            }
            Some(_) => {}
        }
        if self.target.port == 0 {
            problems.push("target.port must be between 1 and 65535".to_string());
        }
        if !is_valid_log_level(&self.general.log_level) {
            problems.push(format!(
                "general.log_level '{}' is not a known level",
                self.general.log_level
            ));
        }
        if let Some(level) = self.converge.target_log_level.as_deref()
            && !is_valid_log_level(level)
        {
            problems.push(format!(
                "converge.target_log_level '{}' is not a known level",
                level
            ));
        }

        let dc = &self.converge.data_collector;
        match (dc.url.is_some(), dc.token.is_some()) {
            (true, false) => warnings.push(ConfigWarning {
                key: "converge.data_collector.token".to_string(),
                message: "data collector url is set without a token; reporting is disabled"
                    .to_string(),
                severity: Severity::Warning,
            }),
            (false, true) => warnings.push(ConfigWarning {
                key: "converge.data_collector.url".to_string(),
                message: "data collector token is set without a url; reporting is disabled"
                    .to_string(),
                severity: Severity::Warning,
            }),
            _ => {}
        }
        if !self.converge.trusted_certs_dir.is_dir() {
            warnings.push(ConfigWarning {
                key: "converge.trusted_certs_dir".to_string(),
                message: format!(
                    "{} does not exist; no certificates will be uploaded",
                    self.converge.trusted_certs_dir.display()
                ),
                severity: Severity::Info,
            });
        }

        if problems.is_empty() {
            Ok(warnings)
        } else {
            Err(ConfigError::Validation(problems))
        }
    }
}

#[cfg(test)]
pub(crate) fn env_test_lock() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
