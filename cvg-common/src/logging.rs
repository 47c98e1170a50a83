//! Logging initialisation shared by cvg binaries.
//!
//! ```ignore
//! let log_config = LogConfig::from_env("info").with_stderr();
//! let _guards = init_logging(&log_config)?;
//! ```

use std::path::PathBuf;
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Compact,
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "pretty" => Some(Self::Pretty),
            "compact" => Some(Self::Compact),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConsoleTarget {
    Stdout,
    Stderr,
}

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Invalid log filter '{filter}': {message}")]
    InvalidFilter { filter: String, message: String },

    #[error("Failed to create log directory {path}: {source}")]
    LogDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("A global tracing subscriber is already installed")]
    AlreadyInitialized,
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    level: String,
    format: LogFormat,
    console: ConsoleTarget,
    file: Option<PathBuf>,
}

impl LogConfig {
    /// Build from `CVG_LOG_LEVEL`, `CVG_LOG_FORMAT` and `CVG_LOG_FILE`.
    pub fn from_env(default_level: &str) -> Self {
        let level = std::env::var("CVG_LOG_LEVEL").unwrap_or_else(|_| default_level.to_string());
        let format = std::env::var("CVG_LOG_FORMAT")
            .ok()
            .and_then(|v| LogFormat::parse(&v))
            .unwrap_or(LogFormat::Compact);
        let file = std::env::var("CVG_LOG_FILE")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);
        Self {
            level,
            format,
            console: ConsoleTarget::Stdout,
            file,
        }
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Send console output to stderr, keeping stdout for results.
    pub fn with_stderr(mut self) -> Self {
        self.console = ConsoleTarget::Stderr;
        self
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    pub fn level(&self) -> &str {
        &self.level
    }

    fn filter(&self) -> Result<EnvFilter, LoggingError> {
        // A bare level applies to our crates only; anything else is treated
        // as a full filter directive.
        let directive = if self.level.contains('=') || self.level.contains(',') {
            self.level.clone()
        } else {
            format!("warn,cvg={0},cvg_common={0}", self.level)
        };
        EnvFilter::try_new(&directive).map_err(|e| LoggingError::InvalidFilter {
            filter: directive,
            message: e.to_string(),
        })
    }
}

/// Keeps non-blocking writers flushing until dropped.
pub struct LoggingGuards {
    _guards: Vec<WorkerGuard>,
}

/// Install the global tracing subscriber.
pub fn init_logging(config: &LogConfig) -> Result<LoggingGuards, LoggingError> {
    let mut guards = Vec::new();

    let console_writer = match config.console {
        ConsoleTarget::Stdout => BoxMakeWriter::new(std::io::stdout),
        ConsoleTarget::Stderr => BoxMakeWriter::new(std::io::stderr),
    };
    let console_layer = match config.format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(console_writer)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .pretty()
            .with_writer(console_writer)
            .boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .compact()
            .with_target(false)
            .with_writer(console_writer)
            .boxed(),
    };

    let file_layer = match &config.file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."));
            std::fs::create_dir_all(&dir).map_err(|source| LoggingError::LogDir {
                path: dir.clone(),
                source,
            })?;
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "cvg.log".to_string());
            let appender = tracing_appender::rolling::never(&dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            guards.push(guard);
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_ansi(false),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(config.filter()?)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|_| LoggingError::AlreadyInitialized)?;

    Ok(LoggingGuards { _guards: guards })
}
