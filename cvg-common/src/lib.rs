//! Shared types and utilities for remote target convergence.

pub mod config;
pub mod errors;
pub mod logging;
pub mod testing;
pub mod types;
pub mod util;

pub use config::{ConfigError, CvgConfig};
pub use errors::{ErrorCategory, ErrorCode, ErrorEntry};
pub use logging::{LogConfig, LogFormat, LoggingGuards, init_logging};
pub use types::{CommandResult, TargetOs};
pub use util::mask_sensitive_command;
