//! `CVG_*` environment overrides.
//!
//! Every getter takes the value currently in effect (default or file) and
//! returns it unchanged, tagged `ConfigSource::Default`, when the variable
//! is unset. Bad values are collected rather than returned so one run can
//! report every problem.

use super::source::Sourced;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

const PREFIX: &str = "CVG_";

/// Levels accepted for both the local logger and the remote client.
const LOG_LEVELS: [&str; 7] = ["trace", "debug", "info", "warn", "error", "fatal", "off"];

/// A rejected environment variable.
#[derive(Debug, Error)]
pub enum EnvError {
    #[error("Invalid value for {var}: expected {expected}, got '{value}'")]
    InvalidValue {
        var: String,
        expected: String,
        value: String,
    },

    #[error("Value out of range for {var}: {value} (valid: {min}..={max})")]
    OutOfRange {
        var: String,
        value: u64,
        min: u64,
        max: u64,
    },

    #[error("Invalid log level for {var}: {value} (expected one of {})", LOG_LEVELS.join(", "))]
    InvalidLogLevel { var: String, value: String },
}

/// Reads overrides and remembers which variables were rejected.
#[derive(Debug, Default)]
pub struct EnvParser {
    errors: Vec<EnvError>,
}

impl EnvParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn errors(&self) -> &[EnvError] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Consume the parser, failing with every rejected variable.
    pub fn finish(self) -> Result<(), Vec<EnvError>> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }

    /// `(variable, value)` when `CVG_<name>` is set.
    fn lookup(name: &str) -> Option<(String, String)> {
        let var = format!("{PREFIX}{name}");
        std::env::var(&var).ok().map(|value| (var, value))
    }

    /// Keep `current` but attribute it to `var`, recording `error`.
    fn reject<T>(&mut self, current: T, var: String, error: EnvError) -> Sourced<T> {
        self.errors.push(error);
        Sourced::from_env(current, var)
    }

    /// A free-form string. An empty variable clears the value.
    pub fn optional(&mut self, name: &str, current: Option<String>) -> Sourced<Option<String>> {
        match Self::lookup(name) {
            Some((var, value)) if value.is_empty() => Sourced::from_env(None, var),
            Some((var, value)) => Sourced::from_env(Some(value), var),
            None => Sourced::default_value(current),
        }
    }

    /// `1/true/yes/on` or `0/false/no/off`; empty means false.
    pub fn flag(&mut self, name: &str, current: bool) -> Sourced<bool> {
        let Some((var, value)) = Self::lookup(name) else {
            return Sourced::default_value(current);
        };
        match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Sourced::from_env(true, var),
            "0" | "false" | "no" | "off" | "" => Sourced::from_env(false, var),
            _ => {
                let error = EnvError::InvalidValue {
                    var: var.clone(),
                    expected: "true/false, yes/no, on/off or 1/0".to_string(),
                    value,
                };
                self.reject(current, var, error)
            }
        }
    }

    /// An unsigned number inside `range`.
    pub fn number(&mut self, name: &str, current: u64, range: RangeInclusive<u64>) -> Sourced<u64> {
        let Some((var, value)) = Self::lookup(name) else {
            return Sourced::default_value(current);
        };
        match value.trim().parse::<u64>() {
            Ok(n) if range.contains(&n) => Sourced::from_env(n, var),
            Ok(n) => {
                let error = EnvError::OutOfRange {
                    var: var.clone(),
                    value: n,
                    min: *range.start(),
                    max: *range.end(),
                };
                self.reject(current, var, error)
            }
            Err(_) => {
                let error = EnvError::InvalidValue {
                    var: var.clone(),
                    expected: "a whole number".to_string(),
                    value,
                };
                self.reject(current, var, error)
            }
        }
    }

    /// Any value with a [`FromStr`] impl. `expected` describes valid input.
    pub fn parsed<T: FromStr>(&mut self, name: &str, current: T, expected: &str) -> Sourced<T> {
        let Some((var, value)) = Self::lookup(name) else {
            return Sourced::default_value(current);
        };
        match value.parse::<T>() {
            Ok(parsed) => Sourced::from_env(parsed, var),
            Err(_) => {
                let error = EnvError::InvalidValue {
                    var: var.clone(),
                    expected: expected.to_string(),
                    value,
                };
                self.reject(current, var, error)
            }
        }
    }

    /// A local path, with `~/` expanded.
    pub fn path(&mut self, name: &str, current: &Path) -> Sourced<PathBuf> {
        match Self::lookup(name) {
            Some((var, value)) => Sourced::from_env(expand_home(&value), var),
            None => Sourced::default_value(current.to_path_buf()),
        }
    }

    /// A log level, lowercased.
    pub fn log_level(&mut self, name: &str, current: &str) -> Sourced<String> {
        let Some((var, value)) = Self::lookup(name) else {
            return Sourced::default_value(current.to_string());
        };
        let lower = value.to_ascii_lowercase();
        if is_valid_log_level(&lower) {
            Sourced::from_env(lower, var)
        } else {
            let error = EnvError::InvalidLogLevel {
                var: var.clone(),
                value,
            };
            self.reject(current.to_string(), var, error)
        }
    }
}

pub fn is_valid_log_level(level: &str) -> bool {
    LOG_LEVELS.contains(&level)
}

/// Expand a leading `~/` to the current user's home directory.
pub fn expand_home(value: &str) -> PathBuf {
    if let Some(stripped) = value.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(stripped);
    }
    PathBuf::from(value)
}
