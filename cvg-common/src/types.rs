//! Common types used across cvg components.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Operating system family of a target host.
///
/// Only the Windows/posix split matters to convergence: it decides the shell
/// dialect of every command sent to the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetOs {
    Windows,
    Linux,
    Macos,
    Other,
}

impl TargetOs {
    pub fn is_windows(&self) -> bool {
        matches!(self, Self::Windows)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Windows => "windows",
            Self::Linux => "linux",
            Self::Macos => "macos",
            Self::Other => "other",
        }
    }
}

impl Default for TargetOs {
    fn default() -> Self {
        Self::Linux
    }
}

impl std::fmt::Display for TargetOs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TargetOs {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "windows" | "win" => Ok(Self::Windows),
            "linux" => Ok(Self::Linux),
            "macos" | "darwin" | "mac_os_x" => Ok(Self::Macos),
            "other" | "posix" | "unix" => Ok(Self::Other),
            other => Err(format!("unknown target OS family '{}'", other)),
        }
    }
}

/// Result of a command executed on the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub exit_status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    pub fn new(exit_status: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_status,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// Check if the command succeeded (exit status 0)
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_os_parse() {
        assert_eq!("windows".parse::<TargetOs>().unwrap(), TargetOs::Windows);
        assert_eq!("Linux".parse::<TargetOs>().unwrap(), TargetOs::Linux);
        assert_eq!("darwin".parse::<TargetOs>().unwrap(), TargetOs::Macos);
        assert_eq!("unix".parse::<TargetOs>().unwrap(), TargetOs::Other);
        assert!("plan9".parse::<TargetOs>().is_err());
    }

    #[test]
    fn test_target_os_serde_snake_case() {
        let json = serde_json::to_string(&TargetOs::Windows).unwrap();
        assert_eq!(json, "\"windows\"");
        let parsed: TargetOs = serde_json::from_str("\"macos\"").unwrap();
        assert_eq!(parsed, TargetOs::Macos);
    }

    #[test]
    fn test_only_windows_is_windows() {
        assert!(TargetOs::Windows.is_windows());
        assert!(!TargetOs::Linux.is_windows());
        assert!(!TargetOs::Macos.is_windows());
        assert!(!TargetOs::Other.is_windows());
    }

    #[test]
    fn test_command_result_success() {
        assert!(CommandResult::new(0, "ok", "").success());
        assert!(!CommandResult::new(35, "", "").success());
    }
}
