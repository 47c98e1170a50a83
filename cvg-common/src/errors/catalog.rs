//! Error Catalog for remote target convergence
//!
//! Every failure a user can see carries a stable code. Codes are grouped by
//! the stage that produced them:
//!
//! | Prefix      | Category  | Description                                   |
//! |-------------|-----------|-----------------------------------------------|
//! | CVG-C0xx    | Config    | Configuration file and environment errors     |
//! | CVG-T1xx    | Transport | Remote operations on the target host          |
//! | CHEFUPL0xx  | Upload    | Staging artifacts into the remote workspace   |
//! | CHEFCCR0xx  | Converge  | The remote client run itself failed           |
//!
//! The `CHEF*` codes are consumed by downstream tooling and must never be
//! renumbered.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier of a user-visible failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum ErrorCode {
    // Configuration (CVG-C)
    ConfigNotFound,
    ConfigReadError,
    ConfigParseError,
    ConfigValidationError,
    ConfigEnvError,

    // Transport (CVG-T)
    /// A remote operation (upload, mkdir, delete, exec) failed
    TransportFailed,
    /// The remote command did not finish within the configured timeout
    TransportTimeout,

    // Staging uploads (CHEFUPL)
    /// Generated config script could not be uploaded
    ConfigUploadFailed,
    /// Run reporter handler could not be uploaded
    HandlerUploadFailed,
    /// Policy bundle could not be uploaded
    PolicyUploadFailed,

    // Remote client run (CHEFCCR)
    /// The run failed and no report could be retrieved from the target
    RemoteReportUnavailable,
    /// A resource reported an error for one of its properties
    RemoteResourceError,
    /// A resource was given an action it does not support
    RemoteInvalidAction,
    /// A resource property failed validation
    RemoteValidationFailed,
    /// The policy references a resource type that does not exist
    RemoteUnknownResource,
    /// The policy sets a property the resource does not have
    RemoteUnknownProperty,
    /// The run failed for a reason that could not be classified
    RemoteUnknownFailure,
}

/// Static description of one catalog code.
#[derive(Debug, Clone, Copy)]
pub struct CodeInfo {
    pub category: ErrorCategory,
    /// Numeric part of the code, unique within the category.
    pub number: u16,
    pub message: &'static str,
    pub remediation: &'static [&'static str],
}

const UPLOAD_REMEDIATION: &[&str] = &[
    "Verify the remote temp directory is writable by the connecting user",
    "Check free disk space on the target",
];

const FIX_POLICY: &[&str] = &["Correct the resource properties in the policy and converge again"];

const fn config(
    number: u16,
    message: &'static str,
    remediation: &'static [&'static str],
) -> CodeInfo {
    CodeInfo {
        category: ErrorCategory::Config,
        number,
        message,
        remediation,
    }
}

const fn transport(
    number: u16,
    message: &'static str,
    remediation: &'static [&'static str],
) -> CodeInfo {
    CodeInfo {
        category: ErrorCategory::Transport,
        number,
        message,
        remediation,
    }
}

const fn upload(number: u16, what: &'static str) -> CodeInfo {
    CodeInfo {
        category: ErrorCategory::Upload,
        number,
        message: what,
        remediation: UPLOAD_REMEDIATION,
    }
}

const fn converge(
    number: u16,
    message: &'static str,
    remediation: &'static [&'static str],
) -> CodeInfo {
    CodeInfo {
        category: ErrorCategory::Converge,
        number,
        message,
        remediation,
    }
}

impl ErrorCode {
    /// Every code, in declaration order.
    pub const ALL: [ErrorCode; 17] = [
        Self::ConfigNotFound,
        Self::ConfigReadError,
        Self::ConfigParseError,
        Self::ConfigValidationError,
        Self::ConfigEnvError,
        Self::TransportFailed,
        Self::TransportTimeout,
        Self::ConfigUploadFailed,
        Self::HandlerUploadFailed,
        Self::PolicyUploadFailed,
        Self::RemoteReportUnavailable,
        Self::RemoteResourceError,
        Self::RemoteInvalidAction,
        Self::RemoteValidationFailed,
        Self::RemoteUnknownResource,
        Self::RemoteUnknownProperty,
        Self::RemoteUnknownFailure,
    ];

    #[must_use]
    pub const fn all() -> &'static [ErrorCode] {
        &Self::ALL
    }

    /// The catalog record for this code.
    #[must_use]
    pub const fn info(self) -> CodeInfo {
        match self {
            Self::ConfigNotFound => config(
                1,
                "No configuration file at the given path",
                &[
                    "Pass --config with the path to a configuration file",
                    "Create ~/.config/cvg/config.toml",
                ],
            ),
            Self::ConfigReadError => config(
                2,
                "The configuration file exists but could not be read",
                &["Check the file permissions of the configuration file"],
            ),
            Self::ConfigParseError => config(
                3,
                "The configuration file is not valid TOML",
                &[
                    "Validate the file with a TOML linter",
                    "Check for unbalanced quotes and brackets",
                ],
            ),
            Self::ConfigValidationError => config(
                4,
                "The configuration cannot be used for a converge",
                &[
                    "Set target.host in the configuration file or CVG_TARGET_HOST",
                    "Check numeric values are within their documented ranges",
                    "Use one of trace, debug, info, warn, error or fatal as the target log level",
                ],
            ),
            Self::ConfigEnvError => config(
                5,
                "A CVG_* environment variable was rejected",
                &["Unset or correct the CVG_* variable named in the error"],
            ),

            Self::TransportFailed => transport(
                100,
                "A remote operation on the target failed",
                &[
                    "Verify the target is reachable: ssh -o BatchMode=yes <host> echo ok",
                    "Check that the connecting user can write to the remote temp directory",
                ],
            ),
            Self::TransportTimeout => transport(
                101,
                "The remote command did not finish in time",
                &[
                    "Raise target.command_timeout_secs or set it to 0 to wait indefinitely",
                    "Log in to the target and check for a hung chef-client process",
                ],
            ),

            Self::ConfigUploadFailed => {
                upload(3, "Failed to upload the client configuration to the target")
            }
            Self::HandlerUploadFailed => {
                upload(4, "Failed to upload the run reporter to the target")
            }
            Self::PolicyUploadFailed => upload(5, "Failed to upload the policy bundle to the target"),

            Self::RemoteReportUnavailable => converge(
                1,
                "The converge failed and the run report could not be retrieved",
                &[
                    "Re-run with converge.target_log_level = \"debug\" to capture client output",
                    "Check the client log in the target cache directory",
                ],
            ),
            Self::RemoteResourceError => converge(
                2,
                "A resource reported an error during the converge",
                FIX_POLICY,
            ),
            Self::RemoteInvalidAction => converge(
                3,
                "A resource was given an action it does not support",
                FIX_POLICY,
            ),
            Self::RemoteValidationFailed => converge(
                4,
                "A resource property value failed validation",
                FIX_POLICY,
            ),
            Self::RemoteUnknownResource => converge(
                5,
                "The policy uses a resource type that does not exist",
                &[
                    "Check the resource name for typos",
                    "Make sure the cookbook providing the resource is in the policy",
                ],
            ),
            Self::RemoteUnknownProperty => converge(
                6,
                "The policy sets a property the resource does not have",
                &["Check the property name against the resource docs"],
            ),
            Self::RemoteUnknownFailure => converge(
                99,
                "The converge failed for an unknown reason",
                &[
                    "Re-run with converge.target_log_level = \"debug\"",
                    "Inspect the client output logged above",
                ],
            ),
        }
    }

    #[must_use]
    pub const fn code_number(&self) -> u16 {
        self.info().number
    }

    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.info().category
    }

    #[must_use]
    pub const fn message(&self) -> &'static str {
        self.info().message
    }

    #[must_use]
    pub const fn remediation(&self) -> &'static [&'static str] {
        self.info().remediation
    }

    /// `CHEFUPL005`, `CVG-T101` and so on.
    #[must_use]
    pub fn code_string(&self) -> String {
        format!("{}{:03}", self.category().prefix(), self.code_number())
    }

    #[must_use]
    pub fn from_code_string(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|candidate| candidate.code_string() == code)
    }

    /// A renderable entry carrying the catalog message. Callers may replace
    /// `message` with something more specific.
    #[must_use]
    pub fn entry(&self) -> ErrorEntry {
        let info = self.info();
        ErrorEntry {
            code: self.code_string(),
            category: info.category,
            message: info.message.to_string(),
            remediation: info.remediation.iter().map(|step| step.to_string()).collect(),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.code_string())
    }
}

/// Pipeline stage a code belongs to. Determines the code prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Config,
    Transport,
    Upload,
    Converge,
}

impl ErrorCategory {
    #[must_use]
    pub const fn prefix(&self) -> &'static str {
        match self {
            Self::Config => "CVG-C",
            Self::Transport => "CVG-T",
            Self::Upload => "CHEFUPL",
            Self::Converge => "CHEFCCR",
        }
    }

}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Config => "configuration",
            Self::Transport => "transport",
            Self::Upload => "upload",
            Self::Converge => "converge",
        })
    }
}

/// What the CLI prints (or serializes with `--json`) for a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub code: String,
    pub category: ErrorCategory,
    pub message: String,
    pub remediation: Vec<String>,
}

impl ErrorEntry {
    /// `[CODE] message` followed by numbered remediation steps.
    #[must_use]
    pub fn format_full(&self) -> String {
        let mut out = self.format_brief();
        out.push('\n');
        if self.remediation.is_empty() {
            return out;
        }
        out.push_str("\nRemediation steps:\n");
        for (n, step) in (1..).zip(&self.remediation) {
            out.push_str(&format!("  {n}. {step}\n"));
        }
        out
    }

    #[must_use]
    pub fn format_brief(&self) -> String {
        format!("[{}] {}", self.code, self.message)
    }
}

impl fmt::Display for ErrorEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format_brief())
    }
}
