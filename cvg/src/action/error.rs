use crate::target::TransportError;
use cvg_common::{ErrorCode, ErrorEntry};
use thiserror::Error;

/// Why a convergence attempt failed.
#[derive(Debug, Error)]
pub enum ConvergeError {
    #[error("Failed to upload the policy bundle to {remote_path}: {source}")]
    PolicyUploadFailed {
        remote_path: String,
        #[source]
        source: TransportError,
    },

    #[error("Failed to upload the client configuration to {remote_path}: {source}")]
    ConfigUploadFailed {
        remote_path: String,
        #[source]
        source: TransportError,
    },

    #[error("Failed to upload the run reporter to {remote_path}: {source}")]
    HandlerUploadFailed {
        remote_path: String,
        #[source]
        source: TransportError,
    },

    /// A request value that cannot be written into the client config.
    #[error("Invalid {field} '{value}'")]
    InvalidRequest { field: &'static str, value: String },

    /// Transport failure outside the typed upload steps.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The remote run failed without reporting an exception. The path is
    /// set when the report itself could not be read.
    #[error(
        "chef-client failed and no exception was reported (report: {})",
        .report_path.as_deref().unwrap_or("no exception field")
    )]
    RemoteReportUnavailable { report_path: Option<String> },

    /// The remote run failed with a recognised exception.
    #[error("{message}")]
    RemoteRunFailed {
        code: ErrorCode,
        args: Vec<String>,
        message: String,
    },

    /// The remote run failed with an exception no rule recognises.
    #[error("chef-client failed: {exception}")]
    RemoteRunFailedUnknownReason { exception: String },
}

impl ConvergeError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::PolicyUploadFailed { .. } => ErrorCode::PolicyUploadFailed,
            Self::ConfigUploadFailed { .. } => ErrorCode::ConfigUploadFailed,
            Self::HandlerUploadFailed { .. } => ErrorCode::HandlerUploadFailed,
            Self::InvalidRequest { .. } => ErrorCode::ConfigValidationError,
            Self::Transport(err) => err.code(),
            Self::RemoteReportUnavailable { .. } => ErrorCode::RemoteReportUnavailable,
            Self::RemoteRunFailed { code, .. } => *code,
            Self::RemoteRunFailedUnknownReason { .. } => ErrorCode::RemoteUnknownFailure,
        }
    }

    /// Catalog entry with this failure's details in place of the generic
    /// message.
    pub fn entry(&self) -> ErrorEntry {
        let mut entry = self.code().entry();
        entry.message = self.to_string();
        entry
    }

    /// Whether the remote client ran and failed, as opposed to the
    /// workspace never being staged.
    pub fn is_remote_failure(&self) -> bool {
        matches!(
            self,
            Self::RemoteReportUnavailable { .. }
                | Self::RemoteRunFailed { .. }
                | Self::RemoteRunFailedUnknownReason { .. }
        )
    }
}
