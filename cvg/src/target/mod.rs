//! The target host seam.
//!
//! Convergence only ever talks to the remote machine through [`TargetHost`].
//! [`SshTarget`] drives a real host with the system `ssh`/`scp` binaries;
//! [`MockTarget`] is a scripted in-memory stand-in for tests.

pub mod mock;
pub mod ssh;

pub use mock::{MockTarget, TargetCall};
pub use ssh::SshTarget;

use cvg_common::{CommandResult, ErrorCode, TargetOs};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Cache directory used on posix targets when none is configured.
pub const POSIX_CACHE_PATH: &str = "/var/chef-workstation";
/// Cache directory used on Windows targets when none is configured.
pub const WINDOWS_CACHE_PATH: &str = "C:/chef-workstation";

/// Failures of the transport itself. These carry no catalog code of their
/// own beyond the generic transport entries.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{operation} failed on {host} (exit {exit_code}): {stderr}")]
    Failed {
        operation: String,
        host: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("{operation} on {host} timed out after {timeout:?}")]
    Timeout {
        operation: String,
        host: String,
        timeout: Duration,
    },

    #[error("{0}")]
    Remote(String),
}

impl TransportError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Timeout { .. } => ErrorCode::TransportTimeout,
            _ => ErrorCode::TransportFailed,
        }
    }
}

/// Operations a convergence needs from the remote machine.
///
/// Every call blocks until the remote side has finished.
pub trait TargetHost {
    /// Human-readable name used in logs.
    fn name(&self) -> &str;

    fn base_os(&self) -> TargetOs;

    /// Cache directory the remote client uses for its state and reports.
    fn ws_cache_path(&self) -> String {
        default_cache_path(self.base_os()).to_string()
    }

    /// Convert a path into the form the target's tools expect.
    fn normalize_path(&self, path: &str) -> String {
        normalize_path_for(self.base_os(), path)
    }

    /// Create a fresh directory owned by the connecting user.
    fn temp_dir(&self) -> Result<String, TransportError>;

    fn upload_file(&self, local: &Path, remote: &str) -> Result<(), TransportError>;

    fn make_directory(&self, path: &str) -> Result<(), TransportError>;

    /// Run a command. A non-zero exit status is a result, not an error.
    fn run_command(&self, command: &str) -> Result<CommandResult, TransportError>;

    fn del_dir(&self, path: &str) -> Result<(), TransportError>;

    fn del_file(&self, path: &str) -> Result<(), TransportError>;

    /// Read a remote file. `Ok(None)` when it does not exist or is unreadable.
    fn fetch_file_contents(&self, path: &str) -> Result<Option<String>, TransportError>;
}

pub fn default_cache_path(os: TargetOs) -> &'static str {
    if os.is_windows() {
        WINDOWS_CACHE_PATH
    } else {
        POSIX_CACHE_PATH
    }
}

/// Windows tools accept forward slashes everywhere, while backslashes are
/// escapes in the shells we pass paths through.
pub fn normalize_path_for(os: TargetOs, path: &str) -> String {
    if os.is_windows() {
        path.replace('\\', "/")
    } else {
        path.to_string()
    }
}
