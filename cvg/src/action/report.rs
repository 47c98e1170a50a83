//! Retrieval of the run report the remote handler leaves behind on failure.

use super::command::join_remote;
use crate::target::TargetHost;
use serde::Deserialize;
use tracing::{error, warn};

pub const REPORT_FILE_NAME: &str = "run-report.json";

/// `<cache>/cache/run-report.json`, in the target's path form.
pub fn report_path(target: &dyn TargetHost, cache_path: &str) -> String {
    let cache_dir = join_remote(cache_path, "cache");
    target.normalize_path(&join_remote(&cache_dir, REPORT_FILE_NAME))
}

/// The parts of `run-report.json` convergence cares about.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FailureReport {
    #[serde(default)]
    pub exception: Option<serde_json::Value>,
}

impl FailureReport {
    pub fn parse(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }

    /// The exception as text. Non-string values are rendered as JSON.
    pub fn exception_text(&self) -> Option<String> {
        match self.exception.as_ref()? {
            serde_json::Value::Null => None,
            serde_json::Value::String(text) => Some(text.clone()),
            other => Some(other.to_string()),
        }
    }
}

/// Result of looking for the remote report.
#[derive(Debug, Clone, PartialEq)]
pub enum ReportFetch {
    Retrieved(FailureReport),
    /// Nothing usable at `path`.
    Unavailable { path: String },
}

/// Read the report at `path`, deleting it once its content is in hand.
///
/// A report left behind would be picked up by the next failed run, so the
/// file is removed before parsing. A missing or unreadable report is not
/// deleted.
pub fn fetch_failure_report(target: &dyn TargetHost, path: &str) -> ReportFetch {
    let content = match target.fetch_file_contents(path) {
        Ok(Some(content)) => content,
        Ok(None) => {
            error!("Could not read remote report at {}", path);
            return ReportFetch::Unavailable {
                path: path.to_string(),
            };
        }
        Err(err) => {
            error!("Could not read remote report at {}: {}", path, err);
            return ReportFetch::Unavailable {
                path: path.to_string(),
            };
        }
    };

    if let Err(err) = target.del_file(path) {
        warn!("Failed to delete remote report {} (non-fatal): {}", path, err);
    }

    match FailureReport::parse(&content) {
        Ok(report) => {
            error!("Remote chef-client error follows:");
            error!(
                "{}",
                report
                    .exception_text()
                    .unwrap_or_else(|| "(no exception recorded)".to_string())
            );
            ReportFetch::Retrieved(report)
        }
        Err(err) => {
            error!("Remote report at {} is not valid JSON: {}", path, err);
            ReportFetch::Unavailable {
                path: path.to_string(),
            }
        }
    }
}
