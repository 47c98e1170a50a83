//! Converging a target with a policy bundle.
//!
//! [`ConvergeTarget::perform`] stages a workspace, runs chef-client in it,
//! removes the workspace and classifies the result. Failed runs are turned
//! into a [`ConvergeError`] by the injected [`FailureMapper`].

pub mod command;
pub mod error;
pub mod execute;
pub mod failure;
pub mod outcome;
pub mod report;
pub mod workspace;

pub use command::compose_run_command;
pub use error::ConvergeError;
pub use failure::{CcrFailureMapper, FailureContext, FailureMapper};
pub use outcome::{ConvergeOutcome, REBOOT_REQUIRED_EXIT_STATUS};
pub use report::{FailureReport, ReportFetch};
pub use workspace::{RemoteWorkspace, WorkspaceBuilder, render_config_script};

use crate::notify::Notifier;
use crate::target::TargetHost;
use cvg_common::config::{
    ConvergeSettings, DEFAULT_TRUSTED_CERTS_DIR, expand_home, is_valid_log_level,
};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::info;

/// Inputs of one convergence.
#[derive(Clone)]
pub struct ConvergeRequest {
    policy_path: PathBuf,
    target_log_level: Option<String>,
    data_collector_url: Option<String>,
    data_collector_token: Option<String>,
    trusted_certs_dir: PathBuf,
    cache_path: Option<String>,
    run_reporter_path: Option<PathBuf>,
}

impl ConvergeRequest {
    pub fn new(policy_path: impl Into<PathBuf>) -> Self {
        Self {
            policy_path: policy_path.into(),
            target_log_level: None,
            data_collector_url: None,
            data_collector_token: None,
            trusted_certs_dir: expand_home(DEFAULT_TRUSTED_CERTS_DIR),
            cache_path: None,
            run_reporter_path: None,
        }
    }

    pub fn from_settings(policy_path: impl Into<PathBuf>, settings: &ConvergeSettings) -> Self {
        Self {
            policy_path: policy_path.into(),
            target_log_level: settings.target_log_level.clone(),
            data_collector_url: settings.data_collector.url.clone(),
            data_collector_token: settings.data_collector.token.clone(),
            trusted_certs_dir: settings.trusted_certs_dir.clone(),
            cache_path: settings.cache_path.clone(),
            run_reporter_path: settings.run_reporter_path.clone(),
        }
    }

    pub fn with_target_log_level(mut self, level: impl Into<String>) -> Self {
        self.target_log_level = Some(level.into());
        self
    }

    pub fn with_data_collector_url(mut self, url: impl Into<String>) -> Self {
        self.data_collector_url = Some(url.into());
        self
    }

    pub fn with_data_collector_token(mut self, token: impl Into<String>) -> Self {
        self.data_collector_token = Some(token.into());
        self
    }

    pub fn with_trusted_certs_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.trusted_certs_dir = dir.into();
        self
    }

    /// Cache path on the target. Defaults to the target's own.
    pub fn with_cache_path(mut self, path: impl Into<String>) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    /// Upload this handler instead of the bundled one.
    pub fn with_run_reporter_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.run_reporter_path = Some(path.into());
        self
    }

    /// Reject values that would not render as a single config line.
    pub fn validate(&self) -> Result<(), ConvergeError> {
        if let Some(level) = self.target_log_level.as_deref()
            && !is_valid_log_level(level)
        {
            return Err(ConvergeError::InvalidRequest {
                field: "target log level",
                value: level.to_string(),
            });
        }
        Ok(())
    }

    pub fn policy_path(&self) -> &Path {
        &self.policy_path
    }

    pub fn target_log_level(&self) -> Option<&str> {
        self.target_log_level.as_deref()
    }

    pub fn data_collector_url(&self) -> Option<&str> {
        self.data_collector_url.as_deref()
    }

    pub fn data_collector_token(&self) -> Option<&str> {
        self.data_collector_token.as_deref()
    }

    pub fn trusted_certs_dir(&self) -> &Path {
        &self.trusted_certs_dir
    }

    pub fn cache_path(&self) -> Option<&str> {
        self.cache_path.as_deref()
    }

    pub fn run_reporter_path(&self) -> Option<&Path> {
        self.run_reporter_path.as_deref()
    }
}

impl fmt::Debug for ConvergeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConvergeRequest")
            .field("policy_path", &self.policy_path)
            .field("target_log_level", &self.target_log_level)
            .field("data_collector_url", &self.data_collector_url)
            .field(
                "data_collector_token",
                &self.data_collector_token.as_ref().map(|_| "***"),
            )
            .field("trusted_certs_dir", &self.trusted_certs_dir)
            .field("cache_path", &self.cache_path)
            .field("run_reporter_path", &self.run_reporter_path)
            .finish()
    }
}

/// One convergence of one target.
pub struct ConvergeTarget<'a> {
    target: &'a dyn TargetHost,
    notifier: &'a dyn Notifier,
    mapper: &'a dyn FailureMapper,
    request: ConvergeRequest,
}

impl<'a> ConvergeTarget<'a> {
    pub fn new(
        target: &'a dyn TargetHost,
        notifier: &'a dyn Notifier,
        mapper: &'a dyn FailureMapper,
        request: ConvergeRequest,
    ) -> Self {
        Self {
            target,
            notifier,
            mapper,
            request,
        }
    }

    pub fn request(&self) -> &ConvergeRequest {
        &self.request
    }

    fn cache_path(&self) -> String {
        self.request
            .cache_path()
            .map(str::to_string)
            .unwrap_or_else(|| self.target.ws_cache_path())
    }

    /// Where the run reporter writes its report on this target.
    pub fn report_path(&self) -> String {
        report::report_path(self.target, &self.cache_path())
    }

    /// Converge the target.
    ///
    /// Returns `Success` or `RebootRequired`. Every other exit status comes
    /// back as an error, after the remote report has been consulted.
    pub fn perform(&self) -> Result<ConvergeOutcome, ConvergeError> {
        info!(
            "Converging {} with {}",
            self.target.name(),
            self.request.policy_path().display()
        );

        let workspace = WorkspaceBuilder::new(self.target, self.notifier, &self.request).build()?;
        let command = compose_run_command(
            self.target.base_os(),
            &workspace.dir,
            workspace.config_file_name(),
            workspace.policy_file_name(),
        );
        let result = execute::run_in_workspace(self.target, self.notifier, &workspace, &command)?;

        match outcome::classify(self.notifier, &command, &result) {
            ConvergeOutcome::Failed => Err(self.handle_failure()),
            done => Ok(done),
        }
    }

    fn handle_failure(&self) -> ConvergeError {
        let path = self.report_path();
        match report::fetch_failure_report(self.target, &path) {
            ReportFetch::Retrieved(report) => {
                let exception = report.exception_text();
                self.mapper
                    .map_failure(exception.as_deref(), &FailureContext::default())
            }
            ReportFetch::Unavailable { path } => self.mapper.map_failure(
                None,
                &FailureContext {
                    failed_report_path: Some(path),
                },
            ),
        }
    }
}
