//! Staging of the ephemeral remote workspace.
//!
//! A workspace holds everything chef-client needs for one local-mode run:
//! the policy bundle, a generated `workstation.rb`, the run reporter handler
//! and, when the workstation has any, trusted certificates.

use super::command::join_remote;
use super::{ConvergeError, ConvergeRequest};
use crate::notify::{ConvergeEvent, Notifier};
use crate::target::{TargetHost, TransportError};
use cvg_common::mask_sensitive_command;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::{NamedTempFile, TempPath};
use tracing::{debug, error, info, warn};

pub const CONFIG_FILE_NAME: &str = "workstation.rb";
pub const RUN_REPORTER_FILE_NAME: &str = "chef_run_reporter.rb";
pub const TRUSTED_CERTS_DIR_NAME: &str = "trusted_certs";

/// Bundled handler that makes chef-client write `run-report.json`.
pub const RUN_REPORTER_SOURCE: &str = include_str!("../../resources/chef_run_reporter.rb");

const CERT_EXTENSIONS: [&str; 2] = ["crt", "pem"];

/// A staged directory on the target and what was put in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteWorkspace {
    pub dir: String,
    pub policy_path: String,
    pub config_path: String,
    pub handler_path: String,
    /// Set only when at least one certificate was uploaded.
    pub trusted_certs_dir: Option<String>,
    pub trusted_certs: Vec<String>,
}

impl RemoteWorkspace {
    pub fn policy_file_name(&self) -> &str {
        base_name(&self.policy_path)
    }

    pub fn config_file_name(&self) -> &str {
        base_name(&self.config_path)
    }
}

fn base_name(remote: &str) -> &str {
    remote.rsplit('/').next().unwrap_or(remote)
}

/// Quote a value as a Ruby double-quoted string literal.
fn ruby_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '#' => out.push_str("\\#"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Render the `workstation.rb` chef-client reads in the workspace.
///
/// The data collector is only configured when both its url and token are
/// present.
pub fn render_config_script(cache_path: &str, request: &ConvergeRequest) -> String {
    let cache = ruby_string(cache_path);
    let mut script = format!(
        "local_mode true\n\
         color false\n\
         cache_path {cache}\n\
         chef_repo_path {cache}\n\
         require_relative \"chef_run_reporter\"\n\
         reporter = ChefCore::ChefRunReporter.new\n\
         report_handlers << reporter\n\
         exception_handlers << reporter\n"
    );

    if let Some(level) = request.target_log_level() {
        script.push_str(&format!("log_level :{}\n", level));
    }

    if let (Some(url), Some(token)) = (request.data_collector_url(), request.data_collector_token())
    {
        script.push_str(&format!("data_collector.server_url {}\n", ruby_string(url)));
        script.push_str(&format!("data_collector.token {}\n", ruby_string(token)));
        script.push_str("data_collector.mode :solo\n");
        script.push_str("data_collector.organization \"Chef Workstation\"\n");
    }

    script
}

/// Local `.crt` and `.pem` files directly inside `dir`, crt first.
///
/// The directory name is matched literally even if it contains glob
/// metacharacters.
pub fn find_trusted_certs(dir: &Path) -> Vec<PathBuf> {
    let escaped = glob::Pattern::escape(&dir.to_string_lossy());
    let mut certs = Vec::new();
    for ext in CERT_EXTENSIONS {
        let pattern = format!("{}/*.{}", escaped, ext);
        let paths = match glob::glob(&pattern) {
            Ok(paths) => paths,
            Err(err) => {
                warn!("Invalid certificate pattern {}: {}", pattern, err);
                continue;
            }
        };
        for entry in paths {
            match entry {
                Ok(path) if path.is_file() => certs.push(path),
                Ok(_) => {}
                Err(err) => warn!("Skipping unreadable certificate entry: {}", err),
            }
        }
    }
    certs
}

/// Write `content` to a closed local temporary file.
///
/// The returned path removes the file when closed or dropped.
fn write_temp_file(content: &str) -> std::io::Result<TempPath> {
    let mut file = NamedTempFile::new()?;
    file.write_all(content.as_bytes())?;
    file.flush()?;
    Ok(file.into_temp_path())
}

fn release_temp_file(path: TempPath) {
    let shown = path.display().to_string();
    if let Err(err) = path.close() {
        warn!("Failed to remove local temporary file {}: {}", shown, err);
    }
}

/// Creates and fills the remote workspace for one convergence.
pub struct WorkspaceBuilder<'a> {
    target: &'a dyn TargetHost,
    notifier: &'a dyn Notifier,
    request: &'a ConvergeRequest,
    cache_path: String,
}

impl<'a> WorkspaceBuilder<'a> {
    pub fn new(
        target: &'a dyn TargetHost,
        notifier: &'a dyn Notifier,
        request: &'a ConvergeRequest,
    ) -> Self {
        let cache_path = request
            .cache_path()
            .map(str::to_string)
            .unwrap_or_else(|| target.ws_cache_path());
        Self {
            target,
            notifier,
            request,
            cache_path,
        }
    }

    /// Create the remote directory and upload every artifact.
    ///
    /// An invalid request fails before the target is contacted. Stops at the
    /// first failed upload. The partly staged directory is then
    /// removed on a best-effort basis before the error is returned.
    pub fn build(&self) -> Result<RemoteWorkspace, ConvergeError> {
        self.request.validate()?;
        let tmp = self.target.temp_dir()?;
        let dir = self.target.normalize_path(&tmp);
        debug!("Remote workspace on {}: {}", self.target.name(), dir);

        match self.populate(&dir) {
            Ok(workspace) => Ok(workspace),
            Err(err) => {
                if let Err(cleanup) = self.target.del_dir(&dir) {
                    warn!(
                        "Failed to remove partial workspace {} (non-fatal): {}",
                        dir, cleanup
                    );
                }
                Err(err)
            }
        }
    }

    fn populate(&self, dir: &str) -> Result<RemoteWorkspace, ConvergeError> {
        let policy_path = self.create_remote_policy(dir)?;
        let config_path = self.create_remote_config(dir)?;
        let handler_path = self.create_remote_handler(dir)?;
        let (trusted_certs_dir, trusted_certs) = self.upload_trusted_certs(dir)?;
        Ok(RemoteWorkspace {
            dir: dir.to_string(),
            policy_path,
            config_path,
            handler_path,
            trusted_certs_dir,
            trusted_certs,
        })
    }

    pub fn create_remote_policy(&self, dir: &str) -> Result<String, ConvergeError> {
        let local = self.request.policy_path();
        let name = local
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let remote_path = join_remote(dir, &name);

        self.notifier.notify(ConvergeEvent::CreatingRemotePolicy);
        if name.is_empty() {
            return Err(ConvergeError::PolicyUploadFailed {
                remote_path,
                source: TransportError::Remote(format!(
                    "policy path {} has no file name",
                    local.display()
                )),
            });
        }
        self.target
            .upload_file(local, &remote_path)
            .map_err(|source| {
                error!("Policy upload to {} failed: {}", remote_path, source);
                ConvergeError::PolicyUploadFailed {
                    remote_path: remote_path.clone(),
                    source,
                }
            })?;
        Ok(remote_path)
    }

    pub fn create_remote_config(&self, dir: &str) -> Result<String, ConvergeError> {
        let remote_path = join_remote(dir, CONFIG_FILE_NAME);
        let script = render_config_script(&self.cache_path, self.request);
        debug!("Client config:\n{}", mask_sensitive_command(&script));

        self.notifier.notify(ConvergeEvent::CreatingRemoteConfig);
        let local = write_temp_file(&script).map_err(|err| ConvergeError::ConfigUploadFailed {
            remote_path: remote_path.clone(),
            source: err.into(),
        })?;
        let uploaded = self.target.upload_file(&local, &remote_path);
        release_temp_file(local);

        uploaded.map_err(|source| {
            error!("Config upload to {} failed: {}", remote_path, source);
            ConvergeError::ConfigUploadFailed {
                remote_path: remote_path.clone(),
                source,
            }
        })?;
        Ok(remote_path)
    }

    pub fn create_remote_handler(&self, dir: &str) -> Result<String, ConvergeError> {
        let remote_path = join_remote(dir, RUN_REPORTER_FILE_NAME);
        let failed = |source: TransportError| {
            error!("Run reporter upload to {} failed: {}", remote_path, source);
            ConvergeError::HandlerUploadFailed {
                remote_path: remote_path.clone(),
                source,
            }
        };

        self.notifier.notify(ConvergeEvent::CreatingRemoteHandler);
        match self.request.run_reporter_path() {
            Some(path) => self.target.upload_file(path, &remote_path).map_err(failed)?,
            None => {
                let local = write_temp_file(RUN_REPORTER_SOURCE)
                    .map_err(|err| failed(TransportError::Io(err)))?;
                let uploaded = self.target.upload_file(&local, &remote_path);
                release_temp_file(local);
                uploaded.map_err(failed)?;
            }
        }
        Ok(remote_path)
    }

    /// Upload local trusted certificates, if there are any.
    ///
    /// With no certificates nothing is notified and no remote directory is
    /// created. Failures here are not given an upload error of their own.
    pub fn upload_trusted_certs(
        &self,
        dir: &str,
    ) -> Result<(Option<String>, Vec<String>), ConvergeError> {
        let certs = find_trusted_certs(self.request.trusted_certs_dir());
        if certs.is_empty() {
            debug!(
                "No trusted certificates in {}",
                self.request.trusted_certs_dir().display()
            );
            return Ok((None, Vec::new()));
        }

        self.notifier.notify(ConvergeEvent::UploadingTrustedCerts);
        let remote_dir = join_remote(dir, TRUSTED_CERTS_DIR_NAME);
        self.target.make_directory(&remote_dir)?;

        let mut uploaded = Vec::with_capacity(certs.len());
        for cert in &certs {
            let name = cert
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let remote = join_remote(&remote_dir, &name);
            self.target.upload_file(cert, &remote)?;
            uploaded.push(remote);
        }
        info!("Uploaded {} trusted certificate(s)", uploaded.len());
        Ok((Some(remote_dir), uploaded))
    }
}
