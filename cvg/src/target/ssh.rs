//! [`TargetHost`] over the system OpenSSH client.
//!
//! Every operation is a single `ssh` (or `scp`) invocation in batch mode, so
//! authentication must already work non-interactively (agent or identity
//! file). Windows targets are expected to run the OpenSSH server with
//! PowerShell as the default shell.

use super::{TargetHost, TransportError, normalize_path_for};
use cvg_common::config::TargetConfig;
use cvg_common::{CommandResult, TargetOs, mask_sensitive_command};
use std::ffi::{OsStr, OsString};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Exit status the ssh client reserves for its own failures. A remote
/// command may exit with it too.
const SSH_ERROR_EXIT: i32 = 255;

/// Stderr line prefixes the ssh client writes when it fails itself.
const SSH_CLIENT_ERRORS: [&str; 6] = [
    "ssh:",
    "kex_exchange_identification:",
    "Connection closed by",
    "Connection reset by",
    "Host key verification failed",
    "Permission denied (",
];

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A target reached with `ssh`/`scp`.
#[derive(Debug, Clone)]
pub struct SshTarget {
    program: OsString,
    host: String,
    destination: String,
    port: u16,
    identity_file: Option<PathBuf>,
    os: TargetOs,
    sudo: bool,
    connect_timeout: Duration,
    command_timeout: Option<Duration>,
    cache_path: Option<String>,
}

impl SshTarget {
    pub fn new(host: impl Into<String>, os: TargetOs) -> Self {
        let host = host.into();
        Self {
            program: "ssh".into(),
            destination: host.clone(),
            host,
            port: 22,
            identity_file: None,
            os,
            sudo: false,
            connect_timeout: Duration::from_secs(10),
            command_timeout: None,
            cache_path: None,
        }
    }

    pub fn from_config(config: &TargetConfig) -> Result<Self, TransportError> {
        let host = config
            .host
            .clone()
            .filter(|h| !h.trim().is_empty())
            .ok_or_else(|| TransportError::Remote("target.host is not set".to_string()))?;
        let mut target = Self::new(host, config.os)
            .with_port(config.port)
            .with_sudo(config.sudo)
            .with_connect_timeout(Duration::from_secs(config.connect_timeout_secs));
        if let Some(user) = config.user.as_deref() {
            target = target.with_user(user);
        }
        if let Some(identity) = &config.identity_file {
            target = target.with_identity_file(identity);
        }
        if config.command_timeout_secs > 0 {
            target = target.with_command_timeout(Duration::from_secs(config.command_timeout_secs));
        }
        Ok(target)
    }

    pub fn with_user(mut self, user: &str) -> Self {
        self.destination = format!("{}@{}", user, self.host);
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_identity_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.identity_file = Some(path.into());
        self
    }

    pub fn with_sudo(mut self, sudo: bool) -> Self {
        self.sudo = sudo;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Bound the remote client run. Other operations only use the connect
    /// timeout.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    pub fn with_cache_path(mut self, path: impl Into<String>) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    #[cfg(test)]
    fn with_ssh_program(mut self, program: impl Into<OsString>) -> Self {
        self.program = program.into();
        self
    }

    fn common_options(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-o".into(),
            "BatchMode=yes".into(),
            "-o".into(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)).into(),
            "-o".into(),
            "StrictHostKeyChecking=accept-new".into(),
        ];
        if let Some(identity) = &self.identity_file {
            args.push("-i".into());
            args.push(identity.clone().into_os_string());
        }
        args
    }

    /// Arguments for `ssh` running `command` on the target.
    pub fn ssh_args(&self, command: &str) -> Vec<OsString> {
        let mut args = self.common_options();
        args.push("-p".into());
        args.push(self.port.to_string().into());
        args.push(self.destination.clone().into());
        args.push(command.into());
        args
    }

    /// Arguments for `scp` copying `local` to `remote` on the target.
    pub fn scp_args(&self, local: &Path, remote: &str) -> Vec<OsString> {
        let mut args = self.common_options();
        args.push("-P".into());
        args.push(self.port.to_string().into());
        args.push(local.as_os_str().to_owned());
        args.push(format!("{}:{}", self.destination, remote).into());
        args
    }

    fn quote(&self, path: &str) -> String {
        if self.os.is_windows() {
            format!("'{}'", path.replace('\'', "''"))
        } else {
            shell_escape::unix::escape(path.into()).into_owned()
        }
    }

    fn privileged(&self, command: String) -> String {
        if self.sudo && !self.os.is_windows() {
            format!("sudo -n {}", command)
        } else {
            command
        }
    }

    pub(crate) fn temp_dir_command(&self) -> String {
        if self.os.is_windows() {
            "$p = Join-Path $env:TEMP ([System.IO.Path]::GetRandomFileName()); \
             New-Item -ItemType Directory -Path $p | Out-Null; Write-Output $p"
                .to_string()
        } else {
            "mktemp -d".to_string()
        }
    }

    pub(crate) fn make_directory_command(&self, path: &str) -> String {
        let path = self.quote(path);
        if self.os.is_windows() {
            format!("New-Item -ItemType Directory -Force -Path {} | Out-Null", path)
        } else {
            // Inside the connecting user's mktemp directory, so no sudo.
            format!("mkdir -p {}", path)
        }
    }

    pub(crate) fn del_dir_command(&self, path: &str) -> String {
        let path = self.quote(path);
        if self.os.is_windows() {
            format!(
                "if (Test-Path -LiteralPath {0}) {{ Remove-Item -LiteralPath {0} -Recurse -Force }}",
                path
            )
        } else {
            self.privileged(format!("rm -rf {}", path))
        }
    }

    pub(crate) fn del_file_command(&self, path: &str) -> String {
        let path = self.quote(path);
        if self.os.is_windows() {
            format!(
                "if (Test-Path -LiteralPath {0}) {{ Remove-Item -LiteralPath {0} -Force }}",
                path
            )
        } else {
            self.privileged(format!("rm -f {}", path))
        }
    }

    pub(crate) fn fetch_command(&self, path: &str) -> String {
        let path = self.quote(path);
        if self.os.is_windows() {
            format!(
                "if (Test-Path -LiteralPath {0}) {{ Get-Content -Raw -LiteralPath {0} }} else {{ exit 1 }}",
                path
            )
        } else {
            self.privileged(format!("cat {}", path))
        }
    }

    fn exec(
        &self,
        program: &OsStr,
        args: Vec<OsString>,
        operation: &str,
        timeout: Option<Duration>,
    ) -> Result<CommandResult, TransportError> {
        let start = Instant::now();
        let mut child = Command::new(program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdout_handle = child
            .stdout
            .take()
            .map(|mut stdout| thread::spawn(move || read_to_string(&mut stdout)));
        let stderr_handle = child
            .stderr
            .take()
            .map(|mut stderr| thread::spawn(move || read_to_string(&mut stderr)));

        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if let Some(limit) = timeout
                && start.elapsed() >= limit
            {
                let _ = child.kill();
                let _ = child.wait();
                join_output(stdout_handle);
                join_output(stderr_handle);
                return Err(TransportError::Timeout {
                    operation: operation.to_string(),
                    host: self.host.clone(),
                    timeout: limit,
                });
            }
            thread::sleep(POLL_INTERVAL);
        };

        let result = CommandResult::new(
            status.code().unwrap_or(-1),
            join_output(stdout_handle),
            join_output(stderr_handle),
        );
        trace!(
            "{} on {} exited {} after {:?}",
            operation,
            self.host,
            result.exit_status,
            start.elapsed()
        );
        Ok(result)
    }

    fn ssh(
        &self,
        command: &str,
        operation: &str,
        timeout: Option<Duration>,
    ) -> Result<CommandResult, TransportError> {
        debug!(
            "ssh {} [{}]: {}",
            self.destination,
            operation,
            mask_sensitive_command(command)
        );
        let result = self.exec(&self.program, self.ssh_args(command), operation, timeout)?;
        if ssh_client_failed(&result) {
            return Err(self.failed(operation, &result));
        }
        Ok(result)
    }

    /// Run a housekeeping command that must succeed.
    fn ssh_checked(&self, command: &str, operation: &str) -> Result<CommandResult, TransportError> {
        let result = self.ssh(command, operation, None)?;
        if !result.success() {
            return Err(self.failed(operation, &result));
        }
        Ok(result)
    }

    fn failed(&self, operation: &str, result: &CommandResult) -> TransportError {
        TransportError::Failed {
            operation: operation.to_string(),
            host: self.host.clone(),
            exit_code: result.exit_status,
            stderr: result.stderr.trim().to_string(),
        }
    }
}

impl TargetHost for SshTarget {
    fn name(&self) -> &str {
        &self.host
    }

    fn base_os(&self) -> TargetOs {
        self.os
    }

    fn ws_cache_path(&self) -> String {
        match &self.cache_path {
            Some(path) => path.clone(),
            None => super::default_cache_path(self.os).to_string(),
        }
    }

    fn normalize_path(&self, path: &str) -> String {
        normalize_path_for(self.os, path)
    }

    fn temp_dir(&self) -> Result<String, TransportError> {
        let result = self.ssh_checked(&self.temp_dir_command(), "temp_dir")?;
        let dir = result.stdout.trim().to_string();
        if dir.is_empty() {
            return Err(TransportError::Remote(format!(
                "temp_dir on {} returned no path",
                self.host
            )));
        }
        Ok(dir)
    }

    fn upload_file(&self, local: &Path, remote: &str) -> Result<(), TransportError> {
        debug!("scp {} -> {}:{}", local.display(), self.destination, remote);
        let result = self.exec(OsStr::new("scp"), self.scp_args(local, remote), "upload_file", None)?;
        if !result.success() {
            return Err(self.failed("upload_file", &result));
        }
        Ok(())
    }

    fn make_directory(&self, path: &str) -> Result<(), TransportError> {
        self.ssh_checked(&self.make_directory_command(path), "make_directory")
            .map(|_| ())
    }

    fn run_command(&self, command: &str) -> Result<CommandResult, TransportError> {
        let command = self.privileged(command.to_string());
        self.ssh(&command, "run_command", self.command_timeout)
    }

    fn del_dir(&self, path: &str) -> Result<(), TransportError> {
        self.ssh_checked(&self.del_dir_command(path), "del_dir")
            .map(|_| ())
    }

    fn del_file(&self, path: &str) -> Result<(), TransportError> {
        self.ssh_checked(&self.del_file_command(path), "del_file")
            .map(|_| ())
    }

    fn fetch_file_contents(&self, path: &str) -> Result<Option<String>, TransportError> {
        let result = self.ssh(&self.fetch_command(path), "fetch_file_contents", None)?;
        if result.success() {
            Ok(Some(result.stdout))
        } else {
            debug!(
                "{} not readable on {} (exit {})",
                path, self.host, result.exit_status
            );
            Ok(None)
        }
    }
}

/// Whether a 255 exit came from the ssh client rather than the remote
/// command.
fn ssh_client_failed(result: &CommandResult) -> bool {
    result.exit_status == SSH_ERROR_EXIT && result.stderr.lines().any(is_ssh_client_error)
}

/// Client errors, optionally prefixed with `user@host: `.
fn is_ssh_client_error(line: &str) -> bool {
    let message = match line.split_once(": ") {
        Some((who, rest)) if who.contains('@') && !who.contains(' ') => rest,
        _ => line,
    };
    SSH_CLIENT_ERRORS
        .iter()
        .any(|prefix| message.starts_with(prefix))
}

fn read_to_string<R: Read>(reader: &mut R) -> String {
    let mut buffer = Vec::new();
    if reader.read_to_end(&mut buffer).is_ok() {
        String::from_utf8_lossy(&buffer).to_string()
    } else {
        String::new()
    }
}

fn join_output(handle: Option<thread::JoinHandle<String>>) -> String {
    match handle {
        Some(handle) => handle.join().unwrap_or_default(),
        None => String::new(),
    }
}
