//! Scripted in-memory target for tests.
//!
//! Records every call in order and answers from scripted values. Uploaded
//! files are read at upload time so callers can delete their local copies
//! right after.

use super::{TargetHost, TransportError};
use cvg_common::{CommandResult, TargetOs};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// One recorded call against a [`MockTarget`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetCall {
    TempDir,
    Upload { local: PathBuf, remote: String },
    MakeDirectory(String),
    RunCommand(String),
    DelDir(String),
    DelFile(String),
    FetchFile(String),
}

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<TargetCall>,
    uploads: HashMap<String, Vec<u8>>,
}

/// A [`TargetHost`] that never leaves the process.
#[derive(Debug)]
pub struct MockTarget {
    os: TargetOs,
    temp_dir: String,
    cache_path: Option<String>,
    command_result: CommandResult,
    files: HashMap<String, String>,
    failing_uploads: HashSet<String>,
    fail_temp_dir: bool,
    fail_run_command: bool,
    fail_del_dir: bool,
    fail_fetch: bool,
    state: Mutex<MockState>,
}

impl MockTarget {
    pub fn new(os: TargetOs) -> Self {
        let temp_dir = if os.is_windows() {
            r"C:\Users\cvg\AppData\Local\Temp\cvg-ws".to_string()
        } else {
            "/tmp/cvg-ws".to_string()
        };
        Self {
            os,
            temp_dir,
            cache_path: None,
            command_result: CommandResult::new(0, "", ""),
            files: HashMap::new(),
            failing_uploads: HashSet::new(),
            fail_temp_dir: false,
            fail_run_command: false,
            fail_del_dir: false,
            fail_fetch: false,
            state: Mutex::new(MockState::default()),
        }
    }

    /// Directory returned by `temp_dir`, before normalization.
    pub fn with_temp_dir(mut self, dir: impl Into<String>) -> Self {
        self.temp_dir = dir.into();
        self
    }

    pub fn with_cache_path(mut self, path: impl Into<String>) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    pub fn with_command_result(mut self, result: CommandResult) -> Self {
        self.command_result = result;
        self
    }

    pub fn with_exit_status(self, exit_status: i32) -> Self {
        self.with_command_result(CommandResult::new(exit_status, "", ""))
    }

    /// Make `fetch_file_contents(path)` return `contents`.
    pub fn with_remote_file(mut self, path: impl Into<String>, contents: impl Into<String>) -> Self {
        self.files.insert(path.into(), contents.into());
        self
    }

    /// Fail uploads whose remote path ends with `suffix`.
    pub fn failing_upload(mut self, suffix: impl Into<String>) -> Self {
        self.failing_uploads.insert(suffix.into());
        self
    }

    pub fn failing_temp_dir(mut self) -> Self {
        self.fail_temp_dir = true;
        self
    }

    pub fn failing_run_command(mut self) -> Self {
        self.fail_run_command = true;
        self
    }

    pub fn failing_del_dir(mut self) -> Self {
        self.fail_del_dir = true;
        self
    }

    pub fn failing_fetch(mut self) -> Self {
        self.fail_fetch = true;
        self
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, call: TargetCall) {
        self.state().calls.push(call);
    }

    /// Every call so far, in order.
    pub fn calls(&self) -> Vec<TargetCall> {
        self.state().calls.clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TargetCall::RunCommand(command) => Some(command),
                _ => None,
            })
            .collect()
    }

    /// `(local, remote)` pairs of every attempted upload.
    pub fn uploads(&self) -> Vec<(PathBuf, String)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TargetCall::Upload { local, remote } => Some((local, remote)),
                _ => None,
            })
            .collect()
    }

    /// Content of a successfully uploaded file, as read at upload time.
    pub fn uploaded_content(&self, remote: &str) -> Option<String> {
        self.state()
            .uploads
            .get(remote)
            .map(|bytes| String::from_utf8_lossy(bytes).to_string())
    }

    pub fn count(&self, matches: impl Fn(&TargetCall) -> bool) -> usize {
        self.state().calls.iter().filter(|call| matches(call)).count()
    }

    fn scripted_failure(&self, operation: &str) -> TransportError {
        TransportError::Failed {
            operation: operation.to_string(),
            host: self.name().to_string(),
            exit_code: 1,
            stderr: format!("scripted {} failure", operation),
        }
    }
}

impl TargetHost for MockTarget {
    fn name(&self) -> &str {
        "mock"
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

    fn temp_dir(&self) -> Result<String, TransportError> {
        self.record(TargetCall::TempDir);
        if self.fail_temp_dir {
            return Err(self.scripted_failure("temp_dir"));
        }
        Ok(self.temp_dir.clone())
    }

    fn upload_file(&self, local: &Path, remote: &str) -> Result<(), TransportError> {
        self.record(TargetCall::Upload {
            local: local.to_path_buf(),
            remote: remote.to_string(),
        });
        if self
            .failing_uploads
            .iter()
            .any(|suffix| remote.ends_with(suffix.as_str()))
        {
            return Err(self.scripted_failure("upload_file"));
        }
        let bytes = std::fs::read(local)?;
        self.state().uploads.insert(remote.to_string(), bytes);
        Ok(())
    }

    fn make_directory(&self, path: &str) -> Result<(), TransportError> {
        self.record(TargetCall::MakeDirectory(path.to_string()));
        Ok(())
    }

    fn run_command(&self, command: &str) -> Result<CommandResult, TransportError> {
        self.record(TargetCall::RunCommand(command.to_string()));
        if self.fail_run_command {
            return Err(self.scripted_failure("run_command"));
        }
        Ok(self.command_result.clone())
    }

    fn del_dir(&self, path: &str) -> Result<(), TransportError> {
        self.record(TargetCall::DelDir(path.to_string()));
        if self.fail_del_dir {
            return Err(self.scripted_failure("del_dir"));
        }
        Ok(())
    }

    fn del_file(&self, path: &str) -> Result<(), TransportError> {
        self.record(TargetCall::DelFile(path.to_string()));
        Ok(())
    }

    fn fetch_file_contents(&self, path: &str) -> Result<Option<String>, TransportError> {
        self.record(TargetCall::FetchFile(path.to_string()));
        if self.fail_fetch {
            return Err(self.scripted_failure("fetch_file_contents"));
        }
        Ok(self.files.get(path).cloned())
    }
}
