#![allow(dead_code)]

use cvg::action::{ConvergeError, FailureContext, FailureMapper};
use cvg::notify::{ConvergeEvent, RecordingNotifier};
use cvg::target::MockTarget;
use cvg::{CcrFailureMapper, ConvergeOutcome, ConvergeRequest, ConvergeTarget};
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use tempfile::TempDir;

/// Integration tests also log to the shared JSONL file under target/test-logs.
pub fn init_test_logging() {
    cvg_common::testing::init_global_test_logging();
}

pub const POLICY_FILE: &str = "policy-abc123.tgz";

/// Events every attempt emits while staging the workspace.
pub const STAGING_EVENTS: [ConvergeEvent; 3] = [
    ConvergeEvent::CreatingRemotePolicy,
    ConvergeEvent::CreatingRemoteConfig,
    ConvergeEvent::CreatingRemoteHandler,
];

/// A local workstation: a policy archive and a trusted certs directory.
pub struct Workstation {
    pub dir: TempDir,
    pub policy: PathBuf,
    pub certs_dir: PathBuf,
}

impl Workstation {
    pub fn new() -> Self {
        Self::with_certs_dir_name("trusted_certs")
    }

    pub fn with_certs_dir_name(name: &str) -> Self {
        cvg_common::test_log!("FIXTURE: Creating workstation with certs dir {}", name);

        let dir = TempDir::new().expect("Failed to create temp dir");
        let policy = dir.path().join(POLICY_FILE);
        fs::write(&policy, b"policy archive").expect("Failed to write policy archive");
        let certs_dir = dir.path().join(name);
        fs::create_dir_all(&certs_dir).expect("Failed to create certs dir");
        Self {
            dir,
            policy,
            certs_dir,
        }
    }

    pub fn add_cert(&self, name: &str) -> PathBuf {
        let path = self.certs_dir.join(name);
        fs::write(&path, format!("-----BEGIN CERTIFICATE----- {name}"))
            .expect("Failed to write cert");
        path
    }

    pub fn request(&self) -> ConvergeRequest {
        ConvergeRequest::new(&self.policy).with_trusted_certs_dir(&self.certs_dir)
    }
}

/// Records what it was asked to map and answers with an unknown-reason
/// failure.
#[derive(Default)]
pub struct RecordingMapper {
    calls: Mutex<Vec<(Option<String>, FailureContext)>>,
}

impl RecordingMapper {
    pub fn calls(&self) -> Vec<(Option<String>, FailureContext)> {
        self.calls.lock().unwrap().clone()
    }
}

impl FailureMapper for RecordingMapper {
    fn map_failure(&self, exception: Option<&str>, context: &FailureContext) -> ConvergeError {
        self.calls
            .lock()
            .unwrap()
            .push((exception.map(str::to_string), context.clone()));
        ConvergeError::RemoteRunFailedUnknownReason {
            exception: exception.unwrap_or_default().to_string(),
        }
    }
}

pub struct Attempt {
    pub result: Result<ConvergeOutcome, ConvergeError>,
    pub events: Vec<ConvergeEvent>,
}

impl Attempt {
    /// Events after staging finished.
    pub fn run_events(&self) -> Vec<ConvergeEvent> {
        self.events
            .iter()
            .copied()
            .filter(|e| !STAGING_EVENTS.contains(e))
            .collect()
    }
}

pub fn converge_with(
    target: &MockTarget,
    mapper: &dyn FailureMapper,
    request: ConvergeRequest,
) -> Attempt {
    let notifier = RecordingNotifier::new();
    let result = ConvergeTarget::new(target, &notifier, mapper, request).perform();
    Attempt {
        result,
        events: notifier.events(),
    }
}

pub fn converge(target: &MockTarget, request: ConvergeRequest) -> Attempt {
    let mapper = CcrFailureMapper::new().expect("failure patterns compile");
    converge_with(target, &mapper, request)
}
