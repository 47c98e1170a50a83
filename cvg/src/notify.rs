//! Lifecycle notifications emitted during a convergence.
//!
//! The orchestrator only sees `&dyn Notifier`. Sinks are infallible from its
//! point of view: a sink that panics unwinds through the convergence as-is.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::io::Write;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// A lifecycle step of a convergence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvergeEvent {
    CreatingRemotePolicy,
    CreatingRemoteConfig,
    CreatingRemoteHandler,
    UploadingTrustedCerts,
    RunningChef,
    Success,
    Reboot,
    ConvergeError,
}

impl ConvergeEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreatingRemotePolicy => "creating_remote_policy",
            Self::CreatingRemoteConfig => "creating_remote_config",
            Self::CreatingRemoteHandler => "creating_remote_handler",
            Self::UploadingTrustedCerts => "uploading_trusted_certs",
            Self::RunningChef => "running_chef",
            Self::Success => "success",
            Self::Reboot => "reboot",
            Self::ConvergeError => "converge_error",
        }
    }

    /// Short text for progress displays.
    pub fn description(&self) -> &'static str {
        match self {
            Self::CreatingRemotePolicy => "Uploading policy bundle",
            Self::CreatingRemoteConfig => "Uploading client configuration",
            Self::CreatingRemoteHandler => "Uploading run reporter",
            Self::UploadingTrustedCerts => "Uploading trusted certificates",
            Self::RunningChef => "Running chef-client on target",
            Self::Success => "Converge succeeded",
            Self::Reboot => "Converge succeeded, target requires a reboot",
            Self::ConvergeError => "Converge failed",
        }
    }
}

impl fmt::Display for ConvergeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives lifecycle events.
pub trait Notifier {
    fn notify(&self, event: ConvergeEvent);
}

impl<F> Notifier for F
where
    F: Fn(ConvergeEvent),
{
    fn notify(&self, event: ConvergeEvent) {
        self(event)
    }
}

/// Logs each event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, event: ConvergeEvent) {
        info!(event = event.as_str(), "{}", event.description());
    }
}

/// Writes one JSON object per event.
///
/// ```json
/// {"event":"running_chef","target":"web01","timestamp":"2026-01-01T00:00:00+00:00"}
/// ```
pub struct JsonLinesNotifier<W: Write> {
    target: String,
    writer: Mutex<W>,
}

impl<W: Write> JsonLinesNotifier<W> {
    pub fn new(target: impl Into<String>, writer: W) -> Self {
        Self {
            target: target.into(),
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<W: Write> Notifier for JsonLinesNotifier<W> {
    fn notify(&self, event: ConvergeEvent) {
        let payload = json!({
            "event": event,
            "target": self.target,
            "timestamp": Utc::now().to_rfc3339(),
        });
        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Err(err) = writeln!(writer, "{}", payload).and_then(|_| writer.flush()) {
            warn!("Failed to write event {}: {}", event, err);
        }
    }
}

/// Fans one event out to several sinks, in order.
#[derive(Default)]
pub struct MultiNotifier<'a> {
    sinks: Vec<&'a dyn Notifier>,
}

impl<'a> MultiNotifier<'a> {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    pub fn with(mut self, sink: &'a dyn Notifier) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl Notifier for MultiNotifier<'_> {
    fn notify(&self, event: ConvergeEvent) {
        for sink in &self.sinks {
            sink.notify(event);
        }
    }
}

/// Keeps every event it receives. Clones share the same record.
#[derive(Debug, Default, Clone)]
pub struct RecordingNotifier {
    events: Arc<Mutex<Vec<ConvergeEvent>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ConvergeEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, event: ConvergeEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }
}
