use crate::notify::{ConvergeEvent, Notifier};
use cvg_common::{CommandResult, mask_sensitive_command};
use serde::Serialize;
use std::fmt;
use tracing::{error, info};

/// Exit status chef-client uses to ask for a reboot after a good run.
pub const REBOOT_REQUIRED_EXIT_STATUS: i32 = 35;

/// What a finished chef-client run means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvergeOutcome {
    Success,
    RebootRequired,
    /// Any other exit status. Never returned to callers of a convergence;
    /// it is turned into a [`super::ConvergeError`].
    Failed,
}

impl ConvergeOutcome {
    pub fn from_exit_status(exit_status: i32) -> Self {
        match exit_status {
            0 => Self::Success,
            REBOOT_REQUIRED_EXIT_STATUS => Self::RebootRequired,
            _ => Self::Failed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::RebootRequired => "reboot_required",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ConvergeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a run, log it and emit the matching event.
pub fn classify(notifier: &dyn Notifier, command: &str, result: &CommandResult) -> ConvergeOutcome {
    let outcome = ConvergeOutcome::from_exit_status(result.exit_status);
    match outcome {
        ConvergeOutcome::Success => {
            info!("{}", result.stdout);
            notifier.notify(ConvergeEvent::Success);
        }
        ConvergeOutcome::RebootRequired => {
            info!("chef-client finished and requested a reboot");
            notifier.notify(ConvergeEvent::Reboot);
        }
        ConvergeOutcome::Failed => {
            notifier.notify(ConvergeEvent::ConvergeError);
            error!("Error running command [{}]", mask_sensitive_command(command));
            error!("stdout: {}", result.stdout);
            error!("stderr: {}", result.stderr);
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::RecordingNotifier;
    use proptest::prelude::*;

    #[test]
    fn test_exit_status_table() {
        assert_eq!(ConvergeOutcome::from_exit_status(0), ConvergeOutcome::Success);
        assert_eq!(ConvergeOutcome::from_exit_status(35), ConvergeOutcome::RebootRequired);
        assert_eq!(ConvergeOutcome::from_exit_status(1), ConvergeOutcome::Failed);
        assert_eq!(ConvergeOutcome::from_exit_status(-1), ConvergeOutcome::Failed);
        assert_eq!(ConvergeOutcome::from_exit_status(213), ConvergeOutcome::Failed);
    }

    #[test]
    fn test_classify_emits_one_event_per_outcome() {
        let cases = [
            (0, ConvergeEvent::Success),
            (35, ConvergeEvent::Reboot),
            (2, ConvergeEvent::ConvergeError),
        ];
        for (status, event) in cases {
            let notifier = RecordingNotifier::new();
            classify(&notifier, "cmd", &CommandResult::new(status, "out", "err"));
            assert_eq!(notifier.events(), vec![event]);
        }
    }

    #[test]
    fn test_outcome_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&ConvergeOutcome::RebootRequired).unwrap(),
            "\"reboot_required\""
        );
    }

    proptest! {
        #[test]
        fn test_only_zero_and_reboot_are_not_failures(status in any::<i32>()) {
            let outcome = ConvergeOutcome::from_exit_status(status);
            let expected_failed = status != 0 && status != REBOOT_REQUIRED_EXIT_STATUS;
            prop_assert_eq!(outcome == ConvergeOutcome::Failed, expected_failed);
        }
    }
}
