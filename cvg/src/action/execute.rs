use super::ConvergeError;
use super::workspace::RemoteWorkspace;
use crate::notify::{ConvergeEvent, Notifier};
use crate::target::TargetHost;
use cvg_common::{CommandResult, mask_sensitive_command};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Run `command` in a staged workspace, then remove the workspace.
///
/// The workspace is removed exactly once whether the command succeeded,
/// failed or could not be run at all. A failed removal is logged and does
/// not change the result.
pub fn run_in_workspace(
    target: &dyn TargetHost,
    notifier: &dyn Notifier,
    workspace: &RemoteWorkspace,
    command: &str,
) -> Result<CommandResult, ConvergeError> {
    notifier.notify(ConvergeEvent::RunningChef);
    info!("Running chef-client on {}", target.name());
    debug!("Remote command: {}", mask_sensitive_command(command));

    let start = Instant::now();
    let result = target.run_command(command);

    if let Err(err) = target.del_dir(&workspace.dir) {
        warn!(
            "Failed to remove remote workspace {} (non-fatal): {}",
            workspace.dir, err
        );
    }

    let result = result?;
    debug!(
        "chef-client exited {} after {:?}",
        result.exit_status,
        start.elapsed()
    );
    Ok(result)
}
