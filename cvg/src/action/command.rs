//! Composition of the remote chef-client invocation.
//!
//! The strings produced here are matched byte-for-byte by automation on the
//! other side, so their shape must not drift.

use cvg_common::TargetOs;

/// Join a file name onto a remote directory with a single `/`.
pub fn join_remote(dir: &str, name: &str) -> String {
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() {
        format!("/{}", name)
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Build the command that runs chef-client in local mode against the staged
/// policy bundle.
///
/// Both paths are absolute. On Windows the shell leaves the working
/// directory before exiting so the workspace can be removed afterwards.
pub fn compose_run_command(
    os: TargetOs,
    working_dir: &str,
    config_file: &str,
    policy_file: &str,
) -> String {
    let config = join_remote(working_dir, config_file);
    let policy = join_remote(working_dir, policy_file);
    if os.is_windows() {
        format!(
            "Set-Location -Path {working_dir}; \
             chef-client -z --config {config} --recipe-url {policy} | Out-Null; \
             Set-Location C:/; \
             exit $LASTEXITCODE"
        )
    } else {
        format!(
            "bash -c 'cd {working_dir}; chef-client -z --config {config} --recipe-url {policy}'"
        )
    }
}
