//! End-to-end convergence against the scripted mock target.

mod common;

use common::{
    POLICY_FILE, RecordingMapper, STAGING_EVENTS, Workstation, converge, converge_with,
    init_test_logging,
};
use cvg::action::{ConvergeError, FailureContext};
use cvg::notify::ConvergeEvent;
use cvg::target::{MockTarget, TargetCall};
use cvg::{ConvergeOutcome, TargetHost};
use cvg_common::{CommandResult, ErrorCode, TargetOs, test_log};

const WS: &str = "/tmp/cvg-ws";
const REPORT: &str = "/var/chef-workstation/cache/run-report.json";

fn del_dirs(target: &MockTarget) -> usize {
    target.count(|c| matches!(c, TargetCall::DelDir(_)))
}

fn del_files(target: &MockTarget) -> usize {
    target.count(|c| matches!(c, TargetCall::DelFile(_)))
}

#[test]
fn test_exit_zero_is_success() {
    init_test_logging();
    test_log!("TEST START: test_exit_zero_is_success");

    let ws = Workstation::new();
    let target = MockTarget::new(TargetOs::Linux)
        .with_command_result(CommandResult::new(0, "Chef Client finished", ""));
    let attempt = converge(&target, ws.request());

    assert_eq!(*attempt.result.as_ref().unwrap(), ConvergeOutcome::Success);
    assert_eq!(
        attempt.run_events(),
        vec![ConvergeEvent::RunningChef, ConvergeEvent::Success]
    );
    assert_eq!(del_dirs(&target), 1);
    assert_eq!(target.count(|c| matches!(c, TargetCall::FetchFile(_))), 0);

    test_log!("TEST PASS: test_exit_zero_is_success");
}

#[test]
fn test_exit_35_is_reboot_required() {
    init_test_logging();
    test_log!("TEST START: test_exit_35_is_reboot_required");

    let ws = Workstation::new();
    let target = MockTarget::new(TargetOs::Linux).with_exit_status(35);
    let attempt = converge(&target, ws.request());

    assert_eq!(
        *attempt.result.as_ref().unwrap(),
        ConvergeOutcome::RebootRequired
    );
    assert_eq!(
        attempt.run_events(),
        vec![ConvergeEvent::RunningChef, ConvergeEvent::Reboot]
    );
    assert_eq!(del_dirs(&target), 1);

    test_log!("TEST PASS: test_exit_35_is_reboot_required");
}

#[test]
fn test_failure_with_readable_report() {
    init_test_logging();
    test_log!("TEST START: test_failure_with_readable_report");

    let ws = Workstation::new();
    let target = MockTarget::new(TargetOs::Linux)
        .with_exit_status(1)
        .with_remote_file(REPORT, r#"{"exception":"X"}"#);
    let mapper = RecordingMapper::default();
    let attempt = converge_with(&target, &mapper, ws.request());

    assert!(attempt.result.is_err());
    assert_eq!(
        attempt.run_events(),
        vec![ConvergeEvent::RunningChef, ConvergeEvent::ConvergeError]
    );
    assert_eq!(
        mapper.calls(),
        vec![(Some("X".to_string()), FailureContext::default())]
    );
    assert_eq!(del_files(&target), 1);
    assert!(target.calls().contains(&TargetCall::DelFile(REPORT.to_string())));

    test_log!("TEST PASS: test_failure_with_readable_report");
}

#[test]
fn test_failure_with_unreadable_report() {
    init_test_logging();
    test_log!("TEST START: test_failure_with_unreadable_report");

    let ws = Workstation::new();
    let target = MockTarget::new(TargetOs::Linux).with_exit_status(1);
    let mapper = RecordingMapper::default();
    let attempt = converge_with(&target, &mapper, ws.request());

    assert!(attempt.result.is_err());
    assert_eq!(
        attempt.run_events(),
        vec![ConvergeEvent::RunningChef, ConvergeEvent::ConvergeError]
    );
    assert_eq!(
        mapper.calls(),
        vec![(
            None,
            FailureContext {
                failed_report_path: Some(REPORT.to_string()),
            }
        )]
    );
    assert_eq!(del_files(&target), 0);

    test_log!("TEST PASS: test_failure_with_unreadable_report");
}

#[test]
fn test_unreadable_report_maps_to_report_unavailable() {
    let ws = Workstation::new();
    let target = MockTarget::new(TargetOs::Linux).with_exit_status(1);
    let err = converge(&target, ws.request()).result.unwrap_err();

    assert_eq!(err.code(), ErrorCode::RemoteReportUnavailable);
    match err {
        ConvergeError::RemoteReportUnavailable { report_path } => {
            assert_eq!(report_path.as_deref(), Some(REPORT));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_report_exception_is_classified() {
    let ws = Workstation::new();
    let target = MockTarget::new(TargetOs::Linux)
        .with_exit_status(1)
        .with_remote_file(
            REPORT,
            r#"{"exception":"NoMethodError: undefined method `nmae' for Chef::Resource::File"}"#,
        );
    let err = converge(&target, ws.request()).result.unwrap_err();

    assert_eq!(err.code().code_string(), "CHEFCCR006");
    match err {
        ConvergeError::RemoteRunFailed { args, .. } => {
            assert_eq!(args, vec!["nmae", "Chef::Resource::File"]);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_client_exit_255_is_a_reported_failure() {
    let ws = Workstation::new();
    let target = MockTarget::new(TargetOs::Linux)
        .with_exit_status(255)
        .with_remote_file(REPORT, r#"{"exception":"Chef::Exceptions::ValidationFailed"}"#);
    let mapper = RecordingMapper::default();
    let attempt = converge_with(&target, &mapper, ws.request());

    assert!(!matches!(attempt.result, Err(ConvergeError::Transport(_))));
    assert_eq!(
        attempt.run_events(),
        vec![ConvergeEvent::RunningChef, ConvergeEvent::ConvergeError]
    );
    assert_eq!(mapper.calls().len(), 1);
    assert!(target.calls().contains(&TargetCall::FetchFile(REPORT.to_string())));
}

#[test]
fn test_workspace_removed_once_for_every_exit_status() {
    init_test_logging();
    test_log!("TEST START: test_workspace_removed_once_for_every_exit_status");

    for status in [0, 35, 1, 2, 213, 255, -1] {
        let ws = Workstation::new();
        let target = MockTarget::new(TargetOs::Linux).with_exit_status(status);
        let _ = converge(&target, ws.request());

        assert_eq!(del_dirs(&target), 1, "exit status {status}");
        let calls = target.calls();
        let run = calls
            .iter()
            .position(|c| matches!(c, TargetCall::RunCommand(_)))
            .unwrap();
        assert_eq!(calls[run + 1], TargetCall::DelDir(WS.to_string()));
    }

    test_log!("TEST PASS: test_workspace_removed_once_for_every_exit_status");
}

#[test]
fn test_call_sequence_and_workspace_layout() {
    let ws = Workstation::new();
    ws.add_cert("corp-root.crt");
    ws.add_cert("intermediate.pem");
    let target = MockTarget::new(TargetOs::Linux);
    let attempt = converge(&target, ws.request());
    assert!(attempt.result.is_ok());

    let remote: Vec<String> = target.uploads().into_iter().map(|(_, r)| r).collect();
    assert_eq!(
        remote,
        vec![
            format!("{WS}/{POLICY_FILE}"),
            format!("{WS}/workstation.rb"),
            format!("{WS}/chef_run_reporter.rb"),
            format!("{WS}/trusted_certs/corp-root.crt"),
            format!("{WS}/trusted_certs/intermediate.pem"),
        ]
    );

    let calls = target.calls();
    assert_eq!(calls[0], TargetCall::TempDir);
    assert!(calls.contains(&TargetCall::MakeDirectory(format!("{WS}/trusted_certs"))));
    assert_eq!(
        target.commands(),
        vec![format!(
            "bash -c 'cd {WS}; chef-client -z --config {WS}/workstation.rb --recipe-url {WS}/{POLICY_FILE}'"
        )]
    );

    let mut expected = STAGING_EVENTS.to_vec();
    expected.extend([
        ConvergeEvent::UploadingTrustedCerts,
        ConvergeEvent::RunningChef,
        ConvergeEvent::Success,
    ]);
    assert_eq!(attempt.events, expected);
}

#[test]
fn test_windows_workspace_path_is_normalized() {
    let ws = Workstation::new();
    let target = MockTarget::new(TargetOs::Windows)
        .with_temp_dir(r"C:\Users\cvg\AppData\Local\Temp\tmp42");
    let attempt = converge(&target, ws.request());
    assert!(attempt.result.is_ok());

    let dir = "C:/Users/cvg/AppData/Local/Temp/tmp42";
    assert_eq!(
        target.commands(),
        vec![format!(
            "Set-Location -Path {dir}; chef-client -z --config {dir}/workstation.rb --recipe-url {dir}/{POLICY_FILE} | Out-Null; Set-Location C:/; exit $LASTEXITCODE"
        )]
    );
    assert!(target.calls().contains(&TargetCall::DelDir(dir.to_string())));

    let config = target
        .uploaded_content(&format!("{dir}/workstation.rb"))
        .unwrap();
    assert!(config.contains("cache_path \"C:/chef-workstation\"\n"));
}

#[test]
fn test_windows_failure_reads_windows_report_path() {
    let ws = Workstation::new();
    let target = MockTarget::new(TargetOs::Windows).with_exit_status(1);
    let mapper = RecordingMapper::default();
    let _ = converge_with(&target, &mapper, ws.request());

    assert!(
        target
            .calls()
            .contains(&TargetCall::FetchFile("C:/chef-workstation/cache/run-report.json".to_string()))
    );
}

#[test]
fn test_certs_skipped_when_dir_has_glob_characters_and_no_certs() {
    init_test_logging();
    test_log!("TEST START: test_certs_skipped_when_dir_has_glob_characters_and_no_certs");

    let ws = Workstation::with_certs_dir_name("weird[glob]*chars?");
    std::fs::write(ws.certs_dir.join("README"), "no certs here").unwrap();
    // A sibling whose name the unescaped pattern would also match.
    let decoy = ws.dir.path().join("weirdgchars1");
    std::fs::create_dir_all(&decoy).unwrap();
    std::fs::write(decoy.join("decoy.crt"), "decoy").unwrap();

    let target = MockTarget::new(TargetOs::Linux);
    let attempt = converge(&target, ws.request());

    assert!(attempt.result.is_ok());
    assert!(!attempt.events.contains(&ConvergeEvent::UploadingTrustedCerts));
    assert_eq!(target.count(|c| matches!(c, TargetCall::MakeDirectory(_))), 0);
    assert_eq!(target.uploads().len(), 3);

    test_log!("TEST PASS: test_certs_skipped_when_dir_has_glob_characters_and_no_certs");
}

#[test]
fn test_certs_uploaded_from_dir_with_glob_characters() {
    let ws = Workstation::with_certs_dir_name("weird[glob]*chars?");
    ws.add_cert("root.pem");
    let target = MockTarget::new(TargetOs::Linux);
    let attempt = converge(&target, ws.request());

    assert!(attempt.result.is_ok());
    assert_eq!(
        target.uploaded_content(&format!("{WS}/trusted_certs/root.pem")).as_deref(),
        Some("-----BEGIN CERTIFICATE----- root.pem")
    );
}

#[test]
fn test_config_temp_file_removed_on_success_and_failure() {
    init_test_logging();
    test_log!("TEST START: test_config_temp_file_removed_on_success_and_failure");

    let config_local = |target: &MockTarget| {
        target
            .uploads()
            .into_iter()
            .find(|(_, remote)| remote.ends_with("/workstation.rb"))
            .map(|(local, _)| local)
            .unwrap()
    };

    let ws = Workstation::new();
    let ok = MockTarget::new(TargetOs::Linux);
    assert!(converge(&ok, ws.request()).result.is_ok());
    assert!(!config_local(&ok).exists());

    let failing = MockTarget::new(TargetOs::Linux).failing_upload("workstation.rb");
    let err = converge(&failing, ws.request()).result.unwrap_err();
    assert_eq!(err.code(), ErrorCode::ConfigUploadFailed);
    assert!(!config_local(&failing).exists());

    test_log!("TEST PASS: test_config_temp_file_removed_on_success_and_failure");
}

#[test]
fn test_policy_upload_failure_aborts() {
    let ws = Workstation::new();
    let target = MockTarget::new(TargetOs::Linux).failing_upload(POLICY_FILE);
    let attempt = converge(&target, ws.request());

    let err = attempt.result.unwrap_err();
    assert_eq!(err.code().code_string(), "CHEFUPL005");
    assert_eq!(attempt.events, vec![ConvergeEvent::CreatingRemotePolicy]);
    assert_eq!(target.uploads().len(), 1);
    assert!(target.commands().is_empty());
    // The partly staged directory is cleaned up.
    assert_eq!(del_dirs(&target), 1);
}

#[test]
fn test_config_upload_failure_stops_before_handler() {
    let ws = Workstation::new();
    let target = MockTarget::new(TargetOs::Linux).failing_upload("workstation.rb");
    let attempt = converge(&target, ws.request());

    assert!(matches!(
        attempt.result,
        Err(ConvergeError::ConfigUploadFailed { .. })
    ));
    assert_eq!(
        attempt.events,
        vec![
            ConvergeEvent::CreatingRemotePolicy,
            ConvergeEvent::CreatingRemoteConfig
        ]
    );
    assert!(
        !target
            .uploads()
            .iter()
            .any(|(_, remote)| remote.ends_with("chef_run_reporter.rb"))
    );
}

#[test]
fn test_handler_upload_failure() {
    let ws = Workstation::new();
    let target = MockTarget::new(TargetOs::Linux).failing_upload("chef_run_reporter.rb");
    let err = converge(&target, ws.request()).result.unwrap_err();

    assert_eq!(err.code().code_string(), "CHEFUPL004");
    assert!(target.commands().is_empty());
}

#[test]
fn test_cert_upload_failure_is_untyped_transport_error() {
    let ws = Workstation::new();
    ws.add_cert("root.crt");
    let target = MockTarget::new(TargetOs::Linux).failing_upload(".crt");
    let err = converge(&target, ws.request()).result.unwrap_err();

    assert!(matches!(err, ConvergeError::Transport(_)));
    assert_eq!(err.code(), ErrorCode::TransportFailed);
    assert!(target.commands().is_empty());
}

#[test]
fn test_temp_dir_failure_stages_nothing() {
    let ws = Workstation::new();
    let target = MockTarget::new(TargetOs::Linux).failing_temp_dir();
    let attempt = converge(&target, ws.request());

    assert!(matches!(attempt.result, Err(ConvergeError::Transport(_))));
    assert!(attempt.events.is_empty());
    assert_eq!(target.calls(), vec![TargetCall::TempDir]);
}

#[test]
fn test_invalid_target_log_level_fails_before_contacting_target() {
    init_test_logging();
    test_log!("TEST START: test_invalid_target_log_level_fails_before_contacting_target");

    let ws = Workstation::new();
    let request = ws.request().with_target_log_level("info\nsystem('id')");
    let target = MockTarget::new(TargetOs::Linux);
    let attempt = converge_with(&target, &RecordingMapper::default(), request);

    let err = attempt.result.unwrap_err();
    assert!(matches!(err, ConvergeError::InvalidRequest { .. }));
    assert_eq!(err.code(), ErrorCode::ConfigValidationError);
    assert!(attempt.events.is_empty());
    assert!(target.calls().is_empty());

    test_log!("TEST PASS: test_invalid_target_log_level_fails_before_contacting_target");
}

#[test]
fn test_run_command_transport_failure_still_removes_workspace() {
    let ws = Workstation::new();
    let target = MockTarget::new(TargetOs::Linux).failing_run_command();
    let attempt = converge(&target, ws.request());

    assert!(matches!(attempt.result, Err(ConvergeError::Transport(_))));
    assert_eq!(attempt.run_events(), vec![ConvergeEvent::RunningChef]);
    assert_eq!(del_dirs(&target), 1);
}

#[test]
fn test_request_settings_reach_config_script() {
    let ws = Workstation::new();
    let request = ws
        .request()
        .with_target_log_level("debug")
        .with_data_collector_url("https://automate.example.com/data-collector/v0/")
        .with_data_collector_token("tok3n")
        .with_cache_path("/opt/cvg");
    let target = MockTarget::new(TargetOs::Linux)
        .with_exit_status(1)
        .with_remote_file("/opt/cvg/cache/run-report.json", r#"{"exception":"boom"}"#);
    let mapper = RecordingMapper::default();
    let _ = converge_with(&target, &mapper, request);

    let script = target
        .uploaded_content(&format!("{WS}/workstation.rb"))
        .unwrap();
    assert!(script.contains("cache_path \"/opt/cvg\"\n"));
    assert!(script.contains("log_level :debug\n"));
    assert!(script.contains("data_collector.token \"tok3n\"\n"));
    assert_eq!(mapper.calls()[0].0.as_deref(), Some("boom"));
    assert_eq!(target.ws_cache_path(), "/var/chef-workstation");
}
