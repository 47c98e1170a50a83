//! Translation of a remote client failure into a typed error.

use super::ConvergeError;
use cvg_common::ErrorCode;
use regex::Regex;

/// What is known about a failure besides the exception text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureContext {
    /// Remote report path, set when the report could not be read.
    pub failed_report_path: Option<String>,
}

/// Turns a remote exception (or its absence) into the error a convergence
/// fails with.
pub trait FailureMapper {
    fn map_failure(&self, exception: Option<&str>, context: &FailureContext) -> ConvergeError;
}

struct Rule {
    pattern: Regex,
    code: ErrorCode,
    /// Capture groups forming the error arguments, in argument order.
    groups: &'static [usize],
}

/// Classifies chef-client exception lines by pattern.
///
/// Rules are tried in order and the first match wins, so the more specific
/// `ValidationFailed` and `NameError` shapes sit ahead of their generic
/// fallbacks.
pub struct CcrFailureMapper {
    rules: Vec<Rule>,
}

impl CcrFailureMapper {
    pub fn new() -> Result<Self, regex::Error> {
        let table: [(&str, ErrorCode, &'static [usize]); 6] = [
            (
                r"(?m).*had an error:(.*:)\s+(.*$)",
                ErrorCode::RemoteResourceError,
                &[2],
            ),
            (
                r"(?m).*Chef::Exceptions::ValidationFailed:\s+Option action must be equal to one of:\s+(.*)!\s+You passed :(.*)\.",
                ErrorCode::RemoteInvalidAction,
                &[2, 1],
            ),
            (
                r"(?m).*Chef::Exceptions::ValidationFailed:\s+(.*)",
                ErrorCode::RemoteValidationFailed,
                &[1],
            ),
            (
                r"(?m).*NameError: undefined local variable or method `(.+)' for cookbook.+",
                ErrorCode::RemoteUnknownResource,
                &[1],
            ),
            (
                r"(?m).*NoMethodError: undefined method `(.+)' for cookbook.+",
                ErrorCode::RemoteUnknownResource,
                &[1],
            ),
            (
                r"(?m).*undefined method `(.*)' for (.+)",
                ErrorCode::RemoteUnknownProperty,
                &[1, 2],
            ),
        ];

        let mut rules = Vec::with_capacity(table.len());
        for (pattern, code, groups) in table {
            rules.push(Rule {
                pattern: Regex::new(pattern)?,
                code,
                groups,
            });
        }
        Ok(Self { rules })
    }

    /// Code and arguments for an exception line, if any rule matches.
    pub fn classify(&self, exception: &str) -> Option<(ErrorCode, Vec<String>)> {
        self.rules.iter().find_map(|rule| {
            let caps = rule.pattern.captures(exception)?;
            let args = rule
                .groups
                .iter()
                .map(|&i| {
                    caps.get(i)
                        .map(|m| m.as_str().trim().to_string())
                        .unwrap_or_default()
                })
                .collect();
            Some((rule.code, args))
        })
    }
}

impl FailureMapper for CcrFailureMapper {
    fn map_failure(&self, exception: Option<&str>, context: &FailureContext) -> ConvergeError {
        let Some(exception) = exception else {
            return ConvergeError::RemoteReportUnavailable {
                report_path: context.failed_report_path.clone(),
            };
        };
        match self.classify(exception) {
            Some((code, args)) => ConvergeError::RemoteRunFailed {
                message: describe(code, &args),
                code,
                args,
            },
            None => ConvergeError::RemoteRunFailedUnknownReason {
                exception: exception.to_string(),
            },
        }
    }
}

fn describe(code: ErrorCode, args: &[String]) -> String {
    let arg = |i: usize| args.get(i).map(String::as_str).unwrap_or("");
    match code {
        ErrorCode::RemoteResourceError => {
            format!("A resource failed during the converge: {}", arg(0))
        }
        ErrorCode::RemoteInvalidAction => format!(
            "'{}' is not a valid action for this resource. Valid actions are: {}",
            arg(0),
            arg(1)
        ),
        ErrorCode::RemoteValidationFailed => {
            format!("A resource property failed validation: {}", arg(0))
        }
        ErrorCode::RemoteUnknownResource => format!("'{}' is not a known resource", arg(0)),
        ErrorCode::RemoteUnknownProperty => {
            format!("'{}' is not a property of {}", arg(0), arg(1))
        }
        other => format!("{}: {}", other.message(), args.join(", ")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cvg_common::testing::init_test_logging;
    use tracing::info;

    fn mapper() -> CcrFailureMapper {
        CcrFailureMapper::new().unwrap()
    }

    fn classify(line: &str) -> Option<(String, Vec<String>)> {
        mapper()
            .classify(line)
            .map(|(code, args)| (code.code_string(), args))
    }

    #[test]
    fn test_resource_error_takes_message_after_last_colon() {
        init_test_logging();
        info!("TEST START: test_resource_error_takes_message_after_last_colon");
        let line = "package[nginx] (web::default line 3) had an error: \
                    Mixlib::ShellOut::ShellCommandFailed: Expected process to exit with [0], but received '100'";
        let (code, args) = classify(line).unwrap();
        assert_eq!(code, "CHEFCCR002");
        assert_eq!(args, vec!["Expected process to exit with [0], but received '100'"]);
        info!("TEST PASS: test_resource_error_takes_message_after_last_colon");
    }

    #[test]
    fn test_invalid_action_reports_passed_action_first() {
        let line = "Chef::Exceptions::ValidationFailed: Option action must be equal to one of: \
                    nothing, install, upgrade!  You passed :instal.";
        let (code, args) = classify(line).unwrap();
        assert_eq!(code, "CHEFCCR003");
        assert_eq!(args, vec!["instal", "nothing, install, upgrade"]);
    }

    #[test]
    fn test_other_validation_failures() {
        let line = "Chef::Exceptions::ValidationFailed: Option mode must be a kind of String!";
        let (code, args) = classify(line).unwrap();
        assert_eq!(code, "CHEFCCR004");
        assert_eq!(args, vec!["Option mode must be a kind of String!"]);
    }

    #[test]
    fn test_unknown_resource_from_name_error_and_no_method_error() {
        let name_error = "NameError: undefined local variable or method `pakage' for cookbook: web, recipe: default :Chef::Recipe";
        let no_method = "NoMethodError: undefined method `pakage' for cookbook: web, recipe: default :Chef::Recipe";
        for line in [name_error, no_method] {
            let (code, args) = classify(line).unwrap();
            assert_eq!(code, "CHEFCCR005");
            assert_eq!(args, vec!["pakage"]);
        }
    }

    #[test]
    fn test_unknown_property() {
        let line = "NoMethodError: undefined method `nmae' for Chef::Resource::File";
        let (code, args) = classify(line).unwrap();
        assert_eq!(code, "CHEFCCR006");
        assert_eq!(args, vec!["nmae", "Chef::Resource::File"]);
    }

    #[test]
    fn test_match_inside_multiline_exception() {
        let text = "Recipe compile error\n\
                    Chef::Exceptions::ValidationFailed: Option owner must be a kind of String!\n\
                    /opt/chef/embedded/lib/ruby/mixin/params_validate.rb:12";
        let (code, args) = classify(text).unwrap();
        assert_eq!(code, "CHEFCCR004");
        assert_eq!(args, vec!["Option owner must be a kind of String!"]);
    }

    #[test]
    fn test_unrecognised_exception_maps_to_unknown_reason() {
        let err = mapper().map_failure(Some("RuntimeError: disk full"), &FailureContext::default());
        assert_eq!(err.code().code_string(), "CHEFCCR099");
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn test_absent_exception_carries_report_path() {
        init_test_logging();
        info!("TEST START: test_absent_exception_carries_report_path");
        let context = FailureContext {
            failed_report_path: Some("/var/chef-workstation/cache/run-report.json".to_string()),
        };
        match mapper().map_failure(None, &context) {
            ConvergeError::RemoteReportUnavailable { report_path } => {
                assert_eq!(
                    report_path.as_deref(),
                    Some("/var/chef-workstation/cache/run-report.json")
                );
            }
            other => panic!("unexpected error: {other:?}"),
        }
        info!("TEST PASS: test_absent_exception_carries_report_path");
    }

    #[test]
    fn test_mapped_error_message_names_arguments() {
        let err = mapper().map_failure(
            Some("NoMethodError: undefined method `nmae' for Chef::Resource::File"),
            &FailureContext::default(),
        );
        assert_eq!(err.code(), ErrorCode::RemoteUnknownProperty);
        assert_eq!(err.to_string(), "'nmae' is not a property of Chef::Resource::File");
    }
}
