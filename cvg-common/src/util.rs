//! Shared utilities for cvg.

use regex::Regex;
use std::sync::LazyLock;

/// A secret-bearing key or flag followed by its value.
///
/// Values may be double-quoted (with escapes), single-quoted or bare.
static SECRET_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?P<key>data_collector\.token\s+|[A-Z_]*(?:TOKEN|PASSWORD)=|--(?:token|password)[= ])(?:"(?:[^"\\]|\\.)*"|'[^']*'|[^\s'"]+)"#,
    )
    .expect("secret value regex is valid")
});

/// Mask secrets in a command or script line before logging.
///
/// The key or flag is kept and its value replaced with `***`.
pub fn mask_sensitive_command(cmd: &str) -> String {
    SECRET_VALUE.replace_all(cmd, "${key}***").into_owned()
}
