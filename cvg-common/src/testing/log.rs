//! Test logging.
//!
//! `init_test_logging()` routes events through the harness capture so they
//! only show for failing tests. `init_global_test_logging()` also appends
//! every event as a JSON line to `target/test-logs/cvg-tests.jsonl`, or to
//! `CVG_TEST_LOG_FILE` when set. Both may be called from every test.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, Once};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

static JSONL_INIT: Once = Once::new();

/// `cvg`, `cvg_common` and `test` targets at `CVG_TEST_LOG_LEVEL` (info).
fn filter() -> EnvFilter {
    let level = std::env::var("CVG_TEST_LOG_LEVEL").unwrap_or_else(|_| "info".into());
    EnvFilter::try_new(format!("cvg={level},cvg_common={level},test={level}"))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_test_writer()
        .compact()
        .try_init();
}

pub fn init_global_test_logging() {
    JSONL_INIT.call_once(|| {
        let jsonl = open_log_file().map(|file| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_file(true)
                .with_line_number(true)
                .with_writer(Mutex::new(file))
        });
        let captured = tracing_subscriber::fmt::layer()
            .with_test_writer()
            .compact();

        // Another subscriber may already be installed by a unit test.
        let _ = tracing_subscriber::registry()
            .with(filter())
            .with(jsonl)
            .with(captured)
            .try_init();
    });
}

fn open_log_file() -> Option<File> {
    let path = match std::env::var_os("CVG_TEST_LOG_FILE") {
        Some(custom) => PathBuf::from(custom),
        None => target_dir().join("test-logs").join("cvg-tests.jsonl"),
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok()?;
    }
    OpenOptions::new().create(true).append(true).open(path).ok()
}

/// `CARGO_TARGET_DIR`, else the nearest `target/` above the working dir.
fn target_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("CARGO_TARGET_DIR") {
        return PathBuf::from(dir);
    }
    let cwd = std::env::current_dir().unwrap_or_default();
    cwd.ancestors()
        .map(|dir| dir.join("target"))
        .find(|candidate| candidate.is_dir())
        .unwrap_or_else(|| Path::new("target").to_path_buf())
}

/// Log a progress marker under the `test` target.
#[macro_export]
macro_rules! test_log {
    ($($arg:tt)*) => {
        tracing::info!(target: "test", $($arg)*);
    };
}
