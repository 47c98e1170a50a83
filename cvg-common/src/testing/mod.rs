//! Test support shared by the cvg crates.

pub mod log;

pub use log::{init_global_test_logging, init_test_logging};
