//! Error catalog and definitions for remote target convergence
//!
//! Each user-visible failure maps to a catalog entry with a stable code,
//! a message and remediation steps. See [`catalog`] for the code ranges.

pub mod catalog;

pub use catalog::{ErrorCategory, ErrorCode, ErrorEntry};
