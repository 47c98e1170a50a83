//! Converge a remote target by staging a policy bundle and running
//! chef-client against it in local mode.

pub mod action;
pub mod notify;
pub mod target;

pub use action::{
    CcrFailureMapper, ConvergeError, ConvergeOutcome, ConvergeRequest, ConvergeTarget,
    FailureMapper,
};
pub use notify::{ConvergeEvent, LogNotifier, Notifier};
pub use target::{SshTarget, TargetHost, TransportError};
