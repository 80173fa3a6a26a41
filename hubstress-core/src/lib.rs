//! Core load-generation engine for hubstress
//!
//! This crate turns a run request into hub calls: the [`identity`] module
//! names and discovers synthetic users, [`batch`] dispatches calls under a
//! concurrency bound with retries, [`poller`] waits for sessions to settle and
//! [`controller`] sequences the phases of a run into a [`RunReport`].

pub mod batch;
pub mod controller;
pub mod error;
pub mod identity;
pub mod poller;
pub mod report;

pub use batch::{BatchItem, BatchOutcome, BatchScheduler, ItemOutcome, Operation};
pub use controller::RunController;
pub use error::{CoreError, Result};
pub use identity::{Identity, IdentityAllocator, IdentityState, Namespace};
pub use poller::{PollOutcome, ReadinessPoller, StopOutcome};
pub use report::{
    Failure, FailureKind, NamespaceSummary, Phase, PhaseTiming, RunMode, RunReport, EXIT_FAILURES,
    EXIT_FATAL, EXIT_OK,
};
