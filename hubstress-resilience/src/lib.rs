//! Resilience patterns for hubstress
//!
//! This crate provides the retry policy and backoff calculation used by the
//! batch scheduler, a batch-wide throttle gate that reacts to hub rate
//! limiting, and shutdown/deadline coordination built on cancellation tokens.

pub mod backoff;
pub mod retry;
pub mod shutdown;
pub mod throttle;

// Re-export commonly used types
pub use backoff::{BackoffCalculator, BackoffStrategy};
pub use retry::{RetryDecision, RetryPolicy, Retryable};
pub use shutdown::{Deadline, ShutdownCoordinator};
pub use throttle::{ThrottleGate, ThrottleMetrics};
