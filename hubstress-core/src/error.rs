//! Run-level errors

use hubstress_http::ApiError;
use thiserror::Error;

/// Errors that abort a run before or instead of producing a report.
///
/// Failures of individual hub calls never surface here; they are recorded
/// per identity in the [`RunReport`](crate::RunReport).
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Failed to query existing identities: {0}")]
    Allocation(#[source] ApiError),

    #[error("Identity index space exhausted under prefix '{0}'")]
    IndexExhausted(String),

    #[error("Invalid run parameters: {0}")]
    InvalidRun(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
