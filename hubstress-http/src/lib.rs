//! Hub control-plane client for hubstress
//!
//! This crate provides the [`HubApi`] trait, a reqwest-backed [`HubClient`]
//! talking to a JupyterHub-compatible REST API, uniform classification of
//! failures into [`ApiError`], and [`SimulatedHub`], an in-memory hub used for
//! dry runs and tests.

pub mod client;
pub mod config;
pub mod errors;
pub mod simulated;
pub mod types;

// Re-export main types for convenience
pub use client::{HubApi, HubClient};
pub use config::HttpConfig;
pub use errors::{ApiError, HttpError};
pub use simulated::SimulatedHub;
pub use types::{HubOperation, HubServer, HubUser, SessionStatus};
