//! Retry and backoff configuration

use crate::error::ConfigResult;
use crate::validation::{validate_positive, Validatable};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry policy for rate-limited and transient hub failures
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per item, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry
    #[serde(with = "humantime_serde", default = "default_initial_delay")]
    pub initial_delay: Duration,

    /// Upper bound for any single retry delay
    #[serde(with = "humantime_serde", default = "default_max_delay")]
    pub max_delay: Duration,

    /// How the delay grows between attempts
    #[serde(default)]
    pub backoff_strategy: BackoffKind,

    /// Randomize delays so throttled items do not retry in lockstep
    #[serde(default = "crate::domains::utils::default_true")]
    pub jitter: bool,

    /// Pause fresh dispatches batch-wide after the hub signals rate limiting
    #[serde(default = "crate::domains::utils::default_true")]
    pub coordinate_throttling: bool,
}

/// Backoff growth selectable from configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackoffKind {
    Fixed,
    Linear,
    Exponential { base: f64 },
}

impl Default for BackoffKind {
    fn default() -> Self {
        BackoffKind::Exponential { base: 2.0 }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_strategy: BackoffKind::default(),
            jitter: true,
            coordinate_throttling: true,
        }
    }
}

impl Validatable for RetryConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_positive(self.max_attempts, "max_attempts", self.domain_name())?;

        if self.initial_delay.is_zero() {
            return Err(self.validation_error("initial_delay must be greater than 0"));
        }

        if self.max_delay < self.initial_delay {
            return Err(self.validation_error(format!(
                "max_delay ({:?}) must not be shorter than initial_delay ({:?})",
                self.max_delay, self.initial_delay
            )));
        }

        if let BackoffKind::Exponential { base } = self.backoff_strategy {
            if base < 1.0 {
                return Err(self.validation_error(format!(
                    "exponential base must be at least 1.0, got {}",
                    base
                )));
            }
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "retry"
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}
