//! Session status polling configuration

use crate::error::ConfigResult;
use crate::validation::{validate_positive, Validatable};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Readiness and stop polling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Delay between two status rounds
    #[serde(with = "humantime_serde", default = "default_interval")]
    pub interval: Duration,

    /// How long a spawned session may stay pending
    #[serde(
        with = "crate::domains::utils::serde_duration",
        default = "default_ready_timeout"
    )]
    pub ready_timeout: Duration,

    /// How long to wait for stopped sessions to disappear
    #[serde(
        with = "crate::domains::utils::serde_duration",
        default = "default_stop_timeout"
    )]
    pub stop_timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            ready_timeout: default_ready_timeout(),
            stop_timeout: default_stop_timeout(),
        }
    }
}

impl Validatable for PollConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.interval.is_zero() {
            return Err(self.validation_error("interval must be greater than 0"));
        }
        validate_positive(self.ready_timeout.as_secs(), "ready_timeout", self.domain_name())?;
        validate_positive(self.stop_timeout.as_secs(), "stop_timeout", self.domain_name())?;
        if self.interval > self.ready_timeout {
            return Err(self.validation_error("interval must not exceed ready_timeout"));
        }
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "poll"
    }
}

fn default_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_ready_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_stop_timeout() -> Duration {
    Duration::from_secs(60)
}
