//! Domain-specific configuration modules

pub mod hub;
pub mod logging;
pub mod poll;
pub mod retry;
pub mod run;
pub mod utils;

use crate::error::ConfigResult;
use crate::validation::Validatable;
use serde::{Deserialize, Serialize};

/// Main hubstress configuration combining all domains
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct HubStressConfig {
    /// Hub control-plane connection
    #[serde(default)]
    pub hub: hub::HubConfig,

    /// Run shape: namespace, count, concurrency, deadline
    #[serde(default)]
    pub run: run::RunConfig,

    /// Retry and backoff policy for hub calls
    #[serde(default)]
    pub retry: retry::RetryConfig,

    /// Readiness / stop polling
    #[serde(default)]
    pub poll: poll::PollConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: logging::LoggingConfig,
}

impl HubStressConfig {
    /// Validate all domain configurations
    pub fn validate_all(&self) -> ConfigResult<()> {
        self.hub.validate()?;
        self.run.validate()?;
        self.retry.validate()?;
        self.poll.validate()?;
        self.logging.validate()?;

        // A dry run never talks to the hub, so it needs no credential
        if !self.run.dry_run {
            self.hub.validate_credentials()?;
        }

        if self.run.concurrency > self.hub.spawn_limit {
            log::warn!(
                "run.concurrency {} exceeds the hub spawn limit {}; expect rate limiting",
                self.run.concurrency,
                self.hub.spawn_limit
            );
        }

        Ok(())
    }

    /// Copy of this configuration that is safe to log
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.hub.token.is_some() {
            copy.hub.token = Some("***".to_string());
        }
        copy
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        let config = HubStressConfig::default();
        serde_yaml::to_string(&config)
            .unwrap_or_else(|_| "# Failed to generate sample config".to_string())
    }
}
