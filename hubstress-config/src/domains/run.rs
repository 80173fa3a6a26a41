//! Run shape configuration

use crate::error::ConfigResult;
use crate::validation::{validate_positive, validate_required_string, Validatable};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a single load-generation run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Name prefix of every synthetic user owned by this tool
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Number of users/sessions to create
    #[serde(default = "default_count")]
    pub count: usize,

    /// Maximum number of hub calls in flight at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Deadline covering user creation, session creation and readiness polling
    #[serde(
        with = "crate::domains::utils::serde_duration",
        default = "default_run_timeout"
    )]
    pub timeout: Duration,

    /// Run against an in-memory simulated hub instead of the real one
    #[serde(default = "crate::domains::utils::default_false")]
    pub dry_run: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            count: default_count(),
            concurrency: default_concurrency(),
            timeout: default_run_timeout(),
            dry_run: false,
        }
    }
}

impl Validatable for RunConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_required_string(&self.prefix, "prefix", self.domain_name())?;
        if self.prefix.contains('/') || self.prefix.chars().any(char::is_whitespace) {
            return Err(self.validation_error(format!(
                "prefix '{}' must not contain '/' or whitespace",
                self.prefix
            )));
        }
        validate_positive(self.count, "count", self.domain_name())?;
        validate_positive(self.concurrency, "concurrency", self.domain_name())?;
        validate_positive(self.timeout.as_secs(), "timeout", self.domain_name())?;
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "run"
    }
}

fn default_prefix() -> String {
    "hub-stress-test".to_string()
}

fn default_count() -> usize {
    100
}

// Stays well under the hub's default concurrent spawn limit of 64
fn default_concurrency() -> usize {
    10
}

fn default_run_timeout() -> Duration {
    Duration::from_secs(600)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_config_defaults() {
        let config = RunConfig::default();
        assert_eq!(config.prefix, "hub-stress-test");
        assert_eq!(config.count, 100);
        assert_eq!(config.concurrency, 10);
        assert_eq!(config.timeout, Duration::from_secs(600));
        assert!(!config.dry_run);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_run_config_validation() {
        let mut config = RunConfig::default();
        config.count = 0;
        assert!(config.validate().is_err());

        config = RunConfig::default();
        config.concurrency = 0;
        assert!(config.validate().is_err());

        config = RunConfig::default();
        config.prefix = "bad/prefix".to_string();
        assert!(config.validate().is_err());

        config.prefix = String::new();
        assert!(config.validate().is_err());
    }
}
