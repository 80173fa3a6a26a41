//! Configuration loading and environment variable handling

use crate::domains::utils::parse_seconds;
use crate::domains::HubStressConfig;
use crate::error::{ConfigError, ConfigResult};
use std::path::Path;
use std::str::FromStr;

/// Legacy variables understood by the hub's own tooling
const HUB_ENDPOINT_VAR: &str = "JUPYTERHUB_ENDPOINT";
const HUB_TOKEN_VAR: &str = "JUPYTERHUB_API_TOKEN";

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    /// Environment variable prefix
    prefix: String,
}

impl ConfigLoader {
    /// Create a new config loader with default prefix
    pub fn new() -> Self {
        Self {
            prefix: "HUBSTRESS".to_string(),
        }
    }

    /// Create a new config loader with custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Load configuration from a YAML file with environment overrides
    pub fn from_file(&self, path: impl AsRef<Path>) -> ConfigResult<HubStressConfig> {
        let config = self.read(Some(path))?;
        config.validate_all()?;
        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env(&self) -> ConfigResult<HubStressConfig> {
        let config = self.read(None::<&Path>)?;
        config.validate_all()?;
        Ok(config)
    }

    /// Read file (or defaults) plus environment overrides without validating,
    /// so callers can layer command-line flags on top first.
    pub fn read(&self, config_path: Option<impl AsRef<Path>>) -> ConfigResult<HubStressConfig> {
        let mut config = match config_path {
            Some(path) => {
                let content = std::fs::read_to_string(path)?;
                serde_yaml::from_str(&content)?
            }
            None => HubStressConfig::default(),
        };
        self.apply_env_overrides(&mut config)?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    fn apply_env_overrides(&self, config: &mut HubStressConfig) -> ConfigResult<()> {
        self.apply_hub_overrides(&mut config.hub)?;
        self.apply_run_overrides(&mut config.run)?;
        self.apply_retry_overrides(&mut config.retry)?;
        self.apply_poll_overrides(&mut config.poll)?;
        self.apply_logging_overrides(&mut config.logging)?;
        Ok(())
    }

    /// Apply hub connection overrides
    fn apply_hub_overrides(&self, config: &mut crate::domains::hub::HubConfig) -> ConfigResult<()> {
        if let Ok(endpoint) = self.get_env_var("ENDPOINT") {
            config.endpoint = endpoint;
        } else if config.endpoint.is_empty() {
            if let Ok(endpoint) = std::env::var(HUB_ENDPOINT_VAR) {
                config.endpoint = endpoint;
            }
        }

        if let Ok(token) = self.get_env_var("TOKEN") {
            config.token = Some(token);
        } else if config.token.is_none() {
            if let Ok(token) = std::env::var(HUB_TOKEN_VAR) {
                config.token = Some(token);
            }
        }

        if let Ok(timeout) = self.get_env_var("HTTP_TIMEOUT") {
            config.timeout = parse_seconds(&timeout)
                .map_err(|e| ConfigError::EnvError(format!("Invalid HTTP_TIMEOUT: {}", e)))?;
        }

        if let Ok(verify_ssl) = self.get_env_var("VERIFY_SSL") {
            config.verify_ssl = verify_ssl
                .parse()
                .map_err(|e| ConfigError::EnvError(format!("Invalid VERIFY_SSL: {}", e)))?;
        }

        Ok(())
    }

    /// Apply run shape overrides
    fn apply_run_overrides(&self, config: &mut crate::domains::run::RunConfig) -> ConfigResult<()> {
        if let Ok(prefix) = self.get_env_var("PREFIX") {
            config.prefix = prefix;
        }

        if let Ok(count) = self.get_env_var("COUNT") {
            config.count = count
                .parse()
                .map_err(|e| ConfigError::EnvError(format!("Invalid COUNT: {}", e)))?;
        }

        if let Ok(concurrency) = self.get_env_var("CONCURRENCY") {
            config.concurrency = concurrency
                .parse()
                .map_err(|e| ConfigError::EnvError(format!("Invalid CONCURRENCY: {}", e)))?;
        }

        if let Ok(timeout) = self.get_env_var("RUN_TIMEOUT") {
            config.timeout = parse_seconds(&timeout)
                .map_err(|e| ConfigError::EnvError(format!("Invalid RUN_TIMEOUT: {}", e)))?;
        }

        if let Ok(dry_run) = self.get_env_var("DRY_RUN") {
            config.dry_run = dry_run
                .parse()
                .map_err(|e| ConfigError::EnvError(format!("Invalid DRY_RUN: {}", e)))?;
        }

        Ok(())
    }

    /// Apply retry overrides
    fn apply_retry_overrides(
        &self,
        config: &mut crate::domains::retry::RetryConfig,
    ) -> ConfigResult<()> {
        if let Ok(max_attempts) = self.get_env_var("MAX_ATTEMPTS") {
            config.max_attempts = max_attempts
                .parse()
                .map_err(|e| ConfigError::EnvError(format!("Invalid MAX_ATTEMPTS: {}", e)))?;
        }

        if let Ok(jitter) = self.get_env_var("RETRY_JITTER") {
            config.jitter = jitter
                .parse()
                .map_err(|e| ConfigError::EnvError(format!("Invalid RETRY_JITTER: {}", e)))?;
        }

        Ok(())
    }

    /// Apply polling overrides
    fn apply_poll_overrides(&self, config: &mut crate::domains::poll::PollConfig) -> ConfigResult<()> {
        if let Ok(interval) = self.get_env_var("POLL_INTERVAL") {
            config.interval = parse_seconds(&interval)
                .map_err(|e| ConfigError::EnvError(format!("Invalid POLL_INTERVAL: {}", e)))?;
        }

        if let Ok(timeout) = self.get_env_var("READY_TIMEOUT") {
            config.ready_timeout = parse_seconds(&timeout)
                .map_err(|e| ConfigError::EnvError(format!("Invalid READY_TIMEOUT: {}", e)))?;
        }

        Ok(())
    }

    /// Apply logging config overrides
    fn apply_logging_overrides(
        &self,
        config: &mut crate::domains::logging::LoggingConfig,
    ) -> ConfigResult<()> {
        if let Ok(log_level) = self.get_env_var("LOG_LEVEL") {
            config.level = crate::domains::logging::LogLevel::from_str(&log_level)
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_LEVEL: {}", log_level)))?;
        }

        if let Ok(format) = self.get_env_var("LOG_FORMAT") {
            config.format = crate::domains::logging::LogFormat::from_str(&format)
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_FORMAT: {}", format)))?;
        }

        Ok(())
    }

    /// Get environment variable with prefix
    fn get_env_var(&self, name: &str) -> Result<String, std::env::VarError> {
        std::env::var(format!("{}_{}", self.prefix, name))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    const CLEAN_ENV: [(&str, Option<&str>); 6] = [
        ("HUBSTRESS_ENDPOINT", None),
        ("HUBSTRESS_TOKEN", None),
        ("HUBSTRESS_COUNT", None),
        ("HUBSTRESS_CONCURRENCY", None),
        (HUB_ENDPOINT_VAR, None),
        (HUB_TOKEN_VAR, None),
    ];

    #[test]
    fn test_from_env_with_hub_variables() {
        temp_env::with_vars(
            [
                (HUB_ENDPOINT_VAR, Some("http://localhost:8000/hub/api")),
                (HUB_TOKEN_VAR, Some("legacy-token")),
                ("HUBSTRESS_ENDPOINT", None),
                ("HUBSTRESS_TOKEN", None),
                ("HUBSTRESS_COUNT", Some("25")),
            ],
            || {
                let config = ConfigLoader::new().from_env().unwrap();
                assert_eq!(config.hub.endpoint, "http://localhost:8000/hub/api");
                assert_eq!(config.hub.token.as_deref(), Some("legacy-token"));
                assert_eq!(config.run.count, 25);
            },
        );
    }

    #[test]
    fn test_prefixed_variables_win() {
        temp_env::with_vars(
            [
                (HUB_ENDPOINT_VAR, Some("http://legacy:8000/hub/api")),
                ("HUBSTRESS_ENDPOINT", Some("https://hub.example.com/hub/api")),
                ("HUBSTRESS_TOKEN", Some("new-token")),
                ("HUBSTRESS_RUN_TIMEOUT", Some("42")),
            ],
            || {
                let config = ConfigLoader::new().from_env().unwrap();
                assert_eq!(config.hub.endpoint, "https://hub.example.com/hub/api");
                assert_eq!(config.hub.token.as_deref(), Some("new-token"));
                assert_eq!(config.run.timeout, Duration::from_secs(42));
            },
        );
    }

    #[test]
    fn test_invalid_env_value() {
        temp_env::with_vars(
            [
                ("HUBSTRESS_ENDPOINT", Some("http://localhost:8000/hub/api")),
                ("HUBSTRESS_TOKEN", Some("t")),
                ("HUBSTRESS_CONCURRENCY", Some("lots")),
            ],
            || {
                let err = ConfigLoader::new().from_env().unwrap_err();
                assert!(matches!(err, ConfigError::EnvError(_)));
            },
        );
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
hub:
  endpoint: https://hub.example.com/hub/api
  token: file-token
run:
  prefix: load-a
  count: 7
  concurrency: 3
poll:
  interval: 500ms
"#
        )
        .unwrap();

        temp_env::with_vars(CLEAN_ENV, || {
            let config = ConfigLoader::new().from_file(file.path()).unwrap();
            assert_eq!(config.run.prefix, "load-a");
            assert_eq!(config.run.count, 7);
            assert_eq!(config.run.concurrency, 3);
            assert_eq!(config.poll.interval, Duration::from_millis(500));
            assert_eq!(config.hub.token.as_deref(), Some("file-token"));
        });
    }

    #[test]
    fn test_read_skips_validation() {
        temp_env::with_vars(CLEAN_ENV, || {
            let config = ConfigLoader::new().read(None::<&Path>).unwrap();
            assert!(config.hub.endpoint.is_empty());
            assert!(config.validate_all().is_err());
        });
    }
}
