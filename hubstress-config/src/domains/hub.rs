//! Hub control-plane connection configuration

use crate::error::ConfigResult;
use crate::validation::{validate_http_url, validate_positive, validate_required_string, Validatable};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Hub API connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Base URL of the hub REST API, e.g. `https://hub.example.com/hub/api`
    #[serde(default)]
    pub endpoint: String,

    /// Admin API token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Timeout for a single hub request
    #[serde(
        with = "crate::domains::utils::serde_duration",
        default = "default_timeout"
    )]
    pub timeout: Duration,

    /// Timeout for listing every user on the hub
    #[serde(
        with = "crate::domains::utils::serde_duration",
        default = "default_list_timeout"
    )]
    pub list_timeout: Duration,

    /// User agent string
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Whether to verify TLS certificates
    #[serde(default = "crate::domains::utils::default_true")]
    pub verify_ssl: bool,

    /// The hub's own concurrent spawn limit
    #[serde(default = "default_spawn_limit")]
    pub spawn_limit: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            token: None,
            timeout: default_timeout(),
            list_timeout: default_list_timeout(),
            user_agent: default_user_agent(),
            verify_ssl: true,
            spawn_limit: default_spawn_limit(),
        }
    }
}

impl HubConfig {
    /// Check that an API token is present
    pub fn validate_credentials(&self) -> ConfigResult<()> {
        match self.token.as_deref() {
            Some(token) => validate_required_string(token, "token", self.domain_name()),
            None => Err(self.validation_error(
                "an API token is required (set hub.token, HUBSTRESS_TOKEN or JUPYTERHUB_API_TOKEN)",
            )),
        }
    }
}

impl Validatable for HubConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_http_url(&self.endpoint, "endpoint", self.domain_name())?;
        validate_positive(self.timeout.as_secs(), "timeout", self.domain_name())?;
        validate_positive(self.list_timeout.as_secs(), "list_timeout", self.domain_name())?;
        validate_required_string(&self.user_agent, "user_agent", self.domain_name())?;
        validate_positive(self.spawn_limit, "spawn_limit", self.domain_name())?;
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "hub"
    }
}

// POST /users/{name}/server can take over 10 seconds
fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_list_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_user_agent() -> String {
    concat!("hubstress/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_spawn_limit() -> usize {
    64
}
