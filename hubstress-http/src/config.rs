//! HTTP configuration

use hubstress_config::HubConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Hub client configuration, fixed at construction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Base URL of the hub REST API
    pub endpoint: String,

    /// Bearer token sent with every request
    #[serde(skip_serializing)]
    pub token: Option<String>,

    /// Request timeout
    pub timeout: Duration,

    /// Timeout for listing users, which can be slow on large hubs
    pub list_timeout: Duration,

    /// User agent string
    pub user_agent: String,

    /// Whether to verify SSL certificates
    pub verify_ssl: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self::from(&HubConfig::default())
    }
}

impl From<&HubConfig> for HttpConfig {
    fn from(config: &HubConfig) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            token: config.token.clone(),
            timeout: config.timeout,
            list_timeout: config.list_timeout,
            user_agent: config.user_agent.clone(),
            verify_ssl: config.verify_ssl,
        }
    }
}

impl HttpConfig {
    /// Configuration for `endpoint` with `token` and default timeouts
    pub fn new(endpoint: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            token: Some(token.into()),
            ..Self::default()
        }
    }
}
