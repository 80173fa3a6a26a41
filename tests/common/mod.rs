//! Shared fixtures for the wiremock-backed end-to-end tests
#![allow(dead_code)]

use anyhow::Result;
use hubstress_config::HubStressConfig;
use hubstress_core::RunController;
use hubstress_http::{HttpConfig, HubClient};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const PREFIX: &str = "load-it";

/// Configuration pointing at `server` with short delays so tests finish quickly
pub fn config_for(server: &MockServer) -> HubStressConfig {
    let mut config = HubStressConfig::default();
    config.hub.endpoint = format!("{}/hub/api", server.uri());
    config.hub.token = Some("test-token".to_string());
    config.hub.timeout = Duration::from_secs(5);
    config.run.prefix = PREFIX.to_string();
    config.run.timeout = Duration::from_secs(30);
    config.retry.max_attempts = 3;
    config.retry.initial_delay = Duration::from_millis(10);
    config.retry.max_delay = Duration::from_millis(100);
    config.poll.interval = Duration::from_millis(50);
    config.poll.ready_timeout = Duration::from_secs(5);
    config.poll.stop_timeout = Duration::from_secs(2);
    config
}

pub fn controller_for(server: &MockServer) -> Result<RunController> {
    let config = config_for(server);
    config.validate_all()?;
    let client = HubClient::new(HttpConfig::from(&config.hub))?;
    Ok(RunController::from_config(Arc::new(client), &config))
}

/// User model as the hub returns it; `server` is the default server entry
pub fn user(name: &str, server: Option<Value>) -> Value {
    match server {
        Some(server) => json!({ "name": name, "admin": false, "servers": { "": server } }),
        None => json!({ "name": name, "admin": false, "servers": {} }),
    }
}

pub fn ready_server() -> Value {
    json!({ "name": "", "ready": true, "pending": null, "url": "/user/x/" })
}

pub fn pending_server() -> Value {
    json!({ "name": "", "ready": false, "pending": "spawn", "url": "/user/x/" })
}

/// Answer `GET /users` with a bare list
pub async fn mount_listing(server: &MockServer, users: Vec<Value>) {
    Mock::given(method("GET"))
        .and(path("/hub/api/users"))
        .respond_with(ResponseTemplate::new(200).set_body_json(Value::Array(users)))
        .mount(server)
        .await;
}
