//! HTTP client implementation

use crate::config::HttpConfig;
use crate::errors::{parse_retry_after, ApiError, HttpError};
use crate::types::{HubOperation, HubUser, SessionStatus, UserListing};
use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, RETRY_AFTER},
    Client, RequestBuilder, Response, StatusCode,
};
use std::time::Instant;
use tracing::{debug, warn};
use url::Url;

const PAGINATION_MEDIA_TYPE: &str = "application/jupyterhub-pagination+json";
const PAGE_LIMIT: u64 = 200;

/// Hub control-plane calls.
///
/// Every method performs exactly one logical call and never retries; callers
/// decide what to do with the classified [`ApiError`].
#[async_trait]
pub trait HubApi: Send + Sync {
    /// All users on the hub with their server state
    async fn list_users(&self) -> Result<Vec<HubUser>, ApiError>;

    /// `POST /users/{name}`
    async fn create_user(&self, name: &str) -> Result<(), ApiError>;

    /// `POST /users/{name}/server`; `Ready` on 201, `Pending` on 202
    async fn create_session(&self, name: &str) -> Result<SessionStatus, ApiError>;

    /// `GET /users/{name}` mapped to the default session's status
    async fn session_status(&self, name: &str) -> Result<SessionStatus, ApiError>;

    /// `DELETE /users/{name}/server`; `Absent` when gone, `Pending` while stopping
    async fn delete_session(&self, name: &str) -> Result<SessionStatus, ApiError>;

    /// `DELETE /users/{name}`; an already missing user counts as deleted
    async fn delete_user(&self, name: &str) -> Result<(), ApiError>;
}

/// reqwest-backed client for a JupyterHub-compatible REST API
#[derive(Debug, Clone)]
pub struct HubClient {
    client: Client,
    base: Url,
    config: HttpConfig,
}

impl HubClient {
    /// Build a client; credentials, base URL and timeouts are fixed from here on
    pub fn new(config: HttpConfig) -> Result<Self, HttpError> {
        let base = Url::parse(&config.endpoint)
            .map_err(|e| HttpError::InvalidUrl(format!("{}: {}", config.endpoint, e)))?;
        if base.cannot_be_a_base() {
            return Err(HttpError::InvalidUrl(config.endpoint.clone()));
        }

        let mut headers = HeaderMap::new();
        if let Some(token) = &config.token {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|_| {
                HttpError::InvalidToken("token contains characters not allowed in a header".to_string())
            })?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        } else {
            warn!("No API token configured, hub requests will be unauthenticated");
        }

        debug!(
            "Creating hub client for {} with timeout: {}s",
            base,
            config.timeout.as_secs()
        );
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .danger_accept_invalid_certs(!config.verify_ssl)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base,
            config,
        })
    }

    /// Base URL of the hub API
    pub fn endpoint(&self) -> &Url {
        &self.base
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        // Checked in `new`: the base URL can carry path segments
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn execute(
        &self,
        operation: HubOperation,
        request: RequestBuilder,
    ) -> Result<Response, ApiError> {
        let request = request.build().map_err(|e| ApiError::from_reqwest(&e))?;
        let method = request.method().clone();
        let url = request.url().clone();

        let started = Instant::now();
        match self.client.execute(request).await {
            Ok(response) => {
                debug!(
                    operation = %operation,
                    status = response.status().as_u16(),
                    latency_ms = started.elapsed().as_millis() as u64,
                    "{} {}",
                    method,
                    url
                );
                Ok(response)
            }
            Err(e) => {
                debug!(
                    operation = %operation,
                    latency_ms = started.elapsed().as_millis() as u64,
                    error = %e,
                    "{} {} failed",
                    method,
                    url
                );
                Err(ApiError::from_reqwest(&e))
            }
        }
    }

    async fn error_from(response: Response) -> ApiError {
        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_retry_after);
        let body = response.text().await.unwrap_or_default();
        ApiError::from_status(status, retry_after, &body)
    }

    fn unexpected(operation: HubOperation, status: StatusCode) -> ApiError {
        ApiError::Unknown {
            message: format!("unexpected status {} for {}", status.as_u16(), operation),
        }
    }
}

#[async_trait]
impl HubApi for HubClient {
    async fn list_users(&self) -> Result<Vec<HubUser>, ApiError> {
        let mut users = Vec::new();
        let mut offset = 0u64;

        loop {
            let mut url = self.url(&["users"]);
            url.query_pairs_mut()
                .append_pair("offset", &offset.to_string())
                .append_pair("limit", &PAGE_LIMIT.to_string());

            let request = self
                .client
                .get(url)
                .header(ACCEPT, PAGINATION_MEDIA_TYPE)
                .timeout(self.config.list_timeout);
            let response = self.execute(HubOperation::ListUsers, request).await?;
            if !response.status().is_success() {
                return Err(Self::error_from(response).await);
            }

            let listing: UserListing = response
                .json()
                .await
                .map_err(|e| ApiError::from_reqwest(&e))?;
            match listing {
                UserListing::List(page) => {
                    users.extend(page);
                    break;
                }
                UserListing::Page(page) => {
                    users.extend(page.items);
                    match page.pagination.next {
                        Some(next) if next.offset > offset => offset = next.offset,
                        _ => break,
                    }
                }
            }
        }

        debug!("Hub lists {} users", users.len());
        Ok(users)
    }

    async fn create_user(&self, name: &str) -> Result<(), ApiError> {
        let request = self.client.post(self.url(&["users", name]));
        let response = self.execute(HubOperation::CreateUser, request).await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::error_from(response).await)
        }
    }

    async fn create_session(&self, name: &str) -> Result<SessionStatus, ApiError> {
        let request = self.client.post(self.url(&["users", name, "server"]));
        let response = self.execute(HubOperation::CreateSession, request).await?;
        match response.status() {
            StatusCode::CREATED => Ok(SessionStatus::Ready),
            StatusCode::ACCEPTED => Ok(SessionStatus::Pending),
            status if status.is_success() => {
                Err(Self::unexpected(HubOperation::CreateSession, status))
            }
            _ => Err(Self::error_from(response).await),
        }
    }

    async fn session_status(&self, name: &str) -> Result<SessionStatus, ApiError> {
        let request = self.client.get(self.url(&["users", name]));
        let response = self.execute(HubOperation::SessionStatus, request).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(SessionStatus::Absent),
            status if status.is_success() => {
                let user: HubUser = response
                    .json()
                    .await
                    .map_err(|e| ApiError::from_reqwest(&e))?;
                Ok(user.session_status())
            }
            _ => Err(Self::error_from(response).await),
        }
    }

    async fn delete_session(&self, name: &str) -> Result<SessionStatus, ApiError> {
        let request = self.client.delete(self.url(&["users", name, "server"]));
        let response = self.execute(HubOperation::DeleteSession, request).await?;
        match response.status() {
            StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => Ok(SessionStatus::Absent),
            StatusCode::ACCEPTED => Ok(SessionStatus::Pending),
            status if status.is_success() => {
                Err(Self::unexpected(HubOperation::DeleteSession, status))
            }
            _ => Err(Self::error_from(response).await),
        }
    }

    async fn delete_user(&self, name: &str) -> Result<(), ApiError> {
        let request = self.client.delete(self.url(&["users", name]));
        let response = self.execute(HubOperation::DeleteUser, request).await?;
        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(Self::error_from(response).await)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_for(server: &MockServer) -> HubClient {
        HubClient::new(HttpConfig::new(format!("{}/hub/api", server.uri()), "secret")).unwrap()
    }

    #[tokio::test]
    async fn test_create_session_maps_created_and_accepted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hub/api/users/hub-stress-test-0/server"))
            .and(header("Authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/hub/api/users/hub-stress-test-1/server"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        assert_eq!(
            client.create_session("hub-stress-test-0").await.unwrap(),
            SessionStatus::Ready
        );
        assert_eq!(
            client.create_session("hub-stress-test-1").await.unwrap(),
            SessionStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_rate_limit_carries_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hub/api/users/hub-stress-test-0"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
            .mount(&server)
            .await;

        let error = client_for(&server)
            .await
            .create_user("hub-stress-test-0")
            .await
            .unwrap_err();
        assert_eq!(
            error,
            ApiError::RateLimited {
                retry_after: Some(Duration::from_secs(7))
            }
        );
    }

    #[tokio::test]
    async fn test_error_statuses_are_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hub/api/users/busy"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/hub/api/users/taken"))
            .respond_with(
                ResponseTemplate::new(409)
                    .set_body_json(json!({"status": 409, "message": "User taken already exists"})),
            )
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        assert!(matches!(
            client.create_user("busy").await,
            Err(ApiError::Transient {
                status: Some(503),
                ..
            })
        ));
        match client.create_user("taken").await {
            Err(ApiError::Permanent { status, message }) => {
                assert_eq!(status, 409);
                assert_eq!(message, "User taken already exists");
            }
            other => panic!("expected a permanent error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_session_status_mapping() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/hub/api/users/ready"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "ready",
                "servers": {"": {"name": "", "ready": true, "pending": null}}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/hub/api/users/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/hub/api/users/garbled"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        assert_eq!(client.session_status("ready").await.unwrap(), SessionStatus::Ready);
        assert_eq!(client.session_status("gone").await.unwrap(), SessionStatus::Absent);
        assert!(matches!(
            client.session_status("garbled").await,
            Err(ApiError::Unknown { .. })
        ));
    }

    #[tokio::test]
    async fn test_deletes_treat_missing_as_done() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/hub/api/users/stopping/server"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/hub/api/users/missing/server"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/hub/api/users/missing"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        assert_eq!(
            client.delete_session("stopping").await.unwrap(),
            SessionStatus::Pending
        );
        assert_eq!(
            client.delete_session("missing").await.unwrap(),
            SessionStatus::Absent
        );
        assert!(client.delete_user("missing").await.is_ok());
    }

    #[tokio::test]
    async fn test_list_users_follows_pagination() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/hub/api/users"))
            .and(query_param("offset", "0"))
            .and(header("Accept", PAGINATION_MEDIA_TYPE))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{"name": "a"}, {"name": "b"}],
                "_pagination": {"offset": 0, "limit": 2, "total": 3, "next": {"offset": 2, "limit": 2}}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/hub/api/users"))
            .and(query_param("offset", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{"name": "c"}],
                "_pagination": {"offset": 2, "limit": 2, "total": 3, "next": null}
            })))
            .mount(&server)
            .await;

        let users = client_for(&server).await.list_users().await.unwrap();
        let names: Vec<_> = users.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_list_users_accepts_plain_list() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/hub/api/users"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!([{"name": "a"}, {"name": "b"}])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let users = client_for(&server).await.list_users().await.unwrap();
        assert_eq!(users.len(), 2);
    }

    #[tokio::test]
    async fn test_connection_failure_is_transient() {
        let client = HubClient::new(HttpConfig::new("http://127.0.0.1:1/hub/api", "secret")).unwrap();
        assert!(matches!(
            client.create_user("anyone").await,
            Err(ApiError::Transient { status: None, .. })
        ));
    }

    #[test]
    fn test_invalid_endpoint_is_rejected() {
        assert!(matches!(
            HubClient::new(HttpConfig::new("not a url", "secret")),
            Err(HttpError::InvalidUrl(_))
        ));
        assert!(matches!(
            HubClient::new(HttpConfig::new("http://hub/api", "bad\ntoken")),
            Err(HttpError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_url_joins_segments_under_base_path() {
        let client = HubClient::new(HttpConfig::new("http://hub.example.com/hub/api/", "t")).unwrap();
        assert_eq!(
            client.url(&["users", "hub-stress-test-3", "server"]).as_str(),
            "http://hub.example.com/hub/api/users/hub-stress-test-3/server"
        );
    }
}
