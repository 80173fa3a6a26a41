//! HTTP error types

use hubstress_resilience::Retryable;
use reqwest::StatusCode;
use std::time::Duration;

/// Errors raised while building a [`HubClient`](crate::HubClient)
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid API token: {0}")]
    InvalidToken(String),
}

/// Classified failure of a single hub call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// The hub asked us to slow down (HTTP 429)
    #[error("rate limited by hub{}", retry_after_suffix(.retry_after))]
    RateLimited { retry_after: Option<Duration> },

    /// Server-side or network failure that may succeed later
    #[error("transient hub error{}: {message}", status_suffix(.status))]
    Transient {
        status: Option<u16>,
        message: String,
    },

    /// The hub rejected the request; retrying will not help
    #[error("hub rejected request with status {status}: {message}")]
    Permanent { status: u16, message: String },

    /// Unexpected status or an undecodable response
    #[error("unexpected hub response: {message}")]
    Unknown { message: String },
}

fn retry_after_suffix(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(delay) => format!(" (retry after {}s)", delay.as_secs()),
        None => String::new(),
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    match status {
        Some(status) => format!(" (status {})", status),
        None => String::new(),
    }
}

impl ApiError {
    /// Classify a non-success HTTP status
    pub fn from_status(status: StatusCode, retry_after: Option<Duration>, body: &str) -> Self {
        let message = summarize_body(status, body);
        if status == StatusCode::TOO_MANY_REQUESTS {
            ApiError::RateLimited { retry_after }
        } else if status.is_server_error() {
            ApiError::Transient {
                status: Some(status.as_u16()),
                message,
            }
        } else if status.is_client_error() {
            ApiError::Permanent {
                status: status.as_u16(),
                message,
            }
        } else {
            ApiError::Unknown {
                message: format!("unexpected status {}: {}", status.as_u16(), message),
            }
        }
    }

    /// Classify a transport-level failure
    pub fn from_reqwest(error: &reqwest::Error) -> Self {
        if error.is_decode() {
            ApiError::Unknown {
                message: format!("failed to decode response: {}", error),
            }
        } else if error.is_timeout() || error.is_connect() || error.is_request() || error.is_body()
        {
            ApiError::Transient {
                status: None,
                message: error.to_string(),
            }
        } else {
            ApiError::Unknown {
                message: error.to_string(),
            }
        }
    }
}

impl Retryable for ApiError {
    fn is_retryable(&self) -> bool {
        matches!(self, ApiError::RateLimited { .. } | ApiError::Transient { .. })
    }

    fn is_rate_limited(&self) -> bool {
        matches!(self, ApiError::RateLimited { .. })
    }

    fn retry_delay(&self) -> Option<Duration> {
        match self {
            ApiError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Parse a `Retry-After` header given in seconds. HTTP-date values are ignored.
pub(crate) fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

// JupyterHub error bodies look like {"status": 400, "message": "..."}
fn summarize_body(status: StatusCode, body: &str) -> String {
    let from_json = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| value.get("message").and_then(|m| m.as_str()).map(String::from));

    match from_json {
        Some(message) => message,
        None if body.trim().is_empty() => status
            .canonical_reason()
            .unwrap_or("no response body")
            .to_string(),
        None => body.chars().take(200).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(
            ApiError::from_status(StatusCode::TOO_MANY_REQUESTS, Some(Duration::from_secs(3)), ""),
            ApiError::RateLimited {
                retry_after: Some(Duration::from_secs(3))
            }
        );
        assert!(matches!(
            ApiError::from_status(StatusCode::SERVICE_UNAVAILABLE, None, ""),
            ApiError::Transient {
                status: Some(503),
                ..
            }
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::FORBIDDEN, None, ""),
            ApiError::Permanent { status: 403, .. }
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::OK, None, ""),
            ApiError::Unknown { .. }
        ));
    }

    #[test]
    fn test_hub_error_message_is_extracted() {
        let error = ApiError::from_status(
            StatusCode::BAD_REQUEST,
            None,
            r#"{"status": 400, "message": "User hub-stress-test-1 already exists"}"#,
        );
        assert_eq!(
            error.to_string(),
            "hub rejected request with status 400: User hub-stress-test-1 already exists"
        );
    }

    #[test]
    fn test_retryable_classification() {
        let rate_limited = ApiError::RateLimited {
            retry_after: Some(Duration::from_secs(2)),
        };
        assert!(rate_limited.is_retryable());
        assert!(rate_limited.is_rate_limited());
        assert_eq!(rate_limited.retry_delay(), Some(Duration::from_secs(2)));

        let transient = ApiError::Transient {
            status: None,
            message: "connection reset".to_string(),
        };
        assert!(transient.is_retryable());
        assert!(!transient.is_rate_limited());

        let permanent = ApiError::Permanent {
            status: 404,
            message: "not found".to_string(),
        };
        assert!(!permanent.is_retryable());

        let unknown = ApiError::Unknown {
            message: "garbage".to_string(),
        };
        assert!(!unknown.is_retryable());
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after("5"), Some(Duration::from_secs(5)));
        assert_eq!(parse_retry_after(" 12 "), Some(Duration::from_secs(12)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }
}
