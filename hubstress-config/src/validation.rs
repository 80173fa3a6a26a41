//! Configuration validation traits and utilities

use crate::error::{ConfigError, ConfigResult};

/// Trait for validatable configuration
pub trait Validatable {
    /// Validate the configuration
    fn validate(&self) -> ConfigResult<()>;

    /// Get the domain name for error reporting
    fn domain_name(&self) -> &'static str;

    /// Helper to create a domain-specific validation error
    fn validation_error(&self, message: impl Into<String>) -> ConfigError {
        ConfigError::DomainError {
            domain: self.domain_name().to_string(),
            message: message.into(),
        }
    }
}

/// Validate a required string field
pub fn validate_required_string(value: &str, field_name: &str, domain: &str) -> ConfigResult<()> {
    if value.trim().is_empty() {
        return Err(ConfigError::DomainError {
            domain: domain.to_string(),
            message: format!("{} cannot be empty", field_name),
        });
    }
    Ok(())
}

/// Validate a positive number
pub fn validate_positive<T>(value: T, field_name: &str, domain: &str) -> ConfigResult<()>
where
    T: PartialOrd + Default + std::fmt::Display,
{
    if value <= T::default() {
        return Err(ConfigError::DomainError {
            domain: domain.to_string(),
            message: format!("{} must be greater than 0, got {}", field_name, value),
        });
    }
    Ok(())
}

/// Validate an http(s) URL
pub fn validate_http_url(url: &str, field_name: &str, domain: &str) -> ConfigResult<()> {
    if url.is_empty() {
        return Err(ConfigError::DomainError {
            domain: domain.to_string(),
            message: format!("{} cannot be empty", field_name),
        });
    }

    let parsed = url::Url::parse(url).map_err(|e| ConfigError::DomainError {
        domain: domain.to_string(),
        message: format!("{} has invalid URL format: {}", field_name, e),
    })?;

    match parsed.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(ConfigError::DomainError {
            domain: domain.to_string(),
            message: format!(
                "{} scheme '{}' is not supported (only http/https)",
                field_name, scheme
            ),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_required_string() {
        assert!(validate_required_string("hub", "prefix", "run").is_ok());
        assert!(validate_required_string("", "prefix", "run").is_err());
        assert!(validate_required_string("   ", "prefix", "run").is_err());
    }

    #[test]
    fn test_validate_positive() {
        assert!(validate_positive(1u32, "count", "run").is_ok());
        let err = validate_positive(0usize, "concurrency", "run").unwrap_err();
        assert!(err.to_string().contains("concurrency must be greater than 0"));
    }

    #[test]
    fn test_validate_http_url() {
        assert!(validate_http_url("https://hub.example.com/hub/api", "endpoint", "hub").is_ok());
        assert!(validate_http_url("http://localhost:8000/hub/api", "endpoint", "hub").is_ok());
        assert!(validate_http_url("", "endpoint", "hub").is_err());
        assert!(validate_http_url("not-a-url", "endpoint", "hub").is_err());
        assert!(validate_http_url("ftp://hub.example.com", "endpoint", "hub").is_err());
    }
}
