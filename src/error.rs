//! Error types for forcetap
//!
//! This module defines the error taxonomy for the whole tap.
//! All public APIs return `Result<T, Error>` where Error is defined here.
//! Server-reported error codes are carried as data (`Error::Api`) and
//! dispatched on by tag, never by type identity.

use thiserror::Error;

/// Server error code for a query that ran too long.
pub const CODE_QUERY_TIMEOUT: &str = "QUERY_TIMEOUT";
/// Server error code for a result set too large to materialize.
pub const CODE_OPERATION_TOO_LARGE: &str = "OPERATION_TOO_LARGE";
/// Server error code for an expired bearer session.
pub const CODE_INVALID_SESSION: &str = "INVALID_SESSION_ID";
/// Server error code for a missing table.
pub const CODE_NOT_FOUND: &str = "NOT_FOUND";

/// The main error type for forcetap
#[derive(Error, Debug)]
pub enum Error {
    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Missing required config field: {field}")]
    MissingConfigField { field: String },

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    // ============================================================================
    // Authentication Errors
    // ============================================================================
    #[error("OAuth2 error: {message}")]
    OAuth { message: String },

    #[error("invalid credentials: {message}")]
    InvalidCredentials { message: String },

    // ============================================================================
    // HTTP Errors
    // ============================================================================
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Max retries ({max_retries}) exceeded")]
    MaxRetriesExceeded { max_retries: u32 },

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    // ============================================================================
    // API Errors (server-reported error body)
    // ============================================================================
    #[error("API error {code}: {message}")]
    Api { code: String, message: String },

    #[error("quota exceeded: {message}")]
    QuotaExceeded { message: String },

    // ============================================================================
    // Query Planning Errors
    // ============================================================================
    #[error("query for table '{table}' exceeds the {limit} character limit and has no primary key to split on")]
    QueryLengthExceeded { table: String, limit: usize },

    // ============================================================================
    // Merge Errors
    // ============================================================================
    #[error("couldn't merge records with different primary keys: {left} and {right}")]
    PrimaryKeyMismatch { left: String, right: String },

    // ============================================================================
    // State Errors
    // ============================================================================
    #[error("State error: {message}")]
    State { message: String },

    // ============================================================================
    // I/O Errors
    // ============================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ============================================================================
    // Generic Errors
    // ============================================================================
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a missing field error
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingConfigField {
            field: field.into(),
        }
    }

    /// Create an OAuth error
    pub fn oauth(message: impl Into<String>) -> Self {
        Self::OAuth {
            message: message.into(),
        }
    }

    /// Create an invalid-credentials error
    pub fn invalid_credentials(message: impl Into<String>) -> Self {
        Self::InvalidCredentials {
            message: message.into(),
        }
    }

    /// Create an HTTP status error
    pub fn http_status(status: u16, body: impl Into<String>) -> Self {
        Self::HttpStatus {
            status,
            body: body.into(),
        }
    }

    /// Create an API error from a server-reported code and message
    pub fn api(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Create a quota-exceeded error
    pub fn quota_exceeded(message: impl Into<String>) -> Self {
        Self::QuotaExceeded {
            message: message.into(),
        }
    }

    /// Create a primary-key mismatch error naming the conflicting keys
    pub fn primary_key_mismatch(left: impl Into<String>, right: impl Into<String>) -> Self {
        Self::PrimaryKeyMismatch {
            left: left.into(),
            right: right.into(),
        }
    }

    /// Create a state error
    pub fn state(message: impl Into<String>) -> Self {
        Self::State {
            message: message.into(),
        }
    }

    /// Server-reported error code, if any
    pub fn api_code(&self) -> Option<&str> {
        match self {
            Error::Api { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Check if this error is a transport-level failure worth retrying
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(_) | Error::Timeout { .. } => true,
            Error::HttpStatus { status, .. } => is_retryable_status(*status),
            _ => false,
        }
    }

    /// Check if this is a server-reported "query too expensive" condition,
    /// handled by window shrinking rather than retry
    pub fn is_query_too_expensive(&self) -> bool {
        matches!(
            self.api_code(),
            Some(CODE_QUERY_TIMEOUT | CODE_OPERATION_TOO_LARGE)
        )
    }

    /// Check if this is a table-not-found condition (skip the table)
    pub fn is_not_found(&self) -> bool {
        self.api_code() == Some(CODE_NOT_FOUND)
    }

    /// Check if the bearer session expired and re-authentication may recover
    pub fn is_session_expired(&self) -> bool {
        self.api_code() == Some(CODE_INVALID_SESSION)
    }

    /// Map this error to the process exit code
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::QuotaExceeded { .. } => 2,
            Error::InvalidCredentials { .. } => 5,
            _ => 1,
        }
    }
}

/// Check if an HTTP status code is retryable
fn is_retryable_status(status: u16) -> bool {
    matches!(status, 500 | 502 | 503 | 504)
}

/// Result type alias for forcetap
pub type Result<T> = std::result::Result<T, Error>;

/// Parse a Salesforce-style error body into an API error.
///
/// Error bodies look like:
/// `[{"message": "Your query request was running for too long.", "errorCode": "QUERY_TIMEOUT"}]`
///
/// Returns `None` if the body doesn't carry a recognizable error array.
pub fn parse_api_error(status: u16, body: &str) -> Option<Error> {
    let parsed: serde_json::Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(_) => {
            tracing::error!("failed to parse error response body: {body}");
            return Some(Error::api("UNKNOWN", format!("response code: {status}")));
        }
    };

    let first = parsed.as_array()?.first()?.as_object()?;
    let message = first.get("message")?.as_str()?;
    let code = first
        .get("errorCode")
        .and_then(|c| c.as_str())
        .unwrap_or("UNKNOWN");

    Some(Error::api(code, message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::config("test message");
        assert_eq!(err.to_string(), "Configuration error: test message");

        let err = Error::http_status(404, "Not found");
        assert_eq!(err.to_string(), "HTTP 404: Not found");

        let err = Error::primary_key_mismatch("1", "2");
        assert_eq!(
            err.to_string(),
            "couldn't merge records with different primary keys: 1 and 2"
        );
    }

    #[test]
    fn test_is_retryable() {
        assert!(Error::Timeout { timeout_ms: 1000 }.is_retryable());
        assert!(Error::http_status(500, "").is_retryable());
        assert!(Error::http_status(503, "").is_retryable());

        assert!(!Error::http_status(400, "").is_retryable());
        assert!(!Error::http_status(401, "").is_retryable());
        assert!(!Error::api(CODE_QUERY_TIMEOUT, "too long").is_retryable());
        assert!(!Error::config("test").is_retryable());
    }

    #[test]
    fn test_query_too_expensive_codes() {
        assert!(Error::api(CODE_QUERY_TIMEOUT, "").is_query_too_expensive());
        assert!(Error::api(CODE_OPERATION_TOO_LARGE, "").is_query_too_expensive());
        assert!(!Error::api(CODE_NOT_FOUND, "").is_query_too_expensive());
        assert!(!Error::http_status(500, "").is_query_too_expensive());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(Error::quota_exceeded("over budget").exit_code(), 2);
        assert_eq!(Error::invalid_credentials("bad grant").exit_code(), 5);
        assert_eq!(Error::config("oops").exit_code(), 1);
        assert_eq!(Error::api("UNKNOWN", "boom").exit_code(), 1);
    }

    #[test]
    fn test_parse_api_error() {
        let body = r#"[{"message": "Your query request was running for too long.", "errorCode": "QUERY_TIMEOUT"}]"#;
        let err = parse_api_error(400, body).unwrap();
        assert_eq!(err.api_code(), Some(CODE_QUERY_TIMEOUT));
        assert!(err.is_query_too_expensive());
    }

    #[test]
    fn test_parse_api_error_non_array_body() {
        assert!(parse_api_error(500, r#"{"error": "nope"}"#).is_none());
        assert!(parse_api_error(500, "[]").is_none());
    }

    #[test]
    fn test_parse_api_error_unparseable_body() {
        let err = parse_api_error(502, "<html>bad gateway</html>").unwrap();
        assert_eq!(err.api_code(), Some("UNKNOWN"));
    }
}
