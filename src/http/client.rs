//! API client with retry and quota enforcement
//!
//! Every outbound request passes the quota governor's admission check,
//! waits on the client-side rate limiter, fetches a valid bearer
//! credential, and classifies failures for the bounded backoff loop:
//! transport failures and retryable statuses are retried, domain-level
//! API errors are not (they belong to the window shrinker), and expired
//! sessions trigger a credential re-issue before the next attempt.

use super::quota::{QuotaGovernor, LIMIT_INFO_HEADER};
use super::rate_limit::{RateLimiter, RateLimiterConfig};
use crate::auth::CredentialProvider;
use crate::error::{parse_api_error, Error, Result};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for the API client
#[derive(Debug, Clone)]
pub struct ApiClientConfig {
    /// REST API version segment
    pub api_version: String,
    /// Request timeout
    pub timeout: Duration,
    /// Total attempts per request (first try included)
    pub max_attempts: u32,
    /// Initial delay for exponential backoff
    pub initial_backoff: Duration,
    /// Maximum delay for exponential backoff
    pub max_backoff: Duration,
    /// Client-side rate limiter, if any
    pub rate_limit: Option<RateLimiterConfig>,
}

impl Default for ApiClientConfig {
    fn default() -> Self {
        Self {
            api_version: "v52.0".to_string(),
            timeout: Duration::from_secs(30),
            max_attempts: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(60),
            rate_limit: Some(RateLimiterConfig::default()),
        }
    }
}

/// Bearer-authenticated API client
pub struct ApiClient {
    http: reqwest::Client,
    config: ApiClientConfig,
    provider: CredentialProvider,
    quota: QuotaGovernor,
    rate_limiter: Option<RateLimiter>,
}

impl ApiClient {
    /// Create a client from a credential provider and quota governor
    pub fn new(
        provider: CredentialProvider,
        quota: QuotaGovernor,
        config: ApiClientConfig,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(format!("forcetap/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(Error::Http)?;

        let rate_limiter = config.rate_limit.as_ref().map(RateLimiter::new);

        Ok(Self {
            http,
            config,
            provider,
            quota,
            rate_limiter,
        })
    }

    /// The quota governor backing this client
    pub fn quota(&self) -> &QuotaGovernor {
        &self.quota
    }

    /// The tenant instance URL for the current credentials
    pub async fn instance_url(&self) -> Result<String> {
        Ok(self.provider.credentials().await?.instance_url)
    }

    /// Path of the table describe endpoint
    pub fn describe_path(&self, table: &str) -> String {
        format!(
            "/services/data/{}/sobjects/{table}/describe/",
            self.config.api_version
        )
    }

    /// Path of the query endpoint (includes soft-deleted rows)
    pub fn query_path(&self) -> String {
        format!("/services/data/{}/queryAll/", self.config.api_version)
    }

    /// Describe a table's field catalog
    pub async fn describe(&self, table: &str) -> Result<Value> {
        self.get_json(&self.describe_path(table), &[]).await
    }

    /// Issue a GET request and parse the JSON body, retrying transient
    /// failures with bounded exponential backoff.
    pub async fn get_json(&self, path: &str, params: &[(&str, &str)]) -> Result<Value> {
        let mut attempt = 0;

        loop {
            attempt += 1;

            // Fail closed before spending budget.
            self.quota.admit()?;

            if let Some(ref limiter) = self.rate_limiter {
                limiter.wait().await;
            }

            // Auth failures are not retried here; re-authentication or a
            // fatal invalid-credentials error is the provider's call.
            let credentials = self.provider.credentials().await?;
            let url = build_url(&credentials.instance_url, path)?;

            let mut request = self
                .http
                .get(&url)
                .bearer_auth(&credentials.access_token)
                .timeout(self.config.timeout);
            if !params.is_empty() {
                request = request.query(params);
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => {
                    let err = classify_transport_error(e, self.config.timeout);
                    if err.is_retryable() && attempt < self.config.max_attempts {
                        self.backoff(attempt, &err).await;
                        continue;
                    }
                    return Err(err);
                }
            };

            let status = response.status();
            let limit_header = response
                .headers()
                .get(LIMIT_INFO_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(ToString::to_string);

            let body = match response.text().await {
                Ok(body) => body,
                Err(e) => {
                    // Truncated transport read.
                    let err = Error::Http(e);
                    if attempt < self.config.max_attempts {
                        self.backoff(attempt, &err).await;
                        continue;
                    }
                    return Err(err);
                }
            };

            if status.is_success() {
                self.quota.record_usage(limit_header.as_deref());
                debug!("GET {url} succeeded");
                return Ok(serde_json::from_str(&body)?);
            }

            // 4xx carries a server-reported error body; 5xx falls through
            // to the transient path even when a body is present.
            if status.is_client_error() {
                if let Some(api_err) = parse_api_error(status.as_u16(), &body) {
                    if api_err.is_session_expired() && attempt < self.config.max_attempts {
                        warn!("bearer session expired, re-authenticating");
                        self.provider.invalidate().await;
                        continue;
                    }
                    // Domain-level errors (query timeouts, bad queries, missing
                    // tables) are the caller's to handle, never retried here.
                    return Err(api_err);
                }
            }

            let err = Error::http_status(status.as_u16(), body);
            if err.is_retryable() && attempt < self.config.max_attempts {
                self.backoff(attempt, &err).await;
                continue;
            }
            if attempt >= self.config.max_attempts && err.is_retryable() {
                return Err(Error::MaxRetriesExceeded {
                    max_retries: self.config.max_attempts,
                });
            }
            return Err(err);
        }
    }

    async fn backoff(&self, attempt: u32, err: &Error) {
        let delay = calculate_backoff(
            attempt,
            self.config.initial_backoff,
            self.config.max_backoff,
        );
        warn!(
            "transient failure, triggering backoff: attempt {attempt}/{}, retrying in {delay:?}: {err}",
            self.config.max_attempts
        );
        tokio::time::sleep(delay).await;
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Resolve a request path against the tenant instance URL.
///
/// A malformed instance URL is an error, not a request.
fn build_url(instance_url: &str, path: &str) -> Result<String> {
    if path.starts_with("http://") || path.starts_with("https://") {
        return Ok(path.to_string());
    }
    let base = url::Url::parse(instance_url)?;
    Ok(base.join(path)?.to_string())
}

/// Doubling delay per attempt, capped
fn calculate_backoff(attempt: u32, initial: Duration, max: Duration) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    std::cmp::min(initial * factor, max)
}

fn classify_transport_error(e: reqwest::Error, timeout: Duration) -> Error {
    if e.is_timeout() {
        Error::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        }
    } else {
        Error::Http(e)
    }
}
