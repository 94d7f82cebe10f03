//! Credential provider implementation
//!
//! Exchanges a long-lived refresh token for a short-lived bearer token and
//! the tenant instance URL. Callers ask for credentials before each request;
//! the provider re-issues them transparently when the cached token expires,
//! and `invalidate` forces a re-issue after a server-side session expiry.

use crate::error::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Production login endpoint
const LOGIN_URL: &str = "https://login.salesforce.com/services/oauth2/token";
/// Sandbox login endpoint
const SANDBOX_LOGIN_URL: &str = "https://test.salesforce.com/services/oauth2/token";

/// Access tokens are re-issued this many seconds after they were fetched.
const TOKEN_LIFETIME_SECONDS: i64 = 900;

/// A valid bearer credential and the tenant it belongs to
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Bearer access token
    pub access_token: String,
    /// Base URL of the tenant instance
    pub instance_url: String,
}

#[derive(Debug, Clone)]
struct CachedCredentials {
    credentials: Credentials,
    expires_at: DateTime<Utc>,
}

impl CachedCredentials {
    fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    instance_url: String,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: String,
}

/// OAuth2 refresh-token credential provider
pub struct CredentialProvider {
    refresh_token: String,
    client_id: String,
    client_secret: String,
    login_url: String,
    http: Client,
    cached: Arc<RwLock<Option<CachedCredentials>>>,
}

impl CredentialProvider {
    /// Create a provider for the production or sandbox login endpoint
    pub fn new(
        refresh_token: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        is_sandbox: bool,
    ) -> Self {
        let login_url = if is_sandbox {
            SANDBOX_LOGIN_URL
        } else {
            LOGIN_URL
        };
        Self::with_login_url(refresh_token, client_id, client_secret, login_url)
    }

    /// Create a provider against an explicit token endpoint
    pub fn with_login_url(
        refresh_token: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        login_url: impl Into<String>,
    ) -> Self {
        Self {
            refresh_token: refresh_token.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            login_url: login_url.into(),
            http: Client::new(),
            cached: Arc::new(RwLock::new(None)),
        }
    }

    /// Get valid credentials, logging in if the cache is empty or expired
    pub async fn credentials(&self) -> Result<Credentials> {
        {
            let cached = self.cached.read().await;
            if let Some(entry) = cached.as_ref() {
                if !entry.is_expired() {
                    return Ok(entry.credentials.clone());
                }
            }
        }

        // Need to refresh - acquire write lock
        let mut cached = self.cached.write().await;

        // Double-check after acquiring write lock (another task might have refreshed)
        if let Some(entry) = cached.as_ref() {
            if !entry.is_expired() {
                return Ok(entry.credentials.clone());
            }
        }

        let credentials = self.login().await?;
        *cached = Some(CachedCredentials {
            credentials: credentials.clone(),
            expires_at: Utc::now() + Duration::seconds(TOKEN_LIFETIME_SECONDS),
        });

        Ok(credentials)
    }

    /// Drop the cached token so the next call re-authenticates
    pub async fn invalidate(&self) {
        let mut cached = self.cached.write().await;
        *cached = None;
    }

    async fn login(&self) -> Result<Credentials> {
        tracing::info!("attempting login via OAuth2");

        let form = [
            ("grant_type", "refresh_token"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("refresh_token", self.refresh_token.as_str()),
        ];

        let response = self
            .http
            .post(&self.login_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| Error::oauth(format!("token request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::oauth(format!("failed to read token response: {e}")))?;

        if !status.is_success() {
            if status.as_u16() == 400 {
                if let Ok(err) = serde_json::from_str::<TokenErrorResponse>(&body) {
                    if err.error == "invalid_grant" {
                        return Err(Error::invalid_credentials(format!(
                            "(error={}, description={})",
                            err.error, err.error_description
                        )));
                    }
                }
            }
            return Err(Error::oauth(format!(
                "failed to refresh or login using oauth2 credentials: {body}"
            )));
        }

        let token: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| Error::oauth(format!("malformed token response: {e}")))?;

        tracing::info!("OAuth2 login successful");

        Ok(Credentials {
            access_token: token.access_token,
            instance_url: token.instance_url,
        })
    }
}

impl std::fmt::Debug for CredentialProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialProvider")
            .field("login_url", &self.login_url)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}
