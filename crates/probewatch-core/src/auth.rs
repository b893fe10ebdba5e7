//! Bearer token acquisition and the process-wide token cache.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

pub const DEFAULT_AUTH_URL: &str = "http://localhost:8080/authenticate";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthToken {
    value: String,
    acquired_at: DateTime<Utc>,
}

impl AuthToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            acquired_at: Utc::now(),
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("authentication at {url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("authentication at {url} failed: {reason}")]
    Network { url: String, reason: String },
    #[error("failed to read authentication response from {url}: {reason}")]
    Body { url: String, reason: String },
}

/// Acquires a fresh token from the authentication service.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self) -> Result<AuthToken, AuthError>;
}

/// POSTs an empty JSON object to the auth URL; a 200 body is the token.
#[derive(Debug, Clone)]
pub struct HttpAuthenticator {
    client: Client,
    url: String,
    timeout: Duration,
}

impl HttpAuthenticator {
    pub fn new(client: Client, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            url: url.into(),
            timeout,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Authenticator for HttpAuthenticator {
    async fn authenticate(&self) -> Result<AuthToken, AuthError> {
        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .body("{}")
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| AuthError::Network {
                url: self.url.clone(),
                reason: e.to_string(),
            })?;

        if response.status() != StatusCode::OK {
            return Err(AuthError::Status {
                url: self.url.clone(),
                status: response.status().as_u16(),
            });
        }

        let body = response.text().await.map_err(|e| AuthError::Body {
            url: self.url.clone(),
            reason: e.to_string(),
        })?;
        Ok(AuthToken::new(body))
    }
}

/// Holds the most recently acquired token. Shared by every probe of a sweep
/// and by ad-hoc probes.
#[derive(Debug, Default)]
pub struct TokenCache {
    current: RwLock<Option<AuthToken>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn current(&self) -> Option<AuthToken> {
        self.current.read().await.clone()
    }

    pub async fn store(&self, token: AuthToken) {
        *self.current.write().await = Some(token);
    }

    /// Fetch a new token and cache it. On failure the previous token stays cached.
    pub async fn refresh(&self, authenticator: &dyn Authenticator) -> Result<AuthToken, AuthError> {
        match authenticator.authenticate().await {
            Ok(token) => {
                info!(token_len = token.value().len(), "Authentication successful");
                self.store(token.clone()).await;
                Ok(token)
            }
            Err(e) => {
                let has_previous = self.current.read().await.is_some();
                warn!(error = %e, keeping_previous = has_previous, "Authentication failed");
                Err(e)
            }
        }
    }
}
