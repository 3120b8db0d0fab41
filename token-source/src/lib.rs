//! Refresh-token-grant OAuth2 token source with single-flighted renewal.
//!
//! The broker's authorization-code flow is out of scope; this crate assumes
//! a `refresh_token` has already been provisioned out of band and exchanges
//! it for short-lived access tokens, renewing automatically before expiry.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::AuthError;
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

/// A bearer token and the instant it stops being valid.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// The bearer token value.
    pub value: String,
    /// Instant at which the token expires.
    pub expires_at: DateTime<Utc>,
}

impl Token {
    /// Whether the token is still usable, given a safety margin before the
    /// advertised expiry.
    pub fn is_valid(&self, safety_margin: chrono::Duration, now: DateTime<Utc>) -> bool {
        now + safety_margin < self.expires_at
    }
}

/// Configuration for the refresh-token exchange.
#[derive(Debug, Clone)]
pub struct TokenSourceConfig {
    /// Token endpoint URL.
    pub token_url: String,
    /// OAuth2 client id.
    pub client_id: String,
    /// OAuth2 client secret.
    pub client_secret: String,
    /// Long-lived refresh token, provisioned out of band.
    pub refresh_token: String,
    /// Seconds of safety margin before expiry at which renewal is triggered.
    pub safety_margin_secs: i64,
    /// Maximum refresh attempts before surfacing `AuthError`.
    pub max_retries: u32,
    /// Initial retry delay.
    pub initial_delay: Duration,
    /// Exponential backoff multiplier applied between attempts.
    pub backoff_multiplier: f64,
}

impl Default for TokenSourceConfig {
    fn default() -> Self {
        Self {
            token_url: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            refresh_token: String::new(),
            safety_margin_secs: 60,
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            backoff_multiplier: 2.0,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

/// Serves a valid bearer token on demand, refreshing automatically before
/// expiry. Concurrent callers during a refresh await the same in-flight
/// exchange rather than each issuing their own request.
pub struct TokenSource {
    config: TokenSourceConfig,
    http: reqwest::Client,
    cached: RwLock<Option<Token>>,
    refresh_gate: Mutex<()>,
}

impl TokenSource {
    /// Build a token source from configuration, sharing a connection pool.
    pub fn new(config: TokenSourceConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            http: reqwest::Client::new(),
            cached: RwLock::new(None),
            refresh_gate: Mutex::new(()),
        })
    }

    /// Return a currently-valid token, refreshing first if the cached one is
    /// absent or within the safety margin of expiry.
    pub async fn get_token(&self) -> Result<Token, AuthError> {
        let now = Utc::now();
        let margin = chrono::Duration::seconds(self.config.safety_margin_secs);

        if let Some(tok) = self.cached.read().await.as_ref() {
            if tok.is_valid(margin, now) {
                return Ok(tok.clone());
            }
        }

        // Single-flight: only one caller performs the exchange; the rest
        // wait on the gate and then read whatever the winner cached.
        let _guard = self.refresh_gate.lock().await;

        if let Some(tok) = self.cached.read().await.as_ref() {
            if tok.is_valid(margin, Utc::now()) {
                return Ok(tok.clone());
            }
        }

        let token = self.refresh_with_retry().await?;
        *self.cached.write().await = Some(token.clone());
        info!(expires_at = %token.expires_at, "refreshed broker access token");
        Ok(token)
    }

    /// Force a renewal regardless of the cached token's validity. Used by
    /// callers that just received a 401 and need a fresh token before their
    /// single permitted re-attempt.
    pub async fn force_refresh(&self) -> Result<Token, AuthError> {
        let _guard = self.refresh_gate.lock().await;
        let token = self.refresh_with_retry().await?;
        *self.cached.write().await = Some(token.clone());
        info!(expires_at = %token.expires_at, "forced broker access token refresh");
        Ok(token)
    }

    async fn refresh_with_retry(&self) -> Result<Token, AuthError> {
        let mut delay = self.config.initial_delay;
        let mut last_error = String::new();

        for attempt in 1..=self.config.max_retries {
            match self.exchange().await {
                Ok(token) => return Ok(token),
                Err(e) => {
                    last_error = e.to_string();
                    warn!(attempt, error = %last_error, "token refresh attempt failed");
                    if attempt < self.config.max_retries {
                        tokio::time::sleep(delay).await;
                        delay = delay.mul_f64(self.config.backoff_multiplier);
                    }
                }
            }
        }

        Err(AuthError::RetriesExhausted {
            attempts: self.config.max_retries,
            last_error,
        })
    }

    async fn exchange(&self) -> Result<Token, AuthError> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", self.config.refresh_token.as_str()),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];

        let response = self
            .http
            .post(&self.config.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| AuthError::RefreshFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthError::RefreshFailed(format!(
                "token endpoint returned {}",
                response.status()
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::RefreshFailed(format!("malformed token response: {e}")))?;

        Ok(Token {
            value: body.access_token,
            expires_at: Utc::now() + chrono::Duration::seconds(body.expires_in),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn cfg(url: String) -> TokenSourceConfig {
        TokenSourceConfig {
            token_url: url,
            client_id: "id".into(),
            client_secret: "secret".into(),
            refresh_token: "refresh".into(),
            safety_margin_secs: 60,
            max_retries: 3,
            initial_delay: Duration::from_millis(1),
            backoff_multiplier: 2.0,
        }
    }

    #[tokio::test]
    async fn fetches_and_caches_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "abc123",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let source = TokenSource::new(cfg(format!("{}/token", server.uri())));
        let tok1 = source.get_token().await.unwrap();
        assert_eq!(tok1.value, "abc123");

        // Second call within the safety margin should hit the cache, not the server.
        let tok2 = source.get_token().await.unwrap();
        assert_eq!(tok2.value, "abc123");
    }

    #[tokio::test]
    async fn surfaces_auth_error_after_retries_exhausted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let source = TokenSource::new(cfg(format!("{}/token", server.uri())));
        let result = source.get_token().await;
        assert!(matches!(result, Err(AuthError::RetriesExhausted { .. })));
    }

    #[test]
    fn token_validity_respects_safety_margin() {
        let now = Utc::now();
        let tok = Token {
            value: "x".into(),
            expires_at: now + chrono::Duration::seconds(30),
        };
        assert!(!tok.is_valid(chrono::Duration::seconds(60), now));
        assert!(tok.is_valid(chrono::Duration::seconds(10), now));
    }
}
