//! Typed REST client over the broker's market-data API.

use std::sync::Arc;

use chrono::NaiveDate;
use common::BrokerError;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use token_source::TokenSource;
use tracing::{debug, warn};

use crate::retry::{is_retryable_status, retry_after_delay, RetryConfig};
use crate::types::{RawBar, RawClock, RawOptionQuote, RawQuote, RawSymbolSearchResult};
use crate::BarUnit;

/// Typed request layer over the broker REST API.
pub struct BrokerClient {
    http: reqwest::Client,
    base_url: String,
    token_source: Arc<TokenSource>,
    retry: RetryConfig,
}

impl BrokerClient {
    /// Build a client against `base_url`, authenticating via `token_source`.
    pub fn new(base_url: impl Into<String>, token_source: Arc<TokenSource>, retry: RetryConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            token_source,
            retry,
        }
    }

    /// Snapshot of last/bid/ask for one or more symbols.
    pub async fn quote(&self, symbols: &[String]) -> Result<Vec<RawQuote>, BrokerError> {
        let joined = symbols.join(",");
        self.get_json("/v1/quotes", &[("symbols", joined.as_str())])
            .await
    }

    /// Historical OHLCV bars.
    pub async fn bars(
        &self,
        symbol: &str,
        unit: BarUnit,
        count: u32,
    ) -> Result<Vec<RawBar>, BrokerError> {
        let count_str = count.to_string();
        self.get_json(
            "/v1/bars",
            &[
                ("symbol", symbol),
                ("unit", unit.as_query_value()),
                ("count", count_str.as_str()),
            ],
        )
        .await
    }

    /// Ascending ordered list of available expirations for `underlying`.
    pub async fn expirations(&self, underlying: &str) -> Result<Vec<NaiveDate>, BrokerError> {
        self.get_json("/v1/options/expirations", &[("underlying", underlying)])
            .await
    }

    /// Ascending ordered list of available strikes for an expiration.
    pub async fn strikes(
        &self,
        underlying: &str,
        expiration: NaiveDate,
    ) -> Result<Vec<f64>, BrokerError> {
        self.get_json(
            "/v1/options/strikes",
            &[
                ("underlying", underlying),
                ("expiration", expiration.to_string().as_str()),
            ],
        )
        .await
    }

    /// Quotes for the option chain at `expiration`, optionally filtered to a
    /// strike subset.
    pub async fn option_chain(
        &self,
        underlying: &str,
        expiration: NaiveDate,
        strikes: Option<&[f64]>,
    ) -> Result<Vec<RawOptionQuote>, BrokerError> {
        let expiration_str = expiration.to_string();
        let strikes_str = strikes.map(|s| {
            s.iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(",")
        });
        let mut query = vec![
            ("underlying", underlying),
            ("expiration", expiration_str.as_str()),
        ];
        if let Some(ref s) = strikes_str {
            query.push(("strikes", s.as_str()));
        }
        self.get_json("/v1/options/chain", &query).await
    }

    /// Current market clock.
    pub async fn clock(&self) -> Result<RawClock, BrokerError> {
        self.get_json("/v1/clock", &[]).await
    }

    /// Symbol search, used during diagnostics only.
    pub async fn symbol_search(
        &self,
        query: &str,
    ) -> Result<Vec<RawSymbolSearchResult>, BrokerError> {
        self.get_json("/v1/symbols/search", &[("q", query)]).await
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, BrokerError> {
        let response = self.execute(Method::GET, path, query).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| BrokerError::Permanent(format!("malformed response body: {e}")))
    }

    async fn execute(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<reqwest::Response, BrokerError> {
        let url = format!("{}{}", self.base_url, path);
        let mut delay = self.retry.initial_delay;
        let mut attempt = 0u32;
        let mut forced_refresh_used = false;

        loop {
            let token = self.token_source.get_token().await?;

            let send_result = self
                .http
                .request(method.clone(), &url)
                .query(query)
                .bearer_auth(&token.value)
                .timeout(self.retry.request_timeout)
                .send()
                .await;

            let response = match send_result {
                Ok(r) => r,
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.retry.max_attempts {
                        return Err(BrokerError::Transient(e.to_string()));
                    }
                    debug!(attempt, error = %e, "broker call network error, retrying");
                    tokio::time::sleep(delay).await;
                    delay = delay.mul_f64(self.retry.backoff_multiplier);
                    continue;
                }
            };

            let status = response.status();

            if status.is_success() {
                return Ok(response);
            }

            if status == StatusCode::UNAUTHORIZED && !forced_refresh_used {
                forced_refresh_used = true;
                warn!("broker call unauthorized, forcing token refresh");
                self.token_source.force_refresh().await?;
                continue;
            }

            if is_retryable_status(status) {
                attempt += 1;
                if attempt >= self.retry.max_attempts {
                    return Err(BrokerError::Transient(format!(
                        "status {status} after {attempt} attempts"
                    )));
                }
                let wait = if status == StatusCode::TOO_MANY_REQUESTS {
                    response
                        .headers()
                        .get(reqwest::header::RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .and_then(retry_after_delay)
                        .unwrap_or(delay)
                } else {
                    delay
                };
                debug!(attempt, %status, "broker call transient failure, retrying");
                tokio::time::sleep(wait).await;
                delay = delay.mul_f64(self.retry.backoff_multiplier);
                continue;
            }

            return Err(BrokerError::Permanent(format!("status {status}")));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use token_source::TokenSourceConfig;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn token_source_for(server: &MockServer) -> Arc<TokenSource> {
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "tok",
                "expires_in": 3600
            })))
            .mount(server)
            .await;
        TokenSource::new(TokenSourceConfig {
            token_url: format!("{}/token", server.uri()),
            client_id: "id".into(),
            client_secret: "secret".into(),
            refresh_token: "refresh".into(),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn retries_on_503_then_succeeds() {
        let server = MockServer::start().await;
        let ts = token_source_for(&server).await;

        Mock::given(method("GET"))
            .and(path("/v1/clock"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/clock"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "session": "open",
                "timestamp": "2024-03-21T14:30:00Z"
            })))
            .mount(&server)
            .await;

        let retry = RetryConfig {
            initial_delay: std::time::Duration::from_millis(1),
            ..Default::default()
        };
        let client = BrokerClient::new(server.uri(), ts, retry);
        let clock = client.clock().await.unwrap();
        assert_eq!(clock.session, common::Session::RegularOpen);
    }

    #[tokio::test]
    async fn non_retryable_4xx_fails_fast() {
        let server = MockServer::start().await;
        let ts = token_source_for(&server).await;
        Mock::given(method("GET"))
            .and(path("/v1/clock"))
            .respond_with(ResponseTemplate::new(400))
            .expect(1)
            .mount(&server)
            .await;

        let client = BrokerClient::new(server.uri(), ts, RetryConfig::default());
        let result = client.clock().await;
        assert!(matches!(result, Err(BrokerError::Permanent(_))));
    }
}
