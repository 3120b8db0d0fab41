//! Error taxonomy shared by every component, matching the categories the
//! ingestion engine counts and logs against.

use sqlx::error::DatabaseError;
use thiserror::Error;

/// Token acquisition/refresh failure. Fatal to every component that depends
/// on a valid bearer token.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The refresh exchange itself failed (network, non-2xx, malformed body).
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),
    /// Refresh retries were exhausted without success.
    #[error("token refresh retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The error from the final attempt.
        last_error: String,
    },
}

/// Broker REST call failure, split by whether a retry can help.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Network error, timeout, HTTP 5xx/429 — retryable.
    #[error("transient broker error: {0}")]
    Transient(String),
    /// HTTP 4xx other than 429, or a malformed response body.
    #[error("permanent broker error: {0}")]
    Permanent(String),
    /// The call failed authentication and the forced-refresh retry also failed.
    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl BrokerError {
    /// Whether this failure is worth retrying under the standard backoff policy.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// A broker payload failed validation before becoming an internal record.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("validation failed for field `{field}`: {reason}")]
pub struct ValidationError {
    /// Name of the offending field.
    pub field: String,
    /// Human-readable reason for rejection.
    pub reason: String,
}

impl ValidationError {
    /// Construct a validation error for a named field.
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Numerics could not produce a value.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum NumericsError {
    /// The IV solver could not converge or the price violated intrinsic bounds.
    #[error("no implied-volatility solution")]
    NoSolution,
    /// The Greeks evaluator was given a non-evaluable input (e.g. `T <= 0`).
    #[error("greeks not evaluable for this input")]
    NotEvaluable,
}

/// Store read/write failure, split by whether a retry can help.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connectivity or serialization failure — retryable.
    #[error("transient store error: {0}")]
    Transient(String),
    /// Schema violation or constraint breach — indicates a coding bug.
    #[error("permanent store error: {0}")]
    Permanent(String),
}

impl StoreError {
    /// Whether this failure is worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) => {
                if db_err.is_check_violation() || db_err.is_foreign_key_violation() {
                    Self::Permanent(err.to_string())
                } else {
                    Self::Transient(err.to_string())
                }
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
                Self::Transient(err.to_string())
            }
            _ => Self::Permanent(err.to_string()),
        }
    }
}
