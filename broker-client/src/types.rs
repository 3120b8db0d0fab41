//! Typed request/response shapes for the broker REST API. The validator is
//! the only bridge from these raw, broker-shaped payloads to internal
//! records — nothing downstream of it sees an untyped JSON value.

use chrono::{DateTime, NaiveDate, Utc};
use common::Session;
use serde::Deserialize;

/// Historical bar granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarUnit {
    /// One-minute bars.
    Minute,
    /// Daily bars.
    Daily,
    /// Weekly bars.
    Weekly,
    /// Monthly bars.
    Monthly,
}

impl BarUnit {
    /// Broker query-parameter spelling.
    pub fn as_query_value(&self) -> &'static str {
        match self {
            Self::Minute => "minute",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }
}

/// Last/bid/ask snapshot for a single symbol (equity or option).
#[derive(Debug, Clone, Deserialize)]
pub struct RawQuote {
    /// Symbol the quote is for.
    pub symbol: String,
    /// Broker timestamp of the quote.
    pub timestamp: DateTime<Utc>,
    /// Last trade price.
    pub last: Option<f64>,
    /// Best bid.
    pub bid: Option<f64>,
    /// Best ask.
    pub ask: Option<f64>,
    /// Cumulative up-volume (trades at or above the prevailing ask).
    #[serde(default)]
    pub up_volume: f64,
    /// Cumulative down-volume (trades at or below the prevailing bid).
    #[serde(default)]
    pub down_volume: f64,
}

/// A single OHLCV bar.
#[derive(Debug, Clone, Deserialize)]
pub struct RawBar {
    /// Bar open timestamp.
    pub timestamp: DateTime<Utc>,
    /// Open price.
    pub open: f64,
    /// High price.
    pub high: f64,
    /// Low price.
    pub low: f64,
    /// Close price.
    pub close: f64,
    /// Volume traded during the bar.
    pub volume: f64,
}

/// A single option-chain quote, as the broker reports it.
#[derive(Debug, Clone, Deserialize)]
pub struct RawOptionQuote {
    /// Canonical contract symbol.
    pub symbol: String,
    /// Underlying symbol.
    pub underlying: String,
    /// Expiration date.
    pub expiration: NaiveDate,
    /// Strike price.
    pub strike: f64,
    /// `"call"` or `"put"`.
    pub option_type: String,
    /// Broker timestamp.
    pub timestamp: DateTime<Utc>,
    /// Last trade price.
    pub last: Option<f64>,
    /// Best bid.
    pub bid: Option<f64>,
    /// Best ask.
    pub ask: Option<f64>,
    /// Cumulative session volume.
    pub volume: Option<f64>,
    /// Most recent settlement open interest.
    pub open_interest: Option<f64>,
    /// Broker-reported implied volatility, if any.
    pub implied_volatility: Option<f64>,
}

/// Market clock response.
#[derive(Debug, Clone, Deserialize)]
pub struct RawClock {
    /// Current session classification.
    #[serde(with = "session_serde")]
    pub session: Session,
    /// Broker's reported current time.
    pub timestamp: DateTime<Utc>,
}

mod session_serde {
    use common::Session;
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Session, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.to_ascii_lowercase().as_str() {
            "pre" | "preopen" | "pre_open" => Session::PreOpen,
            "open" | "regular" | "regular_open" => Session::RegularOpen,
            "after" | "afterhours" | "after_hours" => Session::AfterHours,
            _ => Session::Closed,
        })
    }
}

/// A symbol-search result, used for diagnostics only.
#[derive(Debug, Clone, Deserialize)]
pub struct RawSymbolSearchResult {
    /// Matching symbol.
    pub symbol: String,
    /// Human-readable description.
    pub description: Option<String>,
}
