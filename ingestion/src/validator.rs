//! Pure functions that normalize and range-check broker payloads into
//! internal records. This is the only bridge from broker-shaped raw types
//! to the records the aggregator and store work with.

use broker_client::types::{RawBar, RawOptionQuote, RawQuote};
use chrono::{DateTime, Utc};
use common::{OptionType, ValidationError};

/// A validated underlying tick, ready for the aggregator.
#[derive(Debug, Clone, PartialEq)]
pub struct UnderlyingTick {
    /// Underlying symbol.
    pub symbol: String,
    /// Broker timestamp.
    pub timestamp: DateTime<Utc>,
    /// Last trade price (falls back to mid of bid/ask when last is absent).
    pub price: f64,
    /// Cumulative up-volume.
    pub up_volume: f64,
    /// Cumulative down-volume.
    pub down_volume: f64,
}

/// A validated option tick, ready for the aggregator.
#[derive(Debug, Clone, PartialEq)]
pub struct OptionTick {
    /// Canonical contract symbol.
    pub contract_symbol: String,
    /// Underlying symbol.
    pub underlying: String,
    /// Expiration date.
    pub expiration: chrono::NaiveDate,
    /// Strike price.
    pub strike: f64,
    /// Call or put.
    pub option_type: OptionType,
    /// Broker timestamp.
    pub timestamp: DateTime<Utc>,
    /// Last trade price.
    pub last: Option<f64>,
    /// Best bid.
    pub bid: Option<f64>,
    /// Best ask.
    pub ask: Option<f64>,
    /// Cumulative session volume.
    pub volume: f64,
    /// Most recent settlement open interest.
    pub open_interest: f64,
    /// Broker-reported implied volatility, if in-range.
    pub broker_iv: Option<f64>,
}

const IV_MIN: f64 = 0.01;
const IV_MAX: f64 = 5.0;

/// Normalize and range-check an underlying quote.
pub fn validate_quote(raw: &RawQuote) -> Result<UnderlyingTick, ValidationError> {
    let price = match (raw.last, raw.bid, raw.ask) {
        (Some(last), _, _) if last > 0.0 => last,
        (_, Some(bid), Some(ask)) if bid > 0.0 && ask > 0.0 => 0.5 * (bid + ask),
        _ => {
            return Err(ValidationError::new(
                "last/bid/ask",
                "no usable price in quote",
            ))
        }
    };

    if raw.up_volume < 0.0 || raw.down_volume < 0.0 {
        return Err(ValidationError::new("volume", "negative volume"));
    }

    Ok(UnderlyingTick {
        symbol: raw.symbol.clone(),
        timestamp: raw.timestamp,
        price,
        up_volume: raw.up_volume,
        down_volume: raw.down_volume,
    })
}

/// A validated historical OHLC bar, preserving the broker's own open/high/low
/// values (unlike [`UnderlyingTick`], which is a single point-in-time price).
/// Used by backfill, where each bar already represents one complete bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedBar {
    /// Underlying symbol.
    pub symbol: String,
    /// Bar timestamp (its own bucket start, not the fetch time).
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

/// Normalize and range-check a historical bar.
pub fn validate_bar(symbol: &str, raw: &RawBar) -> Result<ValidatedBar, ValidationError> {
    if raw.open <= 0.0 || raw.high <= 0.0 || raw.low <= 0.0 || raw.close <= 0.0 {
        return Err(ValidationError::new("ohlc", "non-positive price"));
    }
    if raw.high < raw.open.max(raw.close) || raw.low > raw.open.min(raw.close) {
        return Err(ValidationError::new("ohlc", "high/low violate open/close"));
    }
    if raw.volume < 0.0 {
        return Err(ValidationError::new("volume", "negative volume"));
    }

    Ok(ValidatedBar {
        symbol: symbol.to_string(),
        timestamp: raw.timestamp,
        open: raw.open,
        high: raw.high,
        low: raw.low,
        close: raw.close,
        volume: raw.volume,
    })
}

/// Normalize and range-check a single option-chain quote.
pub fn validate_option_quote(raw: &RawOptionQuote) -> Result<OptionTick, ValidationError> {
    if raw.strike <= 0.0 {
        return Err(ValidationError::new("strike", "strike must be positive"));
    }

    let option_type = match raw.option_type.to_ascii_lowercase().as_str() {
        "call" | "c" => OptionType::Call,
        "put" | "p" => OptionType::Put,
        other => {
            return Err(ValidationError::new(
                "option_type",
                format!("unrecognized option type `{other}`"),
            ))
        }
    };

    let volume = raw.volume.unwrap_or(0.0);
    let open_interest = raw.open_interest.unwrap_or(0.0);
    if volume < 0.0 || open_interest < 0.0 {
        return Err(ValidationError::new(
            "volume/open_interest",
            "negative cumulative counter",
        ));
    }

    let broker_iv = raw
        .implied_volatility
        .filter(|iv| (IV_MIN..=IV_MAX).contains(iv));

    Ok(OptionTick {
        contract_symbol: raw.symbol.clone(),
        underlying: raw.underlying.clone(),
        expiration: raw.expiration,
        strike: raw.strike,
        option_type,
        timestamp: raw.timestamp,
        last: raw.last,
        bid: raw.bid,
        ask: raw.ask,
        volume,
        open_interest,
        broker_iv,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample_option(strike: f64, option_type: &str, iv: Option<f64>) -> RawOptionQuote {
        RawOptionQuote {
            symbol: "SPY260321C450".into(),
            underlying: "SPY".into(),
            expiration: NaiveDate::from_ymd_opt(2026, 3, 21).unwrap(),
            strike,
            option_type: option_type.into(),
            timestamp: Utc::now(),
            last: Some(12.10),
            bid: Some(12.0),
            ask: Some(12.2),
            volume: Some(0.0),
            open_interest: Some(1000.0),
            implied_volatility: iv,
        }
    }

    #[test]
    fn rejects_non_positive_strike() {
        let raw = sample_option(0.0, "call", None);
        assert!(validate_option_quote(&raw).is_err());
    }

    #[test]
    fn rejects_unrecognized_option_type() {
        let raw = sample_option(450.0, "straddle", None);
        assert!(validate_option_quote(&raw).is_err());
    }

    #[test]
    fn out_of_range_broker_iv_is_treated_as_absent() {
        let raw = sample_option(450.0, "call", Some(9.9));
        let tick = validate_option_quote(&raw).unwrap();
        assert_eq!(tick.broker_iv, None);
    }

    #[test]
    fn in_range_broker_iv_is_kept() {
        let raw = sample_option(450.0, "call", Some(0.25));
        let tick = validate_option_quote(&raw).unwrap();
        assert_eq!(tick.broker_iv, Some(0.25));
    }

    #[test]
    fn quote_falls_back_to_mid_when_last_absent() {
        let raw = RawQuote {
            symbol: "SPY".into(),
            timestamp: Utc::now(),
            last: None,
            bid: Some(449.9),
            ask: Some(450.1),
            up_volume: 100.0,
            down_volume: 50.0,
        };
        let tick = validate_quote(&raw).unwrap();
        assert_eq!(tick.price, 450.0);
    }

    #[test]
    fn quote_with_no_usable_price_is_rejected() {
        let raw = RawQuote {
            symbol: "SPY".into(),
            timestamp: Utc::now(),
            last: None,
            bid: None,
            ask: None,
            up_volume: 0.0,
            down_volume: 0.0,
        };
        assert!(validate_quote(&raw).is_err());
    }

    fn sample_bar(open: f64, high: f64, low: f64, close: f64) -> broker_client::types::RawBar {
        broker_client::types::RawBar {
            timestamp: Utc::now(),
            open,
            high,
            low,
            close,
            volume: 1234.0,
        }
    }

    #[test]
    fn validate_bar_preserves_ohlc_for_backfill() {
        let raw = sample_bar(450.0, 452.0, 448.0, 451.0);
        let bar = validate_bar("SPY", &raw).unwrap();
        assert_eq!(bar.symbol, "SPY");
        assert_eq!(bar.open, 450.0);
        assert_eq!(bar.high, 452.0);
        assert_eq!(bar.low, 448.0);
        assert_eq!(bar.close, 451.0);
        assert_eq!(bar.volume, 1234.0);
    }

    #[test]
    fn validate_bar_rejects_high_low_violations() {
        let raw = sample_bar(450.0, 449.0, 448.0, 451.0); // high < close
        assert!(validate_bar("SPY", &raw).is_err());
    }
}
