//! Core value types shared across the ingestion, numerics, store, and
//! analytics crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Underlying or option-contract symbol (e.g. `SPY`, `SPY260321C450`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Symbol(pub String);

impl Symbol {
    /// Wrap a raw string as a `Symbol`.
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Borrow the symbol text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Decimal price, always expected positive for traded instruments.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Px(pub f64);

impl Px {
    /// Construct a new price.
    pub fn new(value: f64) -> Self {
        Self(value)
    }

    /// Read the underlying value.
    pub fn as_f64(&self) -> f64 {
        self.0
    }

    /// True when the price is strictly positive and finite.
    pub fn is_valid(&self) -> bool {
        self.0.is_finite() && self.0 > 0.0
    }
}

impl fmt::Display for Px {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

/// Quantity (volume, open interest) expressed as a cumulative counter.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Qty(pub f64);

impl Qty {
    /// Construct a new quantity.
    pub fn new(value: f64) -> Self {
        Self(value)
    }

    /// Read the underlying value.
    pub fn as_f64(&self) -> f64 {
        self.0
    }

    /// True when the quantity is non-negative and finite.
    pub fn is_valid(&self) -> bool {
        self.0.is_finite() && self.0 >= 0.0
    }
}

impl fmt::Display for Qty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}", self.0)
    }
}

/// Monotonic timestamp in nanoseconds, used for retry/backoff timing where a
/// `DateTime<Utc>` would be overkill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Ts(pub u64);

impl Ts {
    /// Current wall-clock time, nanoseconds since the Unix epoch.
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_else(|_| std::time::Duration::from_secs(0))
            .as_nanos() as u64;
        Self(nanos)
    }

    /// Build from a raw nanosecond count.
    pub fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Raw nanosecond count.
    pub fn as_nanos(&self) -> u64 {
        self.0
    }

    /// Millisecond count, truncated.
    pub fn as_millis(&self) -> u64 {
        self.0 / 1_000_000
    }
}

impl fmt::Display for Ts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ns", self.0)
    }
}

/// Option contract type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptionType {
    /// Call option.
    Call,
    /// Put option.
    Put,
}

impl fmt::Display for OptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Call => write!(f, "C"),
            Self::Put => write!(f, "P"),
        }
    }
}

/// Market session classification, as reported by the broker's market clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Session {
    /// Before the regular session opens.
    PreOpen,
    /// Regular trading hours.
    RegularOpen,
    /// After the regular session closes.
    AfterHours,
    /// Market closed.
    Closed,
}

/// Identity of a single-leg equity option contract.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContractId {
    /// Underlying symbol, e.g. `SPY`.
    pub underlying: Symbol,
    /// Expiration date (calendar date, no time component).
    pub expiration: chrono::NaiveDate,
    /// Strike price in dollars.
    pub strike_cents: i64,
    /// Call or put.
    pub option_type: OptionType,
}

impl ContractId {
    /// Strike price as a decimal.
    pub fn strike(&self) -> f64 {
        self.strike_cents as f64 / 100.0
    }

    /// Canonical printable contract symbol, e.g. `SPY260321C450`.
    pub fn canonical_symbol(&self) -> String {
        format!(
            "{}{}{}{}",
            self.underlying,
            self.expiration.format("%y%m%d"),
            self.option_type,
            strip_trailing_zero(self.strike())
        )
    }
}

fn strip_trailing_zero(x: f64) -> String {
    if (x.fract()).abs() < 1e-9 {
        format!("{}", x as i64)
    } else {
        format!("{x}")
    }
}

/// Floor a timestamp to the start of its containing bucket.
pub fn floor_to_bucket(ts: DateTime<Utc>, bucket_seconds: i64) -> DateTime<Utc> {
    let epoch = ts.timestamp();
    let floored = epoch - epoch.rem_euclid(bucket_seconds);
    DateTime::<Utc>::from_timestamp(floored, 0).unwrap_or(ts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn px_display_rounds_to_two_places() {
        assert_eq!(Px::new(1.005).to_string(), "1.00");
        assert_eq!(Px::new(450.0).to_string(), "450.00");
    }

    #[test]
    fn px_validity() {
        assert!(Px::new(1.0).is_valid());
        assert!(!Px::new(0.0).is_valid());
        assert!(!Px::new(-1.0).is_valid());
        assert!(!Px::new(f64::NAN).is_valid());
    }

    #[test]
    fn qty_validity() {
        assert!(Qty::new(0.0).is_valid());
        assert!(Qty::new(100.0).is_valid());
        assert!(!Qty::new(-1.0).is_valid());
    }

    #[test]
    fn ts_conversions() {
        let ts = Ts::from_nanos(1_234_567_890);
        assert_eq!(ts.as_nanos(), 1_234_567_890);
        assert_eq!(ts.as_millis(), 1_234);
    }

    #[test]
    fn floor_to_bucket_is_half_open_left() {
        let exact = DateTime::parse_from_rfc3339("2024-03-21T14:31:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let floored = floor_to_bucket(exact, 60);
        assert_eq!(floored, exact);

        let mid = DateTime::parse_from_rfc3339("2024-03-21T14:31:45Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(floor_to_bucket(mid, 60), exact);
    }

    #[test]
    fn contract_canonical_symbol() {
        let c = ContractId {
            underlying: Symbol::new("SPY"),
            expiration: chrono::NaiveDate::from_ymd_opt(2026, 3, 21).unwrap(),
            strike_cents: 45_000,
            option_type: OptionType::Call,
        };
        assert_eq!(c.canonical_symbol(), "SPY260321C450");
        assert_eq!(c.strike(), 450.0);
    }
}
