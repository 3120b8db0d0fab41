//! Row shapes persisted by the store. These mirror the entities in the
//! data model: `UnderlyingBar`, `OptionQuote`, `GEXSummary`, `GEXByStrike`.

use chrono::{DateTime, NaiveDate, Utc};

/// One-minute OHLC bar for an underlying.
#[derive(Debug, Clone, PartialEq)]
pub struct UnderlyingBar {
    /// Underlying symbol.
    pub symbol: String,
    /// Inclusive bucket start.
    pub bucket_start: DateTime<Utc>,
    /// Opening price.
    pub open: f64,
    /// High price.
    pub high: f64,
    /// Low price.
    pub low: f64,
    /// Closing price.
    pub close: f64,
    /// Cumulative up-volume as reported by the broker.
    pub up_volume: f64,
    /// Cumulative down-volume as reported by the broker.
    pub down_volume: f64,
}

/// One-minute snapshot row for a single option contract, enriched with IV
/// and Greeks once the numerics stage has run.
#[derive(Debug, Clone, PartialEq)]
pub struct OptionQuoteRow {
    /// Canonical contract symbol, e.g. `SPY260321C450`.
    pub contract_symbol: String,
    /// Underlying symbol.
    pub underlying: String,
    /// Contract expiration date.
    pub expiration: NaiveDate,
    /// Strike price.
    pub strike: f64,
    /// `"call"` or `"put"`.
    pub option_type: String,
    /// Inclusive bucket start.
    pub bucket_start: DateTime<Utc>,
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
    /// Implied volatility, if the numerics stage produced one.
    pub iv: Option<f64>,
    /// Which fallback-ladder step produced `iv` (`"broker"`, `"mid"`,
    /// `"last"`, `"default"`), recorded so the ladder choice is auditable.
    pub iv_source: Option<String>,
    /// `∂V/∂S`.
    pub delta: Option<f64>,
    /// `∂²V/∂S²`.
    pub gamma: Option<f64>,
    /// `∂V/∂T` per calendar day.
    pub theta: Option<f64>,
    /// `∂V/∂σ` per volatility point.
    pub vega: Option<f64>,
    /// `∂²V/∂S∂σ`.
    pub vanna: Option<f64>,
    /// `∂²V/∂S∂T` per calendar day.
    pub charm: Option<f64>,
}

/// Per-underlying analytics summary for one calculation tick.
#[derive(Debug, Clone, PartialEq)]
pub struct GexSummaryRow {
    /// Underlying symbol.
    pub underlying: String,
    /// When this summary was computed.
    pub calc_time: DateTime<Utc>,
    /// Strike with the largest absolute net GEX.
    pub max_gamma_strike: Option<f64>,
    /// `|net_gex|` at `max_gamma_strike`.
    pub max_gamma_value: Option<f64>,
    /// Strike at which cumulative net GEX crosses (or nears) zero.
    pub gamma_flip_point: Option<f64>,
    /// Put volume divided by call volume.
    pub put_call_ratio: Option<f64>,
    /// Strike minimizing aggregate option-holder payoff at expiry.
    pub max_pain: Option<f64>,
    /// Total call volume across strikes.
    pub total_call_volume: f64,
    /// Total put volume across strikes.
    pub total_put_volume: f64,
    /// Total call open interest across strikes.
    pub total_call_oi: f64,
    /// Total put open interest across strikes.
    pub total_put_oi: f64,
    /// Sum of `net_gex` across strikes.
    pub total_net_gex: f64,
}

/// Per-strike analytics row for one calculation tick.
#[derive(Debug, Clone, PartialEq)]
pub struct GexByStrikeRow {
    /// Underlying symbol.
    pub underlying: String,
    /// When this row was computed.
    pub calc_time: DateTime<Utc>,
    /// Strike price.
    pub strike: f64,
    /// Expiration this strike's contracts belong to.
    pub expiration: NaiveDate,
    /// Sum of `gamma * open_interest` over calls at this strike/expiration.
    pub call_gamma: f64,
    /// Sum of `gamma * open_interest` over puts at this strike/expiration.
    pub put_gamma: f64,
    /// `(call_gamma - put_gamma) * contract_multiplier`.
    pub net_gex: f64,
    /// Call volume at this strike/expiration.
    pub call_volume: f64,
    /// Put volume at this strike/expiration.
    pub put_volume: f64,
    /// Call open interest at this strike/expiration.
    pub call_oi: f64,
    /// Put open interest at this strike/expiration.
    pub put_oi: f64,
    /// Vanna exposure, weighted the same way as `net_gex`.
    pub vanna_exposure: f64,
    /// Charm exposure, weighted the same way as `net_gex`.
    pub charm_exposure: f64,
}
