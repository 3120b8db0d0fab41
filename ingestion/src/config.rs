//! Ingestion-side configuration, one instance per configured underlying.

use std::time::Duration;

use crate::universe::UniverseConfig;

/// Polling interval per market session (`MARKET_HOURS_POLL_INTERVAL`,
/// `EXTENDED_HOURS_POLL_INTERVAL`, `CLOSED_HOURS_POLL_INTERVAL`).
#[derive(Debug, Clone, Copy)]
pub struct SessionIntervals {
    /// Interval during regular market hours. Default 5s.
    pub regular: Duration,
    /// Interval during pre/after hours. Default 30s.
    pub extended: Duration,
    /// Interval while the market is closed. Default 300s.
    pub closed: Duration,
}

impl Default for SessionIntervals {
    fn default() -> Self {
        Self {
            regular: Duration::from_secs(5),
            extended: Duration::from_secs(30),
            closed: Duration::from_secs(300),
        }
    }
}

/// Full per-underlying ingestion configuration.
#[derive(Debug, Clone)]
pub struct IngestionConfig {
    /// Underlying symbol to track.
    pub underlying: String,
    /// Strike-universe selection tunables.
    pub universe: UniverseConfig,
    /// Polling cadence by session.
    pub session_intervals: SessionIntervals,
    /// Bucket width in seconds (`AGGREGATION_BUCKET_SECONDS`).
    pub bucket_seconds: i64,
    /// Back-pressure ceiling on live accumulators (`MAX_BUFFER_SIZE`).
    pub max_buffer_size: usize,
    /// Contracts per `OptionChain` request (`OPTION_BATCH_SIZE`).
    pub option_batch_size: usize,
    /// Polling iterations between unconditional strike-universe expiry
    /// sweeps (`STRIKE_CLEANUP_INTERVAL`).
    pub strike_cleanup_interval: u32,
    /// Whether to run the Greeks stage (`GREEKS_ENABLED`).
    pub greeks_enabled: bool,
    /// Whether to run the IV stage (`IV_CALCULATION_ENABLED`).
    pub iv_enabled: bool,
    /// Risk-free rate used by the numerics stage (`RISK_FREE_RATE`).
    pub risk_free_rate: f64,
    /// Default IV when the fallback ladder bottoms out
    /// (`IMPLIED_VOLATILITY_DEFAULT`).
    pub default_iv: f64,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            underlying: String::new(),
            universe: UniverseConfig::default(),
            session_intervals: SessionIntervals::default(),
            bucket_seconds: 60,
            max_buffer_size: 1000,
            option_batch_size: 100,
            strike_cleanup_interval: 20,
            greeks_enabled: true,
            iv_enabled: true,
            risk_free_rate: 0.05,
            default_iv: 0.3,
        }
    }
}
