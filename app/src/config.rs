//! Process-wide configuration, loaded from `.env` plus the environment the
//! same two-step way this workspace's service configs load theirs.

use ingestion::{SessionIntervals, UniverseConfig};
use std::time::Duration;

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Full process configuration: connection strings, credentials, and every
/// per-underlying tunable named in the configuration surface.
#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection string.
    pub database_url: String,
    /// Broker REST API base URL.
    pub broker_base_url: String,
    /// OAuth token endpoint.
    pub token_url: String,
    /// OAuth client id.
    pub client_id: String,
    /// OAuth client secret.
    pub client_secret: String,
    /// Long-lived refresh token, provisioned out of band.
    pub refresh_token: String,
    /// Underlyings to run one ingestion + analytics task pair for.
    pub underlyings: Vec<String>,

    /// Strike-universe selection tunables.
    pub universe: UniverseConfig,
    /// Polling cadence by session.
    pub session_intervals: SessionIntervals,
    /// Bucket width in seconds.
    pub bucket_seconds: i64,
    /// Back-pressure ceiling on live accumulators.
    pub max_buffer_size: usize,
    /// Contracts per option-chain request.
    pub option_batch_size: usize,
    /// Polling iterations between expiry sweeps.
    pub strike_cleanup_interval: u32,
    /// Whether to run the Greeks stage.
    pub greeks_enabled: bool,
    /// Whether to run the IV stage.
    pub iv_enabled: bool,
    /// Risk-free rate used by the numerics stage.
    pub risk_free_rate: f64,
    /// Default IV when the fallback ladder bottoms out.
    pub default_iv: f64,

    /// Analytics tick interval.
    pub analytics_interval: Duration,
    /// How fresh a contract snapshot row must be to count.
    pub staleness_window_minutes: i64,

    /// Maintenance task interval.
    pub maintenance_interval: Duration,
    /// Raw quote retention, in days.
    pub retention_raw_quotes_days: i64,
    /// Analytics summary/by-strike retention, in days.
    pub retention_quality_log_days: i64,
}

impl Config {
    /// Load configuration from environment variables (after `dotenvy` has
    /// already populated the process environment from `.env`, if present).
    /// `UNDERLYINGS` is a comma-separated list; every other tunable has a
    /// default matching the spec so a bare `DATABASE_URL` plus broker
    /// credentials is enough to start.
    pub fn load() -> anyhow::Result<Self> {
        let underlyings: Vec<String> = env_or("UNDERLYINGS", "SPY")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL is required"))?,
            broker_base_url: std::env::var("BROKER_BASE_URL")
                .map_err(|_| anyhow::anyhow!("BROKER_BASE_URL is required"))?,
            token_url: std::env::var("BROKER_TOKEN_URL")
                .map_err(|_| anyhow::anyhow!("BROKER_TOKEN_URL is required"))?,
            client_id: std::env::var("BROKER_CLIENT_ID")
                .map_err(|_| anyhow::anyhow!("BROKER_CLIENT_ID is required"))?,
            client_secret: std::env::var("BROKER_CLIENT_SECRET")
                .map_err(|_| anyhow::anyhow!("BROKER_CLIENT_SECRET is required"))?,
            refresh_token: std::env::var("BROKER_REFRESH_TOKEN")
                .map_err(|_| anyhow::anyhow!("BROKER_REFRESH_TOKEN is required"))?,
            underlyings,

            universe: UniverseConfig {
                n_expirations: env_parse("STRIKE_EXPIRATIONS", 4),
                strike_distance: env_parse("STRIKE_DISTANCE", 10.0),
                recalc_interval: env_parse("STRIKE_RECALC_INTERVAL", 10),
                price_move_threshold: env_parse("PRICE_MOVE_THRESHOLD", 1.0),
            },
            session_intervals: SessionIntervals {
                regular: Duration::from_secs(env_parse("MARKET_HOURS_POLL_INTERVAL", 5)),
                extended: Duration::from_secs(env_parse("EXTENDED_HOURS_POLL_INTERVAL", 30)),
                closed: Duration::from_secs(env_parse("CLOSED_HOURS_POLL_INTERVAL", 300)),
            },
            bucket_seconds: env_parse("AGGREGATION_BUCKET_SECONDS", 60),
            max_buffer_size: env_parse("MAX_BUFFER_SIZE", 1000),
            option_batch_size: env_parse("OPTION_BATCH_SIZE", 100),
            strike_cleanup_interval: env_parse("STRIKE_CLEANUP_INTERVAL", 20),
            greeks_enabled: env_parse("GREEKS_ENABLED", true),
            iv_enabled: env_parse("IV_CALCULATION_ENABLED", true),
            risk_free_rate: env_parse("RISK_FREE_RATE", 0.05),
            default_iv: env_parse("IMPLIED_VOLATILITY_DEFAULT", 0.3),

            analytics_interval: Duration::from_secs(env_parse("ANALYTICS_INTERVAL_SECONDS", 60)),
            staleness_window_minutes: env_parse("ANALYTICS_STALENESS_MINUTES", 5),

            maintenance_interval: Duration::from_secs(env_parse("MAINTENANCE_INTERVAL_SECONDS", 3600)),
            retention_raw_quotes_days: env_parse("RETENTION_RAW_QUOTES_DAYS", 90),
            retention_quality_log_days: env_parse("RETENTION_QUALITY_LOG_DAYS", 365),
        })
    }
}
