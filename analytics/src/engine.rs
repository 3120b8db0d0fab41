//! Periodic, read-only derivation of GEX/flip/max-pain/put-call-ratio
//! analytics from the store's latest per-contract snapshot.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use store::{GexByStrikeRow, GexSummaryRow, Store};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};

use crate::gex::{
    aggregate_by_strike, filter_snapshot, gamma_flip_point, max_gamma_strike, max_pain,
    put_call_ratio,
};

/// Tunables for one underlying's analytics tick.
#[derive(Debug, Clone)]
pub struct AnalyticsConfig {
    /// Underlying symbol to analyze.
    pub underlying: String,
    /// How often the tick runs. Default 60s.
    pub interval: Duration,
    /// How fresh a contract snapshot row must be to count. Default 5 minutes.
    pub staleness_window: chrono::Duration,
}

impl AnalyticsConfig {
    /// Build a config for `underlying` with the spec's defaults.
    pub fn new(underlying: impl Into<String>) -> Self {
        Self {
            underlying: underlying.into(),
            interval: Duration::from_secs(60),
            staleness_window: chrono::Duration::minutes(5),
        }
    }
}

/// Drives one underlying's periodic analytics tick, run-to-completion with
/// no overlap (the next tick does not start until the previous one returns).
pub struct AnalyticsEngine {
    config: AnalyticsConfig,
    store: Arc<Store>,
    last_successful_calc: Arc<RwLock<Option<chrono::DateTime<Utc>>>>,
}

impl AnalyticsEngine {
    /// Build an engine for one underlying over a shared store.
    pub fn new(config: AnalyticsConfig, store: Arc<Store>) -> Self {
        Self {
            config,
            store,
            last_successful_calc: Arc::new(RwLock::new(None)),
        }
    }

    /// Handle operators can poll for the "last successful analytics calc"
    /// timestamp.
    pub fn last_successful_calc_handle(&self) -> Arc<RwLock<Option<chrono::DateTime<Utc>>>> {
        self.last_successful_calc.clone()
    }

    /// Run one tick on `interval` until `shutdown` fires.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.config.interval.max(Duration::from_secs(1)));
        info!(underlying = %self.config.underlying, "analytics engine starting");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    info!(underlying = %self.config.underlying, "analytics engine shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        warn!(underlying = %self.config.underlying, error = %e, "analytics tick failed, retrying next interval");
                    } else {
                        *self.last_successful_calc.write().await = Some(Utc::now());
                    }
                }
            }
        }
    }

    async fn tick(&self) -> Result<(), common::StoreError> {
        let underlying = &self.config.underlying;

        let Some((_, _spot)) = self.store.latest_underlying_close(underlying).await? else {
            debug!(underlying, "no underlying close yet, skipping analytics tick");
            return Ok(());
        };

        let snapshot = self
            .store
            .latest_option_snapshot(underlying, self.config.staleness_window)
            .await?;

        let contracts = filter_snapshot(&snapshot);
        if contracts.is_empty() {
            debug!(underlying, "no contracts with gamma/OI yet, skipping analytics tick");
            return Ok(());
        }

        let by_strike = aggregate_by_strike(&contracts);
        let calc_time = Utc::now();

        for row in &by_strike {
            let store_row = GexByStrikeRow {
                underlying: underlying.clone(),
                calc_time,
                strike: row.strike,
                expiration: row.expiration,
                call_gamma: row.call_gamma,
                put_gamma: row.put_gamma,
                net_gex: row.net_gex,
                call_volume: row.call_volume,
                put_volume: row.put_volume,
                call_oi: row.call_oi,
                put_oi: row.put_oi,
                vanna_exposure: row.vanna_exposure,
                charm_exposure: row.charm_exposure,
            };
            self.store.upsert_gex_by_strike(&store_row).await?;
        }

        let total_call_volume: f64 = by_strike.iter().map(|r| r.call_volume).sum();
        let total_put_volume: f64 = by_strike.iter().map(|r| r.put_volume).sum();
        let total_call_oi: f64 = by_strike.iter().map(|r| r.call_oi).sum();
        let total_put_oi: f64 = by_strike.iter().map(|r| r.put_oi).sum();
        let total_net_gex: f64 = by_strike.iter().map(|r| r.net_gex).sum();

        let (max_gamma_strike_value, max_gamma_value) = match max_gamma_strike(&by_strike) {
            Some((strike, net)) => (Some(strike), Some(net.abs())),
            None => (None, None),
        };

        let summary = GexSummaryRow {
            underlying: underlying.clone(),
            calc_time,
            max_gamma_strike: max_gamma_strike_value,
            max_gamma_value,
            gamma_flip_point: gamma_flip_point(&by_strike),
            put_call_ratio: put_call_ratio(total_put_volume, total_call_volume),
            max_pain: max_pain(&contracts),
            total_call_volume,
            total_put_volume,
            total_call_oi,
            total_put_oi,
            total_net_gex,
        };
        self.store.upsert_gex_summary(&summary).await?;

        info!(underlying, strikes = by_strike.len(), "analytics tick complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_match_spec() {
        let config = AnalyticsConfig::new("SPY");
        assert_eq!(config.interval, Duration::from_secs(60));
        assert_eq!(config.staleness_window, chrono::Duration::minutes(5));
    }
}
