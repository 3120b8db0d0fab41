//! Fetches historical bars and contemporaneous option snapshots for a
//! lookback window, stamped with bar time rather than fetch time, and hands
//! them to the same enrichment+write path used by streaming.

use std::sync::Arc;

use broker_client::types::BarUnit;
use broker_client::BrokerClient;
use chrono::NaiveDate;
use common::BrokerError;
use numerics::{GreeksEvaluator, IvSolver};
use store::Store;
use tracing::{error, warn};

use crate::aggregator::OptionAccumulator;
use crate::config::IngestionConfig;
use crate::engine::enrich_quote;
use crate::validator::{validate_bar, validate_option_quote, OptionTick, ValidatedBar};

/// Parameters for one backfill run.
#[derive(Debug, Clone)]
pub struct BackfillRequest {
    /// Underlying symbol.
    pub underlying: String,
    /// Number of historical bars to fetch.
    pub lookback_count: u32,
    /// Bar granularity.
    pub bar_unit: BarUnit,
    /// Strike distance around each sampled bar's close.
    pub strike_distance: f64,
    /// Number of nearest expirations (as of each sampled bar's date) to include.
    pub n_expirations: usize,
    /// Sample every Nth bar for an option-chain snapshot.
    pub option_sampling: u32,
}

/// Snapshots recovered by one backfill run, ready for the enrichment+write
/// path. Unlike the live aggregator's accumulators, each entry here already
/// represents one complete bucket (the broker's own bar), so no further
/// aggregation is needed before writing.
#[derive(Debug, Default)]
pub struct BackfillResult {
    /// Underlying OHLC bars, stamped with each bar's own timestamp.
    pub underlying_bars: Vec<ValidatedBar>,
    /// Option snapshots paired with the sampled bar's close (the spot used
    /// for that snapshot's enrichment), stamped with the bar's timestamp.
    pub option_ticks: Vec<(f64, OptionTick)>,
}

/// Runs a one-shot historical backfill to completion, then returns.
pub struct BackfillManager {
    client: Arc<BrokerClient>,
}

impl BackfillManager {
    /// Build a backfill manager over a shared broker client.
    pub fn new(client: Arc<BrokerClient>) -> Self {
        Self { client }
    }

    /// Execute one backfill request.
    pub async fn run(&self, request: &BackfillRequest) -> Result<BackfillResult, BrokerError> {
        let raw_bars = self
            .client
            .bars(&request.underlying, request.bar_unit, request.lookback_count)
            .await?;

        let mut result = BackfillResult::default();

        for (i, raw_bar) in raw_bars.iter().enumerate() {
            match validate_bar(&request.underlying, raw_bar) {
                Ok(bar) => result.underlying_bars.push(bar),
                Err(e) => {
                    warn!(error = %e, "dropping invalid backfill bar");
                    continue;
                }
            }

            if i as u32 % request.option_sampling.max(1) != 0 {
                continue;
            }

            let bar_date = raw_bar.timestamp.date_naive();
            let close = raw_bar.close;

            if let Err(e) = self
                .sample_option_chain(request, bar_date, close, raw_bar.timestamp, &mut result)
                .await
            {
                warn!(error = %e, date = %bar_date, "skipping option sample for this bar");
            }
        }

        Ok(result)
    }

    async fn sample_option_chain(
        &self,
        request: &BackfillRequest,
        bar_date: NaiveDate,
        spot: f64,
        stamp: chrono::DateTime<chrono::Utc>,
        result: &mut BackfillResult,
    ) -> Result<(), BrokerError> {
        let expirations = self.client.expirations(&request.underlying).await?;
        for expiration in expirations
            .iter()
            .filter(|e| **e >= bar_date)
            .take(request.n_expirations)
        {
            let strikes = self.client.strikes(&request.underlying, *expiration).await?;
            let near: Vec<f64> = strikes
                .into_iter()
                .filter(|k| (k - spot).abs() <= request.strike_distance)
                .collect();
            if near.is_empty() {
                continue;
            }
            let chain = self
                .client
                .option_chain(&request.underlying, *expiration, Some(&near))
                .await?;
            for mut raw in chain {
                raw.timestamp = stamp;
                match validate_option_quote(&raw) {
                    Ok(tick) => result.option_ticks.push((spot, tick)),
                    Err(e) => warn!(error = %e, "dropping invalid backfill option quote"),
                }
            }
        }
        Ok(())
    }

    /// Run a backfill request and write every recovered bar/snapshot through
    /// the same enrichment+write path the live engine uses. Runs to
    /// completion and returns; unlike the live engine, there is no ongoing
    /// task to hand results to.
    pub async fn run_and_write(
        &self,
        request: &BackfillRequest,
        store: &Store,
        iv_solver: &IvSolver,
        greeks_evaluator: &GreeksEvaluator,
        config: &IngestionConfig,
    ) -> Result<(), BrokerError> {
        let result = self.run(request).await?;

        for bar in result.underlying_bars {
            let row = store::UnderlyingBar {
                symbol: bar.symbol,
                bucket_start: bar.timestamp,
                open: bar.open,
                high: bar.high,
                low: bar.low,
                close: bar.close,
                up_volume: bar.volume,
                down_volume: 0.0,
            };
            if let Err(e) = store.upsert_underlying_bar(&row).await {
                error!(error = %e, "backfill write failed for underlying bar");
            }
        }

        for (spot, tick) in result.option_ticks {
            let acc: OptionAccumulator = tick.into();
            let row = enrich_quote(iv_solver, greeks_evaluator, config, &acc, spot);
            if let Err(e) = store.upsert_option_quote(&row).await {
                error!(error = %e, "backfill write failed for option quote");
            }
        }

        Ok(())
    }
}
