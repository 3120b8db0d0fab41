//! Orchestrates the strike universe, aggregator, stream manager, and
//! numerics stages, and writes completed buckets to the store. Owns
//! shutdown, buffer flushing, and memory reclamation for one underlying.

use std::sync::Arc;
use std::time::Duration;

use broker_client::BrokerClient;
use chrono::Utc;
use common::{AuthError, BrokerError, OptionType};
use numerics::{resolve_iv, GreeksEvaluator, IvLadderInput, IvSolver, IvSolverConfig};
use store::{OptionQuoteRow, Store};
use tokio::sync::{broadcast, RwLock};
use tracing::{error, info, warn};

use crate::aggregator::{Aggregator, OptionAccumulator, UnderlyingAccumulator};
use crate::config::IngestionConfig;
use crate::stream_manager::{polling_interval, StreamManager};
use crate::universe::StrikeUniverse;

/// Lifecycle state of one underlying's ingestion task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Not yet started.
    Idle,
    /// Polling on the normal cadence.
    Streaming,
    /// Shutdown requested; draining buffers before exit.
    Flushing,
    /// Fully shut down.
    Closed,
}

fn option_type_str(ot: OptionType) -> &'static str {
    match ot {
        OptionType::Call => "call",
        OptionType::Put => "put",
    }
}

/// Drives one underlying end to end: poll, aggregate, enrich, write.
pub struct IngestionEngine {
    config: IngestionConfig,
    stream_manager: StreamManager,
    universe: StrikeUniverse,
    aggregator: Aggregator,
    iv_solver: IvSolver,
    greeks_evaluator: GreeksEvaluator,
    store: Arc<Store>,
    state: EngineState,
    iterations: u32,
    last_spot: Option<f64>,
    last_successful_poll: Arc<RwLock<Option<chrono::DateTime<Utc>>>>,
}

impl IngestionEngine {
    /// Build an engine for one underlying.
    pub fn new(config: IngestionConfig, client: Arc<BrokerClient>, store: Arc<Store>) -> Self {
        let stream_manager = StreamManager::new(client, config.option_batch_size);
        let universe = StrikeUniverse::new(config.universe);
        let aggregator = Aggregator::new(config.bucket_seconds, config.max_buffer_size);
        let iv_solver = IvSolver::new(IvSolverConfig::default());
        let greeks_evaluator = GreeksEvaluator::new(config.risk_free_rate);

        Self {
            config,
            stream_manager,
            universe,
            aggregator,
            iv_solver,
            greeks_evaluator,
            store,
            state: EngineState::Idle,
            iterations: 0,
            last_spot: None,
            last_successful_poll: Arc::new(RwLock::new(None)),
        }
    }

    /// Handle operators can poll for the "last successful poll" timestamp.
    pub fn last_successful_poll_handle(&self) -> Arc<RwLock<Option<chrono::DateTime<Utc>>>> {
        self.last_successful_poll.clone()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Run until `shutdown` fires, then drain and exit.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        self.state = EngineState::Streaming;
        info!(underlying = %self.config.underlying, "ingestion engine starting");

        loop {
            let interval = match self.poll_and_process().await {
                Ok(interval) => interval,
                Err(auth_err) => {
                    error!(underlying = %self.config.underlying, error = %auth_err, "fatal auth failure, halting ingestion");
                    return;
                }
            };

            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    self.flush_and_close().await;
                    return;
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    async fn poll_and_process(&mut self) -> Result<Duration, AuthError> {
        self.iterations += 1;
        let underlying = self.config.underlying.clone();

        match self
            .stream_manager
            .poll_once(&underlying, &mut self.universe, &mut self.aggregator)
            .await
        {
            Ok(outcome) => {
                self.last_spot = Some(outcome.spot);
                *self.last_successful_poll.write().await = Some(Utc::now());

                for evicted in outcome.evicted {
                    self.enrich_and_write_option(evicted).await;
                }

                self.process_completed(Utc::now()).await;

                if self.iterations % self.config.strike_cleanup_interval.max(1) == 0 {
                    let today = Utc::now().date_naive();
                    let dropped = self.universe.prune_expired(today);
                    for contract in dropped {
                        for evicted in self.aggregator.evict_contract(&contract.canonical_symbol()) {
                            self.enrich_and_write_option(evicted).await;
                        }
                    }
                }

                Ok(polling_interval(outcome.session, &self.config.session_intervals))
            }
            Err(BrokerError::Auth(auth_err)) => Err(auth_err),
            Err(other) => {
                warn!(underlying = %underlying, error = %other, "transient ingestion failure this iteration, retrying next tick");
                Ok(self.config.session_intervals.regular)
            }
        }
    }

    async fn process_completed(&mut self, now: chrono::DateTime<Utc>) {
        let (bars, options) = self.aggregator.sweep(now);
        let (pressure_bars, pressure_options) = self.aggregator.enforce_back_pressure(now);

        for bar in bars.into_iter().chain(pressure_bars) {
            self.write_underlying_bar(bar).await;
        }
        for option in options.into_iter().chain(pressure_options) {
            self.enrich_and_write_option(option).await;
        }
    }

    async fn write_underlying_bar(&self, acc: UnderlyingAccumulator) {
        let row = store::UnderlyingBar {
            symbol: acc.symbol,
            bucket_start: acc.bucket_start,
            open: acc.open,
            high: acc.high,
            low: acc.low,
            close: acc.close,
            up_volume: acc.up_volume,
            down_volume: acc.down_volume,
        };
        if let Err(e) = self.store.upsert_underlying_bar(&row).await {
            if e.is_retryable() {
                warn!(error = %e, "transient store failure writing underlying bar, will retry next cycle");
            } else {
                error!(error = %e, "permanent store failure writing underlying bar");
            }
        }
    }

    async fn enrich_and_write_option(&self, acc: OptionAccumulator) {
        let spot = self.last_spot.unwrap_or(acc.strike);
        let row = enrich_quote(
            &self.iv_solver,
            &self.greeks_evaluator,
            &self.config,
            &acc,
            spot,
        );
        if let Err(e) = self.store.upsert_option_quote(&row).await {
            if e.is_retryable() {
                warn!(error = %e, "transient store failure writing option quote, will retry next cycle");
            } else {
                error!(error = %e, "permanent store failure writing option quote");
            }
        }
    }

    async fn flush_and_close(&mut self) {
        self.state = EngineState::Flushing;
        info!(underlying = %self.config.underlying, "shutdown signal received, flushing buffers");

        let (bars, options) = self.aggregator.flush_all();
        for bar in bars {
            self.write_underlying_bar(bar).await;
        }
        for option in options {
            self.enrich_and_write_option(option).await;
        }

        self.state = EngineState::Closed;
        info!(underlying = %self.config.underlying, "ingestion engine closed");
    }
}

/// Resolve IV and Greeks for one completed option bucket and build its
/// persisted row. Pure aside from the solver/evaluator it's handed, so it's
/// testable without a live store or broker client. Shared with backfill,
/// which replays historical snapshots through the same enrichment path.
pub(crate) fn enrich_quote(
    iv_solver: &IvSolver,
    greeks_evaluator: &GreeksEvaluator,
    config: &IngestionConfig,
    acc: &OptionAccumulator,
    spot: f64,
) -> OptionQuoteRow {
    let today = acc.bucket_start.date_naive();
    let t_years = (acc.expiration - today).num_days() as f64 / 365.0;

    let (iv, iv_source, greeks) = if t_years > 0.0 {
        let (iv, source) = if config.iv_enabled {
            resolve_iv(
                iv_solver,
                IvLadderInput {
                    broker_iv: acc.broker_iv,
                    bid: acc.bid,
                    ask: acc.ask,
                    last: acc.last,
                },
                acc.option_type,
                spot,
                acc.strike,
                config.risk_free_rate,
                t_years,
                config.default_iv,
            )
        } else {
            (config.default_iv, numerics::IvSource::Default)
        };

        let greeks = if config.greeks_enabled {
            greeks_evaluator
                .evaluate(acc.option_type, spot, acc.strike, config.risk_free_rate, iv, t_years)
                .ok()
        } else {
            None
        };

        (Some(iv), Some(source), greeks)
    } else {
        (None, None, None)
    };

    let iv_source_str = iv_source.map(|s| {
        match s {
            numerics::IvSource::BrokerProvided => "broker",
            numerics::IvSource::SolvedFromMid => "mid",
            numerics::IvSource::SolvedFromLast => "last",
            numerics::IvSource::Default => "default",
        }
        .to_string()
    });

    OptionQuoteRow {
        contract_symbol: acc.contract_symbol.clone(),
        underlying: acc.underlying.clone(),
        expiration: acc.expiration,
        strike: acc.strike,
        option_type: option_type_str(acc.option_type).to_string(),
        bucket_start: acc.bucket_start,
        last: acc.last,
        bid: acc.bid,
        ask: acc.ask,
        volume: acc.volume,
        open_interest: acc.open_interest,
        iv,
        iv_source: iv_source_str,
        delta: greeks.map(|g| g.delta),
        gamma: greeks.map(|g| g.gamma),
        theta: greeks.map(|g| g.theta),
        vega: greeks.map(|g| g.vega),
        vanna: greeks.map(|g| g.vanna),
        charm: greeks.map(|g| g.charm),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use numerics::IvSolverConfig;

    fn accumulator(expiration_offset_days: i64) -> OptionAccumulator {
        let bucket_start = Utc::now();
        OptionAccumulator {
            contract_symbol: "SPY260321C450".to_string(),
            underlying: "SPY".to_string(),
            expiration: (bucket_start + chrono::Duration::days(expiration_offset_days)).date_naive(),
            strike: 450.0,
            option_type: OptionType::Call,
            bucket_start,
            last: Some(12.10),
            bid: Some(12.00),
            ask: Some(12.20),
            volume: 0.0,
            open_interest: 1000.0,
            broker_iv: None,
        }
    }

    #[test]
    fn enrich_quote_computes_iv_and_greeks_for_live_contract() {
        let iv_solver = IvSolver::new(IvSolverConfig::default());
        let greeks_evaluator = GreeksEvaluator::new(0.05);
        let config = IngestionConfig::default();
        let acc = accumulator(90);

        let row = enrich_quote(&iv_solver, &greeks_evaluator, &config, &acc, 450.0);

        assert!(row.iv.is_some());
        assert_eq!(row.iv_source.as_deref(), Some("mid"));
        assert!(row.delta.is_some());
        assert!(row.gamma.is_some());
        assert!(row.vanna.is_some());
        assert!(row.charm.is_some());
    }

    #[test]
    fn enrich_quote_skips_numerics_for_expired_contract() {
        let iv_solver = IvSolver::new(IvSolverConfig::default());
        let greeks_evaluator = GreeksEvaluator::new(0.05);
        let config = IngestionConfig::default();
        let acc = accumulator(-1);

        let row = enrich_quote(&iv_solver, &greeks_evaluator, &config, &acc, 450.0);

        assert!(row.iv.is_none());
        assert!(row.iv_source.is_none());
        assert!(row.delta.is_none());
        assert!(row.gamma.is_none());
    }

    #[test]
    fn enrich_quote_uses_default_iv_when_iv_stage_disabled() {
        let iv_solver = IvSolver::new(IvSolverConfig::default());
        let greeks_evaluator = GreeksEvaluator::new(0.05);
        let mut config = IngestionConfig::default();
        config.iv_enabled = false;
        config.default_iv = 0.42;
        let acc = accumulator(90);

        let row = enrich_quote(&iv_solver, &greeks_evaluator, &config, &acc, 450.0);

        assert_eq!(row.iv, Some(0.42));
        assert_eq!(row.iv_source.as_deref(), Some("default"));
    }

    #[test]
    fn enrich_quote_skips_greeks_when_greeks_stage_disabled() {
        let iv_solver = IvSolver::new(IvSolverConfig::default());
        let greeks_evaluator = GreeksEvaluator::new(0.05);
        let mut config = IngestionConfig::default();
        config.greeks_enabled = false;
        let acc = accumulator(90);

        let row = enrich_quote(&iv_solver, &greeks_evaluator, &config, &acc, 450.0);

        assert!(row.iv.is_some());
        assert!(row.delta.is_none());
        assert!(row.gamma.is_none());
    }
}
