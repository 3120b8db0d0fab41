//! Drives the broker client at an interval chosen from the market session,
//! feeding the aggregator and re-querying the strike universe when needed.

use std::time::Duration;

use broker_client::BrokerClient;
use common::{BrokerError, Session};
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::aggregator::{Aggregator, OptionAccumulator};
use crate::config::SessionIntervals;
use crate::universe::StrikeUniverse;
use crate::validator::{validate_option_quote, validate_quote};

/// Choose the next polling interval from the current market session.
pub fn polling_interval(session: Session, intervals: &SessionIntervals) -> Duration {
    match session {
        Session::RegularOpen => intervals.regular,
        Session::PreOpen | Session::AfterHours => intervals.extended,
        Session::Closed => intervals.closed,
    }
}

/// Outcome of one polling iteration, used by the engine to pick the next
/// sleep and to track spot for the enrichment stage.
#[derive(Debug, Clone)]
pub struct PollOutcome {
    /// Session observed this iteration.
    pub session: Session,
    /// Underlying spot price observed this iteration.
    pub spot: f64,
    /// Accumulators for contracts the strike universe dropped this
    /// iteration. Per spec these must be flushed (written) before being
    /// discarded, so the engine enriches and writes them like any other
    /// completed bucket.
    pub evicted: Vec<OptionAccumulator>,
}

/// Drives one underlying's polling loop for a single iteration.
pub struct StreamManager {
    client: std::sync::Arc<BrokerClient>,
    option_batch_size: usize,
}

impl StreamManager {
    /// Build a stream manager over a shared broker client.
    pub fn new(client: std::sync::Arc<BrokerClient>, option_batch_size: usize) -> Self {
        Self {
            client,
            option_batch_size,
        }
    }

    /// Run one polling iteration: fetch the clock and underlying quote,
    /// recompute the strike universe if triggered, fetch option-chain
    /// quotes in batches, and forward every validated tick to `aggregator`.
    pub async fn poll_once(
        &self,
        underlying: &str,
        universe: &mut StrikeUniverse,
        aggregator: &mut Aggregator,
    ) -> Result<PollOutcome, BrokerError> {
        let clock = self.client.clock().await?;
        let today = clock.timestamp.date_naive();

        let raw_quotes = self.client.quote(&[underlying.to_string()]).await?;
        let raw_quote = raw_quotes
            .into_iter()
            .next()
            .ok_or_else(|| BrokerError::Permanent("empty quote response".to_string()))?;

        let spot = match validate_quote(&raw_quote) {
            Ok(tick) => {
                let price = tick.price;
                aggregator.ingest_underlying(tick);
                price
            }
            Err(e) => {
                warn!(error = %e, "dropping invalid underlying quote");
                return Err(BrokerError::Permanent(e.to_string()));
            }
        };

        let mut evicted = Vec::new();
        if universe.should_recompute(spot, today) {
            evicted = self
                .recompute_universe(underlying, spot, universe, aggregator)
                .await?;
        }
        universe.tick();

        self.poll_option_chain(underlying, universe, aggregator)
            .await?;

        Ok(PollOutcome {
            session: clock.session,
            spot,
            evicted,
        })
    }

    async fn recompute_universe(
        &self,
        underlying: &str,
        spot: f64,
        universe: &mut StrikeUniverse,
        aggregator: &mut Aggregator,
    ) -> Result<Vec<OptionAccumulator>, BrokerError> {
        let expirations = self.client.expirations(underlying).await?;
        let mut strikes_by_expiration = FxHashMap::default();
        for expiration in expirations.iter().take(universe.n_expirations()) {
            let strikes = self.client.strikes(underlying, *expiration).await?;
            strikes_by_expiration.insert(*expiration, strikes);
        }

        let dropped = universe.recompute(underlying, spot, &expirations, &strikes_by_expiration);
        let mut evicted = Vec::new();
        for contract in dropped {
            evicted.extend(aggregator.evict_contract(&contract.canonical_symbol()));
        }
        debug!(count = universe.contracts().len(), "strike universe recomputed");
        Ok(evicted)
    }

    async fn poll_option_chain(
        &self,
        underlying: &str,
        universe: &StrikeUniverse,
        aggregator: &mut Aggregator,
    ) -> Result<(), BrokerError> {
        for (expiration, strikes) in universe.strikes_by_expiration() {
            for batch in strikes.chunks(self.option_batch_size.max(1)) {
                let chain = self
                    .client
                    .option_chain(underlying, expiration, Some(batch))
                    .await?;
                for raw in chain {
                    match validate_option_quote(&raw) {
                        Ok(tick) => aggregator.ingest_option(tick),
                        Err(e) => warn!(error = %e, symbol = %raw.symbol, "dropping invalid option quote"),
                    }
                }
            }
        }
        Ok(())
    }
}
