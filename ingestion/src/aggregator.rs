//! Accumulates arriving ticks into one-minute buckets keyed by
//! `(id, bucket_start)`, emitting completed buckets on a sweep.

use chrono::{DateTime, NaiveDate, Utc};
use common::{floor_to_bucket, OptionType};
use rustc_hash::FxHashMap;
use tracing::warn;

use crate::validator::{OptionTick, UnderlyingTick};

/// Accumulator for one underlying's one-minute bucket.
#[derive(Debug, Clone)]
pub struct UnderlyingAccumulator {
    /// Underlying symbol.
    pub symbol: String,
    /// Inclusive bucket start.
    pub bucket_start: DateTime<Utc>,
    /// Opening price, set on the first tick.
    pub open: f64,
    /// Running high.
    pub high: f64,
    /// Running low.
    pub low: f64,
    /// Most recent price, overwritten each tick.
    pub close: f64,
    /// Latest reported cumulative up-volume.
    pub up_volume: f64,
    /// Latest reported cumulative down-volume.
    pub down_volume: f64,
}

impl UnderlyingAccumulator {
    fn new(tick: &UnderlyingTick, bucket_start: DateTime<Utc>) -> Self {
        Self {
            symbol: tick.symbol.clone(),
            bucket_start,
            open: tick.price,
            high: tick.price,
            low: tick.price,
            close: tick.price,
            up_volume: tick.up_volume,
            down_volume: tick.down_volume,
        }
    }

    fn apply(&mut self, tick: &UnderlyingTick) {
        self.high = self.high.max(tick.price);
        self.low = self.low.min(tick.price);
        self.close = tick.price;
        // Broker reports cumulative counters; overwrite, never sum.
        self.up_volume = tick.up_volume;
        self.down_volume = tick.down_volume;
    }

    fn is_complete(&self, now: DateTime<Utc>, bucket_seconds: i64) -> bool {
        now >= self.bucket_start + chrono::Duration::seconds(bucket_seconds)
    }
}

/// Accumulator for one option contract's one-minute bucket.
#[derive(Debug, Clone)]
pub struct OptionAccumulator {
    /// Canonical contract symbol.
    pub contract_symbol: String,
    /// Underlying symbol.
    pub underlying: String,
    /// Expiration date.
    pub expiration: NaiveDate,
    /// Strike price.
    pub strike: f64,
    /// Call or put.
    pub option_type: OptionType,
    /// Inclusive bucket start.
    pub bucket_start: DateTime<Utc>,
    /// Latest last-trade price.
    pub last: Option<f64>,
    /// Latest bid.
    pub bid: Option<f64>,
    /// Latest ask.
    pub ask: Option<f64>,
    /// Latest reported cumulative volume.
    pub volume: f64,
    /// Latest reported open interest.
    pub open_interest: f64,
    /// Broker-reported IV from the most recent tick, if in-range.
    pub broker_iv: Option<f64>,
}

impl From<OptionTick> for OptionAccumulator {
    /// Backfill replays a historical option snapshot through the same
    /// enrichment path as streaming; the snapshot's own timestamp is
    /// already its bucket start.
    fn from(tick: OptionTick) -> Self {
        let bucket_start = tick.timestamp;
        Self::new(&tick, bucket_start)
    }
}

impl OptionAccumulator {
    fn new(tick: &OptionTick, bucket_start: DateTime<Utc>) -> Self {
        Self {
            contract_symbol: tick.contract_symbol.clone(),
            underlying: tick.underlying.clone(),
            expiration: tick.expiration,
            strike: tick.strike,
            option_type: tick.option_type,
            bucket_start,
            last: tick.last,
            bid: tick.bid,
            ask: tick.ask,
            volume: tick.volume,
            open_interest: tick.open_interest,
            broker_iv: tick.broker_iv,
        }
    }

    fn apply(&mut self, tick: &OptionTick) {
        self.last = tick.last;
        self.bid = tick.bid;
        self.ask = tick.ask;
        self.volume = tick.volume;
        self.open_interest = tick.open_interest;
        self.broker_iv = tick.broker_iv;
    }

    fn is_complete(&self, now: DateTime<Utc>, bucket_seconds: i64) -> bool {
        now >= self.bucket_start + chrono::Duration::seconds(bucket_seconds)
    }
}

type UnderlyingKey = (String, DateTime<Utc>);
type OptionKey = (String, DateTime<Utc>);

/// Bucket buffer owned exclusively by one ingestion task.
pub struct Aggregator {
    bucket_seconds: i64,
    max_buffer_size: usize,
    underlying: FxHashMap<UnderlyingKey, UnderlyingAccumulator>,
    options: FxHashMap<OptionKey, OptionAccumulator>,
}

impl Aggregator {
    /// Build an aggregator with the given bucket width and back-pressure
    /// threshold (`AGGREGATION_BUCKET_SECONDS`, `MAX_BUFFER_SIZE`).
    pub fn new(bucket_seconds: i64, max_buffer_size: usize) -> Self {
        Self {
            bucket_seconds,
            max_buffer_size,
            underlying: FxHashMap::default(),
            options: FxHashMap::default(),
        }
    }

    /// Total number of live (not yet emitted) accumulators across both maps.
    pub fn live_count(&self) -> usize {
        self.underlying.len() + self.options.len()
    }

    /// Fold one underlying tick into its bucket.
    pub fn ingest_underlying(&mut self, tick: UnderlyingTick) {
        let bucket_start = floor_to_bucket(tick.timestamp, self.bucket_seconds);
        let key = (tick.symbol.clone(), bucket_start);
        self.underlying
            .entry(key)
            .and_modify(|acc| acc.apply(&tick))
            .or_insert_with(|| UnderlyingAccumulator::new(&tick, bucket_start));
    }

    /// Fold one option tick into its bucket.
    pub fn ingest_option(&mut self, tick: OptionTick) {
        let bucket_start = floor_to_bucket(tick.timestamp, self.bucket_seconds);
        let key = (tick.contract_symbol.clone(), bucket_start);
        self.options
            .entry(key)
            .and_modify(|acc| acc.apply(&tick))
            .or_insert_with(|| OptionAccumulator::new(&tick, bucket_start));
    }

    /// Emit and remove every accumulator whose bucket has ended as of `now`.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> (Vec<UnderlyingAccumulator>, Vec<OptionAccumulator>) {
        let bucket_seconds = self.bucket_seconds;
        let underlying_done: Vec<UnderlyingKey> = self
            .underlying
            .iter()
            .filter(|(_, acc)| acc.is_complete(now, bucket_seconds))
            .map(|(k, _)| k.clone())
            .collect();
        let option_done: Vec<OptionKey> = self
            .options
            .iter()
            .filter(|(_, acc)| acc.is_complete(now, bucket_seconds))
            .map(|(k, _)| k.clone())
            .collect();

        let underlying_out = underlying_done
            .into_iter()
            .filter_map(|k| self.underlying.remove(&k))
            .collect();
        let option_out = option_done
            .into_iter()
            .filter_map(|k| self.options.remove(&k))
            .collect();

        (underlying_out, option_out)
    }

    /// When the live count exceeds `max_buffer_size`, flush the oldest
    /// complete accumulators immediately regardless of sweep cadence.
    /// Returns whatever was flushed (possibly empty).
    pub fn enforce_back_pressure(
        &mut self,
        now: DateTime<Utc>,
    ) -> (Vec<UnderlyingAccumulator>, Vec<OptionAccumulator>) {
        if self.live_count() <= self.max_buffer_size {
            return (Vec::new(), Vec::new());
        }

        warn!(
            live = self.live_count(),
            max = self.max_buffer_size,
            "aggregator back-pressure triggered, flushing oldest complete buckets"
        );

        let (mut underlying_out, mut option_out) = self.sweep(now);

        // Still over budget and nothing was complete: force-flush the
        // oldest accumulators outright, complete or not, same as a shutdown
        // flush would, to bound memory.
        while self.live_count() > self.max_buffer_size {
            let oldest_underlying = self
                .underlying
                .iter()
                .min_by_key(|(_, acc)| acc.bucket_start)
                .map(|(k, _)| k.clone());
            let oldest_option = self
                .options
                .iter()
                .min_by_key(|(_, acc)| acc.bucket_start)
                .map(|(k, _)| k.clone());

            match (oldest_underlying, oldest_option) {
                (Some(uk), Some(ok)) => {
                    let u_older = self.underlying[&uk].bucket_start <= self.options[&ok].bucket_start;
                    if u_older {
                        if let Some(acc) = self.underlying.remove(&uk) {
                            underlying_out.push(acc);
                        }
                    } else if let Some(acc) = self.options.remove(&ok) {
                        option_out.push(acc);
                    }
                }
                (Some(uk), None) => {
                    if let Some(acc) = self.underlying.remove(&uk) {
                        underlying_out.push(acc);
                    }
                }
                (None, Some(ok)) => {
                    if let Some(acc) = self.options.remove(&ok) {
                        option_out.push(acc);
                    }
                }
                (None, None) => break,
            }
        }

        (underlying_out, option_out)
    }

    /// Flush and drop every accumulator for a contract symbol that the
    /// strike universe no longer tracks.
    pub fn evict_contract(&mut self, contract_symbol: &str) -> Vec<OptionAccumulator> {
        let keys: Vec<OptionKey> = self
            .options
            .keys()
            .filter(|(sym, _)| sym == contract_symbol)
            .cloned()
            .collect();
        keys.into_iter()
            .filter_map(|k| self.options.remove(&k))
            .collect()
    }

    /// Flush every live accumulator unconditionally, used during shutdown
    /// to emit partial buckets as final.
    pub fn flush_all(&mut self) -> (Vec<UnderlyingAccumulator>, Vec<OptionAccumulator>) {
        (
            self.underlying.drain().map(|(_, v)| v).collect(),
            self.options.drain().map(|(_, v)| v).collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn tick(price: f64, timestamp: DateTime<Utc>, up: f64, down: f64) -> UnderlyingTick {
        UnderlyingTick {
            symbol: "SPY".into(),
            timestamp,
            price,
            up_volume: up,
            down_volume: down,
        }
    }

    #[test]
    fn boundary_timestamp_lands_in_starting_bucket() {
        let mut agg = Aggregator::new(60, 1000);
        let boundary = ts("2024-03-21T14:31:00Z");
        agg.ingest_underlying(tick(450.0, boundary, 100.0, 50.0));

        // The accumulator should be considered complete only once `now`
        // reaches the *next* boundary, not this one.
        let (done, _) = agg.sweep(boundary);
        assert!(done.is_empty(), "boundary tick must not complete its own bucket");

        let (done, _) = agg.sweep(Utc.timestamp_opt(boundary.timestamp() + 60, 0).unwrap());
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].bucket_start, boundary);
    }

    #[test]
    fn ohlc_update_rules() {
        let mut agg = Aggregator::new(60, 1000);
        let t0 = ts("2024-03-21T14:30:05Z");
        agg.ingest_underlying(tick(450.0, t0, 100.0, 50.0));
        agg.ingest_underlying(tick(452.0, t0 + chrono::Duration::seconds(5), 150.0, 60.0));
        agg.ingest_underlying(tick(448.0, t0 + chrono::Duration::seconds(10), 200.0, 70.0));
        agg.ingest_underlying(tick(451.0, t0 + chrono::Duration::seconds(15), 250.0, 80.0));

        let (done, _) = agg.sweep(t0 + chrono::Duration::seconds(60));
        let bar = &done[0];
        assert_eq!(bar.open, 450.0);
        assert_eq!(bar.high, 452.0);
        assert_eq!(bar.low, 448.0);
        assert_eq!(bar.close, 451.0);
        // Monotone counters overwrite, not sum.
        assert_eq!(bar.up_volume, 250.0);
        assert_eq!(bar.down_volume, 80.0);
    }

    #[test]
    fn back_pressure_with_max_buffer_one_drops_no_data() {
        let mut agg = Aggregator::new(60, 1);
        let t0 = ts("2024-03-21T14:30:00Z");
        agg.ingest_underlying(tick(450.0, t0, 1.0, 1.0));
        let t1 = t0 + chrono::Duration::seconds(60);
        agg.ingest_underlying(tick(451.0, t1, 2.0, 2.0));

        assert_eq!(agg.live_count(), 2);
        let (flushed, _) = agg.enforce_back_pressure(t1);
        assert_eq!(flushed.len(), 1);
        assert_eq!(agg.live_count(), 1);

        let t2 = t1 + chrono::Duration::seconds(60);
        let (flushed2, _) = agg.enforce_back_pressure(t2);
        assert_eq!(flushed2.len(), 1);
        assert_eq!(agg.live_count(), 0);

        let total_flushed = flushed.len() + flushed2.len();
        assert_eq!(total_flushed, 2, "no data lost across both flushes");
    }

    #[test]
    fn evict_contract_removes_all_buckets_for_symbol() {
        use chrono::NaiveDate;
        use common::OptionType;

        let mut agg = Aggregator::new(60, 1000);
        let option_tick = OptionTick {
            contract_symbol: "SPY260321C440".into(),
            underlying: "SPY".into(),
            expiration: NaiveDate::from_ymd_opt(2026, 3, 21).unwrap(),
            strike: 440.0,
            option_type: OptionType::Call,
            timestamp: ts("2024-03-21T14:30:00Z"),
            last: Some(1.0),
            bid: Some(0.9),
            ask: Some(1.1),
            volume: 10.0,
            open_interest: 100.0,
            broker_iv: None,
        };
        agg.ingest_option(option_tick);
        assert_eq!(agg.live_count(), 1);
        let evicted = agg.evict_contract("SPY260321C440");
        assert_eq!(evicted.len(), 1);
        assert_eq!(agg.live_count(), 0);
    }
}
