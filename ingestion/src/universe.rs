//! Maintains the active set of `(expiration, strike, type)` contracts to
//! poll for a given underlying, recomputed on trigger rather than per tick.

use chrono::NaiveDate;
use common::{ContractId, OptionType, Symbol};
use rustc_hash::{FxHashMap, FxHashSet};

/// Tunables for universe selection and recompute triggers.
#[derive(Debug, Clone, Copy)]
pub struct UniverseConfig {
    /// Number of nearest expirations to include (`EXPIRATIONS`, default 3-5).
    pub n_expirations: usize,
    /// Dollar distance from spot for strike membership (`STRIKE_DISTANCE`).
    pub strike_distance: f64,
    /// Polling iterations between unconditional recomputes
    /// (`STRIKE_RECALC_INTERVAL`, default 10).
    pub recalc_interval: u32,
    /// Spot move in dollars that forces a recompute
    /// (`PRICE_MOVE_THRESHOLD`, default 1.0).
    pub price_move_threshold: f64,
}

impl Default for UniverseConfig {
    fn default() -> Self {
        Self {
            n_expirations: 4,
            strike_distance: 10.0,
            recalc_interval: 10,
            price_move_threshold: 1.0,
        }
    }
}

/// The working set of contracts currently being polled for one underlying.
#[derive(Debug)]
pub struct StrikeUniverse {
    config: UniverseConfig,
    contracts: FxHashSet<ContractId>,
    iterations_since_recompute: u32,
    last_recompute_spot: Option<f64>,
}

impl StrikeUniverse {
    /// Build an empty universe; the first `should_recompute` call always
    /// returns `true` until `recompute` has run once.
    pub fn new(config: UniverseConfig) -> Self {
        Self {
            config,
            contracts: FxHashSet::default(),
            iterations_since_recompute: 0,
            last_recompute_spot: None,
        }
    }

    /// Currently selected contracts.
    pub fn contracts(&self) -> &FxHashSet<ContractId> {
        &self.contracts
    }

    /// Count one polling iteration against the recompute-interval trigger.
    pub fn tick(&mut self) {
        self.iterations_since_recompute += 1;
    }

    /// Whether any recompute trigger has fired: empty universe, the
    /// iteration count, a spot move past the threshold, or an expiration in
    /// the current set having rolled past `today`.
    pub fn should_recompute(&self, spot: f64, today: NaiveDate) -> bool {
        if self.contracts.is_empty() {
            return true;
        }
        if self.iterations_since_recompute >= self.config.recalc_interval {
            return true;
        }
        if let Some(last_spot) = self.last_recompute_spot {
            if (spot - last_spot).abs() > self.config.price_move_threshold {
                return true;
            }
        }
        self.contracts.iter().any(|c| c.expiration < today)
    }

    /// Replace the current set with contracts built from the given spot,
    /// the ascending expirations list (already broker-ordered), and the
    /// available strikes per expiration. Returns the contracts that were
    /// in the prior set but are not in the new one, so callers can flush
    /// and evict their accumulators.
    pub fn recompute(
        &mut self,
        underlying: &str,
        spot: f64,
        expirations: &[NaiveDate],
        strikes_by_expiration: &FxHashMap<NaiveDate, Vec<f64>>,
    ) -> Vec<ContractId> {
        let mut new_set = FxHashSet::default();

        for expiration in expirations.iter().take(self.config.n_expirations) {
            let Some(strikes) = strikes_by_expiration.get(expiration) else {
                continue;
            };
            for &strike in strikes {
                if (strike - spot).abs() <= self.config.strike_distance {
                    let strike_cents = (strike * 100.0).round() as i64;
                    for option_type in [OptionType::Call, OptionType::Put] {
                        new_set.insert(ContractId {
                            underlying: Symbol::new(underlying),
                            expiration: *expiration,
                            strike_cents,
                            option_type,
                        });
                    }
                }
            }
        }

        let evicted: Vec<ContractId> = self.contracts.difference(&new_set).cloned().collect();
        self.contracts = new_set;
        self.iterations_since_recompute = 0;
        self.last_recompute_spot = Some(spot);
        evicted
    }

    /// Configured number of expirations the universe targets.
    pub fn n_expirations(&self) -> usize {
        self.config.n_expirations
    }

    /// Group the current contract set's distinct strikes by expiration, for
    /// fetching option-chain quotes per expiration.
    pub fn strikes_by_expiration(&self) -> FxHashMap<NaiveDate, Vec<f64>> {
        let mut out: FxHashMap<NaiveDate, FxHashSet<i64>> = FxHashMap::default();
        for c in &self.contracts {
            out.entry(c.expiration).or_default().insert(c.strike_cents);
        }
        out.into_iter()
            .map(|(exp, cents)| {
                let mut strikes: Vec<f64> = cents.into_iter().map(|c| c as f64 / 100.0).collect();
                strikes.sort_by(|a, b| a.partial_cmp(b).unwrap());
                (exp, strikes)
            })
            .collect()
    }

    /// Drop contracts whose expiration has passed `today`. Distinct from
    /// `recompute`'s eviction: this is the periodic `STRIKE_CLEANUP_INTERVAL`
    /// sweep, not a universe rebuild.
    pub fn prune_expired(&mut self, today: NaiveDate) -> Vec<ContractId> {
        let (keep, drop): (FxHashSet<_>, FxHashSet<_>) = self
            .contracts
            .drain()
            .partition(|c| c.expiration >= today);
        self.contracts = keep;
        drop.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exp(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn empty_universe_always_recomputes() {
        let universe = StrikeUniverse::new(UniverseConfig::default());
        assert!(universe.should_recompute(450.0, exp(2026, 1, 1)));
    }

    #[test]
    fn recompute_selects_strikes_within_distance_both_types() {
        let mut universe = StrikeUniverse::new(UniverseConfig {
            n_expirations: 1,
            strike_distance: 5.0,
            ..Default::default()
        });
        let expirations = vec![exp(2026, 3, 21)];
        let mut strikes = FxHashMap::default();
        strikes.insert(exp(2026, 3, 21), vec![440.0, 445.0, 450.0, 455.0, 460.0]);

        universe.recompute("SPY", 450.0, &expirations, &strikes);
        let contracts = universe.contracts();
        // 445, 450, 455 are within $5 of spot=450; each produces a call+put.
        assert_eq!(contracts.len(), 6);
        assert!(contracts
            .iter()
            .all(|c| (440..=460).contains(&(c.strike_cents / 100))));
        assert!(!contracts.iter().any(|c| c.strike_cents == 44_000));
    }

    #[test]
    fn price_move_past_threshold_triggers_recompute() {
        let mut universe = StrikeUniverse::new(UniverseConfig {
            n_expirations: 1,
            strike_distance: 5.0,
            price_move_threshold: 1.0,
            recalc_interval: 1000,
        });
        let expirations = vec![exp(2026, 3, 21)];
        let mut strikes = FxHashMap::default();
        strikes.insert(exp(2026, 3, 21), vec![450.0]);
        universe.recompute("SPY", 450.0, &expirations, &strikes);

        assert!(!universe.should_recompute(450.5, exp(2026, 1, 1)));
        assert!(universe.should_recompute(451.2, exp(2026, 1, 1)));
    }

    #[test]
    fn recompute_evicts_contracts_no_longer_selected() {
        let mut universe = StrikeUniverse::new(UniverseConfig {
            n_expirations: 1,
            strike_distance: 2.0,
            ..Default::default()
        });
        let expirations = vec![exp(2026, 3, 21)];
        let mut strikes = FxHashMap::default();
        strikes.insert(exp(2026, 3, 21), vec![440.0, 450.0]);
        universe.recompute("SPY", 450.0, &expirations, &strikes);
        assert!(universe
            .contracts()
            .iter()
            .any(|c| c.strike_cents == 44_000));

        let mut strikes2 = FxHashMap::default();
        strikes2.insert(exp(2026, 3, 21), vec![450.0]);
        let evicted = universe.recompute("SPY", 450.0, &expirations, &strikes2);
        assert!(evicted.iter().any(|c| c.strike_cents == 44_000));
        assert!(!universe
            .contracts()
            .iter()
            .any(|c| c.strike_cents == 44_000));
    }

    #[test]
    fn prune_expired_removes_past_expirations() {
        let mut universe = StrikeUniverse::new(UniverseConfig::default());
        let expirations = vec![exp(2026, 1, 10)];
        let mut strikes = FxHashMap::default();
        strikes.insert(exp(2026, 1, 10), vec![450.0]);
        universe.recompute("SPY", 450.0, &expirations, &strikes);

        let dropped = universe.prune_expired(exp(2026, 1, 11));
        assert_eq!(dropped.len(), 2);
        assert!(universe.contracts().is_empty());
    }
}
