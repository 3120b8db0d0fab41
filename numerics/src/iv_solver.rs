//! Newton-Raphson implied-volatility solver with a bisection fallback, plus
//! the deterministic fallback ladder used to decide which price to solve
//! from for a given contract snapshot.

use common::{NumericsError, OptionType};
use serde::{Deserialize, Serialize};

use crate::black_scholes::{intrinsic, price, vega_per_unit};

/// Tunables for the solver, sourced from configuration (`IV_MAX_ITERATIONS`,
/// `IV_TOLERANCE`, `IV_MIN`, `IV_MAX`).
#[derive(Debug, Clone, Copy)]
pub struct IvSolverConfig {
    /// Maximum Newton/bisection iterations.
    pub max_iterations: u32,
    /// Convergence tolerance on price difference.
    pub tolerance: f64,
    /// Lower clamp bound for any iterate.
    pub iv_min: f64,
    /// Upper clamp bound for any iterate.
    pub iv_max: f64,
}

impl Default for IvSolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 1e-5,
            iv_min: 0.01,
            iv_max: 5.0,
        }
    }
}

/// Seed volatility for the Newton iteration.
const INITIAL_GUESS: f64 = 0.3;

/// Vega degeneracy threshold below which we switch to bisection.
const VEGA_FLOOR: f64 = 1e-8;

/// Solves implied volatility from an observed option price.
#[derive(Debug, Clone, Copy)]
pub struct IvSolver {
    /// Solver tuning.
    pub config: IvSolverConfig,
}

impl Default for IvSolver {
    fn default() -> Self {
        Self {
            config: IvSolverConfig::default(),
        }
    }
}

impl IvSolver {
    /// Build a solver with the given configuration.
    pub fn new(config: IvSolverConfig) -> Self {
        Self { config }
    }

    /// Solve for implied volatility given an observed price and contract
    /// terms. `t` is time-to-expiry in years (365-day count).
    pub fn solve(
        &self,
        observed_price: f64,
        option_type: OptionType,
        spot: f64,
        strike: f64,
        rate: f64,
        t: f64,
    ) -> Result<f64, NumericsError> {
        if t <= 0.0 || spot <= 0.0 || strike <= 0.0 {
            return Err(NumericsError::NoSolution);
        }

        let intrinsic_value = intrinsic(option_type, spot, strike);
        if observed_price < intrinsic_value - 1e-9 {
            return Err(NumericsError::NoSolution);
        }

        let IvSolverConfig {
            max_iterations,
            tolerance,
            iv_min,
            iv_max,
        } = self.config;

        let mut vol = INITIAL_GUESS.clamp(iv_min, iv_max);
        let mut bisecting = false;
        let mut lo = iv_min;
        let mut hi = iv_max;

        for _ in 0..max_iterations {
            let model_price = price(option_type, spot, strike, rate, vol, t);
            let diff = model_price - observed_price;

            if diff.abs() < tolerance {
                return Ok(vol);
            }

            if !bisecting {
                let vega = vega_per_unit(spot, strike, rate, vol, t);
                if vega.abs() < VEGA_FLOOR {
                    bisecting = true;
                } else {
                    vol = (vol - diff / vega).clamp(iv_min, iv_max);
                    continue;
                }
            }

            // Bisection: maintain [lo, hi] bracketing the root of price(vol) - observed_price.
            if diff > 0.0 {
                hi = vol;
            } else {
                lo = vol;
            }
            vol = 0.5 * (lo + hi);
        }

        let final_price = price(option_type, spot, strike, rate, vol, t);
        if (final_price - observed_price).abs() < tolerance {
            Ok(vol)
        } else {
            Err(NumericsError::NoSolution)
        }
    }
}

/// Which step of the fallback ladder produced a contract's implied
/// volatility. Recorded alongside the row so the ladder choice is testable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IvSource {
    /// Broker-reported IV, in-range.
    BrokerProvided,
    /// Solved from the bid/ask mid-price.
    SolvedFromMid,
    /// Solved from the last trade price.
    SolvedFromLast,
    /// No usable price; the configured default was used.
    Default,
}

/// Inputs available for a single contract at enrichment time.
#[derive(Debug, Clone, Copy)]
pub struct IvLadderInput {
    /// Broker-reported IV, if any.
    pub broker_iv: Option<f64>,
    /// Bid price, if any.
    pub bid: Option<f64>,
    /// Ask price, if any.
    pub ask: Option<f64>,
    /// Last trade price, if any.
    pub last: Option<f64>,
}

const BROKER_IV_MIN: f64 = 0.01;
const BROKER_IV_MAX: f64 = 5.0;

/// Resolve a contract's implied volatility following the fallback ladder:
/// broker IV, then mid-price solve, then last-price solve, then a
/// configured default. Returns the resolved IV and which step produced it.
pub fn resolve_iv(
    solver: &IvSolver,
    input: IvLadderInput,
    option_type: OptionType,
    spot: f64,
    strike: f64,
    rate: f64,
    t: f64,
    default_iv: f64,
) -> (f64, IvSource) {
    if let Some(iv) = input.broker_iv {
        if (BROKER_IV_MIN..=BROKER_IV_MAX).contains(&iv) {
            return (iv, IvSource::BrokerProvided);
        }
    }

    if let (Some(bid), Some(ask)) = (input.bid, input.ask) {
        if bid > 0.0 && ask > 0.0 {
            let mid = 0.5 * (bid + ask);
            if let Ok(iv) = solver.solve(mid, option_type, spot, strike, rate, t) {
                return (iv, IvSource::SolvedFromMid);
            }
        }
    }

    if let Some(last) = input.last {
        if last > 0.0 {
            if let Ok(iv) = solver.solve(last, option_type, spot, strike, rate, t) {
                return (iv, IvSource::SolvedFromLast);
            }
        }
    }

    (default_iv, IvSource::Default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn intrinsic_violation_returns_no_solution_without_iterating() {
        let solver = IvSolver::default();
        // Call price below intrinsic (S - K) = 10 for S=110, K=100.
        let result = solver.solve(5.0, OptionType::Call, 110.0, 100.0, 0.05, 0.25);
        assert_eq!(result, Err(NumericsError::NoSolution));
    }

    #[test]
    fn round_trips_through_black_scholes() {
        let solver = IvSolver::default();
        let sigma = 0.22;
        let p = price(OptionType::Call, 100.0, 100.0, 0.05, sigma, 0.25);
        let solved = solver
            .solve(p, OptionType::Call, 100.0, 100.0, 0.05, 0.25)
            .unwrap();
        assert!((solved - sigma).abs() < solver.config.tolerance * 10.0);
    }

    proptest! {
        #[test]
        fn round_trip_property(sigma in 0.05f64..2.0, spot in 50.0f64..500.0) {
            let solver = IvSolver::default();
            let strike = spot; // keep ATM to avoid pathological deep ITM/OTM vega
            let t = 0.25;
            let rate = 0.03;
            let p = price(OptionType::Call, spot, strike, rate, sigma, t);
            if let Ok(solved) = solver.solve(p, OptionType::Call, spot, strike, rate, t) {
                prop_assert!((solved - sigma).abs() < solver.config.tolerance * 10.0 + 1e-3);
            }
        }
    }

    #[test]
    fn ladder_prefers_broker_iv_when_in_range() {
        let solver = IvSolver::default();
        let input = IvLadderInput {
            broker_iv: Some(0.25),
            bid: Some(11.9),
            ask: Some(12.1),
            last: Some(12.0),
        };
        let (iv, source) = resolve_iv(
            &solver,
            input,
            OptionType::Call,
            450.0,
            450.0,
            0.05,
            90.0 / 365.0,
            0.3,
        );
        assert_eq!(iv, 0.25);
        assert_eq!(source, IvSource::BrokerProvided);
    }

    #[test]
    fn ladder_falls_through_to_mid_when_broker_iv_out_of_range() {
        let solver = IvSolver::default();
        let input = IvLadderInput {
            broker_iv: Some(9.9),
            bid: Some(11.9),
            ask: Some(12.1),
            last: Some(12.0),
        };
        let (_, source) = resolve_iv(
            &solver,
            input,
            OptionType::Call,
            450.0,
            450.0,
            0.05,
            90.0 / 365.0,
            0.3,
        );
        assert_eq!(source, IvSource::SolvedFromMid);
    }

    #[test]
    fn ladder_falls_through_to_last_when_no_bid_ask() {
        let solver = IvSolver::default();
        let input = IvLadderInput {
            broker_iv: None,
            bid: Some(0.0),
            ask: Some(0.0),
            last: Some(12.0),
        };
        let (_, source) = resolve_iv(
            &solver,
            input,
            OptionType::Call,
            450.0,
            450.0,
            0.05,
            90.0 / 365.0,
            0.3,
        );
        assert_eq!(source, IvSource::SolvedFromLast);
    }

    #[test]
    fn ladder_defaults_when_all_prices_absent() {
        let solver = IvSolver::default();
        let input = IvLadderInput {
            broker_iv: None,
            bid: Some(0.0),
            ask: Some(0.0),
            last: Some(0.0),
        };
        let (iv, source) = resolve_iv(
            &solver,
            input,
            OptionType::Call,
            450.0,
            450.0,
            0.05,
            90.0 / 365.0,
            0.3,
        );
        assert_eq!(iv, 0.3);
        assert_eq!(source, IvSource::Default);
    }
}
