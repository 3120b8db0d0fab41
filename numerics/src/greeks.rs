//! Closed-form Black-Scholes Greeks: delta, gamma, theta, vega, vanna, charm.

use common::{NumericsError, OptionType};
use serde::{Deserialize, Serialize};

use crate::black_scholes::{d1, d2, norm_cdf, norm_pdf};

/// First- and second-order sensitivities of option price to its inputs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Greeks {
    /// `∂V/∂S`.
    pub delta: f64,
    /// `∂²V/∂S²`.
    pub gamma: f64,
    /// `∂V/∂T`, expressed per calendar day.
    pub theta: f64,
    /// `∂V/∂σ`, expressed per one volatility point (1.0 = 100%).
    pub vega: f64,
    /// `∂²V/∂S∂σ`.
    pub vanna: f64,
    /// `∂²V/∂S∂T`, expressed per calendar day.
    pub charm: f64,
}

/// Evaluates Black-Scholes Greeks for a contract given its volatility.
#[derive(Debug, Clone, Copy, Default)]
pub struct GreeksEvaluator {
    /// Risk-free rate used when the caller doesn't override it per call.
    pub default_rate: f64,
}

impl GreeksEvaluator {
    /// Build an evaluator with the given default risk-free rate.
    pub fn new(default_rate: f64) -> Self {
        Self { default_rate }
    }

    /// Compute all Greeks. Returns `NotEvaluable` when `t <= 0`, `vol <= 0`,
    /// `spot <= 0`, or `strike <= 0`.
    pub fn evaluate(
        &self,
        option_type: OptionType,
        spot: f64,
        strike: f64,
        rate: f64,
        vol: f64,
        t: f64,
    ) -> Result<Greeks, NumericsError> {
        if t <= 0.0 || vol <= 0.0 || spot <= 0.0 || strike <= 0.0 {
            return Err(NumericsError::NotEvaluable);
        }

        let d1v = d1(spot, strike, rate, vol, t);
        let d2v = d2(spot, strike, rate, vol, t);
        let sqrt_t = t.sqrt();
        let disc = (-rate * t).exp();
        let pdf_d1 = norm_pdf(d1v);

        let delta = match option_type {
            OptionType::Call => norm_cdf(d1v),
            OptionType::Put => norm_cdf(d1v) - 1.0,
        };

        let gamma = pdf_d1 / (spot * vol * sqrt_t);

        let theta_per_year = match option_type {
            OptionType::Call => {
                -(spot * pdf_d1 * vol) / (2.0 * sqrt_t) - rate * strike * disc * norm_cdf(d2v)
            }
            OptionType::Put => {
                -(spot * pdf_d1 * vol) / (2.0 * sqrt_t) + rate * strike * disc * norm_cdf(-d2v)
            }
        };
        let theta = theta_per_year / 365.0;

        let vega_per_unit = spot * pdf_d1 * sqrt_t;
        let vega = vega_per_unit / 100.0;

        let vanna = -pdf_d1 * d2v / vol;

        let charm_per_year = match option_type {
            OptionType::Call => {
                -pdf_d1 * (2.0 * rate * t - d2v * vol * sqrt_t) / (2.0 * t * vol * sqrt_t)
            }
            OptionType::Put => {
                -pdf_d1 * (2.0 * rate * t - d2v * vol * sqrt_t) / (2.0 * t * vol * sqrt_t)
            }
        };
        let charm = charm_per_year / 365.0;

        let out = Greeks {
            delta,
            gamma,
            theta,
            vega,
            vanna,
            charm,
        };

        if [out.delta, out.gamma, out.theta, out.vega, out.vanna, out.charm]
            .iter()
            .all(|v| v.is_finite())
        {
            Ok(out)
        } else {
            Err(NumericsError::NotEvaluable)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atm_call_matches_textbook_values() {
        let eval = GreeksEvaluator::new(0.05);
        let g = eval
            .evaluate(OptionType::Call, 100.0, 100.0, 0.05, 0.2, 0.25)
            .unwrap();
        assert!((g.delta - 0.5695).abs() < 2e-3, "delta={}", g.delta);
        assert!(g.gamma > 0.0);
        assert!((g.gamma - 0.0393).abs() < 2e-3, "gamma={}", g.gamma);
        assert!(g.theta < 0.0);
        assert!(g.vega > 0.0);
    }

    #[test]
    fn zero_or_negative_time_is_not_evaluable() {
        let eval = GreeksEvaluator::new(0.05);
        assert_eq!(
            eval.evaluate(OptionType::Call, 100.0, 100.0, 0.05, 0.2, 0.0),
            Err(NumericsError::NotEvaluable)
        );
        assert_eq!(
            eval.evaluate(OptionType::Call, 100.0, 100.0, 0.05, 0.2, -1.0),
            Err(NumericsError::NotEvaluable)
        );
    }

    #[test]
    fn put_delta_is_call_delta_minus_one() {
        let eval = GreeksEvaluator::new(0.05);
        let call = eval
            .evaluate(OptionType::Call, 100.0, 100.0, 0.05, 0.2, 0.25)
            .unwrap();
        let put = eval
            .evaluate(OptionType::Put, 100.0, 100.0, 0.05, 0.2, 0.25)
            .unwrap();
        assert!((put.delta - (call.delta - 1.0)).abs() < 1e-9);
    }
}
