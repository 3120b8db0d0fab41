//! Closed-form Black-Scholes pricing primitives shared by the Greeks
//! evaluator and the implied-volatility solver.

use common::OptionType;

const SQRT_2PI: f64 = 2.506_628_274_631_000_7;

/// Standard normal cumulative distribution function.
pub fn norm_cdf(x: f64) -> f64 {
    0.5 * (1.0 + libm::erf(x / std::f64::consts::SQRT_2))
}

/// Standard normal probability density function.
pub fn norm_pdf(x: f64) -> f64 {
    (-0.5 * x * x).exp() / SQRT_2PI
}

/// `d1` term of the Black-Scholes formula.
pub fn d1(spot: f64, strike: f64, rate: f64, vol: f64, t: f64) -> f64 {
    ((spot / strike).ln() + (rate + 0.5 * vol * vol) * t) / (vol * t.sqrt())
}

/// `d2` term of the Black-Scholes formula.
pub fn d2(spot: f64, strike: f64, rate: f64, vol: f64, t: f64) -> f64 {
    d1(spot, strike, rate, vol, t) - vol * t.sqrt()
}

/// Black-Scholes theoretical price, no dividend term (carry folded into `rate`).
pub fn price(option_type: OptionType, spot: f64, strike: f64, rate: f64, vol: f64, t: f64) -> f64 {
    let d1v = d1(spot, strike, rate, vol, t);
    let d2v = d2(spot, strike, rate, vol, t);
    match option_type {
        OptionType::Call => spot * norm_cdf(d1v) - strike * (-rate * t).exp() * norm_cdf(d2v),
        OptionType::Put => strike * (-rate * t).exp() * norm_cdf(-d2v) - spot * norm_cdf(-d1v),
    }
}

/// Per-unit vega (`∂V/∂σ`), shared between the solver (Newton step) and the
/// Greeks evaluator (which rescales to per-vol-point).
pub fn vega_per_unit(spot: f64, strike: f64, rate: f64, vol: f64, t: f64) -> f64 {
    let d1v = d1(spot, strike, rate, vol, t);
    spot * norm_pdf(d1v) * t.sqrt()
}

/// Intrinsic value at expiry-equivalent terms, used to reject impossible
/// quoted prices before iterating.
pub fn intrinsic(option_type: OptionType, spot: f64, strike: f64) -> f64 {
    match option_type {
        OptionType::Call => (spot - strike).max(0.0),
        OptionType::Put => (strike - spot).max(0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn norm_cdf_at_zero_is_half() {
        assert!((norm_cdf(0.0) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn textbook_atm_call_price() {
        // S=100, K=100, r=0.05, sigma=0.2, T=0.25 -> classic textbook value.
        let p = price(OptionType::Call, 100.0, 100.0, 0.05, 0.2, 0.25);
        assert!((p - 4.615).abs() < 1e-2, "got {p}");
    }

    #[test]
    fn intrinsic_call_and_put() {
        assert_eq!(intrinsic(OptionType::Call, 110.0, 100.0), 10.0);
        assert_eq!(intrinsic(OptionType::Call, 90.0, 100.0), 0.0);
        assert_eq!(intrinsic(OptionType::Put, 90.0, 100.0), 10.0);
        assert_eq!(intrinsic(OptionType::Put, 110.0, 100.0), 0.0);
    }
}
