//! Pure gamma-exposure, gamma-flip, max-pain, and put/call-ratio math over a
//! per-contract snapshot. Kept free of I/O so it can be tested without a
//! store, mirroring the numerics crate's pure-function black-box style.

use chrono::NaiveDate;
use common::OptionType;
use rustc_hash::FxHashMap;
use store::OptionQuoteRow;

/// Contracts-per-underlying multiplier applied to signed gamma/vanna/charm
/// exposure (standard US equity option convention: 100 shares per contract).
pub const CONTRACT_MULTIPLIER: f64 = 100.0;

/// One contract's fields needed by the aggregation, after the non-null
/// gamma / positive open-interest filter has already been applied.
#[derive(Debug, Clone, Copy)]
pub struct ContractSnapshot {
    pub strike: f64,
    pub expiration: NaiveDate,
    pub option_type: OptionType,
    pub volume: f64,
    pub open_interest: f64,
    pub gamma: f64,
    pub vanna: f64,
    pub charm: f64,
}

/// Filter a raw per-contract snapshot down to rows usable by the GEX math:
/// non-null `gamma`, `open_interest > 0`, and a recognized option type.
pub fn filter_snapshot(rows: &[OptionQuoteRow]) -> Vec<ContractSnapshot> {
    rows.iter()
        .filter_map(|r| {
            let gamma = r.gamma?;
            if r.open_interest <= 0.0 {
                return None;
            }
            let option_type = match r.option_type.as_str() {
                "call" => OptionType::Call,
                "put" => OptionType::Put,
                _ => return None,
            };
            Some(ContractSnapshot {
                strike: r.strike,
                expiration: r.expiration,
                option_type,
                volume: r.volume,
                open_interest: r.open_interest,
                gamma,
                vanna: r.vanna.unwrap_or(0.0),
                charm: r.charm.unwrap_or(0.0),
            })
        })
        .collect()
}

/// Per-`(strike, expiration)` aggregate, one row per group.
#[derive(Debug, Clone, PartialEq)]
pub struct StrikeAggregate {
    pub strike: f64,
    pub expiration: NaiveDate,
    pub call_gamma: f64,
    pub put_gamma: f64,
    pub net_gex: f64,
    pub call_volume: f64,
    pub put_volume: f64,
    pub call_oi: f64,
    pub put_oi: f64,
    pub vanna_exposure: f64,
    pub charm_exposure: f64,
}

#[derive(Default)]
struct Accumulated {
    call_gamma: f64,
    put_gamma: f64,
    call_volume: f64,
    put_volume: f64,
    call_oi: f64,
    put_oi: f64,
    call_vanna: f64,
    put_vanna: f64,
    call_charm: f64,
    put_charm: f64,
}

/// Group the filtered snapshot by `(strike, expiration)` and compute
/// `call_gamma`, `put_gamma`, `net_gex`, volumes, OI, and the vanna/charm
/// exposures using the same signed weighting as `net_gex`.
pub fn aggregate_by_strike(contracts: &[ContractSnapshot]) -> Vec<StrikeAggregate> {
    let mut groups: FxHashMap<(i64, NaiveDate), Accumulated> = FxHashMap::default();

    for c in contracts {
        let key = ((c.strike * 100.0).round() as i64, c.expiration);
        let acc = groups.entry(key).or_default();
        let weighted_oi = c.open_interest;
        match c.option_type {
            OptionType::Call => {
                acc.call_gamma += c.gamma * weighted_oi;
                acc.call_volume += c.volume;
                acc.call_oi += c.open_interest;
                acc.call_vanna += c.vanna * weighted_oi;
                acc.call_charm += c.charm * weighted_oi;
            }
            OptionType::Put => {
                acc.put_gamma += c.gamma * weighted_oi;
                acc.put_volume += c.volume;
                acc.put_oi += c.open_interest;
                acc.put_vanna += c.vanna * weighted_oi;
                acc.put_charm += c.charm * weighted_oi;
            }
        }
    }

    let mut out: Vec<StrikeAggregate> = groups
        .into_iter()
        .map(|((strike_cents, expiration), acc)| StrikeAggregate {
            strike: strike_cents as f64 / 100.0,
            expiration,
            call_gamma: acc.call_gamma,
            put_gamma: acc.put_gamma,
            net_gex: (acc.call_gamma - acc.put_gamma) * CONTRACT_MULTIPLIER,
            call_volume: acc.call_volume,
            put_volume: acc.put_volume,
            call_oi: acc.call_oi,
            put_oi: acc.put_oi,
            vanna_exposure: (acc.call_vanna - acc.put_vanna) * CONTRACT_MULTIPLIER,
            charm_exposure: (acc.call_charm - acc.put_charm) * CONTRACT_MULTIPLIER,
        })
        .collect();

    out.sort_by(|a, b| {
        a.strike
            .partial_cmp(&b.strike)
            .unwrap()
            .then(a.expiration.cmp(&b.expiration))
    });
    out
}

/// Strike with the largest `|net_gex|`, collapsed across expirations at the
/// same strike. Ties broken by lowest strike via a strict `<` fold. Returns
/// `(strike, signed net_gex at that strike)` — callers wanting the magnitude
/// itself (per spec, `max_gamma_value`) must take `.abs()` of the second field.
pub fn max_gamma_strike(by_strike: &[StrikeAggregate]) -> Option<(f64, f64)> {
    let collapsed = collapse_net_gex_by_strike(by_strike);
    collapsed.into_iter().fold(None, |best, (strike, net)| {
        match best {
            None => Some((strike, net)),
            Some((best_strike, best_net)) => {
                if net.abs() > best_net.abs() || (net.abs() == best_net.abs() && strike < best_strike) {
                    Some((strike, net))
                } else {
                    Some((best_strike, best_net))
                }
            }
        }
    })
}

fn collapse_net_gex_by_strike(by_strike: &[StrikeAggregate]) -> Vec<(f64, f64)> {
    let mut totals: FxHashMap<i64, f64> = FxHashMap::default();
    for row in by_strike {
        *totals.entry((row.strike * 100.0).round() as i64).or_insert(0.0) += row.net_gex;
    }
    let mut out: Vec<(f64, f64)> = totals
        .into_iter()
        .map(|(cents, net)| (cents as f64 / 100.0, net))
        .collect();
    out.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
    out
}

/// Strike at which cumulative net GEX (strikes ascending) crosses zero,
/// linearly interpolated between the two straddling strikes. Falls back to
/// the strike whose cumulative net-gex has the smallest absolute value when
/// no sign change exists. Ties broken by the lowest strike.
pub fn gamma_flip_point(by_strike: &[StrikeAggregate]) -> Option<f64> {
    let collapsed = collapse_net_gex_by_strike(by_strike);
    if collapsed.is_empty() {
        return None;
    }

    let mut cumulative = Vec::with_capacity(collapsed.len());
    let mut running = 0.0;
    for (strike, net) in &collapsed {
        running += net;
        cumulative.push((*strike, running));
    }

    for window in cumulative.windows(2) {
        let (k0, c0) = window[0];
        let (k1, c1) = window[1];
        if c0 == 0.0 {
            return Some(k0);
        }
        if (c0 < 0.0) != (c1 < 0.0) {
            // Linear interpolation between the two straddling cumulative values.
            let t = -c0 / (c1 - c0);
            return Some(k0 + t * (k1 - k0));
        }
    }

    // No crossing: the strike whose cumulative net-gex has the smallest
    // absolute value, lowest strike breaking ties.
    cumulative
        .into_iter()
        .fold(None, |best: Option<(f64, f64)>, (strike, cum)| match best {
            None => Some((strike, cum)),
            Some((best_strike, best_cum)) => {
                if cum.abs() < best_cum.abs()
                    || (cum.abs() == best_cum.abs() && strike < best_strike)
                {
                    Some((strike, cum))
                } else {
                    Some((best_strike, best_cum))
                }
            }
        })
        .map(|(strike, _)| strike)
}

/// Strike minimizing aggregate option-holder payoff at expiry, over the
/// union of strikes present in the snapshot. Ties broken by lowest strike.
pub fn max_pain(contracts: &[ContractSnapshot]) -> Option<f64> {
    if contracts.is_empty() {
        return None;
    }

    let mut strikes: Vec<f64> = contracts.iter().map(|c| c.strike).collect();
    strikes.sort_by(|a, b| a.partial_cmp(b).unwrap());
    strikes.dedup_by(|a, b| (*a - *b).abs() < 1e-9);

    let payoff = |k: f64| -> f64 {
        contracts
            .iter()
            .map(|c| match c.option_type {
                OptionType::Call => (c.strike - k).max(0.0) * c.open_interest,
                OptionType::Put => (k - c.strike).max(0.0) * c.open_interest,
            })
            .sum()
    };

    strikes
        .into_iter()
        .map(|k| (k, payoff(k)))
        .fold(None, |best: Option<(f64, f64)>, (k, pain)| match best {
            None => Some((k, pain)),
            Some((best_k, best_pain)) => {
                if pain < best_pain {
                    Some((k, pain))
                } else {
                    Some((best_k, best_pain))
                }
            }
        })
        .map(|(k, _)| k)
}

/// `total_put_volume / total_call_volume`, `None` when the denominator is
/// zero (undefined ratio).
pub fn put_call_ratio(total_put_volume: f64, total_call_volume: f64) -> Option<f64> {
    if total_call_volume <= 0.0 {
        None
    } else {
        Some(total_put_volume / total_call_volume)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exp() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 21).unwrap()
    }

    fn contract(strike: f64, option_type: OptionType, gamma: f64, oi: f64, volume: f64) -> ContractSnapshot {
        ContractSnapshot {
            strike,
            expiration: exp(),
            option_type,
            volume,
            open_interest: oi,
            gamma,
            vanna: 0.0,
            charm: 0.0,
        }
    }

    #[test]
    fn net_gex_is_call_minus_put_scaled_by_multiplier() {
        let contracts = vec![
            contract(450.0, OptionType::Call, 0.05, 1000.0, 10.0),
            contract(450.0, OptionType::Put, 0.03, 800.0, 5.0),
        ];
        let by_strike = aggregate_by_strike(&contracts);
        assert_eq!(by_strike.len(), 1);
        let row = &by_strike[0];
        let expected = (0.05 * 1000.0 - 0.03 * 800.0) * CONTRACT_MULTIPLIER;
        assert!((row.net_gex - expected).abs() < 1e-6);
    }

    #[test]
    fn max_gamma_strike_picks_largest_absolute_net_gex() {
        let contracts = vec![
            contract(445.0, OptionType::Call, 0.02, 500.0, 1.0),
            contract(450.0, OptionType::Call, 0.08, 2000.0, 1.0),
            contract(455.0, OptionType::Put, 0.01, 100.0, 1.0),
        ];
        let by_strike = aggregate_by_strike(&contracts);
        let (strike, _) = max_gamma_strike(&by_strike).unwrap();
        assert_eq!(strike, 450.0);
    }

    #[test]
    fn gamma_flip_interpolates_between_straddling_strikes() {
        // Cumulative net gex: 445 -> +100, 450 -> -50 (crosses between them).
        let contracts = vec![
            contract(445.0, OptionType::Call, 1.0, 100.0, 1.0),
            contract(450.0, OptionType::Put, 1.5, 100.0, 1.0),
        ];
        let by_strike = aggregate_by_strike(&contracts);
        let flip = gamma_flip_point(&by_strike).unwrap();
        assert!(flip > 445.0 && flip < 450.0, "flip={flip}");
    }

    #[test]
    fn gamma_flip_falls_back_to_smallest_absolute_cumulative_when_no_crossing() {
        let contracts = vec![
            contract(445.0, OptionType::Call, 1.0, 100.0, 1.0),
            contract(450.0, OptionType::Call, 1.0, 100.0, 1.0),
        ];
        let by_strike = aggregate_by_strike(&contracts);
        let flip = gamma_flip_point(&by_strike).unwrap();
        // Both cumulative values are positive (no sign change); 445 has the
        // smaller cumulative value so it wins.
        assert_eq!(flip, 445.0);
    }

    #[test]
    fn max_pain_minimizes_payoff_with_lowest_strike_tiebreak() {
        let contracts = vec![
            contract(100.0, OptionType::Call, 0.01, 500.0, 1.0),
            contract(100.0, OptionType::Put, 0.01, 500.0, 1.0),
        ];
        // With a single strike and symmetric OI, pain is minimized at K=100
        // (payoff is zero there) regardless of the call/put split.
        let pinned = max_pain(&contracts).unwrap();
        assert_eq!(pinned, 100.0);
    }

    #[test]
    fn put_call_ratio_is_none_when_call_volume_is_zero() {
        assert_eq!(put_call_ratio(10.0, 0.0), None);
        assert_eq!(put_call_ratio(5.0, 10.0), Some(0.5));
    }
}
