//! Independent, read-only derivation of gamma-exposure, gamma-flip,
//! max-pain, and put/call-ratio analytics from the store's latest
//! per-contract snapshot.

pub mod engine;
pub mod gex;

pub use engine::{AnalyticsConfig, AnalyticsEngine};
pub use gex::{
    aggregate_by_strike, filter_snapshot, gamma_flip_point, max_gamma_strike, max_pain,
    put_call_ratio, ContractSnapshot, StrikeAggregate, CONTRACT_MULTIPLIER,
};
