//! Typed REST client over the broker's market-data API, with bounded
//! retry/backoff and forced-refresh-on-401 semantics.

pub mod client;
pub mod retry;
pub mod types;

pub use client::BrokerClient;
pub use retry::RetryConfig;
pub use types::{BarUnit, RawBar, RawClock, RawOptionQuote, RawQuote, RawSymbolSearchResult};
