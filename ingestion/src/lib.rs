//! Per-underlying ingestion pipeline: poll the broker, validate payloads,
//! aggregate into one-minute buckets, enrich with IV/Greeks, and persist.

pub mod aggregator;
pub mod backfill;
pub mod config;
pub mod engine;
pub mod stream_manager;
pub mod universe;
pub mod validator;

pub use aggregator::Aggregator;
pub use backfill::{BackfillManager, BackfillRequest, BackfillResult};
pub use config::{IngestionConfig, SessionIntervals};
pub use engine::{EngineState, IngestionEngine};
pub use stream_manager::{polling_interval, PollOutcome, StreamManager};
pub use universe::{StrikeUniverse, UniverseConfig};
pub use validator::{
    validate_bar, validate_option_quote, validate_quote, OptionTick, UnderlyingTick, ValidatedBar,
};
