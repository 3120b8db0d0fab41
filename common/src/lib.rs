//! Shared value types and error taxonomy for the options ingestion and
//! analytics platform.

pub mod errors;
pub mod types;

pub use errors::{AuthError, BrokerError, NumericsError, StoreError, ValidationError};
pub use types::*;
