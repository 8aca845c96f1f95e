//! Crate-wide error type and result alias.

use std::io;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, FleetError>;

/// Top-level error for every fallible fleetstream operation.
#[derive(Debug, Error)]
pub enum FleetError {
    /// I/O failure while binding listeners or touching the filesystem.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// SQLite failure from the telemetry store.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    /// Broker client failure (connect, subscribe, publish path).
    #[error("broker error: {0}")]
    Broker(String),
    /// Configuration could not be loaded or failed validation.
    #[error("configuration error: {0}")]
    Config(String),
    /// A caller-supplied argument was rejected.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Anything that should never escape to a caller in raw form.
    #[error("internal error: {0}")]
    Internal(String),
}

impl FleetError {
    /// True when the error maps to the invalid-argument kind on the query
    /// surfaces rather than an internal failure.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, FleetError::InvalidArgument(_))
    }
}
