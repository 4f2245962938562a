//! # Collector Error Types
//!
//! Errors raised by the ambient parts of the collector: configuration
//! loading, logging setup and harvest delivery. The producer-facing
//! `notice_error` path never returns any of these.

use thiserror::Error;

/// A type alias for Result with the error type defaulting to `CollectorError`
pub type Result<T, E = CollectorError> = std::result::Result<T, E>;

/// Errors produced by the collector's configuration, logging and harvest layers
#[derive(Error, Debug)]
pub enum CollectorError {
    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Logging or runtime initialization failure
    #[error("Initialization error: {0}")]
    Initialization(String),

    /// A sink failed to deliver a harvested batch
    #[error("Delivery failed for {count} error(s): {source}")]
    Delivery {
        count: usize,
        #[source]
        source: anyhow::Error,
    },

    /// Record (de)serialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CollectorError {
    /// Wraps any sink-side failure as a delivery error for `count` records
    pub fn delivery<E>(count: usize, error: E) -> Self
    where
        E: Into<anyhow::Error>,
    {
        CollectorError::Delivery {
            count,
            source: error.into(),
        }
    }

    /// Returns true when the failure happened while delivering a batch,
    /// meaning the batch should be carried over to the next harvest.
    pub fn is_delivery(&self) -> bool {
        matches!(self, CollectorError::Delivery { .. })
    }
}

impl From<config::ConfigError> for CollectorError {
    fn from(err: config::ConfigError) -> Self {
        CollectorError::Configuration(err.to_string())
    }
}
