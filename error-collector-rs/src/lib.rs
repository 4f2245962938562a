//! # Error Collector
//!
//! An in-process buffer for application errors noticed during request
//! handling, for the Phoenix ORCH AGI system.
//!
//! ## Features
//!
//! - Bounded queue that keeps the most recent errors and evicts the oldest
//! - Ignore list of error class names
//! - Pluggable filter that can drop or rewrite candidate records
//! - Harvest with carry-over, so undelivered errors survive a failed send
//! - Opt-in redaction of sensitive request parameters
//! - Periodic harvest loop over a pluggable sink
//!
//! ```no_run
//! use error_collector::{CapturedError, ErrorCollector};
//! use serde_json::Map;
//!
//! let collector = ErrorCollector::default();
//! collector.ignore(["ActionController::RoutingError"]);
//! collector.notice_error("users#show", Some("/users/1"), Map::new(), &CapturedError::new("Exception", "boom"));
//!
//! let pending = collector.harvest_errors(None);
//! assert_eq!(pending.len(), 1);
//! ```

pub mod types;
pub mod record;
pub mod filter;
pub mod config;
pub mod sanitization;
pub mod collector;
pub mod harvest;
pub mod monitoring;
pub mod logging;

// Re-export commonly used types
pub use types::{CollectorError, Result};
pub use record::{CapturedError, ErrorParams, ErrorRecord, NoticedError};
pub use filter::{ErrorFilter, FilterOutcome};
pub use config::CollectorConfig;
pub use collector::{ErrorCollector, Notice};
pub use harvest::{ErrorSink, HarvestLoop, LogSink, MemorySink};
pub use logging::{init_logging, LoggingConfig};

/// Initializes logging and builds a collector from the default config sources
pub fn init() -> Result<ErrorCollector> {
    init_logging(None)?;
    let config = CollectorConfig::load(None)?;
    Ok(ErrorCollector::from_config(&config))
}

/// Initializes logging and builds a collector from a `config::Config`
pub fn init_with_config(config: ::config::Config) -> Result<ErrorCollector> {
    let log_config = LoggingConfig::try_from(config.clone())?;
    let collector_config = CollectorConfig::try_from(config)?;
    collector_config.validate()?;

    init_logging(Some(log_config))?;
    Ok(ErrorCollector::from_config(&collector_config))
}
