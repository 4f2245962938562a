//! # Collector Configuration
//!
//! Settings for the error collector, loaded from defaults, an optional
//! config file and `ERROR_COLLECTOR__*` environment variables.

use serde::{Serialize, Deserialize};
use crate::types::{CollectorError, Result};

/// Default number of records held between harvests
pub const DEFAULT_MAX_QUEUE_LENGTH: usize = 20;

/// Default seconds between harvest cycles
pub const DEFAULT_HARVEST_INTERVAL_SECS: u64 = 60;

/// Configuration for the error collector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Whether errors are recorded at all
    pub enabled: bool,
    /// Maximum records held between harvests; oldest are evicted beyond this
    pub max_queue_length: usize,
    /// Exception class names that are never recorded
    pub ignore_errors: Vec<String>,
    /// Whether request parameters are captured
    pub capture_params: bool,
    /// Whether error backtraces are captured
    pub capture_backtrace: bool,
    /// Whether sensitive request parameters are redacted
    pub sanitize_params: bool,
    /// Extra request parameter names whose values are redacted
    pub redact_params: Vec<String>,
    /// Seconds between harvest cycles
    pub harvest_interval_secs: u64,
    /// Multiple of `max_queue_length` the harvest loop may carry over
    pub carry_over_factor: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_queue_length: DEFAULT_MAX_QUEUE_LENGTH,
            ignore_errors: Vec::new(),
            capture_params: true,
            capture_backtrace: true,
            sanitize_params: false,
            redact_params: Vec::new(),
            harvest_interval_secs: DEFAULT_HARVEST_INTERVAL_SECS,
            carry_over_factor: 5,
        }
    }
}

impl CollectorConfig {
    /// Loads configuration from an optional file plus the environment
    ///
    /// A `.env` file is honoured when present. Environment keys use the
    /// `ERROR_COLLECTOR__` prefix, e.g. `ERROR_COLLECTOR__MAX_QUEUE_LENGTH`.
    pub fn load(path: Option<&str>) -> Result<Self> {
        dotenv::dotenv().ok();

        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        let cfg = builder
            .add_source(
                config::Environment::with_prefix("ERROR_COLLECTOR")
                    .prefix_separator("__")
                    .separator("__")
                    .keep_prefix(true),
            )
            .build()?;

        let loaded = Self::try_from(cfg)?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Rejects settings the collector cannot operate with
    pub fn validate(&self) -> Result<()> {
        if self.max_queue_length == 0 {
            return Err(CollectorError::Configuration(
                "error_collector.max_queue_length must be greater than zero".to_string(),
            ));
        }
        if self.harvest_interval_secs == 0 {
            return Err(CollectorError::Configuration(
                "error_collector.harvest_interval_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Upper bound on records the harvest loop keeps across failed deliveries
    pub fn carry_over_limit(&self) -> usize {
        self.max_queue_length.saturating_mul(self.carry_over_factor.max(1))
    }
}

/// Splits a list setting that may be given either as an array or as a
/// comma-separated string.
fn read_list(cfg: &config::Config, key: &str) -> Option<Vec<String>> {
    if let Ok(list) = cfg.get::<Vec<String>>(key) {
        return Some(list);
    }
    cfg.get::<String>(key).ok().map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect()
    })
}

impl TryFrom<config::Config> for CollectorConfig {
    type Error = config::ConfigError;

    fn try_from(cfg: config::Config) -> std::result::Result<Self, Self::Error> {
        // Start with defaults and override from config where present.
        let mut base = CollectorConfig::default();

        if let Ok(enabled) = cfg.get::<bool>("error_collector.enabled") {
            base.enabled = enabled;
        }
        if let Ok(max_queue_length) = cfg.get::<usize>("error_collector.max_queue_length") {
            base.max_queue_length = max_queue_length;
        }
        if let Some(ignore_errors) = read_list(&cfg, "error_collector.ignore_errors") {
            base.ignore_errors = ignore_errors;
        }
        if let Ok(capture_params) = cfg.get::<bool>("error_collector.capture_params") {
            base.capture_params = capture_params;
        }
        if let Ok(capture_backtrace) = cfg.get::<bool>("error_collector.capture_backtrace") {
            base.capture_backtrace = capture_backtrace;
        }
        if let Ok(sanitize_params) = cfg.get::<bool>("error_collector.sanitize_params") {
            base.sanitize_params = sanitize_params;
        }
        if let Some(redact_params) = read_list(&cfg, "error_collector.redact_params") {
            base.redact_params = redact_params;
        }
        if let Ok(interval) = cfg.get::<u64>("error_collector.harvest_interval_secs") {
            base.harvest_interval_secs = interval;
        }
        if let Ok(factor) = cfg.get::<usize>("error_collector.carry_over_factor") {
            base.carry_over_factor = factor;
        }

        Ok(base)
    }
}
