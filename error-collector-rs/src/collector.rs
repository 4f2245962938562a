//! # Error Collector
//!
//! A bounded, thread-safe buffer of error records. Request-handling code
//! calls [`ErrorCollector::notice_error`] when it catches an error; a
//! periodic reporter calls [`ErrorCollector::harvest_errors`] to drain it.
//!
//! Once the queue holds `max_queue_length` records the oldest one is evicted
//! for each new arrival, so a harvest always returns the most recent errors
//! in arrival order.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};
use crate::config::{CollectorConfig, DEFAULT_MAX_QUEUE_LENGTH};
use crate::filter::{apply_filter, ErrorFilter, FilterOutcome};
use crate::monitoring::{self, Suppression};
use crate::record::{ErrorParams, ErrorRecord, NoticedError};
use crate::sanitization::ParamSanitizer;

/// Request context handed to [`ErrorCollector::notice`]
#[derive(Debug, Clone, Default)]
pub struct Notice {
    /// Code path or controller action
    pub path: String,
    /// Request URI, if known
    pub request_uri: Option<String>,
    /// Request parameters at the time of failure
    pub request_params: Map<String, Value>,
    /// Caller supplied attributes
    pub custom_params: Map<String, Value>,
}

impl Notice {
    /// Creates a notice for the given code path
    pub fn new<P: Into<String>>(path: P) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Sets the request URI
    pub fn request_uri<S: Into<String>>(mut self, uri: S) -> Self {
        self.request_uri = Some(uri.into());
        self
    }

    /// Sets the request parameters
    pub fn request_params(mut self, params: Map<String, Value>) -> Self {
        self.request_params = params;
        self
    }

    /// Adds a custom attribute; values that fail to serialize are skipped
    pub fn custom_param<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Serialize,
    {
        if let Ok(value) = serde_json::to_value(value) {
            self.custom_params.insert(key.into(), value);
        }
        self
    }
}

// Everything the collector mutates lives behind one lock.
struct State {
    queue: VecDeque<ErrorRecord>,
    ignore_list: Vec<String>,
    filter: Option<Arc<dyn ErrorFilter>>,
}

/// Bounded in-process buffer of captured errors
pub struct ErrorCollector {
    state: Mutex<State>,
    max_queue_length: usize,
    enabled: bool,
    capture_params: bool,
    capture_backtrace: bool,
    sanitizer: Option<ParamSanitizer>,
}

impl ErrorCollector {
    /// Creates an enabled collector holding at most `max_queue_length`
    /// records. A length of zero is treated as one.
    pub fn new(max_queue_length: usize) -> Self {
        Self {
            state: Mutex::new(State {
                queue: VecDeque::with_capacity(max_queue_length.max(1)),
                ignore_list: Vec::new(),
                filter: None,
            }),
            max_queue_length: max_queue_length.max(1),
            enabled: true,
            capture_params: true,
            capture_backtrace: true,
            sanitizer: None,
        }
    }

    /// Creates a collector from configuration, seeding the ignore list
    pub fn from_config(config: &CollectorConfig) -> Self {
        let mut collector = Self::new(config.max_queue_length);
        collector.enabled = config.enabled;
        collector.capture_params = config.capture_params;
        collector.capture_backtrace = config.capture_backtrace;
        if config.sanitize_params {
            collector.sanitizer = Some(ParamSanitizer::new(&config.redact_params));
        }
        collector.ignore(config.ignore_errors.iter().cloned());

        debug!(
            enabled = config.enabled,
            max_queue_length = collector.max_queue_length,
            ignored = config.ignore_errors.len(),
            "Error collector configured"
        );

        collector
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // Every critical section leaves State consistent, so a poisoned
        // lock is still safe to use.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records an error raised while handling a request
    ///
    /// The error is dropped silently when its class is ignored or the
    /// filter rejects it. This never fails and never panics, even if the
    /// filter does.
    pub fn notice_error(
        &self,
        path: &str,
        request_uri: Option<&str>,
        request_params: Map<String, Value>,
        error: &dyn NoticedError,
    ) {
        let notice = Notice {
            path: path.to_string(),
            request_uri: request_uri.map(str::to_string),
            request_params,
            custom_params: Map::new(),
        };
        self.notice(notice, error);
    }

    /// Records an error with full request context, including custom params
    pub fn notice(&self, notice: Notice, error: &dyn NoticedError) {
        if !self.enabled {
            return;
        }

        let class_name = error.class_name();
        let filter = {
            let state = self.state();
            if state.ignore_list.iter().any(|ignored| ignored == class_name) {
                drop(state);
                debug!(exception_class = %class_name, path = %notice.path, "Ignoring error by class");
                monitoring::record_suppressed(Suppression::Ignored);
                return;
            }
            state.filter.clone()
        };

        let candidate = self.build_record(notice, error);

        let record = match filter {
            Some(filter) => match apply_filter(filter.as_ref(), candidate, error) {
                FilterOutcome::Keep(record) => record,
                FilterOutcome::Suppressed => {
                    debug!(exception_class = %class_name, "Error suppressed by filter");
                    monitoring::record_suppressed(Suppression::Filtered);
                    return;
                }
                FilterOutcome::Panicked(record) => {
                    warn!(exception_class = %class_name, "Error filter panicked, keeping error");
                    monitoring::record_filter_panic();
                    record
                }
            },
            None => candidate,
        };

        self.enqueue(record);
    }

    /// Enables redaction of sensitive request and custom params. Params
    /// are stored exactly as given unless this is called.
    pub fn sanitize_params(mut self, sanitizer: ParamSanitizer) -> Self {
        self.sanitizer = Some(sanitizer);
        self
    }

    fn redact(&self, params: Map<String, Value>) -> Map<String, Value> {
        match &self.sanitizer {
            Some(sanitizer) => sanitizer.sanitize(params),
            None => params,
        }
    }

    fn build_record(&self, notice: Notice, error: &dyn NoticedError) -> ErrorRecord {
        let request_params = if self.capture_params {
            self.redact(notice.request_params)
        } else {
            Map::new()
        };

        let mut params = ErrorParams::new(notice.request_uri, request_params);
        params.custom_params = self.redact(notice.custom_params);
        if self.capture_backtrace {
            params.stack_trace = error.backtrace();
        }

        ErrorRecord::new(error.class_name(), error.message(), notice.path, params)
    }

    fn enqueue(&self, record: ErrorRecord) {
        let evicted = {
            let mut state = self.state();
            let mut evicted = 0;
            while state.queue.len() >= self.max_queue_length {
                state.queue.pop_front();
                evicted += 1;
            }
            state.queue.push_back(record);
            // Set under the lock so the gauge follows the order of mutations.
            monitoring::record_queue_length(state.queue.len());
            evicted
        };

        if evicted > 0 {
            debug!(evicted, max_queue_length = self.max_queue_length, "Error queue full, evicted oldest");
            monitoring::record_evicted(evicted);
        }
        monitoring::record_noticed();
    }

    /// Adds class names to the ignore list; names already present are skipped
    pub fn ignore<I, S>(&self, class_names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = self.state();
        for name in class_names {
            let name = name.into();
            if !state.ignore_list.contains(&name) {
                state.ignore_list.push(name);
            }
        }
    }

    /// Installs the error filter, replacing any previous one
    pub fn ignore_error_filter<F>(&self, filter: F)
    where
        F: ErrorFilter + 'static,
    {
        self.state().filter = Some(Arc::new(filter));
    }

    /// Removes the error filter
    pub fn clear_error_filter(&self) {
        self.state().filter = None;
    }

    /// Returns true if an error filter is installed
    pub fn has_error_filter(&self) -> bool {
        self.state().filter.is_some()
    }

    /// Drains the queue, returning `previously_collected` followed by
    /// every queued record
    ///
    /// Callers that fail to deliver the result must pass it back in on the
    /// next harvest so nothing is lost.
    pub fn harvest_errors(&self, previously_collected: Option<Vec<ErrorRecord>>) -> Vec<ErrorRecord> {
        let drained = {
            let mut state = self.state();
            let drained = std::mem::take(&mut state.queue);
            monitoring::record_queue_length(0);
            drained
        };

        let mut errors = previously_collected.unwrap_or_default();
        let carried = errors.len();
        errors.extend(drained);

        let harvested = errors.len() - carried;
        if harvested > 0 {
            debug!(harvested, carried, "Harvested errors");
        }
        monitoring::record_harvested(harvested);

        errors
    }

    /// Number of records currently queued
    pub fn len(&self) -> usize {
        self.state().queue.len()
    }

    /// Returns true if nothing is queued
    pub fn is_empty(&self) -> bool {
        self.state().queue.is_empty()
    }

    /// Ignored class names, in insertion order
    pub fn ignored_classes(&self) -> Vec<String> {
        self.state().ignore_list.clone()
    }

    /// Capacity of the queue; older records are evicted beyond it
    pub fn max_queue_length(&self) -> usize {
        self.max_queue_length
    }

    /// Returns false if the collector was configured to record nothing
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl Default for ErrorCollector {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_QUEUE_LENGTH)
    }
}

impl fmt::Debug for ErrorCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("ErrorCollector")
            .field("queued", &state.queue.len())
            .field("max_queue_length", &self.max_queue_length)
            .field("ignore_list", &state.ignore_list)
            .field("has_filter", &state.filter.is_some())
            .field("enabled", &self.enabled)
            .finish()
    }
}
