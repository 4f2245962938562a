//! Metrics emitted by the error collector.
//!
//! Thin wrappers over the `metrics` macros so every call site uses the same
//! metric names. Without an installed recorder these are no-ops.

use metrics::{counter, gauge};

pub const NOTICED: &str = "error_collector.noticed";
pub const IGNORED: &str = "error_collector.ignored";
pub const FILTERED: &str = "error_collector.filtered";
pub const FILTER_PANICS: &str = "error_collector.filter_panics";
pub const EVICTED: &str = "error_collector.evicted";
pub const HARVESTED: &str = "error_collector.harvested";
pub const DELIVERY_FAILURES: &str = "error_collector.delivery_failures";
pub const QUEUE_LENGTH: &str = "error_collector.queue_length";

/// Why a candidate error was not queued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suppression {
    /// Class name was on the ignore list
    Ignored,
    /// Filter returned `None`
    Filtered,
}

pub(crate) fn record_noticed() {
    counter!(NOTICED, 1);
}

/// Must be called while the collector's lock is held, so the last value
/// written is the length after the last mutation.
pub(crate) fn record_queue_length(queue_length: usize) {
    gauge!(QUEUE_LENGTH, queue_length as f64);
}

pub(crate) fn record_suppressed(reason: Suppression) {
    match reason {
        Suppression::Ignored => counter!(IGNORED, 1),
        Suppression::Filtered => counter!(FILTERED, 1),
    }
}

pub(crate) fn record_filter_panic() {
    counter!(FILTER_PANICS, 1);
}

pub(crate) fn record_evicted(count: usize) {
    counter!(EVICTED, count as u64);
}

pub(crate) fn record_harvested(count: usize) {
    counter!(HARVESTED, count as u64);
}

pub(crate) fn record_delivery_failure(count: usize) {
    counter!(DELIVERY_FAILURES, count as u64);
}
