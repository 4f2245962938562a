//! # Error Filters
//!
//! A single pluggable predicate that may drop or rewrite a candidate record
//! before it reaches the queue.

use std::panic::{self, AssertUnwindSafe};
use crate::record::{ErrorRecord, NoticedError};

/// Outcome of running the configured filter against a candidate
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOutcome {
    /// Record to enqueue, possibly rewritten by the filter
    Keep(ErrorRecord),
    /// Filter returned `None`
    Suppressed,
    /// Filter panicked; the untouched candidate is kept
    Panicked(ErrorRecord),
}

/// Decides whether a candidate error is recorded
///
/// Returning `None` drops the error. Returning a record (the input, or a
/// rewritten copy) queues it. Implementations should be pure.
pub trait ErrorFilter: Send + Sync {
    fn filter(&self, record: ErrorRecord, error: &dyn NoticedError) -> Option<ErrorRecord>;
}

impl<F> ErrorFilter for F
where
    F: Fn(ErrorRecord, &dyn NoticedError) -> Option<ErrorRecord> + Send + Sync,
{
    fn filter(&self, record: ErrorRecord, error: &dyn NoticedError) -> Option<ErrorRecord> {
        self(record, error)
    }
}

/// Runs a filter, containing any panic it raises
pub(crate) fn apply_filter(
    filter: &dyn ErrorFilter,
    candidate: ErrorRecord,
    error: &dyn NoticedError,
) -> FilterOutcome {
    let fallback = candidate.clone();
    let result = panic::catch_unwind(AssertUnwindSafe(|| filter.filter(candidate, error)));

    match result {
        Ok(Some(record)) => FilterOutcome::Keep(record),
        Ok(None) => FilterOutcome::Suppressed,
        Err(_) => FilterOutcome::Panicked(fallback),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{CapturedError, ErrorParams};

    fn candidate() -> ErrorRecord {
        ErrorRecord::new("Exception", "message", "path", ErrorParams::default())
    }

    #[test]
    fn test_closure_filter_keeps_and_rewrites() {
        let filter = |mut record: ErrorRecord, _: &dyn NoticedError| {
            record.message = "rewritten".to_string();
            Some(record)
        };
        let error = CapturedError::new("Exception", "message");

        match apply_filter(&filter, candidate(), &error) {
            FilterOutcome::Keep(record) => assert_eq!(record.message, "rewritten"),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_filter_suppresses_by_class() {
        let filter = |record: ErrorRecord, error: &dyn NoticedError| {
            if error.class_name() == "ActionController::RoutingError" {
                None
            } else {
                Some(record)
            }
        };
        let routing = CapturedError::new("ActionController::RoutingError", "no route");
        let other = CapturedError::new("Exception", "message");

        assert_eq!(apply_filter(&filter, candidate(), &routing), FilterOutcome::Suppressed);
        assert!(matches!(apply_filter(&filter, candidate(), &other), FilterOutcome::Keep(_)));
    }

    #[test]
    fn test_panicking_filter_keeps_candidate() {
        let filter = |_: ErrorRecord, _: &dyn NoticedError| -> Option<ErrorRecord> {
            panic!("filter bug")
        };
        let error = CapturedError::new("Exception", "message");
        let original = candidate();

        match apply_filter(&filter, original.clone(), &error) {
            FilterOutcome::Panicked(record) => assert_eq!(record, original),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
}
