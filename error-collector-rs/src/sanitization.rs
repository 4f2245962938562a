//! # Request Parameter Sanitization
//!
//! Redacts sensitive request parameters before they are stored in a record,
//! so credentials never leave the process with a harvested error.

use std::collections::HashSet;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

/// Replacement value for redacted parameters
pub const FILTERED: &str = "[FILTERED]";

// Parameter names that are always redacted. A name matches when one of its
// `_`/`-` separated segments is a sensitive word, so `user_password` is
// redacted but `tokenizer` and `classname` are not.
static SENSITIVE_KEY_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?:.*[_-])?(?:passw(?:or)?d|pwd|secret|token|api[_-]?key|credentials?|authorization|auth[_-]?token|session[_-]?id|cookie|credit[_-]?card|cc[_-]?number|cvv|ssn|private[_-]?key)(?:[_-].*)?$",
    )
    .expect("sensitive key pattern is valid")
});

/// Redacts request parameters by name
#[derive(Debug, Clone, Default)]
pub struct ParamSanitizer {
    extra_keys: HashSet<String>,
}

impl ParamSanitizer {
    /// Creates a sanitizer that also redacts the given parameter names
    pub fn new<I, S>(extra_keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            extra_keys: extra_keys
                .into_iter()
                .map(|key| key.as_ref().to_lowercase())
                .collect(),
        }
    }

    /// Returns true if values stored under `key` must be redacted
    pub fn is_sensitive_key(&self, key: &str) -> bool {
        SENSITIVE_KEY_PATTERN.is_match(key) || self.extra_keys.contains(&key.to_lowercase())
    }

    /// Returns a copy of `params` with sensitive values replaced
    pub fn sanitize(&self, params: Map<String, Value>) -> Map<String, Value> {
        params
            .into_iter()
            .map(|(key, value)| {
                let value = if self.is_sensitive_key(&key) {
                    Value::String(FILTERED.to_string())
                } else {
                    self.sanitize_value(value)
                };
                (key, value)
            })
            .collect()
    }

    fn sanitize_value(&self, value: Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(self.sanitize(map)),
            Value::Array(items) => {
                Value::Array(items.into_iter().map(|item| self.sanitize_value(item)).collect())
            }
            other => other,
        }
    }
}
