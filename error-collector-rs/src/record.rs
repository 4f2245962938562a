//! # Error Records
//!
//! The immutable unit the collector queues and harvests, plus the
//! `NoticedError` abstraction that lets instrumentation hand over an
//! exception without the collector ever holding on to the live value.

use std::error::Error as StdError;
use std::fmt;
use serde::{Serialize, Deserialize};
use serde_json::{Map, Value};
use uuid::Uuid;
use chrono::{DateTime, Utc};

/// Request context captured alongside an error
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorParams {
    /// URI of the request being handled, if known
    pub request_uri: Option<String>,
    /// Request parameters at the time of failure
    #[serde(default)]
    pub request_params: Map<String, Value>,
    /// Backtrace frames of the originating error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<Vec<String>>,
    /// Caller supplied attributes
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub custom_params: Map<String, Value>,
}

impl ErrorParams {
    /// Creates params holding the request URI and request parameters
    pub fn new(request_uri: Option<String>, request_params: Map<String, Value>) -> Self {
        Self {
            request_uri,
            request_params,
            stack_trace: None,
            custom_params: Map::new(),
        }
    }
}

/// A captured application error, ready for harvest
///
/// Records are moved into the collector's queue and only ever leave it by
/// eviction or harvest; nothing inside the collector mutates them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Unique identifier, lets a sink drop redelivered carry-over
    pub id: Uuid,
    /// Runtime type name of the originating error
    pub exception_class: String,
    /// Human-readable error message
    pub message: String,
    /// Code path or controller action where the error occurred
    pub path: String,
    /// Request context
    pub params: ErrorParams,
    /// Capture time
    pub timestamp: DateTime<Utc>,
}

impl ErrorRecord {
    /// Creates a new record stamped with a fresh id and the current time
    pub fn new<C, M, P>(exception_class: C, message: M, path: P, params: ErrorParams) -> Self
    where
        C: Into<String>,
        M: Into<String>,
        P: Into<String>,
    {
        Self {
            id: Uuid::new_v4(),
            exception_class: exception_class.into(),
            message: message.into(),
            path: path.into(),
            params,
            timestamp: Utc::now(),
        }
    }

    /// Shorthand for the captured request URI
    pub fn request_uri(&self) -> Option<&str> {
        self.params.request_uri.as_deref()
    }

    /// Looks up a single captured request parameter
    pub fn request_param(&self, key: &str) -> Option<&Value> {
        self.params.request_params.get(key)
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.exception_class, self.message)?;

        if !self.path.is_empty() {
            write!(f, " [Path: {}]", self.path)?;
        }

        if let Some(uri) = &self.params.request_uri {
            write!(f, " [URI: {}]", uri)?;
        }

        Ok(())
    }
}

/// An error value the collector can notice
///
/// Only the structural fields exposed here are copied into an
/// `ErrorRecord`.
pub trait NoticedError {
    /// Runtime type name used for ignore-list matching
    fn class_name(&self) -> &str;

    /// Human-readable message
    fn message(&self) -> String;

    /// Backtrace frames, if the error carries any
    fn backtrace(&self) -> Option<Vec<String>> {
        None
    }
}

/// Owned snapshot of an error's class, message and backtrace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedError {
    class_name: String,
    message: String,
    backtrace: Option<Vec<String>>,
}

impl CapturedError {
    /// Creates a captured error from an explicit class name and message
    pub fn new<C: Into<String>, M: Into<String>>(class_name: C, message: M) -> Self {
        Self {
            class_name: class_name.into(),
            message: message.into(),
            backtrace: None,
        }
    }

    /// Captures a concrete std error, naming it by its full Rust type path
    /// as given by `std::any::type_name`, e.g. `std::io::error::Error`.
    ///
    /// Trait objects have no useful type name; use
    /// [`CapturedError::from_error_named`] for `Box<dyn Error>` and friends.
    pub fn from_error<E>(error: &E) -> Self
    where
        E: StdError,
    {
        Self::new(std::any::type_name::<E>(), error.to_string())
    }

    /// Captures any std error, including trait objects, under an explicit
    /// class name
    pub fn from_error_named<C, E>(class_name: C, error: &E) -> Self
    where
        C: Into<String>,
        E: StdError + ?Sized,
    {
        Self::new(class_name, error.to_string())
    }

    /// Attaches explicit backtrace frames
    pub fn with_backtrace(mut self, frames: Vec<String>) -> Self {
        self.backtrace = Some(frames);
        self
    }

    /// Attaches the backtrace of the calling thread
    pub fn with_current_backtrace(self) -> Self {
        let frames = backtrace::Backtrace::new()
            .frames()
            .iter()
            .flat_map(|frame| frame.symbols())
            .map(|symbol| match (symbol.name(), symbol.filename(), symbol.lineno()) {
                (Some(name), Some(file), Some(line)) => {
                    format!("{} ({}:{})", name, file.display(), line)
                }
                (Some(name), _, _) => name.to_string(),
                _ => "<unknown>".to_string(),
            })
            .collect();
        self.with_backtrace(frames)
    }
}

impl NoticedError for CapturedError {
    fn class_name(&self) -> &str {
        &self.class_name
    }

    fn message(&self) -> String {
        self.message.clone()
    }

    fn backtrace(&self) -> Option<Vec<String>> {
        self.backtrace.clone()
    }
}

impl fmt::Display for CapturedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.class_name, self.message)
    }
}

impl StdError for CapturedError {}
