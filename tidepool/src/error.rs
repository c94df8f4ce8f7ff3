//! Error types for the tidepool window store and configuration registry.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// The main error type for all tidepool operations.
///
/// Each variant wraps the error enum of one subsystem so callers can match
/// on the failing area first and on the precise cause second.
#[derive(Error, Debug)]
pub enum TidepoolError {
    /// Error raised by a sliding window (append or wait).
    #[error("window error: {0}")]
    Window(#[from] WindowError),

    /// Error raised while evaluating or resolving a predicate.
    #[error("predicate error: {0}")]
    Predicate(#[from] PredicateError),

    /// Error raised by a resource configuration or the registry.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Error raised while loading or saving a registry document.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

impl TidepoolError {
    /// Returns `true` if this error reports a missing metric or configuration.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Registry(
                RegistryError::ConfigurationNotFound { .. } | RegistryError::MetricNotFound { .. }
            )
        )
    }
}

/// Errors that can occur on a sliding window.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WindowError {
    /// The window capacity must be positive.
    #[error("invalid window capacity: {max_rows} (must be > 0)")]
    InvalidCapacity {
        /// The rejected capacity.
        max_rows: usize,
    },

    /// An append was attempted with no rows.
    #[error("cannot append an empty batch")]
    EmptyBatch,

    /// A row timestamp precedes the one before it.
    #[error("row timestamp {timestamp_ns} precedes previous timestamp {previous_ns}")]
    OutOfOrder {
        /// The newest timestamp already accepted.
        previous_ns: u64,
        /// The offending timestamp.
        timestamp_ns: u64,
    },

    /// No append happened before the wait deadline.
    #[error("no update within {waited:?}")]
    Timeout {
        /// How long the caller waited.
        waited: Duration,
    },

    /// The window was closed; no further updates will be published.
    #[error("window is closed")]
    Closed,
}

/// Errors that can occur when evaluating or resolving predicates.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PredicateError {
    /// The observed and expected values cannot be compared.
    #[error("predicate '{predicate}' cannot compare {observed} with {expected}")]
    Incomparable {
        /// Name of the predicate that was applied.
        predicate: String,
        /// Kind of the observed value.
        observed: &'static str,
        /// Kind of the expected value.
        expected: &'static str,
    },

    /// No predicate is registered under this name.
    #[error("unknown predicate '{name}'")]
    UnknownPredicate {
        /// The name that failed to resolve.
        name: String,
    },

    /// A predicate with this name is already registered.
    #[error("predicate '{name}' is already registered")]
    DuplicatePredicate {
        /// The conflicting name.
        name: String,
    },
}

/// Errors that can occur on resource configurations and the registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// No resource configuration is registered under this name.
    #[error("resource configuration '{name}' not found")]
    ConfigurationNotFound {
        /// The missing configuration name.
        name: String,
    },

    /// The configuration does not subscribe to this metric.
    #[error("metric '{metric}' not found in resource configuration '{configuration}'")]
    MetricNotFound {
        /// The configuration that was modified.
        configuration: String,
        /// The missing metric name.
        metric: String,
    },
}

/// Errors that can occur while loading or saving a registry document.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The document could not be read.
    #[error("failed to read registry document '{}': {source}", path.display())]
    Read {
        /// The document path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The document could not be written.
    #[error("failed to write registry document '{}': {source}", path.display())]
    Write {
        /// The document path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The document is not valid JSON or does not fit the schema.
    #[error("failed to parse registry document: {source}")]
    Parse {
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// The document could not be serialized.
    #[error("failed to serialize registry document: {source}")]
    Serialize {
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// The document parsed but holds an unusable value.
    #[error("invalid registry document: {reason}")]
    Invalid {
        /// Description of what is wrong.
        reason: String,
    },
}

/// Type alias for `Result<T, TidepoolError>`.
pub type Result<T> = std::result::Result<T, TidepoolError>;
