//! Error types shared across the historian.
//!
//! [`HistError`] is the single error enum returned by the query façade, the
//! subscription layer and configuration loading. It follows the batch
//! partial-success policy of the historian:
//!
//! - **`InvalidRequest`**: the whole call is rejected before any stream
//!   element is produced.
//! - **`SourceUnavailable`**: a read against the adapter failed. Reported as a
//!   fault on the affected tag's stream only; sibling tags keep running.
//! - **`NotSupported`**: the adapter lacks the capability the call needs.
//! - **`Configuration`** / **`Config`**: semantic or parse errors when loading
//!   the service configuration.
//!
//! Three conditions are deliberately *not* represented here:
//!
//! - Unknown tags are omitted from batch results and logged at `debug`.
//! - Cancellation ends a stream normally.
//! - Stale connections are reaped without notifying anyone of an error.

use thiserror::Error;

/// Convenience alias for results using the historian error type.
pub type HistResult<T> = std::result::Result<T, HistError>;

/// Primary error type for the historian.
#[derive(Error, Debug)]
pub enum HistError {
    /// The request is malformed.
    ///
    /// Raised for an empty tag list, `end <= start`, a non-positive interval,
    /// an unknown aggregate function id or a request exceeding
    /// [`crate::QueryLimits`].
    ///
    /// **Recovery Strategy**: Fix the request; retrying unchanged always fails.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A raw or snapshot read against the adapter failed.
    ///
    /// **Error Type**: Usually transient (backing store unreachable, timeout).
    ///
    /// **Recovery Strategy**: Surfaced per tag; the caller may re-issue the
    /// query for the faulted tag alone.
    #[error("Source unavailable for tag '{tag}': {message}")]
    SourceUnavailable {
        /// Tag whose read failed.
        tag: String,
        /// Adapter-provided failure description.
        message: String,
    },

    /// The adapter does not implement a capability required by the call.
    #[error("Adapter does not support {0}")]
    NotSupported(String),

    /// Configuration values parsed but failed semantic validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Configuration file or environment could not be extracted.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Standard I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HistError {
    /// Build a [`HistError::SourceUnavailable`] from an adapter error.
    pub fn source_unavailable(tag: impl Into<String>, error: impl std::fmt::Display) -> Self {
        HistError::SourceUnavailable {
            tag: tag.into(),
            message: error.to_string(),
        }
    }

    /// Whether this error rejects a request before any work starts.
    pub fn is_invalid_request(&self) -> bool {
        matches!(self, HistError::InvalidRequest(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = HistError::InvalidRequest("end must be after start".to_string());
        assert_eq!(err.to_string(), "Invalid request: end must be after start");
    }

    #[test]
    fn test_source_unavailable_display() {
        let err = HistError::source_unavailable("TI-100", anyhow::anyhow!("connection reset"));
        assert_eq!(
            err.to_string(),
            "Source unavailable for tag 'TI-100': connection reset"
        );
        assert!(!err.is_invalid_request());
    }
}
