//! Query stream elements.

use hist_core::HistError;
use tokio_stream::wrappers::ReceiverStream;

/// One element of a batch query stream.
///
/// Values of different tags interleave freely; within one tag they arrive in
/// non-decreasing timestamp order. A `Fault` ends that tag's contribution
/// and leaves the other tags untouched.
#[derive(Debug)]
pub enum QueryEvent<T> {
    /// A result for `tag_id`.
    Value {
        /// Canonical tag id.
        tag_id: String,
        /// The result.
        value: T,
    },
    /// The source failed for `tag_id`; no further values follow for it.
    Fault {
        /// Canonical tag id (or the identifier as requested if resolution failed).
        tag_id: String,
        /// What went wrong.
        error: HistError,
    },
}

impl<T> QueryEvent<T> {
    /// Tag this event belongs to.
    pub fn tag_id(&self) -> &str {
        match self {
            QueryEvent::Value { tag_id, .. } | QueryEvent::Fault { tag_id, .. } => tag_id,
        }
    }

    /// Whether this is a per-tag fault.
    pub fn is_fault(&self) -> bool {
        matches!(self, QueryEvent::Fault { .. })
    }

    /// The result, if this is a value.
    pub fn value(&self) -> Option<&T> {
        match self {
            QueryEvent::Value { value, .. } => Some(value),
            QueryEvent::Fault { .. } => None,
        }
    }

    /// `(tag_id, value)`, if this is a value.
    pub fn into_value(self) -> Option<(String, T)> {
        match self {
            QueryEvent::Value { tag_id, value } => Some((tag_id, value)),
            QueryEvent::Fault { .. } => None,
        }
    }
}

/// Output stream of a batch query. Ends once every tag has finished.
pub type QueryStream<T> = ReceiverStream<QueryEvent<T>>;
