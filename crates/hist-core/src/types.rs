//! Time-series value vocabulary.
//!
//! Every value flowing through the historian is a [`Sample`]: a UTC instant,
//! a tagged [`Value`] and a [`Quality`]. Samples are immutable once produced;
//! processing stages clone and re-stamp them instead of mutating in place.

use crate::function::AggregateFunction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Quality
// =============================================================================

/// Trust indicator attached to every sample.
///
/// Variants are ordered from best to worst so that `max` yields the
/// worst-case quality of a set of samples.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    /// Value is trustworthy.
    #[default]
    Good,
    /// Value is usable but derived from incomplete or suspect inputs.
    Uncertain,
    /// Value must not be trusted.
    Bad,
}

impl Quality {
    /// Worst-case combination (`Bad > Uncertain > Good`).
    pub fn worst(self, other: Quality) -> Quality {
        self.max(other)
    }

    /// Whether this is [`Quality::Good`].
    pub fn is_good(self) -> bool {
        self == Quality::Good
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Quality::Good => "good",
            Quality::Uncertain => "uncertain",
            Quality::Bad => "bad",
        };
        write!(f, "{}", label)
    }
}

// =============================================================================
// Value
// =============================================================================

/// A discrete state of an enumerated tag (e.g. `2 = "Running"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnumState {
    /// Numeric ordinal of the state.
    pub ordinal: i32,
    /// Display name of the state.
    pub name: String,
}

/// Tagged union of the value types a tag can carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// 64-bit floating point value.
    Float64(f64),
    /// 64-bit signed integer value.
    Int64(i64),
    /// Free-form text value.
    String(String),
    /// Boolean value.
    Bool(bool),
    /// Enumerated state value.
    EnumState(EnumState),
}

impl Value {
    /// Sentinel used when a numeric result cannot be computed.
    pub fn nan() -> Value {
        Value::Float64(f64::NAN)
    }

    /// Numeric view of the value.
    ///
    /// Booleans map to `0.0`/`1.0` and enumerated states to their ordinal.
    /// Strings have no numeric view.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float64(v) => Some(*v),
            Value::Int64(v) => Some(*v as f64),
            Value::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            Value::EnumState(state) => Some(f64::from(state.ordinal)),
            Value::String(_) => None,
        }
    }

    /// Whether the value participates in numeric aggregation.
    pub fn is_numeric(&self) -> bool {
        !matches!(self, Value::String(_))
    }

    /// Whether this is the `NaN` sentinel.
    pub fn is_nan(&self) -> bool {
        matches!(self, Value::Float64(v) if v.is_nan())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Float64(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "{}", v),
            Value::Bool(v) => write!(f, "{}", v),
            Value::EnumState(state) => write!(f, "{} ({})", state.name, state.ordinal),
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float64(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int64(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

// =============================================================================
// Sample
// =============================================================================

/// A single recorded or computed value of one tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// UTC instant the value applies to.
    pub timestamp: DateTime<Utc>,
    /// The value itself.
    pub value: Value,
    /// Trust indicator.
    pub quality: Quality,
}

impl Sample {
    /// Create a sample.
    pub fn new(timestamp: DateTime<Utc>, value: impl Into<Value>, quality: Quality) -> Self {
        Self {
            timestamp,
            value: value.into(),
            quality,
        }
    }

    /// Create a good-quality sample.
    pub fn good(timestamp: DateTime<Utc>, value: impl Into<Value>) -> Self {
        Self::new(timestamp, value, Quality::Good)
    }

    /// Create a bad-quality `NaN` sample.
    pub fn bad_nan(timestamp: DateTime<Utc>) -> Self {
        Self::new(timestamp, Value::nan(), Quality::Bad)
    }

    /// Copy of this sample re-stamped at `timestamp` with `quality`.
    pub fn restamped(&self, timestamp: DateTime<Utc>, quality: Quality) -> Self {
        Self {
            timestamp,
            value: self.value.clone(),
            quality,
        }
    }
}

/// A sample paired with the tag it belongs to.
///
/// This is the element type of snapshot reads, native push events and
/// subscription streams.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagValue {
    /// Canonical tag id.
    pub tag_id: String,
    /// The value.
    pub sample: Sample,
}

impl TagValue {
    /// Pair a tag id with a sample.
    pub fn new(tag_id: impl Into<String>, sample: Sample) -> Self {
        Self {
            tag_id: tag_id.into(),
            sample,
        }
    }
}

// =============================================================================
// AggregateBucket
// =============================================================================

/// One processed value: the result of one aggregate function over one interval.
///
/// Produced by the resampler and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateBucket {
    /// Inclusive interval start.
    pub interval_start: DateTime<Utc>,
    /// Exclusive interval end.
    pub interval_end: DateTime<Utc>,
    /// Function that produced the result.
    pub function: AggregateFunction,
    /// The computed value.
    pub result: Sample,
    /// Number of raw samples falling in the interval (any quality).
    pub source_sample_count: usize,
    /// Number of non-good raw samples excluded from the computation.
    pub skipped_non_good_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_worst_case_ordering() {
        assert_eq!(Quality::Good.worst(Quality::Good), Quality::Good);
        assert_eq!(Quality::Good.worst(Quality::Uncertain), Quality::Uncertain);
        assert_eq!(Quality::Uncertain.worst(Quality::Bad), Quality::Bad);
        assert_eq!(Quality::Bad.worst(Quality::Good), Quality::Bad);
    }

    #[test]
    fn test_numeric_views() {
        assert_eq!(Value::Int64(7).as_f64(), Some(7.0));
        assert_eq!(Value::Bool(true).as_f64(), Some(1.0));
        assert_eq!(
            Value::EnumState(EnumState {
                ordinal: 3,
                name: "Running".into()
            })
            .as_f64(),
            Some(3.0)
        );
        assert_eq!(Value::from("text").as_f64(), None);
        assert!(!Value::from("text").is_numeric());
        assert!(Value::nan().is_nan());
    }

    #[test]
    fn test_value_serde_is_tagged() {
        let json = serde_json::to_string(&Value::Int64(5)).unwrap();
        assert_eq!(json, r#"{"type":"int64","value":5}"#);
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Value::Int64(5));
    }
}
