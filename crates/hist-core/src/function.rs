//! Identifiers of the supported aggregate functions.
//!
//! The behavioural description of each function (timestamp and quality
//! semantics, display text) lives next to the resampler in
//! `hist-processing`; this module only carries the identifiers so that
//! requests can be validated before any processing crate is involved.

use crate::error::HistError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A statistical function computed per aggregation interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AggregateFunction {
    /// Arithmetic mean of good values.
    Avg,
    /// Smallest good value, stamped at its occurrence time.
    Min,
    /// Largest good value, stamped at its occurrence time.
    Max,
    /// Number of good samples.
    Count,
    /// `|max - min|` of good values.
    Range,
    /// `last - first` good value.
    Delta,
    /// Share of good samples in percent.
    PercentGood,
    /// Share of non-good samples in percent.
    PercentBad,
    /// Linear interpolation at the interval start.
    Interp,
    /// Population variance of good values.
    Variance,
    /// Population standard deviation of good values.
    StdDev,
}

impl AggregateFunction {
    /// Every supported function, in table order.
    pub const ALL: [AggregateFunction; 11] = [
        AggregateFunction::Avg,
        AggregateFunction::Min,
        AggregateFunction::Max,
        AggregateFunction::Count,
        AggregateFunction::Range,
        AggregateFunction::Delta,
        AggregateFunction::PercentGood,
        AggregateFunction::PercentBad,
        AggregateFunction::Interp,
        AggregateFunction::Variance,
        AggregateFunction::StdDev,
    ];

    /// Wire identifier (e.g. `"AVG"`).
    pub fn id(self) -> &'static str {
        match self {
            AggregateFunction::Avg => "AVG",
            AggregateFunction::Min => "MIN",
            AggregateFunction::Max => "MAX",
            AggregateFunction::Count => "COUNT",
            AggregateFunction::Range => "RANGE",
            AggregateFunction::Delta => "DELTA",
            AggregateFunction::PercentGood => "PERCENTGOOD",
            AggregateFunction::PercentBad => "PERCENTBAD",
            AggregateFunction::Interp => "INTERP",
            AggregateFunction::Variance => "VARIANCE",
            AggregateFunction::StdDev => "STDDEV",
        }
    }

    /// Whether the result describes sample quality rather than inheriting it.
    pub fn is_quality_metric(self) -> bool {
        matches!(
            self,
            AggregateFunction::PercentGood | AggregateFunction::PercentBad
        )
    }
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for AggregateFunction {
    type Err = HistError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        AggregateFunction::ALL
            .into_iter()
            .find(|f| f.id().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| HistError::InvalidRequest(format!("unknown aggregate function '{}'", s)))
    }
}
