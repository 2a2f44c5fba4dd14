//! Supported aggregate function descriptors.
//!
//! A static table, one entry per [`AggregateFunction`], describing what each
//! function computes and how its result is stamped and qualified. The
//! transport layer publishes this table verbatim to clients.

use hist_core::AggregateFunction;
use serde::Serialize;

/// Where the result timestamp of a function comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampSemantics {
    /// Result is stamped at the interval start.
    IntervalStart,
    /// Result is stamped at the raw sample that produced it.
    SampleTime,
}

/// How the result quality of a function is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QualitySemantics {
    /// Good if no sample was skipped, Uncertain if any was, Bad if no good
    /// sample exists.
    SkippedSamples,
    /// Always Good; the value describes quality instead of inheriting it.
    AlwaysGood,
    /// Worst case of the two bracketing samples.
    WorstOfBrackets,
}

/// Static description of one aggregate function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AggregateDescriptor {
    /// Function identifier.
    pub function: AggregateFunction,
    /// Wire id (e.g. `"AVG"`).
    pub id: &'static str,
    /// Short display name.
    pub display_name: &'static str,
    /// One-line description.
    pub description: &'static str,
    /// Result timestamp semantics.
    pub result_timestamp: TimestampSemantics,
    /// Result quality semantics.
    pub result_quality: QualitySemantics,
}

/// Descriptor table, in [`AggregateFunction::ALL`] order.
pub static AGGREGATE_FUNCTIONS: [AggregateDescriptor; 11] = [
    AggregateDescriptor {
        function: AggregateFunction::Avg,
        id: "AVG",
        display_name: "Average",
        description: "Arithmetic mean of the good-quality values in the interval.",
        result_timestamp: TimestampSemantics::IntervalStart,
        result_quality: QualitySemantics::SkippedSamples,
    },
    AggregateDescriptor {
        function: AggregateFunction::Min,
        id: "MIN",
        display_name: "Minimum",
        description: "Smallest good-quality value, stamped at the time it was recorded.",
        result_timestamp: TimestampSemantics::SampleTime,
        result_quality: QualitySemantics::SkippedSamples,
    },
    AggregateDescriptor {
        function: AggregateFunction::Max,
        id: "MAX",
        display_name: "Maximum",
        description: "Largest good-quality value, stamped at the time it was recorded.",
        result_timestamp: TimestampSemantics::SampleTime,
        result_quality: QualitySemantics::SkippedSamples,
    },
    AggregateDescriptor {
        function: AggregateFunction::Count,
        id: "COUNT",
        display_name: "Count",
        description: "Number of good-quality samples in the interval.",
        result_timestamp: TimestampSemantics::IntervalStart,
        result_quality: QualitySemantics::SkippedSamples,
    },
    AggregateDescriptor {
        function: AggregateFunction::Range,
        id: "RANGE",
        display_name: "Range",
        description: "Absolute difference between the largest and smallest good-quality values.",
        result_timestamp: TimestampSemantics::IntervalStart,
        result_quality: QualitySemantics::SkippedSamples,
    },
    AggregateDescriptor {
        function: AggregateFunction::Delta,
        id: "DELTA",
        display_name: "Delta",
        description: "Last good-quality value minus the first, in time order.",
        result_timestamp: TimestampSemantics::IntervalStart,
        result_quality: QualitySemantics::SkippedSamples,
    },
    AggregateDescriptor {
        function: AggregateFunction::PercentGood,
        id: "PERCENTGOOD",
        display_name: "Percent Good",
        description: "Percentage of samples in the interval with good quality.",
        result_timestamp: TimestampSemantics::IntervalStart,
        result_quality: QualitySemantics::AlwaysGood,
    },
    AggregateDescriptor {
        function: AggregateFunction::PercentBad,
        id: "PERCENTBAD",
        display_name: "Percent Bad",
        description: "Percentage of samples in the interval without good quality.",
        result_timestamp: TimestampSemantics::IntervalStart,
        result_quality: QualitySemantics::AlwaysGood,
    },
    AggregateDescriptor {
        function: AggregateFunction::Interp,
        id: "INTERP",
        display_name: "Interpolated",
        description: "Value linearly interpolated at the interval start from the nearest samples on either side.",
        result_timestamp: TimestampSemantics::IntervalStart,
        result_quality: QualitySemantics::WorstOfBrackets,
    },
    AggregateDescriptor {
        function: AggregateFunction::Variance,
        id: "VARIANCE",
        display_name: "Variance",
        description: "Population variance of the good-quality values in the interval.",
        result_timestamp: TimestampSemantics::IntervalStart,
        result_quality: QualitySemantics::SkippedSamples,
    },
    AggregateDescriptor {
        function: AggregateFunction::StdDev,
        id: "STDDEV",
        display_name: "Standard Deviation",
        description: "Population standard deviation of the good-quality values in the interval.",
        result_timestamp: TimestampSemantics::IntervalStart,
        result_quality: QualitySemantics::SkippedSamples,
    },
];

/// Descriptor of `function`.
pub fn descriptor(function: AggregateFunction) -> &'static AggregateDescriptor {
    // Table order matches AggregateFunction::ALL
    let index = AggregateFunction::ALL
        .iter()
        .position(|f| *f == function)
        .unwrap_or_default();
    &AGGREGATE_FUNCTIONS[index]
}
