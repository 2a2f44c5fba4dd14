//! `hist-processing`
//!
//! Pure, streaming transformations from raw samples to processed results.
//!
//! Every processor here is a small state machine that is *offered* one raw
//! sample at a time and hands back whatever output became final. None of
//! them performs I/O or needs a global pass over the time range, so the
//! query façade can drive them from an async raw stream, stop between any
//! two outputs on cancellation, and never emit a partially computed result.
//!
//! - [`Resampler`]: fixed-interval statistical aggregation (§ aggregate table
//!   in [`aggregate::AGGREGATE_FUNCTIONS`])
//! - [`PlotSelector`]: representative-sample down-sampling for charts
//! - [`AtTimesInterpolator`]: values at arbitrary caller-supplied instants
//! - [`BoundaryFilter`]: inside/outside range trimming and per-tag limits
//!
//! Synchronous iterator conveniences ([`resample`], [`select_plot_samples`],
//! [`values_at_times`]) wrap the same state machines for in-memory data.

pub mod aggregate;
pub mod boundary;
pub mod grid;
pub mod interpolate;
pub mod plot;
pub mod resampler;

pub use aggregate::{
    descriptor, AggregateDescriptor, QualitySemantics, TimestampSemantics, AGGREGATE_FUNCTIONS,
};
pub use boundary::BoundaryFilter;
pub use grid::IntervalGrid;
pub use interpolate::{interpolate_at, values_at_times, AtTimesInterpolator};
pub use plot::{select_plot_samples, PlotSelector};
pub use resampler::{resample, ResampleStep, Resampler};
