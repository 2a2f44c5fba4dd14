//! `hist-core`
//!
//! Core vocabulary and trait definitions for the rust-historian workspace.
//!
//! This crate provides the building blocks shared by the processing engine,
//! the historical query façade and the real-time subscription layer. It holds
//! no aggregation or fan-out logic of its own.
//!
//! ## Key Types
//!
//! - [`Sample`]: Timestamped, quality-tagged [`Value`]
//! - [`Quality`]: Three-state trust indicator (`Good < Uncertain < Bad`)
//! - [`Tag`] / [`TagKey`]: Measurement point and its case-insensitive lookup key
//! - [`AggregateBucket`]: One processed value for one interval and function
//! - [`RawQueryRequest`], [`AggregationRequest`], [`PlotRequest`], [`AtTimesRequest`]:
//!   Validated query descriptions
//! - [`HistError`]: Error taxonomy shared by every crate
//!
//! ## Adapter Capabilities
//!
//! A wrapped data source exposes a statically-typed set of capabilities
//! ([`adapter::AdapterCapabilities`]) resolved once at construction:
//!
//! - [`adapter::TagResolver`]: id-or-name lookup (always required)
//! - [`adapter::RawHistory`]: raw samples over a time range
//! - [`adapter::SnapshotRead`]: current values for a set of tags
//! - [`adapter::NativePush`]: adapter-driven value events
//!
//! ## Example
//!
//! ```rust
//! use hist_core::{Quality, Sample, Value};
//! use chrono::Utc;
//!
//! let sample = Sample::new(Utc::now(), Value::Float64(21.5), Quality::Good);
//! assert_eq!(sample.value.as_f64(), Some(21.5));
//! assert_eq!(Quality::Good.worst(Quality::Bad), Quality::Bad);
//! ```

pub mod adapter;
pub mod cancel;
pub mod error;
pub mod function;
pub mod limits;
pub mod request;
pub mod tag;
pub mod types;

pub use adapter::{
    AdapterCapabilities, NativePush, RawHistory, RawRead, SampleStream, SnapshotRead,
    TagResolver, TagValueStream,
};
pub use cancel::CancelScope;
pub use error::{HistError, HistResult};
pub use function::AggregateFunction;
pub use limits::QueryLimits;
pub use request::{
    AggregationRequest, AtTimesRequest, BoundaryType, PlotRequest, RawQueryRequest,
};
pub use tag::{DataType, Tag, TagKey};
pub use types::{AggregateBucket, EnumState, Quality, Sample, TagValue, Value};
