//! Mock Historian Adapter for rust-historian
//!
//! This crate provides an in-memory data source for testing and demos
//! without a real process historian behind it.
//!
//! - [`MockHistorian`] - in-memory tags and history implementing every
//!   adapter capability (resolution, raw history, snapshot, native push)
//! - [`FaultConfig`] - per-operation and per-tag fault injection
//! - [`SyntheticSeries`] - seeded sine/ramp/constant generator with noise and
//!   bad-quality injection
//!
//! # Example
//!
//! ```rust,ignore
//! use hist_driver_mock::{MockHistorian, SyntheticSeries, Waveform};
//!
//! let mock = Arc::new(MockHistorian::new("plant").with_seed(42));
//! mock.add_tag(Tag::new("FIC-200", "Feed Flow", DataType::Float64));
//! mock.append_synthetic("FIC-200", &SyntheticSeries::clean(Waveform::Constant { level: 3.0 }),
//!     start, TimeDelta::seconds(1), 3600)?;
//! let historian = Historian::start(mock.capabilities(), config).await?;
//! ```

pub mod common;
mod historian;
mod waveform;

pub use common::{FaultConfig, FaultScenario, MockRng};
pub use historian::{CallCounts, MockHistorian};
pub use waveform::{SyntheticSeries, Waveform};
