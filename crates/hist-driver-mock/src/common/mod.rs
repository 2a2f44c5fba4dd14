//! Shared utilities for the mock adapter.

pub mod faults;
pub mod rng;

pub use faults::{
    FaultConfig, FaultScenario, OP_READ_RAW, OP_READ_SNAPSHOT, OP_RESOLVE, OP_SUBSCRIBE,
};
pub use rng::MockRng;
