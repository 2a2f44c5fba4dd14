//! `hist-realtime`
//!
//! Real-time side of the historian:
//!
//! - [`SubscriptionRegistry`]: per-connection subscriptions and heartbeats
//! - [`ConnectionReaper`]: periodic eviction of idle connections
//! - [`TopicFanout`]: reference-counted topic channels over one upstream
//! - [`PollingBridge`]: snapshot polling for adapters without native push
//!
//! The fan-out consumes a single [`hist_core::TagValueStream`], either the
//! adapter's native push stream or the bridge's poll output, and never
//! blocks on a slow consumer.

pub mod fanout;
pub mod polling;
pub mod reaper;
pub mod registry;
pub mod source;

pub use fanout::{FanoutConfig, FanoutStats, TopicChannel, TopicFanout};
pub use polling::{PollingBridge, PollingStats};
pub use reaper::{ConnectionEvent, ConnectionReaper};
pub use registry::{
    Subscription, SubscriptionId, SubscriptionInfo, SubscriptionRegistry, SubscriptionState,
};
pub use source::{NativeTopicSource, TopicSource};
