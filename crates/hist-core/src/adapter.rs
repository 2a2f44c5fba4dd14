//! Adapter capability traits.
//!
//! This module defines the fine-grained capabilities a wrapped data source
//! can offer. Instead of one monolithic adapter trait, an adapter implements
//! the capabilities it actually supports:
//!
//! - A process historian might implement: `TagResolver + RawHistory + SnapshotRead`
//! - A PLC gateway might implement: `TagResolver + SnapshotRead + NativePush`
//! - A CSV archive might implement: `TagResolver + RawHistory`
//!
//! The set is captured once, at construction, in [`AdapterCapabilities`].
//! Callers never probe an adapter per call; a missing capability fails the
//! call with [`HistError::NotSupported`] before any work starts.
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors; the façade maps them to
//!   [`HistError::SourceUnavailable`] for the affected tag only
//! - Focuses on ONE thing

use crate::cancel::CancelScope;
use crate::error::{HistError, HistResult};
use crate::request::BoundaryType;
use crate::tag::{Tag, TagKey};
use crate::types::{Sample, TagValue};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use std::fmt;
use std::sync::Arc;

/// Stream of raw samples for one tag, in non-decreasing timestamp order.
pub type SampleStream = BoxStream<'static, Result<Sample>>;

/// Stream of `(tag, sample)` pairs from snapshot reads or push events.
pub type TagValueStream = BoxStream<'static, Result<TagValue>>;

/// Parameters of one raw read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawRead {
    /// Range start.
    pub utc_start: DateTime<Utc>,
    /// Range end.
    pub utc_end: DateTime<Utc>,
    /// Edge treatment.
    pub boundary: BoundaryType,
    /// Maximum samples to return (0 = unlimited).
    pub sample_limit: usize,
}

/// Capability: Tag Resolution
///
/// Maps an id or a name to a [`Tag`]. Both lookups are case-insensitive.
///
/// # Contract
/// - `Ok(None)` means the identifier is unknown; batch queries skip it
/// - `Err` means the lookup itself failed
#[async_trait]
pub trait TagResolver: Send + Sync {
    /// Resolve an id or name.
    async fn resolve_tag(&self, id_or_name: &str) -> Result<Option<Tag>>;
}

/// Capability: Raw History
///
/// Produces recorded samples for one tag over a time range.
///
/// # Contract
/// - Samples arrive in non-decreasing timestamp order
/// - The stream may be unbounded in the source; the façade stops pulling
///   once the boundary or limit is reached, and drops the stream on cancel
/// - Implementations doing blocking work should watch `cancel`
#[async_trait]
pub trait RawHistory: Send + Sync {
    /// Open a raw sample stream for `tag_id`.
    async fn read_raw(&self, tag_id: &str, read: RawRead, cancel: CancelScope)
        -> Result<SampleStream>;
}

/// Capability: Snapshot Read
///
/// Returns the current value of each requested tag.
#[async_trait]
pub trait SnapshotRead: Send + Sync {
    /// Read current values for `tag_ids`.
    async fn read_snapshot(&self, tag_ids: &[String]) -> Result<TagValueStream>;
}

/// Capability: Native Push
///
/// Adapter-driven value events. When present it replaces the polling bridge.
///
/// # Contract
/// - `open_stream()` is called exactly once, when the service starts
/// - `subscribe()`/`unsubscribe()` are reference-counted by the fan-out and
///   called once per distinct topic
#[async_trait]
pub trait NativePush: Send + Sync {
    /// Open the single upstream event stream.
    async fn open_stream(&self) -> Result<TagValueStream>;

    /// Start delivering events for `topic`.
    async fn subscribe(&self, topic: &str) -> Result<()>;

    /// Stop delivering events for `topic`.
    async fn unsubscribe(&self, topic: &str) -> Result<()>;

    /// Whether an event belongs to `topic`.
    ///
    /// # Default Implementation
    ///
    /// Case-insensitive comparison of the topic with the event's tag id.
    fn matches(&self, topic: &str, value: &TagValue) -> bool {
        TagKey::same_identifier(topic, &value.tag_id)
    }
}

/// The statically-typed capability set of one adapter instance.
///
/// # Example
///
/// ```rust,ignore
/// let caps = AdapterCapabilities::new("plant-historian", adapter.clone())
///     .with_raw_history(adapter.clone())
///     .with_snapshot(adapter);
/// assert!(caps.supports_subscriptions());
/// ```
#[derive(Clone)]
pub struct AdapterCapabilities {
    /// Adapter instance name (used in logs).
    pub name: String,
    /// Tag resolution (always present).
    pub resolver: Arc<dyn TagResolver>,
    /// Raw history reads.
    pub raw: Option<Arc<dyn RawHistory>>,
    /// Snapshot reads.
    pub snapshot: Option<Arc<dyn SnapshotRead>>,
    /// Native push events.
    pub push: Option<Arc<dyn NativePush>>,
}

impl AdapterCapabilities {
    /// Create a capability set with only tag resolution.
    pub fn new(name: impl Into<String>, resolver: Arc<dyn TagResolver>) -> Self {
        Self {
            name: name.into(),
            resolver,
            raw: None,
            snapshot: None,
            push: None,
        }
    }

    /// Add raw history reads.
    pub fn with_raw_history(mut self, raw: Arc<dyn RawHistory>) -> Self {
        self.raw = Some(raw);
        self
    }

    /// Add snapshot reads.
    pub fn with_snapshot(mut self, snapshot: Arc<dyn SnapshotRead>) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    /// Add native push events.
    pub fn with_native_push(mut self, push: Arc<dyn NativePush>) -> Self {
        self.push = Some(push);
        self
    }

    /// Raw history, or `NotSupported`.
    pub fn require_raw(&self) -> HistResult<Arc<dyn RawHistory>> {
        self.raw
            .clone()
            .ok_or_else(|| HistError::NotSupported("raw history reads".into()))
    }

    /// Snapshot reads, or `NotSupported`.
    pub fn require_snapshot(&self) -> HistResult<Arc<dyn SnapshotRead>> {
        self.snapshot
            .clone()
            .ok_or_else(|| HistError::NotSupported("snapshot reads".into()))
    }

    /// Whether subscriptions can be served (native push or polling).
    pub fn supports_subscriptions(&self) -> bool {
        self.push.is_some() || self.snapshot.is_some()
    }

    /// Names of the supported capabilities.
    pub fn describe(&self) -> Vec<&'static str> {
        let mut caps = vec!["resolve"];
        if self.raw.is_some() {
            caps.push("raw_history");
        }
        if self.snapshot.is_some() {
            caps.push("snapshot");
        }
        if self.push.is_some() {
            caps.push("native_push");
        }
        caps
    }
}

impl fmt::Debug for AdapterCapabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterCapabilities")
            .field("name", &self.name)
            .field("capabilities", &self.describe())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EmptyResolver;

    #[async_trait]
    impl TagResolver for EmptyResolver {
        async fn resolve_tag(&self, _id_or_name: &str) -> Result<Option<Tag>> {
            Ok(None)
        }
    }

    #[test]
    fn test_missing_capabilities_report_not_supported() {
        let caps = AdapterCapabilities::new("empty", Arc::new(EmptyResolver));
        assert!(matches!(
            caps.require_raw(),
            Err(HistError::NotSupported(_))
        ));
        assert!(caps.require_snapshot().is_err());
        assert!(!caps.supports_subscriptions());
        assert_eq!(caps.describe(), vec!["resolve"]);
    }
}
