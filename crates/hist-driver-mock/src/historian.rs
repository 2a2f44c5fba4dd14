//! In-memory mock historian.
//!
//! Stores tags and their recorded samples in memory and implements every
//! adapter capability over them:
//!
//! - tag resolution by id or name (both case-insensitive)
//! - raw reads honouring the boundary type and sample limit
//! - snapshot reads returning the latest recorded sample of each tag
//! - optional native push backed by a broadcast channel
//!
//! Fault injection ([`FaultConfig`]) and call counters make it usable as the
//! collaborator in service-level tests.

use crate::common::faults::{OP_READ_RAW, OP_READ_SNAPSHOT, OP_RESOLVE, OP_SUBSCRIBE};
use crate::common::{FaultConfig, MockRng};
use crate::waveform::SyntheticSeries;
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as TimeDelta, Utc};
use futures::{stream, StreamExt};
use hist_core::{
    AdapterCapabilities, BoundaryType, CancelScope, NativePush, RawHistory, RawRead, Sample,
    SampleStream, SnapshotRead, Tag, TagKey, TagResolver, TagValue, TagValueStream,
};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::debug;

/// Snapshot of the adapter call counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    /// `resolve_tag` calls.
    pub resolve: u64,
    /// `read_raw` calls.
    pub read_raw: u64,
    /// `read_snapshot` calls.
    pub read_snapshot: u64,
    /// Native push `subscribe` calls.
    pub subscribe: u64,
    /// Native push `unsubscribe` calls.
    pub unsubscribe: u64,
}

#[derive(Debug, Default)]
struct Counters {
    resolve: AtomicU64,
    read_raw: AtomicU64,
    read_snapshot: AtomicU64,
    subscribe: AtomicU64,
    unsubscribe: AtomicU64,
}

#[derive(Debug, Default)]
struct Store {
    /// Tags by id key.
    tags: HashMap<TagKey, Tag>,
    /// Name key to id key.
    names: HashMap<TagKey, TagKey>,
    /// Samples by id key, sorted by timestamp.
    history: HashMap<TagKey, Vec<Sample>>,
}

impl Store {
    fn lookup(&self, id_or_name: &str) -> Option<&Tag> {
        let key = TagKey::new(id_or_name);
        self.tags
            .get(&key)
            .or_else(|| self.names.get(&key).and_then(|id| self.tags.get(id)))
    }
}

/// In-memory adapter implementing every capability.
pub struct MockHistorian {
    name: String,
    store: RwLock<Store>,
    faults: RwLock<FaultConfig>,
    push: Option<broadcast::Sender<TagValue>>,
    push_topics: Mutex<HashSet<TagKey>>,
    counters: Counters,
    rng: MockRng,
}

impl MockHistorian {
    /// Empty historian without native push.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            store: RwLock::new(Store::default()),
            faults: RwLock::new(FaultConfig::none()),
            push: None,
            push_topics: Mutex::new(HashSet::new()),
            counters: Counters::default(),
            rng: MockRng::new(None),
        }
    }

    /// Enable native push with a broadcast buffer of `capacity` events.
    pub fn with_native_push(mut self, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        self.push = Some(tx);
        self
    }

    /// Seed the RNG used for synthetic data.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = MockRng::new(Some(seed));
        self
    }

    /// Install a fault configuration.
    pub fn with_faults(self, faults: FaultConfig) -> Self {
        self.set_faults(faults);
        self
    }

    /// Replace the fault configuration at runtime.
    pub fn set_faults(&self, faults: FaultConfig) {
        *self.faults.write() = faults;
    }

    /// Register (or replace) a tag.
    pub fn add_tag(&self, tag: Tag) {
        let mut store = self.store.write();
        let id = tag.id_key();
        if let Some(previous) = store.tags.get(&id) {
            let old_name = previous.name_key();
            store.names.remove(&old_name);
        }
        store.names.insert(tag.name_key(), id.clone());
        store.history.entry(id.clone()).or_default();
        store.tags.insert(id, tag);
    }

    /// Append recorded samples to a tag, keeping history time-ordered.
    pub fn append_samples(
        &self,
        id_or_name: &str,
        samples: impl IntoIterator<Item = Sample>,
    ) -> Result<()> {
        let mut store = self.store.write();
        let id = store
            .lookup(id_or_name)
            .map(Tag::id_key)
            .ok_or_else(|| anyhow!("unknown tag '{id_or_name}'"))?;
        let history = store.history.entry(id).or_default();
        history.extend(samples);
        // Stable sort keeps insertion order for equal timestamps
        history.sort_by_key(|s| s.timestamp);
        Ok(())
    }

    /// Append `count` synthetic samples, `step` apart, starting at `start`.
    pub fn append_synthetic(
        &self,
        id_or_name: &str,
        series: &SyntheticSeries,
        start: DateTime<Utc>,
        step: TimeDelta,
        count: usize,
    ) -> Result<()> {
        let samples = series.generate(start, step, count, &self.rng);
        self.append_samples(id_or_name, samples)
    }

    /// Recorded samples of a tag (empty if unknown).
    pub fn history(&self, id_or_name: &str) -> Vec<Sample> {
        let store = self.store.read();
        store
            .lookup(id_or_name)
            .and_then(|tag| store.history.get(&tag.id_key()))
            .cloned()
            .unwrap_or_default()
    }

    /// Publish a push event. Returns the number of live upstream readers.
    pub fn publish(&self, value: TagValue) -> usize {
        match &self.push {
            Some(tx) => tx.send(value).unwrap_or(0),
            None => 0,
        }
    }

    /// Topics currently subscribed through [`NativePush::subscribe`].
    pub fn push_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self
            .push_topics
            .lock()
            .iter()
            .map(|k| k.as_str().to_string())
            .collect();
        topics.sort();
        topics
    }

    /// Adapter call counters.
    pub fn calls(&self) -> CallCounts {
        CallCounts {
            resolve: self.counters.resolve.load(Ordering::Relaxed),
            read_raw: self.counters.read_raw.load(Ordering::Relaxed),
            read_snapshot: self.counters.read_snapshot.load(Ordering::Relaxed),
            subscribe: self.counters.subscribe.load(Ordering::Relaxed),
            unsubscribe: self.counters.unsubscribe.load(Ordering::Relaxed),
        }
    }

    /// Capability set of this instance.
    pub fn capabilities(self: &Arc<Self>) -> AdapterCapabilities {
        let caps = AdapterCapabilities::new(self.name.clone(), self.clone())
            .with_raw_history(self.clone())
            .with_snapshot(self.clone());
        if self.push.is_some() {
            caps.with_native_push(self.clone())
        } else {
            caps
        }
    }

    /// Capability set with raw history only (no subscriptions possible).
    pub fn history_only_capabilities(self: &Arc<Self>) -> AdapterCapabilities {
        AdapterCapabilities::new(self.name.clone(), self.clone()).with_raw_history(self.clone())
    }

    fn faults(&self) -> FaultConfig {
        self.faults.read().clone()
    }

    fn select_raw(history: &[Sample], read: &RawRead) -> Vec<Sample> {
        let first_inside = history.partition_point(|s| s.timestamp < read.utc_start);
        let after_end = history.partition_point(|s| s.timestamp <= read.utc_end);

        let (from, to) = match read.boundary {
            BoundaryType::Inside => (first_inside, after_end),
            BoundaryType::Outside => (
                first_inside.saturating_sub(1),
                (after_end + 1).min(history.len()),
            ),
        };
        let selected = history.get(from..to).unwrap_or_default();
        let take = if read.sample_limit == 0 {
            selected.len()
        } else {
            read.sample_limit.min(selected.len())
        };
        selected[..take].to_vec()
    }
}

impl std::fmt::Debug for MockHistorian {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockHistorian")
            .field("name", &self.name)
            .field("tags", &self.store.read().tags.len())
            .field("native_push", &self.push.is_some())
            .finish()
    }
}

#[async_trait]
impl TagResolver for MockHistorian {
    async fn resolve_tag(&self, id_or_name: &str) -> Result<Option<Tag>> {
        self.counters.resolve.fetch_add(1, Ordering::Relaxed);
        self.faults().check_operation(OP_RESOLVE)?;
        Ok(self.store.read().lookup(id_or_name).cloned())
    }
}

#[async_trait]
impl RawHistory for MockHistorian {
    async fn read_raw(&self, tag_id: &str, read: RawRead, cancel: CancelScope) -> Result<SampleStream> {
        self.counters.read_raw.fetch_add(1, Ordering::Relaxed);
        let faults = self.faults();
        faults.check_operation(OP_READ_RAW)?;
        faults.check_tag(tag_id)?;

        let samples = {
            let store = self.store.read();
            let tag = store
                .lookup(tag_id)
                .ok_or_else(|| anyhow!("unknown tag '{tag_id}'"))?;
            let history = store.history.get(&tag.id_key()).map(Vec::as_slice).unwrap_or_default();
            Self::select_raw(history, &read)
        };
        debug!(tag = tag_id, samples = samples.len(), "Mock raw read");

        let items: Vec<Result<Sample>> = match faults.stream_break(tag_id) {
            Some(count) => samples
                .into_iter()
                .take(count)
                .map(Ok)
                .chain(std::iter::once(Err(anyhow!(
                    "raw stream for '{tag_id}' broke after {count} samples"
                ))))
                .collect(),
            None => samples.into_iter().map(Ok).collect(),
        };
        let stopped = async move { cancel.cancelled().await };
        Ok(stream::iter(items).take_until(stopped).boxed())
    }
}

#[async_trait]
impl SnapshotRead for MockHistorian {
    async fn read_snapshot(&self, tag_ids: &[String]) -> Result<TagValueStream> {
        self.counters.read_snapshot.fetch_add(1, Ordering::Relaxed);
        self.faults().check_operation(OP_READ_SNAPSHOT)?;

        let store = self.store.read();
        let values: Vec<Result<TagValue>> = tag_ids
            .iter()
            .filter_map(|requested| {
                let tag = store.lookup(requested)?;
                let latest = store.history.get(&tag.id_key())?.last()?;
                Some(Ok(TagValue::new(tag.id.clone(), latest.clone())))
            })
            .collect();
        Ok(stream::iter(values).boxed())
    }
}

#[async_trait]
impl NativePush for MockHistorian {
    async fn open_stream(&self) -> Result<TagValueStream> {
        let Some(tx) = &self.push else {
            bail!("native push is not enabled on '{}'", self.name);
        };
        let events = BroadcastStream::new(tx.subscribe())
            .filter_map(|event| futures::future::ready(event.ok().map(Ok)));
        Ok(events.boxed())
    }

    async fn subscribe(&self, topic: &str) -> Result<()> {
        self.counters.subscribe.fetch_add(1, Ordering::Relaxed);
        self.faults().check_operation(OP_SUBSCRIBE)?;
        self.push_topics.lock().insert(TagKey::new(topic));
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<()> {
        self.counters.unsubscribe.fetch_add(1, Ordering::Relaxed);
        self.push_topics.lock().remove(&TagKey::new(topic));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::FaultScenario;
    use chrono::TimeZone;
    use futures::TryStreamExt;
    use hist_core::DataType;
    use tokio_util::sync::CancellationToken;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + TimeDelta::seconds(secs)
    }

    fn historian() -> MockHistorian {
        let mock = MockHistorian::new("mock");
        mock.add_tag(Tag::new("TIC-101", "Reactor Temperature", DataType::Float64));
        mock.append_samples(
            "TIC-101",
            (0..10).map(|i| Sample::good(at(i * 10), i as f64)),
        )
        .unwrap();
        mock
    }

    fn read(start: i64, end: i64, boundary: BoundaryType, limit: usize) -> RawRead {
        RawRead {
            utc_start: at(start),
            utc_end: at(end),
            boundary,
            sample_limit: limit,
        }
    }

    #[tokio::test]
    async fn test_resolve_by_id_and_name_case_insensitive() {
        let mock = historian();
        for key in ["TIC-101", "tic-101", "reactor temperature", "REACTOR TEMPERATURE"] {
            let tag = mock.resolve_tag(key).await.unwrap();
            assert_eq!(tag.map(|t| t.id), Some("TIC-101".to_string()), "key {key}");
        }
        assert!(mock.resolve_tag("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_raw_read_boundaries() {
        let mock = historian();
        let inside: Vec<Sample> = mock
            .read_raw("tic-101", read(15, 40, BoundaryType::Inside, 0), CancelScope::detached())
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(inside.len(), 3);
        assert_eq!(inside[0].timestamp, at(20));

        let outside: Vec<Sample> = mock
            .read_raw("tic-101", read(15, 40, BoundaryType::Outside, 0), CancelScope::detached())
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(outside.first().map(|s| s.timestamp), Some(at(10)));
        assert_eq!(outside.last().map(|s| s.timestamp), Some(at(50)));

        let limited: Vec<Sample> = mock
            .read_raw("tic-101", read(0, 90, BoundaryType::Inside, 4), CancelScope::detached())
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(limited.len(), 4);
    }

    #[tokio::test]
    async fn test_cancelled_scope_ends_raw_stream() {
        let mock = historian();
        let caller = CancellationToken::new();
        caller.cancel();
        let scope = CancelScope::new(caller, CancellationToken::new());
        let samples: Vec<Sample> = mock
            .read_raw("TIC-101", read(0, 90, BoundaryType::Inside, 0), scope)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert!(samples.is_empty());
    }

    #[tokio::test]
    async fn test_injected_stream_break() {
        let mock = historian().with_faults(FaultConfig::scenario(FaultScenario::BreakStreamAfter {
            tag: "TIC-101".into(),
            count: 2,
        }));
        let items: Vec<Result<Sample>> = mock
            .read_raw("TIC-101", read(0, 90, BoundaryType::Inside, 0), CancelScope::detached())
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(items.len(), 3);
        assert!(items[2].is_err());
    }

    #[tokio::test]
    async fn test_snapshot_returns_latest_and_skips_unknown() {
        let mock = historian();
        let values: Vec<TagValue> = mock
            .read_snapshot(&["tic-101".to_string(), "nope".to_string()])
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].tag_id, "TIC-101");
        assert_eq!(values[0].sample.timestamp, at(90));
    }

    #[tokio::test]
    async fn test_native_push_round_trip() {
        let mock = Arc::new(historian().with_native_push(16));
        let caps = mock.capabilities();
        assert_eq!(
            caps.describe(),
            vec!["resolve", "raw_history", "snapshot", "native_push"]
        );

        let mut events = mock.open_stream().await.unwrap();
        mock.subscribe("TIC-101").await.unwrap();
        assert_eq!(mock.push_topics(), vec!["tic-101".to_string()]);

        mock.publish(TagValue::new("TIC-101", Sample::good(at(100), 1.5)));
        let event = events.next().await.unwrap().unwrap();
        assert_eq!(event.sample.value.as_f64(), Some(1.5));

        mock.unsubscribe("tic-101").await.unwrap();
        assert!(mock.push_topics().is_empty());
        assert_eq!(mock.calls().subscribe, 1);
        assert_eq!(mock.calls().unsubscribe, 1);
    }

    #[tokio::test]
    async fn test_push_disabled_without_native_push() {
        let mock = Arc::new(historian());
        assert!(mock.capabilities().push.is_none());
        assert!(mock.open_stream().await.is_err());
        assert_eq!(mock.publish(TagValue::new("TIC-101", Sample::good(at(0), 1.0))), 0);
    }
}
