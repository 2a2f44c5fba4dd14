//! Polling push bridge.
//!
//! For adapters without native push, the bridge turns periodic snapshot
//! reads into an event stream the fan-out consumes exactly like a native
//! one. On every tick it reads the union of subscribed tags in one
//! snapshot call; an empty set skips the tick and a failed read is logged
//! and retried on the next tick.

use crate::source::TopicSource;
use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use futures::{StreamExt, TryStreamExt};
use hist_core::{SnapshotRead, TagKey, TagValue, TagValueStream};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Poll loop counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PollingStats {
    /// Snapshot reads performed.
    pub polls: u64,
    /// Ticks skipped because nothing was subscribed.
    pub skipped: u64,
    /// Snapshot reads that failed.
    pub failures: u64,
    /// Values forwarded downstream.
    pub values: u64,
}

#[derive(Default)]
struct Counters {
    polls: AtomicU64,
    skipped: AtomicU64,
    failures: AtomicU64,
    values: AtomicU64,
}

/// Snapshot-polling [`TopicSource`].
pub struct PollingBridge {
    snapshot: Arc<dyn SnapshotRead>,
    interval: Duration,
    topics: DashMap<TagKey, String>,
    counters: Counters,
}

impl PollingBridge {
    /// Poll `snapshot` every `interval`.
    pub fn new(snapshot: Arc<dyn SnapshotRead>, interval: Duration) -> Self {
        Self {
            snapshot,
            interval,
            topics: DashMap::new(),
            counters: Counters::default(),
        }
    }

    /// Poll period.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Currently subscribed tags, sorted.
    pub fn subscribed_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self
            .topics
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        tags.sort();
        tags
    }

    /// Run one poll cycle. `Ok(None)` means the tick was skipped.
    pub async fn poll_once(&self) -> Result<Option<Vec<TagValue>>> {
        let tags = self.subscribed_tags();
        if tags.is_empty() {
            self.counters.skipped.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }
        self.counters.polls.fetch_add(1, Ordering::Relaxed);
        let result = async {
            let stream = self.snapshot.read_snapshot(&tags).await?;
            stream.try_collect::<Vec<_>>().await
        }
        .await;
        match result {
            Ok(values) => {
                self.counters
                    .values
                    .fetch_add(values.len() as u64, Ordering::Relaxed);
                Ok(Some(values))
            }
            Err(error) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                Err(error)
            }
        }
    }

    /// Spawn the poll loop and return its event stream.
    ///
    /// The loop ends when `shutdown` fires or the stream is dropped.
    pub fn start(self: &Arc<Self>, capacity: usize, shutdown: CancellationToken) -> TagValueStream {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let bridge = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(bridge.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval = ?bridge.interval, "Polling bridge started");
            'poll: loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = tx.closed() => break,
                    _ = ticker.tick() => {}
                }
                match bridge.poll_once().await {
                    Ok(None) => {}
                    Ok(Some(values)) => {
                        for value in values {
                            if tx.send(Ok(value)).await.is_err() {
                                break 'poll;
                            }
                        }
                    }
                    Err(error) => warn!(error = %error, "Snapshot poll failed, retrying next tick"),
                }
            }
            info!("Polling bridge stopped");
        });
        ReceiverStream::new(rx).boxed()
    }

    /// Current counters.
    pub fn stats(&self) -> PollingStats {
        PollingStats {
            polls: self.counters.polls.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            values: self.counters.values.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl TopicSource for PollingBridge {
    async fn subscribe_topic(&self, topic: &str) -> Result<()> {
        self.topics.insert(TagKey::new(topic), topic.to_string());
        debug!(topic, "Polling topic added");
        Ok(())
    }

    async fn unsubscribe_topic(&self, topic: &str) -> Result<()> {
        self.topics.remove(&TagKey::new(topic));
        debug!(topic, "Polling topic removed");
        Ok(())
    }
}

impl fmt::Debug for PollingBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollingBridge")
            .field("interval", &self.interval)
            .field("topics", &self.topics.len())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use hist_core::{DataType, Sample, Tag};
    use hist_driver_mock::common::OP_READ_SNAPSHOT;
    use hist_driver_mock::{FaultConfig, FaultScenario, MockHistorian};

    fn mock() -> Arc<MockHistorian> {
        let mock = Arc::new(MockHistorian::new("poll"));
        mock.add_tag(Tag::new("TIC-101", "Reactor Temp", DataType::Float64));
        mock.add_tag(Tag::new("FIC-200", "Feed Flow", DataType::Float64));
        mock.append_samples("TIC-101", [Sample::good(Utc::now(), 71.5)])
            .unwrap();
        mock.append_samples("FIC-200", [Sample::good(Utc::now(), 3.0)])
            .unwrap();
        mock
    }

    #[tokio::test]
    async fn test_empty_subscription_set_skips_poll() {
        let mock = mock();
        let bridge = PollingBridge::new(mock.clone(), Duration::from_secs(1));

        assert!(bridge.poll_once().await.unwrap().is_none());
        assert_eq!(mock.calls().read_snapshot, 0);
        assert_eq!(bridge.stats().skipped, 1);
        assert_eq!(bridge.stats().polls, 0);
    }

    #[tokio::test]
    async fn test_poll_reads_union_once() {
        let mock = mock();
        let bridge = PollingBridge::new(mock.clone(), Duration::from_secs(1));
        bridge.subscribe_topic("TIC-101").await.unwrap();
        bridge.subscribe_topic("fic-200").await.unwrap();
        bridge.subscribe_topic("tic-101").await.unwrap();

        let values = bridge.poll_once().await.unwrap().unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(mock.calls().read_snapshot, 1);

        bridge.unsubscribe_topic("FIC-200").await.unwrap();
        bridge.unsubscribe_topic("TIC-101").await.unwrap();
        assert!(bridge.subscribed_tags().is_empty());
    }

    #[tokio::test]
    async fn test_failed_poll_does_not_stop_bridge() {
        let mock = mock();
        mock.set_faults(FaultConfig::scenario(FaultScenario::FailNext {
            operation: OP_READ_SNAPSHOT,
            count: 1,
        }));
        let bridge = Arc::new(PollingBridge::new(mock.clone(), Duration::from_millis(10)));
        bridge.subscribe_topic("TIC-101").await.unwrap();

        let shutdown = CancellationToken::new();
        let mut events = bridge.start(8, shutdown.clone());
        let value = tokio::time::timeout(Duration::from_secs(2), events.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(value.tag_id, "TIC-101");

        let stats = bridge.stats();
        assert_eq!(stats.failures, 1);
        assert!(stats.polls >= 2);

        shutdown.cancel();
        let end = tokio::time::timeout(Duration::from_secs(2), async {
            while events.next().await.is_some() {}
        })
        .await;
        assert!(end.is_ok());
    }
}
