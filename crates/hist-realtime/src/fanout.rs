//! Topic fan-out.
//!
//! Topics are sharded across a fixed number of owner tasks. Each shard owns
//! the channel lists and reference counts of its topics and receives
//! attach, detach and deliver commands over an unbounded channel, so there
//! are no locks around the topic maps.
//!
//! Because every attach and detach for one topic is processed by the same
//! owner, in order, the upstream subscription never flaps: the first attach
//! subscribes, the last detach unsubscribes, and a create racing with the
//! last dispose is simply serialized behind it.
//!
//! Upstream calls do not run on the owner. Each shard has a worker that
//! executes subscribe and unsubscribe calls in the order the owner issued
//! them, so delivery to other topics continues while a slow subscribe is in
//! flight. Creates for that topic wait for the call; creates for other
//! topics of the same shard queue behind it on the worker.
//!
//! Delivery is best effort per channel: a full channel drops the value and
//! counts the drop instead of stalling other consumers.

use crate::source::TopicSource;
use anyhow::{anyhow, Context, Result};
use futures::{Stream, StreamExt};
use hist_core::limits::{DEFAULT_FANOUT_SHARDS, DEFAULT_TOPIC_CHANNEL_CAPACITY};
use hist_core::{HistError, HistResult, TagKey, TagValue, TagValueStream};
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Sizing of the fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanoutConfig {
    /// Number of owner tasks.
    pub shards: usize,
    /// Buffer of each topic channel.
    pub channel_capacity: usize,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            shards: DEFAULT_FANOUT_SHARDS,
            channel_capacity: DEFAULT_TOPIC_CHANNEL_CAPACITY,
        }
    }
}

/// Delivery counters summed across shards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FanoutStats {
    /// Topics with at least one live channel.
    pub topics: usize,
    /// Live channels.
    pub channels: usize,
    /// Values written into a channel.
    pub delivered: u64,
    /// Values dropped because a channel was full.
    pub dropped: u64,
}

impl FanoutStats {
    fn merge(mut self, other: FanoutStats) -> Self {
        self.topics += other.topics;
        self.channels += other.channels;
        self.delivered += other.delivered;
        self.dropped += other.dropped;
        self
    }
}

struct ChannelSlot {
    tx: mpsc::Sender<TagValue>,
    dropped: Arc<AtomicU64>,
}

enum ShardCommand {
    Attach {
        key: TagKey,
        topic: String,
        pending: PendingAttach,
    },
    Detach {
        key: TagKey,
        channel: u64,
    },
    Deliver(Arc<TagValue>),
    Stats(oneshot::Sender<FanoutStats>),
    Subscribed {
        key: TagKey,
        result: Result<()>,
    },
    Released {
        key: TagKey,
    },
}

/// Upstream calls, executed in issue order by the shard's worker.
enum UpstreamOp {
    Subscribe {
        key: TagKey,
        topic: String,
    },
    Unsubscribe {
        key: TagKey,
        topic: String,
    },
    Stats {
        stats: FanoutStats,
        reply: oneshot::Sender<FanoutStats>,
    },
}

struct PendingAttach {
    channel: u64,
    slot: ChannelSlot,
    ack: oneshot::Sender<Result<()>>,
}

struct TopicEntry {
    topic: String,
    subscribed: bool,
    channels: HashMap<u64, ChannelSlot>,
    waiting: Vec<PendingAttach>,
}

/// Owner of one slice of the topic space.
struct Shard {
    index: usize,
    source: Arc<dyn TopicSource>,
    upstream: mpsc::UnboundedSender<UpstreamOp>,
    topics: HashMap<TagKey, TopicEntry>,
    /// Topics whose upstream unsubscribe is still in flight.
    releasing: HashMap<TagKey, usize>,
    delivered: u64,
    dropped: u64,
}

impl Shard {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<ShardCommand>,
        shutdown: CancellationToken,
    ) {
        loop {
            let command = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
            };
            match command {
                ShardCommand::Attach {
                    key,
                    topic,
                    pending,
                } => self.attach(key, topic, pending),
                ShardCommand::Detach { key, channel } => self.detach(&key, channel),
                ShardCommand::Deliver(value) => self.deliver(&value),
                ShardCommand::Stats(reply) => {
                    let stats = self.stats();
                    // Routed through the worker so earlier upstream calls finish first.
                    if let Err(mpsc::error::SendError(UpstreamOp::Stats { stats, reply })) =
                        self.upstream.send(UpstreamOp::Stats { stats, reply })
                    {
                        let _ = reply.send(stats);
                    }
                }
                ShardCommand::Subscribed { key, result } => self.subscribed(key, result),
                ShardCommand::Released { key } => self.released(&key),
            }
        }
        debug!(
            shard = self.index,
            topics = self.topics.len(),
            "Fan-out shard stopped"
        );
    }

    fn attach(&mut self, key: TagKey, topic: String, pending: PendingAttach) {
        match self.topics.get_mut(&key) {
            Some(entry) if entry.subscribed => {
                // A creator that stopped waiting would never detach.
                if pending.ack.send(Ok(())).is_ok() {
                    entry.channels.insert(pending.channel, pending.slot);
                }
            }
            Some(entry) => entry.waiting.push(pending),
            None => {
                self.topics.insert(
                    key.clone(),
                    TopicEntry {
                        topic: topic.clone(),
                        subscribed: false,
                        channels: HashMap::new(),
                        waiting: vec![pending],
                    },
                );
                if self
                    .upstream
                    .send(UpstreamOp::Subscribe {
                        key: key.clone(),
                        topic,
                    })
                    .is_err()
                {
                    // Worker gone; dropping the acks reports the fan-out as stopped.
                    self.topics.remove(&key);
                }
            }
        }
    }

    fn subscribed(&mut self, key: TagKey, result: Result<()>) {
        match result {
            Ok(()) => {
                let Some(entry) = self.topics.get_mut(&key) else {
                    return;
                };
                entry.subscribed = true;
                for pending in entry.waiting.drain(..) {
                    if pending.ack.send(Ok(())).is_ok() {
                        entry.channels.insert(pending.channel, pending.slot);
                    }
                }
                if entry.channels.is_empty() {
                    self.release(&key);
                }
            }
            Err(error) => {
                let Some(entry) = self.topics.remove(&key) else {
                    return;
                };
                let message = format!("{error:#}");
                for pending in entry.waiting {
                    let _ = pending.ack.send(Err(anyhow!(message.clone())));
                }
            }
        }
    }

    fn detach(&mut self, key: &TagKey, channel: u64) {
        let Some(entry) = self.topics.get_mut(key) else {
            return;
        };
        if entry.channels.remove(&channel).is_none() || !entry.channels.is_empty() {
            return;
        }
        self.release(key);
    }

    fn release(&mut self, key: &TagKey) {
        let Some(entry) = self.topics.remove(key) else {
            return;
        };
        let op = UpstreamOp::Unsubscribe {
            key: key.clone(),
            topic: entry.topic,
        };
        if self.upstream.send(op).is_ok() {
            *self.releasing.entry(key.clone()).or_default() += 1;
        }
    }

    fn released(&mut self, key: &TagKey) {
        if let Some(count) = self.releasing.get_mut(key) {
            *count -= 1;
            if *count == 0 {
                self.releasing.remove(key);
            }
        }
    }

    fn deliver(&mut self, value: &TagValue) {
        for entry in self.topics.values() {
            if !self.source.matches(&entry.topic, value) {
                continue;
            }
            for slot in entry.channels.values() {
                match slot.tx.try_send(value.clone()) {
                    Ok(()) => self.delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        slot.dropped.fetch_add(1, Ordering::Relaxed);
                        self.dropped += 1;
                    }
                    // Receiver gone; its detach is already queued.
                    Err(TrySendError::Closed(_)) => {}
                }
            }
        }
    }

    fn stats(&self) -> FanoutStats {
        let topics: HashSet<&TagKey> = self.topics.keys().chain(self.releasing.keys()).collect();
        FanoutStats {
            topics: topics.len(),
            channels: self.topics.values().map(|entry| entry.channels.len()).sum(),
            delivered: self.delivered,
            dropped: self.dropped,
        }
    }
}

/// Runs one shard's upstream calls so a slow source never stalls delivery.
async fn run_upstream(
    index: usize,
    source: Arc<dyn TopicSource>,
    mut ops: mpsc::UnboundedReceiver<UpstreamOp>,
    shard: mpsc::WeakUnboundedSender<ShardCommand>,
    shutdown: CancellationToken,
) {
    let notify = |command: ShardCommand| {
        if let Some(shard) = shard.upgrade() {
            let _ = shard.send(command);
        }
    };
    loop {
        let op = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            op = ops.recv() => match op {
                Some(op) => op,
                None => break,
            },
        };
        match op {
            UpstreamOp::Subscribe { key, topic } => {
                let result = source
                    .subscribe_topic(&topic)
                    .await
                    .with_context(|| format!("upstream subscribe for topic '{topic}'"));
                if result.is_ok() {
                    debug!(shard = index, topic = %topic, "Upstream topic subscribed");
                }
                notify(ShardCommand::Subscribed { key, result });
            }
            UpstreamOp::Unsubscribe { key, topic } => {
                match source.unsubscribe_topic(&topic).await {
                    Ok(()) => debug!(shard = index, topic = %topic, "Upstream topic released"),
                    Err(error) => warn!(
                        shard = index,
                        topic = %topic,
                        error = %error,
                        "Upstream unsubscribe failed"
                    ),
                }
                notify(ShardCommand::Released { key });
            }
            UpstreamOp::Stats { stats, reply } => {
                let _ = reply.send(stats);
            }
        }
    }
}

fn deliver_to(shards: &[mpsc::UnboundedSender<ShardCommand>], value: TagValue) -> bool {
    let value = Arc::new(value);
    let mut delivered = false;
    for shard in shards {
        delivered |= shard.send(ShardCommand::Deliver(value.clone())).is_ok();
    }
    delivered
}

/// Reference-counted topic channels over one upstream source.
pub struct TopicFanout {
    shards: Vec<mpsc::UnboundedSender<ShardCommand>>,
    channel_capacity: usize,
    next_channel: AtomicU64,
}

impl TopicFanout {
    /// Spawn the shard owner tasks. They stop when `shutdown` fires.
    pub fn spawn(
        source: Arc<dyn TopicSource>,
        config: FanoutConfig,
        shutdown: CancellationToken,
    ) -> Self {
        let shards = (0..config.shards.max(1))
            .map(|index| {
                let (tx, rx) = mpsc::unbounded_channel();
                let (upstream_tx, upstream_rx) = mpsc::unbounded_channel();
                let shard = Shard {
                    index,
                    source: source.clone(),
                    upstream: upstream_tx,
                    topics: HashMap::new(),
                    releasing: HashMap::new(),
                    delivered: 0,
                    dropped: 0,
                };
                tokio::spawn(run_upstream(
                    index,
                    source.clone(),
                    upstream_rx,
                    tx.downgrade(),
                    shutdown.clone(),
                ));
                tokio::spawn(shard.run(rx, shutdown.clone()));
                tx
            })
            .collect();
        Self {
            shards,
            channel_capacity: config.channel_capacity.max(1),
            next_channel: AtomicU64::new(0),
        }
    }

    /// Pump `upstream` into the shards until it ends or `shutdown` fires.
    pub fn attach_upstream(
        &self,
        mut upstream: TagValueStream,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let shards = self.shards.clone();
        tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    next = upstream.next() => next,
                };
                match next {
                    Some(Ok(value)) => {
                        if !deliver_to(&shards, value) {
                            break;
                        }
                    }
                    Some(Err(error)) => warn!(error = %error, "Upstream event error"),
                    None => {
                        info!("Upstream event stream ended");
                        break;
                    }
                }
            }
        })
    }

    /// Route one value to every matching channel.
    ///
    /// Returns `false` once the shards have stopped.
    pub fn publish(&self, value: TagValue) -> bool {
        deliver_to(&self.shards, value)
    }

    /// Open a new channel on `topic`, subscribing upstream if it is the first.
    pub async fn create_topic_channel(&self, topic: &str) -> HistResult<TopicChannel> {
        let key = TagKey::new(topic);
        let shard = self.shard_for(&key).clone();
        let id = self.next_channel.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let dropped = Arc::new(AtomicU64::new(0));
        let (ack_tx, ack_rx) = oneshot::channel();

        shard
            .send(ShardCommand::Attach {
                key: key.clone(),
                topic: topic.to_string(),
                pending: PendingAttach {
                    channel: id,
                    slot: ChannelSlot {
                        tx,
                        dropped: dropped.clone(),
                    },
                    ack: ack_tx,
                },
            })
            .map_err(|_| HistError::source_unavailable(topic, "fan-out stopped"))?;

        match ack_rx.await {
            Ok(Ok(())) => Ok(TopicChannel {
                topic: topic.to_string(),
                key,
                id,
                rx,
                dropped,
                shard,
            }),
            Ok(Err(error)) => Err(HistError::source_unavailable(topic, format!("{error:#}"))),
            Err(_) => Err(HistError::source_unavailable(topic, "fan-out stopped")),
        }
    }

    /// Counters summed across shards.
    pub async fn stats(&self) -> FanoutStats {
        let mut total = FanoutStats::default();
        for shard in &self.shards {
            let (tx, rx) = oneshot::channel();
            if shard.send(ShardCommand::Stats(tx)).is_err() {
                continue;
            }
            if let Ok(stats) = rx.await {
                total = total.merge(stats);
            }
        }
        total
    }

    /// Number of owner tasks.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    fn shard_for(&self, key: &TagKey) -> &mpsc::UnboundedSender<ShardCommand> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let index = (hasher.finish() % self.shards.len() as u64) as usize;
        &self.shards[index]
    }
}

impl fmt::Debug for TopicFanout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopicFanout")
            .field("shards", &self.shards.len())
            .field("channel_capacity", &self.channel_capacity)
            .finish()
    }
}

/// One consumer's view of a topic.
///
/// Dropping the channel detaches it; the last detach for a topic releases
/// the upstream subscription.
pub struct TopicChannel {
    topic: String,
    key: TagKey,
    id: u64,
    rx: mpsc::Receiver<TagValue>,
    dropped: Arc<AtomicU64>,
    shard: mpsc::UnboundedSender<ShardCommand>,
}

impl TopicChannel {
    /// The topic as requested.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Values dropped because this channel was full.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Receive the next value.
    pub async fn recv(&mut self) -> Option<TagValue> {
        self.rx.recv().await
    }
}

impl Stream for TopicChannel {
    type Item = TagValue;

    fn poll_next(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<TagValue>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl Drop for TopicChannel {
    fn drop(&mut self) {
        let _ = self.shard.send(ShardCommand::Detach {
            key: self.key.clone(),
            channel: self.id,
        });
    }
}

impl fmt::Debug for TopicChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopicChannel")
            .field("topic", &self.topic)
            .field("id", &self.id)
            .field("dropped", &self.dropped_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use hist_core::Sample;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingSource {
        calls: Mutex<Vec<String>>,
    }

    impl RecordingSource {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TopicSource for RecordingSource {
        async fn subscribe_topic(&self, topic: &str) -> Result<()> {
            self.calls.lock().unwrap().push(format!("+{topic}"));
            Ok(())
        }

        async fn unsubscribe_topic(&self, topic: &str) -> Result<()> {
            self.calls.lock().unwrap().push(format!("-{topic}"));
            Ok(())
        }
    }

    fn value(tag: &str, v: f64) -> TagValue {
        TagValue::new(tag, Sample::good(Utc::now(), v))
    }

    async fn settle(fanout: &TopicFanout) -> FanoutStats {
        // Stats round-trips every shard, so earlier commands are processed.
        fanout.stats().await
    }

    #[tokio::test]
    async fn test_refcounted_upstream_subscription() {
        let source = Arc::new(RecordingSource::default());
        let fanout = TopicFanout::spawn(
            source.clone(),
            FanoutConfig::default(),
            CancellationToken::new(),
        );

        let (first, second) = tokio::join!(
            fanout.create_topic_channel("T"),
            fanout.create_topic_channel("T")
        );
        let (first, second) = (first.unwrap(), second.unwrap());
        assert_eq!(source.calls(), vec!["+T"]);

        drop(first);
        let stats = settle(&fanout).await;
        assert_eq!(stats.topics, 1);
        assert_eq!(stats.channels, 1);
        assert_eq!(source.calls(), vec!["+T"]);

        drop(second);
        settle(&fanout).await;
        assert_eq!(source.calls(), vec!["+T", "-T"]);
    }

    #[tokio::test]
    async fn test_create_right_after_last_dispose_resubscribes_in_order() {
        let source = Arc::new(RecordingSource::default());
        let fanout = TopicFanout::spawn(
            source.clone(),
            FanoutConfig::default(),
            CancellationToken::new(),
        );

        let last = fanout.create_topic_channel("T").await.unwrap();
        drop(last);
        let mut next = fanout.create_topic_channel("t").await.unwrap();

        let stats = settle(&fanout).await;
        assert_eq!(source.calls(), vec!["+T", "-T", "+t"]);
        assert_eq!(stats.channels, 1);

        assert!(fanout.publish(value("T", 4.0)));
        let update = tokio::time::timeout(Duration::from_secs(1), next.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(update.sample.value.as_f64(), Some(4.0));
    }

    #[tokio::test]
    async fn test_repeated_dispose_and_create_never_double_subscribes() {
        let source = Arc::new(RecordingSource::default());
        let fanout = TopicFanout::spawn(
            source.clone(),
            FanoutConfig::default(),
            CancellationToken::new(),
        );

        let mut channel = fanout.create_topic_channel("T").await.unwrap();
        for _ in 0..10 {
            let (replacement, ()) = tokio::join!(fanout.create_topic_channel("T"), async move {
                drop(channel);
            });
            channel = replacement.unwrap();
        }
        drop(channel);
        settle(&fanout).await;

        let calls = source.calls();
        let mut subscribed = false;
        for call in &calls {
            assert_ne!(call.starts_with('+'), subscribed, "unbalanced calls: {calls:?}");
            subscribed = call.starts_with('+');
        }
        assert!(!subscribed);
    }

    #[tokio::test]
    async fn test_slow_subscribe_does_not_stall_other_topics() {
        #[derive(Default)]
        struct GatedSource {
            entered: Mutex<Vec<String>>,
            gate: tokio::sync::Notify,
        }

        #[async_trait]
        impl TopicSource for GatedSource {
            async fn subscribe_topic(&self, topic: &str) -> Result<()> {
                self.entered.lock().unwrap().push(topic.to_string());
                if topic == "SLOW" {
                    self.gate.notified().await;
                }
                Ok(())
            }

            async fn unsubscribe_topic(&self, _topic: &str) -> Result<()> {
                Ok(())
            }
        }

        let source = Arc::new(GatedSource::default());
        let config = FanoutConfig {
            shards: 1,
            channel_capacity: 8,
        };
        let fanout = Arc::new(TopicFanout::spawn(
            source.clone(),
            config,
            CancellationToken::new(),
        ));
        let mut fast = fanout.create_topic_channel("FAST").await.unwrap();

        let slow = tokio::spawn({
            let fanout = fanout.clone();
            async move { fanout.create_topic_channel("SLOW").await }
        });
        while !source.entered.lock().unwrap().contains(&"SLOW".to_string()) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(fanout.publish(value("FAST", 1.0)));
        let update = tokio::time::timeout(Duration::from_secs(1), fast.recv())
            .await
            .expect("delivery stalled behind a pending subscribe")
            .unwrap();
        assert_eq!(update.sample.value.as_f64(), Some(1.0));
        assert!(!slow.is_finished());

        source.gate.notify_one();
        let mut slow = slow.await.unwrap().unwrap();
        assert!(fanout.publish(value("SLOW", 2.0)));
        assert_eq!(slow.recv().await.unwrap().sample.value.as_f64(), Some(2.0));
    }

    #[tokio::test]
    async fn test_publish_reaches_matching_channels_only() {
        let source = Arc::new(RecordingSource::default());
        let fanout = TopicFanout::spawn(source, FanoutConfig::default(), CancellationToken::new());
        let mut pressure = fanout.create_topic_channel("PT-1").await.unwrap();
        let mut flow = fanout.create_topic_channel("fic-2").await.unwrap();
        let mut pressure_again = fanout.create_topic_channel("pt-1").await.unwrap();

        assert!(fanout.publish(value("FIC-2", 3.0)));
        assert!(fanout.publish(value("PT-1", 7.0)));

        assert_eq!(flow.recv().await.unwrap().sample.value.as_f64(), Some(3.0));
        assert_eq!(pressure.recv().await.unwrap().tag_id, "PT-1");
        assert_eq!(pressure_again.next().await.unwrap().tag_id, "PT-1");
        assert!(tokio::time::timeout(Duration::from_millis(50), flow.recv())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_full_channel_drops_without_blocking_others() {
        let source = Arc::new(RecordingSource::default());
        let config = FanoutConfig {
            shards: 2,
            channel_capacity: 2,
        };
        let fanout = TopicFanout::spawn(source, config, CancellationToken::new());
        let slow = fanout.create_topic_channel("T").await.unwrap();
        let mut fast = fanout.create_topic_channel("T").await.unwrap();

        for i in 0..5 {
            fanout.publish(value("T", f64::from(i)));
            assert_eq!(fast.recv().await.unwrap().sample.value.as_f64(), Some(f64::from(i)));
        }
        let stats = settle(&fanout).await;
        assert_eq!(slow.dropped_count(), 3);
        assert_eq!(fast.dropped_count(), 0);
        assert_eq!(stats.dropped, 3);
        assert_eq!(stats.delivered, 7);
    }

    #[tokio::test]
    async fn test_upstream_pump_and_shutdown() {
        let source = Arc::new(RecordingSource::default());
        let shutdown = CancellationToken::new();
        let fanout = TopicFanout::spawn(source, FanoutConfig::default(), shutdown.clone());
        let mut channel = fanout.create_topic_channel("A").await.unwrap();

        let upstream = futures::stream::iter(vec![
            Ok(value("A", 1.0)),
            Err(anyhow::anyhow!("transient")),
            Ok(value("A", 2.0)),
        ])
        .boxed();
        let pump = fanout.attach_upstream(upstream, shutdown.clone());

        assert_eq!(channel.recv().await.unwrap().sample.value.as_f64(), Some(1.0));
        assert_eq!(channel.recv().await.unwrap().sample.value.as_f64(), Some(2.0));
        pump.await.unwrap();

        shutdown.cancel();
        assert_eq!(
            tokio::time::timeout(Duration::from_secs(1), channel.recv())
                .await
                .unwrap(),
            None
        );
        assert!(fanout.create_topic_channel("B").await.is_err());
    }

    #[tokio::test]
    async fn test_failed_upstream_subscribe_is_not_counted() {
        struct Refusing;

        #[async_trait]
        impl TopicSource for Refusing {
            async fn subscribe_topic(&self, topic: &str) -> Result<()> {
                anyhow::bail!("topic {topic} is not published")
            }

            async fn unsubscribe_topic(&self, _topic: &str) -> Result<()> {
                Ok(())
            }
        }

        let fanout = TopicFanout::spawn(
            Arc::new(Refusing),
            FanoutConfig::default(),
            CancellationToken::new(),
        );
        let error = fanout.create_topic_channel("X").await.unwrap_err();
        assert!(matches!(error, HistError::SourceUnavailable { .. }));
        assert_eq!(settle(&fanout).await.topics, 0);
    }
}
