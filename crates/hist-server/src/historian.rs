//! The historian service for one adapter.
//!
//! [`Historian::start`] resolves how subscriptions are served once, from the
//! adapter's capability set:
//!
//! - native push: the adapter's event stream feeds the fan-out directly
//! - snapshot reads only: a [`PollingBridge`] feeds the fan-out
//! - neither: subscriptions fail with `NotSupported`
//!
//! Every background task (fan-out shards, upstream pump, polling loop,
//! reaper, subscription forwarders) stops on the service shutdown token.

use crate::config::HistorianConfig;
use futures::stream::{self, StreamExt};
use hist_core::limits::SHUTDOWN_TIMEOUT;
use hist_core::request::dedup_identifiers;
use hist_core::{
    AdapterCapabilities, AggregateBucket, AggregationRequest, AtTimesRequest, CancelScope,
    HistError, HistResult, PlotRequest, RawQueryRequest, Sample, TagValue,
};
use hist_processing::{AggregateDescriptor, AGGREGATE_FUNCTIONS};
use hist_query::{HistoricalQuery, QueryStream};
use hist_realtime::{
    ConnectionEvent, ConnectionReaper, FanoutStats, NativeTopicSource, PollingBridge,
    PollingStats, Subscription, SubscriptionId, SubscriptionRegistry, TopicFanout,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const CONNECTION_EVENT_CAPACITY: usize = 64;

/// A live subscription: its id and the merged updates of all its topics.
#[derive(Debug)]
pub struct SubscriptionHandle {
    /// Registry id, used to unsubscribe.
    pub id: SubscriptionId,
    /// Canonical topics the subscription listens on.
    pub topics: Vec<String>,
    /// Updates for every topic, interleaved.
    pub updates: ReceiverStream<TagValue>,
}

/// Query façade, subscription registry and fan-out for one adapter.
pub struct Historian {
    caps: AdapterCapabilities,
    config: HistorianConfig,
    query: HistoricalQuery,
    registry: Arc<SubscriptionRegistry>,
    fanout: Option<TopicFanout>,
    bridge: Option<Arc<PollingBridge>>,
    events: broadcast::Sender<ConnectionEvent>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Historian {
    /// Validate `config` and start the background tasks.
    ///
    /// Must be called within a Tokio runtime.
    pub async fn start(caps: AdapterCapabilities, config: HistorianConfig) -> HistResult<Self> {
        config.validate()?;
        let shutdown = CancellationToken::new();
        let mut tasks = Vec::new();

        let query = HistoricalQuery::new(
            caps.clone(),
            config.limits(),
            config.query.channel_capacity,
            shutdown.clone(),
        );

        let mut bridge = None;
        let fanout = if let Some(push) = caps.push.clone() {
            let upstream = push
                .open_stream()
                .await
                .map_err(|e| HistError::source_unavailable(&caps.name, format!("{e:#}")))?;
            let fanout = TopicFanout::spawn(
                Arc::new(NativeTopicSource::new(push)),
                config.fanout(),
                shutdown.clone(),
            );
            tasks.push(fanout.attach_upstream(upstream, shutdown.clone()));
            Some(fanout)
        } else if let Some(snapshot) = caps.snapshot.clone() {
            let polling = Arc::new(PollingBridge::new(snapshot, config.realtime.poll_interval));
            let fanout = TopicFanout::spawn(polling.clone(), config.fanout(), shutdown.clone());
            let upstream = polling.start(config.realtime.topic_channel_capacity, shutdown.clone());
            tasks.push(fanout.attach_upstream(upstream, shutdown.clone()));
            bridge = Some(polling);
            Some(fanout)
        } else {
            info!(adapter = %caps.name, "No push or snapshot capability, subscriptions disabled");
            None
        };

        let registry = Arc::new(SubscriptionRegistry::new());
        let (events, _) = broadcast::channel(CONNECTION_EVENT_CAPACITY);
        let reaper = ConnectionReaper::new(
            registry.clone(),
            events.clone(),
            config.realtime.reaper_interval,
            config.realtime.heartbeat_timeout,
        );
        tasks.push(reaper.spawn(shutdown.clone()));

        info!(
            adapter = %caps.name,
            capabilities = ?caps.describe(),
            polling = bridge.is_some(),
            "Historian started"
        );

        Ok(Self {
            caps,
            config,
            query,
            registry,
            fanout,
            bridge,
            events,
            shutdown,
            tasks: Mutex::new(tasks),
        })
    }

    /// Capability set of the wrapped adapter.
    pub fn capabilities(&self) -> &AdapterCapabilities {
        &self.caps
    }

    /// Configuration in force.
    pub fn config(&self) -> &HistorianConfig {
        &self.config
    }

    /// Service shutdown token.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    // =========================================================================
    // Historical Queries
    // =========================================================================

    /// Raw samples per tag.
    pub fn query_raw(
        &self,
        request: &RawQueryRequest,
        cancel: CancellationToken,
    ) -> HistResult<QueryStream<Sample>> {
        self.query.query_raw(request, cancel)
    }

    /// Aggregate buckets per tag.
    pub fn query_aggregated(
        &self,
        request: &AggregationRequest,
        cancel: CancellationToken,
    ) -> HistResult<QueryStream<AggregateBucket>> {
        self.query.query_aggregated(request, cancel)
    }

    /// Plot samples per tag.
    pub fn query_plot(
        &self,
        request: &PlotRequest,
        cancel: CancellationToken,
    ) -> HistResult<QueryStream<Sample>> {
        self.query.query_plot(request, cancel)
    }

    /// Interpolated values at the requested timestamps, per tag.
    pub fn query_at_times(
        &self,
        request: &AtTimesRequest,
        cancel: CancellationToken,
    ) -> HistResult<QueryStream<Sample>> {
        self.query.query_at_times(request, cancel)
    }

    /// Current value per tag.
    pub fn query_snapshot(
        &self,
        tag_ids: &[String],
        cancel: CancellationToken,
    ) -> HistResult<QueryStream<Sample>> {
        self.query.query_snapshot(tag_ids, cancel)
    }

    /// Descriptor table of the supported aggregate functions.
    pub fn supported_aggregates(&self) -> &'static [AggregateDescriptor] {
        &AGGREGATE_FUNCTIONS
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Subscribe a connection to `topics`.
    ///
    /// Topics naming a known tag (by id or name, any case) are mapped to its
    /// canonical id; others are passed to the upstream unchanged.
    pub async fn subscribe(
        &self,
        connection_id: &str,
        topics: &[String],
    ) -> HistResult<SubscriptionHandle> {
        let fanout = self
            .fanout
            .as_ref()
            .ok_or_else(|| HistError::NotSupported("subscriptions".into()))?;
        if topics.is_empty() {
            return Err(HistError::InvalidRequest(
                "at least one topic is required".into(),
            ));
        }

        let mut canonical = Vec::new();
        for topic in dedup_identifiers(topics) {
            let resolved = self.canonical_topic(&topic).await;
            if !canonical.contains(&resolved) {
                canonical.push(resolved);
            }
        }

        let mut channels = Vec::with_capacity(canonical.len());
        for topic in &canonical {
            // Channels created so far detach on drop if this fails.
            channels.push(fanout.create_topic_channel(topic).await?);
        }

        let subscription = Subscription::new(connection_id, canonical.clone());
        let stop = CancelScope::new(subscription.release_token(), self.shutdown.clone());
        let id = self.registry.add_subscription(subscription);

        let (tx, rx) = mpsc::channel(self.config.realtime.subscription_buffer);
        let mut merged = stream::select_all(channels);
        let connection = connection_id.to_string();
        tokio::spawn(async move {
            loop {
                let value = tokio::select! {
                    biased;
                    _ = stop.cancelled() => break,
                    // Consumer dropped its stream while the topics were quiet.
                    _ = tx.closed() => break,
                    next = merged.next() => match next {
                        Some(value) => value,
                        None => break,
                    },
                };
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => break,
                    sent = tx.send(value) => if sent.is_err() {
                        break;
                    },
                }
            }
            debug!(connection = %connection, subscription = %id, "Subscription forwarder stopped");
        });

        info!(
            connection = connection_id,
            subscription = %id,
            topics = ?canonical,
            "Subscription added"
        );
        Ok(SubscriptionHandle {
            id,
            topics: canonical,
            updates: ReceiverStream::new(rx),
        })
    }

    async fn canonical_topic(&self, topic: &str) -> String {
        match self.caps.resolver.resolve_tag(topic).await {
            Ok(Some(tag)) => tag.id,
            Ok(None) => topic.to_string(),
            Err(error) => {
                warn!(topic, error = %error, "Topic resolution failed, using topic as given");
                topic.to_string()
            }
        }
    }

    /// Dispose one subscription. Returns whether it existed.
    pub fn unsubscribe(&self, connection_id: &str, id: SubscriptionId) -> bool {
        self.registry.remove_subscription(connection_id, id)
    }

    /// Record a heartbeat for a connection.
    pub fn heartbeat(&self, connection_id: &str, at: DateTime<Utc>) {
        self.registry.set_heartbeat(connection_id, at);
    }

    /// Whether the connection exceeded the configured heartbeat timeout.
    pub fn is_connection_stale(&self, connection_id: &str) -> bool {
        self.registry
            .is_connection_stale(connection_id, self.config.realtime.heartbeat_timeout)
    }

    /// Drop a connection and all its subscriptions.
    ///
    /// Returns the number of disposed subscriptions, `None` if unknown.
    pub fn disconnect(&self, connection_id: &str) -> Option<usize> {
        let subscriptions = self.registry.remove_connection(connection_id)?;
        info!(connection = connection_id, subscriptions, "Connection closed");
        let _ = self.events.send(ConnectionEvent::Closed {
            connection_id: connection_id.to_string(),
            subscriptions,
        });
        Some(subscriptions)
    }

    /// Stale and closed connection notifications.
    pub fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    /// Subscription bookkeeping, for introspection.
    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Fan-out counters, if subscriptions are enabled.
    pub async fn fanout_stats(&self) -> Option<FanoutStats> {
        match &self.fanout {
            Some(fanout) => Some(fanout.stats().await),
            None => None,
        }
    }

    /// Polling bridge counters, if the bridge is in use.
    pub fn polling_stats(&self) -> Option<PollingStats> {
        self.bridge.as_ref().map(|bridge| bridge.stats())
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Cancel every query and background task and wait for them to stop.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        let joined = tokio::time::timeout(SHUTDOWN_TIMEOUT, futures::future::join_all(tasks)).await;
        if joined.is_err() {
            warn!(timeout = ?SHUTDOWN_TIMEOUT, "Background tasks did not stop in time");
        }
        info!(adapter = %self.caps.name, "Historian stopped");
    }
}

impl Drop for Historian {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl fmt::Debug for Historian {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Historian")
            .field("adapter", &self.caps)
            .field("subscriptions", &self.fanout.is_some())
            .field("polling", &self.bridge.is_some())
            .field("registry", &self.registry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hist_driver_mock::MockHistorian;
    use tracing_test::traced_test;

    #[tokio::test]
    #[traced_test]
    async fn test_history_only_adapter_disables_subscriptions() {
        let mock = Arc::new(MockHistorian::new("archive"));
        let historian = Historian::start(
            mock.history_only_capabilities(),
            HistorianConfig::default(),
        )
        .await
        .unwrap();

        assert!(logs_contain("subscriptions disabled"));
        assert!(historian.polling_stats().is_none());
        assert!(historian.fanout_stats().await.is_none());
        assert!(matches!(
            historian.subscribe("conn1", &["TIC-101".to_string()]).await,
            Err(HistError::NotSupported(_))
        ));
        historian.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_before_start() {
        let mock = Arc::new(MockHistorian::new("archive"));
        let mut config = HistorianConfig::default();
        config.query.channel_capacity = 0;
        assert!(matches!(
            Historian::start(mock.capabilities(), config).await,
            Err(HistError::Configuration(_))
        ));
    }
}
