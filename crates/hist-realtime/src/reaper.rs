//! Stale-connection reaper.
//!
//! A periodic task scans connection heartbeats and evicts connections idle
//! for longer than the heartbeat timeout. Eviction disposes the connection's
//! subscriptions and publishes a [`ConnectionEvent::Stale`]; nothing is
//! reported as an error.

use crate::registry::SubscriptionRegistry;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Connection lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ConnectionEvent {
    /// The reaper evicted an idle connection.
    Stale {
        /// Evicted connection.
        connection_id: String,
        /// Last heartbeat seen before eviction.
        last_heartbeat: DateTime<Utc>,
        /// Subscriptions disposed with it.
        subscriptions: usize,
    },
    /// The connection disconnected explicitly.
    Closed {
        /// Closed connection.
        connection_id: String,
        /// Subscriptions disposed with it.
        subscriptions: usize,
    },
}

impl ConnectionEvent {
    /// Connection the event refers to.
    pub fn connection_id(&self) -> &str {
        match self {
            ConnectionEvent::Stale { connection_id, .. }
            | ConnectionEvent::Closed { connection_id, .. } => connection_id,
        }
    }
}

/// Periodic heartbeat scan over a [`SubscriptionRegistry`].
#[derive(Debug, Clone)]
pub struct ConnectionReaper {
    registry: Arc<SubscriptionRegistry>,
    events: broadcast::Sender<ConnectionEvent>,
    interval: Duration,
    timeout: Duration,
}

impl ConnectionReaper {
    /// Create a reaper scanning every `interval` for connections idle longer than `timeout`.
    pub fn new(
        registry: Arc<SubscriptionRegistry>,
        events: broadcast::Sender<ConnectionEvent>,
        interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            registry,
            events,
            interval,
            timeout,
        }
    }

    /// Evict every connection stale at `now`. Returns the evicted ids.
    pub fn sweep(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut evicted = Vec::new();
        for (connection_id, _) in self.registry.stale_connections(self.timeout, now) {
            // Re-checked under the shard lock; a heartbeat may have landed meanwhile.
            let Some((last_heartbeat, subscriptions)) =
                self.registry
                    .remove_connection_if_stale(&connection_id, self.timeout, now)
            else {
                continue;
            };
            info!(
                connection = %connection_id,
                %last_heartbeat,
                subscriptions,
                "Reaped stale connection"
            );
            // No receivers is fine.
            let _ = self.events.send(ConnectionEvent::Stale {
                connection_id: connection_id.clone(),
                last_heartbeat,
                subscriptions,
            });
            evicted.push(connection_id);
        }
        evicted
    }

    /// Run [`sweep`](Self::sweep) on every tick until `shutdown` fires.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!(
                interval = ?self.interval,
                timeout = ?self.timeout,
                "Connection reaper started"
            );
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        self.sweep(Utc::now());
                    }
                }
            }
            debug!("Connection reaper stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Subscription;
    use chrono::TimeDelta;
    use tracing_test::traced_test;

    #[test]
    #[traced_test]
    fn test_sweep_evicts_and_publishes() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let (tx, mut rx) = broadcast::channel(8);
        let reaper = ConnectionReaper::new(
            registry.clone(),
            tx,
            Duration::from_secs(5),
            Duration::from_secs(30),
        );

        let t0 = Utc::now();
        registry.set_heartbeat("idle", t0 - TimeDelta::seconds(120));
        registry.set_heartbeat("busy", t0);
        let subscription = Subscription::new("idle", vec!["TIC-101".into()]);
        let release = subscription.release_token();
        registry.add_subscription(subscription);

        assert_eq!(reaper.sweep(t0), vec!["idle".to_string()]);
        assert!(release.is_cancelled());
        assert_eq!(registry.connection_count(), 1);
        assert_eq!(
            rx.try_recv().unwrap(),
            ConnectionEvent::Stale {
                connection_id: "idle".into(),
                last_heartbeat: t0 - TimeDelta::seconds(120),
                subscriptions: 1,
            }
        );
        assert!(reaper.sweep(t0).is_empty());
        assert!(logs_contain("Reaped stale connection"));
    }

    #[tokio::test]
    async fn test_reaper_task_stops_on_shutdown() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let (tx, mut rx) = broadcast::channel(8);
        registry.set_heartbeat("idle", Utc::now() - TimeDelta::minutes(10));

        let shutdown = CancellationToken::new();
        let handle = ConnectionReaper::new(
            registry.clone(),
            tx,
            Duration::from_millis(10),
            Duration::from_secs(30),
        )
        .spawn(shutdown.clone());

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.connection_id(), "idle");

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(registry.connection_count(), 0);
    }
}
