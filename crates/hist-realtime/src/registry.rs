//! Per-connection subscription bookkeeping.
//!
//! Each connection owns a bucket of subscriptions plus its last heartbeat.
//! Buckets live in a [`DashMap`], so connections only contend when they
//! hash to the same shard; there is no registry-wide lock.
//!
//! A subscription moves through `Created -> Active -> Removed`. Removing it
//! cancels its release token, which stops whatever task forwards its topic
//! channels and thereby drops its topic memberships.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

/// Unique subscription identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Generate a fresh id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    /// Built, not yet registered.
    Created,
    /// Registered and delivering.
    Active,
    /// Disposed; its topic memberships are released.
    Removed,
}

/// One client's interest in a set of topics.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    connection_id: String,
    topics: Vec<String>,
    created_at: DateTime<Utc>,
    state: SubscriptionState,
    release: CancellationToken,
}

impl Subscription {
    /// Create a subscription in the `Created` state.
    pub fn new(connection_id: impl Into<String>, topics: Vec<String>) -> Self {
        Self {
            id: SubscriptionId::new(),
            connection_id: connection_id.into(),
            topics,
            created_at: Utc::now(),
            state: SubscriptionState::Created,
            release: CancellationToken::new(),
        }
    }

    /// Subscription id.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Owning connection.
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Subscribed topics.
    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    /// Current state.
    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    /// Token cancelled when the subscription is removed.
    pub fn release_token(&self) -> CancellationToken {
        self.release.clone()
    }

    fn activate(&mut self) {
        if self.state == SubscriptionState::Created {
            self.state = SubscriptionState::Active;
        }
    }

    fn dispose(&mut self) {
        self.state = SubscriptionState::Removed;
        self.release.cancel();
    }

    fn info(&self) -> SubscriptionInfo {
        SubscriptionInfo {
            id: self.id,
            connection_id: self.connection_id.clone(),
            topics: self.topics.clone(),
            created_at: self.created_at,
            state: self.state,
        }
    }
}

/// Read-only view of a registered subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionInfo {
    /// Subscription id.
    pub id: SubscriptionId,
    /// Owning connection.
    pub connection_id: String,
    /// Subscribed topics.
    pub topics: Vec<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Lifecycle state.
    pub state: SubscriptionState,
}

struct ConnectionBucket {
    subscriptions: HashMap<SubscriptionId, Subscription>,
    last_heartbeat: DateTime<Utc>,
}

impl ConnectionBucket {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            subscriptions: HashMap::new(),
            last_heartbeat: now,
        }
    }

    fn is_stale(&self, timeout: Duration, now: DateTime<Utc>) -> bool {
        // A heartbeat from the future is never stale.
        (now - self.last_heartbeat)
            .to_std()
            .map(|idle| idle > timeout)
            .unwrap_or(false)
    }

    fn dispose_all(&mut self) -> usize {
        let count = self.subscriptions.len();
        for (_, mut subscription) in self.subscriptions.drain() {
            subscription.dispose();
        }
        count
    }
}

/// Concurrent map of connections to their subscriptions and heartbeats.
#[derive(Default)]
pub struct SubscriptionRegistry {
    connections: DashMap<String, ConnectionBucket>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscription, creating the connection bucket on first use.
    pub fn add_subscription(&self, mut subscription: Subscription) -> SubscriptionId {
        let id = subscription.id;
        subscription.activate();
        let mut bucket = self
            .connections
            .entry(subscription.connection_id.clone())
            .or_insert_with(|| ConnectionBucket::new(Utc::now()));
        bucket.subscriptions.insert(id, subscription);
        id
    }

    /// Dispose one subscription. Returns whether it was found.
    pub fn remove_subscription(&self, connection_id: &str, id: SubscriptionId) -> bool {
        let removed = self
            .connections
            .get_mut(connection_id)
            .and_then(|mut bucket| bucket.subscriptions.remove(&id));
        match removed {
            Some(mut subscription) => {
                subscription.dispose();
                debug!(connection = connection_id, subscription = %id, "Subscription removed");
                true
            }
            None => false,
        }
    }

    /// Dispose every subscription of a connection, keeping its heartbeat.
    pub fn remove_all_subscriptions(&self, connection_id: &str) -> usize {
        self.connections
            .get_mut(connection_id)
            .map(|mut bucket| bucket.dispose_all())
            .unwrap_or(0)
    }

    /// Forget a connection entirely. Returns the number of disposed subscriptions.
    pub fn remove_connection(&self, connection_id: &str) -> Option<usize> {
        self.connections
            .remove(connection_id)
            .map(|(_, mut bucket)| bucket.dispose_all())
    }

    /// Forget a connection only if it is still stale at `now`.
    ///
    /// The check and the removal happen under the same shard lock, so a
    /// heartbeat racing with the reaper keeps the connection alive.
    pub fn remove_connection_if_stale(
        &self,
        connection_id: &str,
        timeout: Duration,
        now: DateTime<Utc>,
    ) -> Option<(DateTime<Utc>, usize)> {
        self.connections
            .remove_if(connection_id, |_, bucket| bucket.is_stale(timeout, now))
            .map(|(_, mut bucket)| (bucket.last_heartbeat, bucket.dispose_all()))
    }

    /// Look up a registered subscription.
    pub fn try_get_subscription(
        &self,
        connection_id: &str,
        id: SubscriptionId,
    ) -> Option<SubscriptionInfo> {
        self.connections
            .get(connection_id)
            .and_then(|bucket| bucket.subscriptions.get(&id).map(Subscription::info))
    }

    /// All subscriptions of a connection, oldest first.
    pub fn list_subscriptions(&self, connection_id: &str) -> Vec<SubscriptionInfo> {
        let mut list: Vec<SubscriptionInfo> = self
            .connections
            .get(connection_id)
            .map(|bucket| bucket.subscriptions.values().map(Subscription::info).collect())
            .unwrap_or_default();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        list
    }

    /// Record a heartbeat, creating the connection bucket if needed.
    pub fn set_heartbeat(&self, connection_id: &str, at: DateTime<Utc>) {
        self.connections
            .entry(connection_id.to_string())
            .and_modify(|bucket| bucket.last_heartbeat = bucket.last_heartbeat.max(at))
            .or_insert_with(|| ConnectionBucket::new(at));
    }

    /// Last recorded heartbeat.
    pub fn last_heartbeat(&self, connection_id: &str) -> Option<DateTime<Utc>> {
        self.connections
            .get(connection_id)
            .map(|bucket| bucket.last_heartbeat)
    }

    /// Whether the connection has been idle for longer than `timeout`.
    ///
    /// Unknown connections are not stale: there is nothing to reap.
    pub fn is_connection_stale(&self, connection_id: &str, timeout: Duration) -> bool {
        self.is_connection_stale_at(connection_id, timeout, Utc::now())
    }

    /// [`is_connection_stale`](Self::is_connection_stale) against an explicit clock.
    pub fn is_connection_stale_at(
        &self,
        connection_id: &str,
        timeout: Duration,
        now: DateTime<Utc>,
    ) -> bool {
        self.connections
            .get(connection_id)
            .is_some_and(|bucket| bucket.is_stale(timeout, now))
    }

    /// Connections idle for longer than `timeout`, with their last heartbeat.
    pub fn stale_connections(
        &self,
        timeout: Duration,
        now: DateTime<Utc>,
    ) -> Vec<(String, DateTime<Utc>)> {
        self.connections
            .iter()
            .filter(|entry| entry.value().is_stale(timeout, now))
            .map(|entry| (entry.key().clone(), entry.value().last_heartbeat))
            .collect()
    }

    /// Number of registered subscriptions across all connections.
    pub fn subscription_count(&self) -> usize {
        self.connections
            .iter()
            .map(|entry| entry.value().subscriptions.len())
            .sum()
    }

    /// Number of known connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("connections", &self.connection_count())
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use std::sync::Arc;

    fn topics(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn test_remove_all_then_lookup_fails() {
        let registry = SubscriptionRegistry::new();
        let subscription = Subscription::new("conn1", topics(&["TIC-101"]));
        let release = subscription.release_token();
        assert_eq!(subscription.state(), SubscriptionState::Created);

        let id = registry.add_subscription(subscription);
        let info = registry.try_get_subscription("conn1", id).unwrap();
        assert_eq!(info.state, SubscriptionState::Active);
        assert_eq!(info.topics, vec!["TIC-101"]);

        assert_eq!(registry.remove_all_subscriptions("conn1"), 1);
        assert!(registry.try_get_subscription("conn1", id).is_none());
        assert!(release.is_cancelled());
        // Heartbeat bookkeeping survives.
        assert_eq!(registry.connection_count(), 1);
    }

    #[test]
    fn test_remove_subscription_reports_found() {
        let registry = SubscriptionRegistry::new();
        let first = registry.add_subscription(Subscription::new("conn1", topics(&["a"])));
        let second = registry.add_subscription(Subscription::new("conn1", topics(&["b"])));
        assert_eq!(registry.subscription_count(), 2);

        assert!(registry.remove_subscription("conn1", first));
        assert!(!registry.remove_subscription("conn1", first));
        assert!(!registry.remove_subscription("conn2", second));
        assert_eq!(registry.list_subscriptions("conn1").len(), 1);
    }

    #[test]
    fn test_connections_are_isolated() {
        let registry = SubscriptionRegistry::new();
        let a = registry.add_subscription(Subscription::new("conn1", topics(&["x"])));
        let b = registry.add_subscription(Subscription::new("conn2", topics(&["x"])));

        registry.remove_connection("conn1");
        assert!(registry.try_get_subscription("conn1", a).is_none());
        assert!(registry.try_get_subscription("conn2", b).is_some());
        assert!(registry.try_get_subscription("conn1", b).is_none());
    }

    #[test]
    fn test_heartbeat_staleness() {
        let registry = SubscriptionRegistry::new();
        let t0 = Utc::now();
        let timeout = Duration::from_secs(30);
        registry.set_heartbeat("conn1", t0);

        assert!(!registry.is_connection_stale_at("conn1", timeout, t0 + TimeDelta::seconds(30)));
        assert!(registry.is_connection_stale_at("conn1", timeout, t0 + TimeDelta::seconds(31)));
        assert!(!registry.is_connection_stale_at("unknown", timeout, t0 + TimeDelta::days(1)));

        // An older heartbeat never moves last-seen backwards.
        registry.set_heartbeat("conn1", t0 - TimeDelta::seconds(60));
        assert_eq!(registry.last_heartbeat("conn1"), Some(t0));

        let stale = registry.stale_connections(timeout, t0 + TimeDelta::minutes(5));
        assert_eq!(stale, vec![("conn1".to_string(), t0)]);
    }

    #[test]
    fn test_conditional_removal_respects_fresh_heartbeat() {
        let registry = SubscriptionRegistry::new();
        let t0 = Utc::now();
        let timeout = Duration::from_secs(10);
        registry.set_heartbeat("conn1", t0);
        registry.add_subscription(Subscription::new("conn1", topics(&["x"])));

        assert!(registry
            .remove_connection_if_stale("conn1", timeout, t0 + TimeDelta::seconds(5))
            .is_none());
        let (last, disposed) = registry
            .remove_connection_if_stale("conn1", timeout, t0 + TimeDelta::seconds(11))
            .unwrap();
        assert_eq!(last, t0);
        assert_eq!(disposed, 1);
        assert_eq!(registry.connection_count(), 0);
    }

    #[test]
    fn test_concurrent_connections() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|n| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    let conn = format!("conn{n}");
                    for i in 0..50 {
                        let id = registry
                            .add_subscription(Subscription::new(conn.clone(), topics(&["t"])));
                        if i % 2 == 0 {
                            assert!(registry.remove_subscription(&conn, id));
                        }
                        registry.set_heartbeat(&conn, Utc::now());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.connection_count(), 8);
        assert_eq!(registry.subscription_count(), 8 * 25);
    }
}
