//! Upstream event sources behind the fan-out.

use anyhow::Result;
use async_trait::async_trait;
use hist_core::{NativePush, TagKey, TagValue};
use std::sync::Arc;

/// Something the fan-out can subscribe topics on.
///
/// `subscribe_topic`/`unsubscribe_topic` are issued once per distinct topic:
/// when its first channel is created and when its last channel is disposed.
#[async_trait]
pub trait TopicSource: Send + Sync {
    /// Start producing values for `topic`.
    async fn subscribe_topic(&self, topic: &str) -> Result<()>;

    /// Stop producing values for `topic`.
    async fn unsubscribe_topic(&self, topic: &str) -> Result<()>;

    /// Whether `value` belongs to `topic`.
    fn matches(&self, topic: &str, value: &TagValue) -> bool {
        TagKey::same_identifier(topic, &value.tag_id)
    }
}

/// [`TopicSource`] over an adapter's native push capability.
pub struct NativeTopicSource {
    push: Arc<dyn NativePush>,
}

impl NativeTopicSource {
    /// Wrap a native push capability.
    pub fn new(push: Arc<dyn NativePush>) -> Self {
        Self { push }
    }
}

#[async_trait]
impl TopicSource for NativeTopicSource {
    async fn subscribe_topic(&self, topic: &str) -> Result<()> {
        self.push.subscribe(topic).await
    }

    async fn unsubscribe_topic(&self, topic: &str) -> Result<()> {
        self.push.unsubscribe(topic).await
    }

    fn matches(&self, topic: &str, value: &TagValue) -> bool {
        self.push.matches(topic, value)
    }
}
