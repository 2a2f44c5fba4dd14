//! Fan-out driven by the mock adapter through both upstream kinds.

use chrono::Utc;
use futures::StreamExt;
use hist_core::{DataType, NativePush, Sample, Tag, TagValue};
use hist_driver_mock::MockHistorian;
use hist_realtime::{FanoutConfig, NativeTopicSource, PollingBridge, TopicFanout};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn tags(mock: &MockHistorian) {
    mock.add_tag(Tag::new("TIC-101", "Reactor Temp", DataType::Float64));
    mock.add_tag(Tag::new("PIC-300", "Header Pressure", DataType::Float64));
}

#[tokio::test]
async fn test_native_push_subscribes_once_per_topic() {
    let mock = Arc::new(MockHistorian::new("push").with_native_push(64));
    tags(&mock);
    let shutdown = CancellationToken::new();

    let fanout = TopicFanout::spawn(
        Arc::new(NativeTopicSource::new(mock.clone())),
        FanoutConfig::default(),
        shutdown.clone(),
    );
    let upstream = mock.open_stream().await.unwrap();
    fanout.attach_upstream(upstream, shutdown.clone());

    let mut a = fanout.create_topic_channel("TIC-101").await.unwrap();
    let b = fanout.create_topic_channel("tic-101").await.unwrap();
    assert_eq!(mock.calls().subscribe, 1);
    assert_eq!(mock.push_topics(), vec!["tic-101"]);

    mock.publish(TagValue::new("PIC-300", Sample::good(Utc::now(), 5.0)));
    mock.publish(TagValue::new("TIC-101", Sample::good(Utc::now(), 80.0)));
    let received = tokio::time::timeout(Duration::from_secs(2), a.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received.tag_id, "TIC-101");

    drop(a);
    drop(b);
    // Stats round-trips the shards, so both detaches have been handled.
    let stats = fanout.stats().await;
    assert_eq!(stats.topics, 0);
    assert_eq!(mock.calls().unsubscribe, 1);
    assert!(mock.push_topics().is_empty());
    shutdown.cancel();
}

#[tokio::test]
async fn test_polling_bridge_feeds_fanout() {
    let mock = Arc::new(MockHistorian::new("poll"));
    tags(&mock);
    mock.append_samples("TIC-101", [Sample::good(Utc::now(), 72.0)])
        .unwrap();
    mock.append_samples("PIC-300", [Sample::good(Utc::now(), 4.2)])
        .unwrap();
    let shutdown = CancellationToken::new();

    let bridge = Arc::new(PollingBridge::new(mock.clone(), Duration::from_millis(20)));
    let fanout = TopicFanout::spawn(bridge.clone(), FanoutConfig::default(), shutdown.clone());
    fanout.attach_upstream(bridge.start(16, shutdown.clone()), shutdown.clone());

    let mut pressure = fanout.create_topic_channel("PIC-300").await.unwrap();
    assert_eq!(bridge.subscribed_tags(), vec!["PIC-300"]);

    for _ in 0..2 {
        let value = tokio::time::timeout(Duration::from_secs(2), pressure.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(value.tag_id, "PIC-300");
        assert_eq!(value.sample.value.as_f64(), Some(4.2));
    }

    drop(pressure);
    fanout.stats().await;
    assert!(bridge.subscribed_tags().is_empty());
    shutdown.cancel();
}
