// tests/broadcast_hub.rs
//
// Registry behavior under churn: subscribers joining and leaving around
// in-flight broadcasts, and isolation of per-subscriber write failures.

use std::sync::Arc;

use deprem_relay::broadcast::{BroadcastHub, Coordinates, EarthquakeRecord};

fn record(tag: &str) -> EarthquakeRecord {
    EarthquakeRecord {
        magnitude: 0.4,
        province: tag.to_string(),
        district: "unknown".to_string(),
        full_region: "TURKEY".to_string(),
        time: "2024-11-18T21:30:15.0Z".to_string(),
        depth: Some(7.0),
        coordinates: Some(Coordinates {
            latitude: 38.92,
            longitude: 28.14,
        }),
    }
}

#[tokio::test]
async fn acknowledgment_is_sent_exactly_once_per_subscriber() {
    let hub = BroadcastHub::new();
    let (_id, mut rx) = hub.register_stream();

    let first = rx.recv().await.unwrap();
    assert!(first.contains("\"status\":\"connected\""));

    hub.broadcast(&record("a"));
    hub.broadcast(&record("b"));

    let second = rx.recv().await.unwrap();
    let third = rx.recv().await.unwrap();
    assert!(second.contains("\"province\":\"a\""));
    assert!(third.contains("\"province\":\"b\""));
}

#[tokio::test]
async fn one_dead_subscriber_does_not_starve_the_rest() {
    let hub = BroadcastHub::new();

    let (_id1, mut rx1) = hub.register_stream();
    let (_id2, rx2) = hub.register_stream();
    let (_id3, mut rx3) = hub.register_stream();
    let _ = rx1.recv().await.unwrap();
    let _ = rx3.recv().await.unwrap();
    drop(rx2);

    let outcome = hub.broadcast(&record("x"));
    assert_eq!(outcome.stream_subscribers, 2);
    assert_eq!(hub.stream_subscriber_count(), 2);

    assert!(rx1.recv().await.unwrap().contains("earthquake_alert"));
    assert!(rx3.recv().await.unwrap().contains("earthquake_alert"));
}

#[tokio::test]
async fn subscribers_joining_mid_stream_only_see_later_records() {
    let hub = BroadcastHub::new();

    let (_early_id, mut early_rx) = hub.register_stream();
    let _ = early_rx.recv().await.unwrap();
    hub.broadcast(&record("before"));

    let (_late_id, mut late_rx) = hub.register_stream();
    let _ = late_rx.recv().await.unwrap();
    hub.broadcast(&record("after"));

    assert!(early_rx.recv().await.unwrap().contains("before"));
    assert!(early_rx.recv().await.unwrap().contains("after"));

    let only = late_rx.recv().await.unwrap();
    assert!(only.contains("after"));
    assert!(late_rx.try_recv().is_err());
}

#[tokio::test]
async fn both_transports_receive_every_broadcast() {
    let hub = BroadcastHub::new();

    let mut push_rx = hub.subscribe_push();
    let (_id, mut stream_rx) = hub.register_stream();
    let _ = stream_rx.recv().await.unwrap();

    let outcome = hub.broadcast(&record("both"));
    assert_eq!(outcome.push_subscribers, 1);
    assert_eq!(outcome.stream_subscribers, 1);

    assert_eq!(push_rx.recv().await.unwrap().province, "both");
    assert!(stream_rx
        .recv()
        .await
        .unwrap()
        .contains("\"province\":\"both\""));
}

#[tokio::test]
async fn concurrent_registration_during_broadcast_storm_is_safe() {
    let hub = Arc::new(BroadcastHub::new());

    let broadcaster = {
        let hub = Arc::clone(&hub);
        tokio::spawn(async move {
            for i in 0..100 {
                hub.broadcast(&record(&format!("r{i}")));
                tokio::task::yield_now().await;
            }
        })
    };

    let churner = {
        let hub = Arc::clone(&hub);
        tokio::spawn(async move {
            for _ in 0..50 {
                let (id, rx) = hub.register_stream();
                tokio::task::yield_now().await;
                drop(rx);
                hub.remove_stream(id);
            }
        })
    };

    broadcaster.await.unwrap();
    churner.await.unwrap();
    assert_eq!(hub.stream_subscriber_count(), 0);
}
