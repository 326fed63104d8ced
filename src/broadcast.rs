// src/broadcast.rs
//
// Fan-out of enriched earthquake records to every connected subscriber.
//
// Two subscriber kinds live in the hub. Push-channel subscribers hang off a
// `tokio::sync::broadcast` channel and get a named SSE event; delivery there
// is best-effort by construction. Stream subscribers are long-lived HTTP
// responses fed through per-client unbounded channels held in a locked map;
// a failed write removes that one subscriber and the rest still get the
// record. Registration and removal are safe while a broadcast is in flight
// because delivery iterates over a snapshot of the senders.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// Named event carried by the push channel.
pub const PUSH_EVENT_NAME: &str = "earthquake";

/// Buffered records per push subscriber before a slow client starts lagging.
const PUSH_CHANNEL_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// Broadcast-ready payload: one accepted, deduplicated, geocoded event.
/// Exists only for the duration of one broadcast call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EarthquakeRecord {
    pub magnitude: f64,
    pub province: String,
    pub district: String,
    #[serde(rename = "fullRegion")]
    pub full_region: String,
    pub time: String,
    pub depth: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,
}

#[derive(Serialize)]
struct AlertLocation<'a> {
    province: &'a str,
    district: &'a str,
    #[serde(rename = "fullRegion")]
    full_region: &'a str,
}

#[derive(Serialize)]
struct AlertData<'a> {
    magnitude: f64,
    location: AlertLocation<'a>,
    time: &'a str,
    depth: Option<f64>,
    coordinates: Option<Coordinates>,
}

/// Wire wrapper written to stream subscribers, one JSON object per record.
#[derive(Serialize)]
pub struct StreamAlert<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    data: AlertData<'a>,
    timestamp: String,
    source: &'static str,
}

impl<'a> StreamAlert<'a> {
    pub fn new(record: &'a EarthquakeRecord) -> Self {
        Self {
            kind: "earthquake_alert",
            data: AlertData {
                magnitude: record.magnitude,
                location: AlertLocation {
                    province: &record.province,
                    district: &record.district,
                    full_region: &record.full_region,
                },
                time: &record.time,
                depth: record.depth,
                coordinates: record.coordinates,
            },
            timestamp: Utc::now().to_rfc3339(),
            source: "EMSC",
        }
    }
}

/// Connection acknowledgment written once when a stream subscriber registers.
#[derive(Serialize)]
struct StreamWelcome {
    status: &'static str,
    message: &'static str,
    timestamp: String,
    server: &'static str,
}

impl StreamWelcome {
    fn new() -> Self {
        Self {
            status: "connected",
            message: "Connected to the earthquake alert stream. Listening for Turkey earthquakes...",
            timestamp: Utc::now().to_rfc3339(),
            server: "deprem-relay v1.0",
        }
    }
}

/// How many subscribers of each kind a broadcast reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastOutcome {
    pub push_subscribers: usize,
    pub stream_subscribers: usize,
}

pub struct BroadcastHub {
    push_tx: broadcast::Sender<EarthquakeRecord>,
    streams: RwLock<HashMap<u64, mpsc::UnboundedSender<String>>>,
    next_stream_id: AtomicU64,
}

impl BroadcastHub {
    pub fn new() -> Self {
        let (push_tx, _) = broadcast::channel(PUSH_CHANNEL_CAPACITY);
        Self {
            push_tx,
            streams: RwLock::new(HashMap::new()),
            next_stream_id: AtomicU64::new(1),
        }
    }

    /// Receiver for a new push-channel subscriber.
    pub fn subscribe_push(&self) -> broadcast::Receiver<EarthquakeRecord> {
        self.push_tx.subscribe()
    }

    pub fn push_subscriber_count(&self) -> usize {
        self.push_tx.receiver_count()
    }

    pub fn stream_subscriber_count(&self) -> usize {
        self.streams.read().expect("stream registry poisoned").len()
    }

    /// Register a stream subscriber. The acknowledgment frame is already in
    /// the returned channel. The caller owns removal, either explicitly or
    /// through a drop guard on the response body.
    pub fn register_stream(&self) -> (u64, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let welcome =
            serde_json::to_string(&StreamWelcome::new()).expect("serialize welcome frame");
        // The receiver is alive by construction, the send cannot fail.
        let _ = tx.send(frame(welcome));

        let id = self.next_stream_id.fetch_add(1, Ordering::Relaxed);
        self.streams
            .write()
            .expect("stream registry poisoned")
            .insert(id, tx);
        info!(subscriber = id, "stream subscriber registered");
        (id, rx)
    }

    pub fn remove_stream(&self, id: u64) {
        let removed = self
            .streams
            .write()
            .expect("stream registry poisoned")
            .remove(&id)
            .is_some();
        if removed {
            info!(subscriber = id, "stream subscriber removed");
        }
    }

    /// Deliver one record to every subscriber registered right now. A dead
    /// stream subscriber is dropped from the registry without affecting the
    /// others; the push emit is lossy when nobody listens.
    pub fn broadcast(&self, record: &EarthquakeRecord) -> BroadcastOutcome {
        let push_subscribers = self.push_tx.send(record.clone()).unwrap_or(0);

        let payload = match serde_json::to_string(&StreamAlert::new(record)) {
            Ok(json) => frame(json),
            Err(e) => {
                warn!(error = %e, "failed to serialize stream alert, stream subscribers skipped");
                return BroadcastOutcome {
                    push_subscribers,
                    stream_subscribers: 0,
                };
            }
        };

        // Snapshot so registration/removal stays possible mid-broadcast.
        let targets: Vec<(u64, mpsc::UnboundedSender<String>)> = {
            let streams = self.streams.read().expect("stream registry poisoned");
            streams.iter().map(|(id, tx)| (*id, tx.clone())).collect()
        };

        let mut delivered = 0usize;
        let mut dead = Vec::new();
        for (id, tx) in targets {
            if tx.send(payload.clone()).is_ok() {
                delivered += 1;
            } else {
                dead.push(id);
            }
        }

        for id in dead {
            warn!(subscriber = id, "stream write failed, dropping subscriber");
            self.remove_stream(id);
        }

        debug!(
            push = push_subscribers,
            streams = delivered,
            "record fanned out"
        );

        BroadcastOutcome {
            push_subscribers,
            stream_subscribers: delivered,
        }
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Stream framing: one JSON object, then a blank line.
fn frame(json: String) -> String {
    json + "\n\n"
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> EarthquakeRecord {
        EarthquakeRecord {
            magnitude: 0.4,
            province: "İstanbul".to_string(),
            district: "Kadıköy".to_string(),
            full_region: "TURKEY (MARMARA)".to_string(),
            time: "2024-11-18T21:30:15.0Z".to_string(),
            depth: Some(8.5),
            coordinates: Some(Coordinates {
                latitude: 40.9,
                longitude: 29.1,
            }),
        }
    }

    #[test]
    fn register_writes_the_acknowledgment_first() {
        let hub = BroadcastHub::new();
        let (_id, mut rx) = hub.register_stream();
        let first = rx.try_recv().unwrap();
        assert!(first.ends_with("\n\n"));
        let v: serde_json::Value = serde_json::from_str(first.trim_end()).unwrap();
        assert_eq!(v["status"], "connected");
    }

    #[test]
    fn broadcast_reaches_registered_streams() {
        let hub = BroadcastHub::new();
        let (_a, mut rx_a) = hub.register_stream();
        let (_b, mut rx_b) = hub.register_stream();
        let _ = rx_a.try_recv().unwrap();
        let _ = rx_b.try_recv().unwrap();

        let outcome = hub.broadcast(&record());
        assert_eq!(outcome.stream_subscribers, 2);

        for rx in [&mut rx_a, &mut rx_b] {
            let raw = rx.try_recv().unwrap();
            assert!(raw.ends_with("\n\n"));
            let v: serde_json::Value = serde_json::from_str(raw.trim_end()).unwrap();
            assert_eq!(v["type"], "earthquake_alert");
            assert_eq!(v["data"]["location"]["province"], "İstanbul");
            assert_eq!(v["data"]["magnitude"], 0.4);
            assert_eq!(v["source"], "EMSC");
        }
    }

    #[test]
    fn dead_subscriber_is_removed_and_others_still_receive() {
        let hub = BroadcastHub::new();
        let (_dead_id, dead_rx) = hub.register_stream();
        let (_live_id, mut live_rx) = hub.register_stream();
        let _ = live_rx.try_recv().unwrap();
        drop(dead_rx);

        let outcome = hub.broadcast(&record());
        assert_eq!(outcome.stream_subscribers, 1);
        assert_eq!(hub.stream_subscriber_count(), 1);
        assert!(live_rx.try_recv().unwrap().contains("earthquake_alert"));
    }

    #[test]
    fn push_emit_without_listeners_is_not_an_error() {
        let hub = BroadcastHub::new();
        let outcome = hub.broadcast(&record());
        assert_eq!(outcome.push_subscribers, 0);
    }

    #[tokio::test]
    async fn push_subscribers_see_the_record() {
        let hub = BroadcastHub::new();
        let mut rx = hub.subscribe_push();
        let outcome = hub.broadcast(&record());
        assert_eq!(outcome.push_subscribers, 1);
        let got = rx.recv().await.unwrap();
        assert_eq!(got, record());
    }

    #[test]
    fn removal_is_idempotent() {
        let hub = BroadcastHub::new();
        let (id, _rx) = hub.register_stream();
        hub.remove_stream(id);
        hub.remove_stream(id);
        assert_eq!(hub.stream_subscriber_count(), 0);
    }
}
