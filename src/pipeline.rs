// src/pipeline.rs
//
// Per-event control flow: classify, dedup check, geocode, broadcast, dedup
// record. Every failure is absorbed at the stage where it happens; nothing
// thrown here ever reaches the connector or the process. Runs for different
// events may overlap. Two near-simultaneous arrivals of the same source id
// can both pass the dedup check before either records, which matches the
// reference behavior and is left as-is.

use std::sync::Arc;

use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use tracing::{debug, info};

use crate::broadcast::{BroadcastHub, Coordinates, EarthquakeRecord};
use crate::classify::{classify, AcceptedEvent};
use crate::config::FilterConfig;
use crate::dedup::{DedupEntry, DedupStore};
use crate::feed::envelope::EarthquakeCandidate;
use crate::geocode::{self, Geocoder, ResolvedPlace};

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "events_received_total",
            "Candidates handed to the pipeline."
        );
        describe_counter!(
            "events_rejected_total",
            "Candidates rejected by classification, labeled by reason."
        );
        describe_counter!(
            "events_duplicate_total",
            "Accepted candidates skipped by the dedup window."
        );
        describe_counter!(
            "events_broadcast_total",
            "Records delivered to the broadcast hub."
        );
        describe_counter!(
            "geocode_fallback_total",
            "Geocode failures answered with the feed region."
        );
        describe_counter!("dedup_store_errors_total", "Dedup store call failures.");
        describe_counter!("feed_messages_total", "Raw frames received from the feed.");
        describe_counter!("feed_parse_errors_total", "Feed frames dropped as malformed.");
        describe_counter!("feed_reconnects_total", "Feed connection teardowns.");
    });
}

pub struct Coordinator {
    filter: FilterConfig,
    dedup: Arc<dyn DedupStore>,
    geocoder: Arc<dyn Geocoder>,
    hub: Arc<BroadcastHub>,
}

impl Coordinator {
    pub fn new(
        filter: FilterConfig,
        dedup: Arc<dyn DedupStore>,
        geocoder: Arc<dyn Geocoder>,
        hub: Arc<BroadcastHub>,
    ) -> Self {
        ensure_metrics_described();
        Self {
            filter,
            dedup,
            geocoder,
            hub,
        }
    }

    /// Run the full pipeline for one candidate.
    pub async fn process(&self, candidate: EarthquakeCandidate) {
        counter!("events_received_total").increment(1);

        let accepted = match classify(&candidate, &self.filter) {
            Ok(accepted) => accepted,
            Err(reason) => {
                counter!("events_rejected_total", "reason" => reason.as_str()).increment(1);
                info!(
                    reason = %reason,
                    region = ?candidate.region,
                    magnitude = ?candidate.magnitude,
                    "event rejected, not broadcast"
                );
                return;
            }
        };

        if self.dedup.has(&accepted.source_id).await {
            counter!("events_duplicate_total").increment(1);
            info!(
                source_id = %accepted.source_id,
                "already broadcast within the retention window, skipping"
            );
            return;
        }

        let place = geocode::resolve_with_fallback(
            self.geocoder.as_ref(),
            accepted.latitude,
            accepted.longitude,
            &accepted.region,
        )
        .await;

        let record = build_record(&accepted, &place);
        info!(
            province = %record.province,
            district = %record.district,
            magnitude = record.magnitude,
            "broadcasting earthquake alert"
        );

        let outcome = self.hub.broadcast(&record);
        counter!("events_broadcast_total").increment(1);
        debug!(
            push = outcome.push_subscribers,
            streams = outcome.stream_subscribers,
            "fan-out complete"
        );

        // Recorded after the broadcast; a store failure here is logged by the
        // client and the broadcast stands.
        self.dedup.record(&DedupEntry::published_now(&accepted)).await;
    }
}

fn build_record(event: &AcceptedEvent, place: &ResolvedPlace) -> EarthquakeRecord {
    EarthquakeRecord {
        magnitude: event.magnitude,
        province: place.province.clone(),
        district: place.district.clone(),
        full_region: event.region.clone(),
        time: event
            .time
            .clone()
            .unwrap_or_else(|| chrono::Utc::now().to_rfc3339()),
        depth: event.depth,
        coordinates: Some(Coordinates {
            latitude: event.latitude,
            longitude: event.longitude,
        }),
    }
}
