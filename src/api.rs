// src/api.rs
//
// HTTP surface. The two subscriber endpoints hand connections to the
// broadcast hub; everything else is thin diagnostics around it.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    response::{Html, IntoResponse},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use futures::stream::{Stream, StreamExt};
use serde_json::{json, Value};
use tokio_stream::wrappers::{BroadcastStream, UnboundedReceiverStream};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{info, warn};

use crate::broadcast::{BroadcastHub, Coordinates, EarthquakeRecord, PUSH_EVENT_NAME};

const OVERLAY_PAGE_PATH: &str = "public/obs-overlay.html";

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<BroadcastHub>,
    pub started_at: Instant,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(service_info))
        .route("/health", get(health))
        .route("/api/docs", get(api_docs))
        .route("/api/deprem-dinle", get(stream_listen))
        .route("/events", get(push_events))
        .route("/test-alert", get(test_alert))
        .route("/obs-overlay", get(obs_overlay))
        .nest_service("/public", ServeDir::new("public"))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

async fn service_info() -> Json<Value> {
    Json(json!({
        "message": "Realtime Earthquake Alert API",
        "version": "1.0.0",
        "endpoints": {
            "GET /": "API information",
            "GET /api/deprem-dinle": "HTTP API, earthquake alerts as a JSON stream",
            "GET /api/docs": "API documentation and usage examples",
            "GET /events": "Push channel (SSE), one named event per earthquake",
            "GET /test-alert": "Send a manual test alert to all subscribers",
            "GET /obs-overlay": "Overlay page for OBS browser sources",
            "GET /health": "Service status",
            "GET /metrics": "Prometheus metrics"
        },
        "usage": {
            "HTTP API": "curl http://localhost:5151/api/deprem-dinle",
            "SSE": "curl -N http://localhost:5151/events"
        }
    }))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "OK",
        "timestamp": Utc::now().to_rfc3339(),
        "uptime": state.started_at.elapsed().as_secs(),
        "connections": state.hub.push_subscriber_count(),
        "api_connections": state.hub.stream_subscriber_count(),
    }))
}

async fn api_docs() -> Json<Value> {
    Json(json!({
        "title": "Realtime Earthquake Alert API Documentation",
        "version": "1.0.0",
        "description": "Listen to Turkey earthquakes in real time over HTTP",
        "endpoints": {
            "/api/deprem-dinle": {
                "method": "GET",
                "description": "Earthquake alerts as an HTTP stream",
                "response_format": "JSON objects separated by a blank line",
                "content_type": "text/plain",
                "connection": "keep-alive",
                "notes": [
                    "The connection stays open; each alert is one JSON object",
                    "A connection acknowledgment object is sent first",
                    "Clients should reconnect when the connection drops"
                ]
            },
            "/events": {
                "method": "GET",
                "description": "Server-sent events push channel",
                "event_name": PUSH_EVENT_NAME
            }
        },
        "filters": {
            "magnitude": "at or below the configured threshold",
            "region": "Turkey only",
            "authority": "AFAD",
            "source": "EMSC (European-Mediterranean Seismological Centre)"
        }
    }))
}

/// Long-lived streaming connection: acknowledgment on connect, then one
/// JSON record per broadcast. The registry entry is dropped with the body.
async fn stream_listen(State(state): State<AppState>) -> impl IntoResponse {
    let (id, rx) = state.hub.register_stream();
    let guard = StreamGuard {
        hub: Arc::clone(&state.hub),
        id,
    };

    let body = Body::from_stream(UnboundedReceiverStream::new(rx).map(move |chunk| {
        let _keep_registered = &guard;
        Ok::<_, Infallible>(chunk)
    }));

    (
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
}

/// Deregisters the stream subscriber when the response body is dropped,
/// which is how a client disconnect surfaces here.
struct StreamGuard {
    hub: Arc<BroadcastHub>,
    id: u64,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.hub.remove_stream(self.id);
    }
}

/// Push channel: SSE with one named event per accepted earthquake.
async fn push_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!(
        clients = state.hub.push_subscriber_count() + 1,
        "push subscriber connected"
    );

    let rx = state.hub.subscribe_push();
    let stream = BroadcastStream::new(rx).filter_map(|result| async move {
        match result {
            Ok(record) => Event::default()
                .event(PUSH_EVENT_NAME)
                .json_data(&record)
                .ok()
                .map(Ok),
            Err(e) => {
                // A lagged receiver skips what it missed and keeps going.
                warn!(error = ?e, "push subscriber lagged");
                None
            }
        }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("keep-alive"),
    )
}

/// Manual broadcast with synthetic data, through the same hub path real
/// events take.
async fn test_alert(State(state): State<AppState>) -> Json<Value> {
    let record = EarthquakeRecord {
        magnitude: 4.5,
        province: "İstanbul".to_string(),
        district: "Kadıköy".to_string(),
        full_region: "MARMARA SEA".to_string(),
        time: Utc::now().to_rfc3339(),
        depth: Some(10.0),
        coordinates: Some(Coordinates {
            latitude: 41.0082,
            longitude: 29.0181,
        }),
    };

    info!(
        province = %record.province,
        magnitude = record.magnitude,
        "sending manual test alert"
    );
    let outcome = state.hub.broadcast(&record);

    Json(json!({
        "status": "success",
        "message": "Test earthquake alert sent",
        "data": record,
        "sent_to": {
            "api_clients": outcome.stream_subscribers,
            "push_clients": outcome.push_subscribers,
        }
    }))
}

/// Overlay page for OBS browser sources. No caching, autoplay allowed.
async fn obs_overlay() -> impl IntoResponse {
    match tokio::fs::read_to_string(OVERLAY_PAGE_PATH).await {
        Ok(page) => (
            [
                (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
                (header::PRAGMA, "no-cache"),
                (header::EXPIRES, "0"),
                (
                    header::HeaderName::from_static("permissions-policy"),
                    "autoplay=self",
                ),
            ],
            Html(page),
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, path = OVERLAY_PAGE_PATH, "overlay page unavailable");
            (StatusCode::NOT_FOUND, "overlay page not found").into_response()
        }
    }
}
