// src/lib.rs
// Public library surface for integration tests (and potential reuse).

pub mod api;
pub mod broadcast;
pub mod classify;
pub mod config;
pub mod dedup;
pub mod feed;
pub mod geocode;
pub mod metrics;
pub mod pipeline;

// ---- Re-exports for stable public API ----
pub use crate::api::{create_router, AppState};
pub use crate::broadcast::{BroadcastHub, BroadcastOutcome, EarthquakeRecord};
pub use crate::classify::{classify, AcceptedEvent, RejectReason};
pub use crate::config::{AppConfig, FilterConfig};
pub use crate::feed::{EarthquakeCandidate, FeedConnector};
pub use crate::pipeline::Coordinator;
