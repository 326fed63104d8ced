// src/feed/mod.rs
pub mod connector;
pub mod envelope;

pub use connector::{FeedConnector, FeedLink, FeedMessage, FeedTransport, WsTransport};
pub use envelope::{EarthquakeCandidate, EventProperties, RawFeedEnvelope};
