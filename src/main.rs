//! Binary entrypoint. Boots the feed connector and the Axum HTTP server,
//! wiring the broadcast hub, the dedup store, and the geocoder into the
//! pipeline coordinator.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use deprem_relay::api::{create_router, AppState};
use deprem_relay::broadcast::BroadcastHub;
use deprem_relay::config::AppConfig;
use deprem_relay::dedup::{DedupStore, RedisDedupStore};
use deprem_relay::feed::connector::{FeedConnector, WsTransport};
use deprem_relay::geocode::{BigDataCloudGeocoder, Geocoder};
use deprem_relay::metrics::Metrics;
use deprem_relay::pipeline::Coordinator;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("deprem_relay=info,warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = AppConfig::from_env()?;
    let metrics = Metrics::init();

    let hub = Arc::new(BroadcastHub::new());
    let dedup: Arc<dyn DedupStore> = Arc::new(RedisDedupStore::connect(&config.redis_url)?);
    let geocoder: Arc<dyn Geocoder> = Arc::new(BigDataCloudGeocoder::new());

    let coordinator = Arc::new(Coordinator::new(
        config.filter.clone(),
        dedup,
        geocoder,
        Arc::clone(&hub),
    ));

    FeedConnector::new(Arc::new(WsTransport::new(config.feed_url.clone())), coordinator).spawn();

    let state = AppState {
        hub,
        started_at: Instant::now(),
    };
    let router = create_router(state).merge(metrics.router());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!(%addr, "deprem-relay listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    axum::serve(listener, router).await.context("http server")?;

    Ok(())
}
