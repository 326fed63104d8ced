// src/feed/connector.rs
//
// Upstream feed lifecycle: connect, listen, keep alive, reconnect.
//
// The connection loops through Disconnected → Connecting → Connected →
// (Closed | Errored) and back, forever. A 30 s ping keeps intermediaries from
// dropping the socket; a missing pong on its own never tears the connection
// down, only a transport close or error does. Each teardown schedules exactly
// one reconnect attempt after a fixed delay. The probe deadline lives inside
// the per-connection serve loop, so a superseded connection cannot leave a
// timer behind.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use metrics::counter;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::feed::envelope::{EarthquakeCandidate, RawFeedEnvelope};
use crate::pipeline::Coordinator;

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const RECONNECT_DELAY: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorPhase {
    Disconnected,
    Connecting,
    Connected,
    Closed,
    Errored,
}

/// Inbound message, reduced to what the connector cares about.
#[derive(Debug)]
pub enum FeedMessage {
    Text(String),
    Pong,
    Other,
}

/// One live connection. `next_message` returning `None` means the peer
/// closed; an `Err` is a transport failure. Both recycle the connection.
#[async_trait]
pub trait FeedLink: Send {
    async fn next_message(&mut self) -> Option<Result<FeedMessage>>;
    async fn ping(&mut self) -> Result<()>;
}

/// Factory for live connections. Production uses the WebSocket transport;
/// tests script their own links and fast-forward time.
#[async_trait]
pub trait FeedTransport: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn FeedLink>>;
}

pub struct WsTransport {
    url: String,
}

impl WsTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl FeedTransport for WsTransport {
    async fn connect(&self) -> Result<Box<dyn FeedLink>> {
        let (ws, _response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .context("feed websocket connect")?;
        Ok(Box::new(WsLink { inner: ws }))
    }
}

struct WsLink {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl FeedLink for WsLink {
    async fn next_message(&mut self) -> Option<Result<FeedMessage>> {
        match self.inner.next().await {
            None => None,
            Some(Err(e)) => Some(Err(anyhow::Error::new(e).context("feed websocket receive"))),
            Some(Ok(Message::Text(text))) => Some(Ok(FeedMessage::Text(text))),
            Some(Ok(Message::Pong(_))) => Some(Ok(FeedMessage::Pong)),
            Some(Ok(Message::Close(_))) => None,
            Some(Ok(_)) => Some(Ok(FeedMessage::Other)),
        }
    }

    async fn ping(&mut self) -> Result<()> {
        self.inner
            .send(Message::Ping(Vec::new()))
            .await
            .context("feed websocket ping")
    }
}

pub struct FeedConnector {
    transport: Arc<dyn FeedTransport>,
    coordinator: Arc<Coordinator>,
    phase: ConnectorPhase,
}

impl FeedConnector {
    pub fn new(transport: Arc<dyn FeedTransport>, coordinator: Arc<Coordinator>) -> Self {
        Self {
            transport,
            coordinator,
            phase: ConnectorPhase::Disconnected,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Retries indefinitely; transport failures never escape this loop.
    pub async fn run(mut self) {
        loop {
            self.set_phase(ConnectorPhase::Connecting);
            info!("connecting to upstream feed");

            match self.transport.connect().await {
                Ok(link) => {
                    self.set_phase(ConnectorPhase::Connected);
                    info!("feed connected, listening for earthquakes");
                    match self.serve(link).await {
                        Ok(()) => {
                            self.set_phase(ConnectorPhase::Closed);
                            warn!("feed connection closed by upstream");
                        }
                        Err(e) => {
                            self.set_phase(ConnectorPhase::Errored);
                            warn!(error = ?e, "feed connection error");
                        }
                    }
                    counter!("feed_reconnects_total").increment(1);
                }
                Err(e) => {
                    self.set_phase(ConnectorPhase::Errored);
                    warn!(error = ?e, "feed connect failed");
                }
            }

            self.set_phase(ConnectorPhase::Disconnected);
            info!(
                delay_secs = RECONNECT_DELAY.as_secs(),
                "scheduling feed reconnect"
            );
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }

    /// Drive one connection until it closes or errors. The ping deadline is
    /// local to this call and dies with the connection.
    async fn serve(&self, mut link: Box<dyn FeedLink>) -> Result<()> {
        let mut next_ping = tokio::time::Instant::now() + HEARTBEAT_INTERVAL;
        loop {
            match tokio::time::timeout_at(next_ping, link.next_message()).await {
                Err(_elapsed) => {
                    link.ping().await?;
                    next_ping += HEARTBEAT_INTERVAL;
                }
                Ok(None) => return Ok(()),
                Ok(Some(Err(e))) => return Err(e),
                Ok(Some(Ok(FeedMessage::Text(text)))) => self.handle_text(&text),
                Ok(Some(Ok(FeedMessage::Pong))) => debug!("feed pong received"),
                Ok(Some(Ok(FeedMessage::Other))) => {}
            }
        }
    }

    /// Parse one inbound frame and hand any event section to the pipeline.
    /// Parse failures drop the frame without touching connection state.
    fn handle_text(&self, text: &str) {
        counter!("feed_messages_total").increment(1);

        let envelope: RawFeedEnvelope = match serde_json::from_str(text) {
            Ok(env) => env,
            Err(e) => {
                counter!("feed_parse_errors_total").increment(1);
                warn!(error = %e, "dropping malformed feed message");
                return;
            }
        };

        let Some(props) = envelope.data.and_then(|d| d.properties) else {
            return;
        };

        info!(
            region = ?props.flynn_region,
            magnitude = ?props.mag,
            "raw event received"
        );

        let candidate = EarthquakeCandidate::from(props);
        let coordinator = Arc::clone(&self.coordinator);
        // Pipeline runs are spawned so a new message can start its own run
        // while a prior geocode or dedup call is still in flight.
        tokio::spawn(async move {
            coordinator.process(candidate).await;
        });
    }

    fn set_phase(&mut self, next: ConnectorPhase) {
        if next != self.phase {
            debug!(from = ?self.phase, to = ?next, "connector phase change");
            self.phase = next;
        }
    }
}
