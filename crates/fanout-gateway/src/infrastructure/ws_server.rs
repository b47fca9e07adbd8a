//! WebSocket server: accept loop, handshake, and per-connection read pump.
//!
//! This module is responsible for:
//!
//! 1. Binding a TCP listener on the configured address.
//! 2. Upgrading each accepted socket to a WebSocket, refusing origins that are
//!    not on the allow-list and capping the inbound message size.
//! 3. Registering the socket's write half with the hub as a [`WsTransport`].
//! 4. Running the read pump: every frame read from the client either reaches
//!    the hub (`receive`) or refreshes the connection's liveness (`touch`).
//! 5. Unregistering the connection when the client leaves, errors, or stays
//!    silent for longer than `pong_wait`.
//! 6. Stopping the accept loop when the `running` flag is cleared.
//!
//! # Who writes to the socket?
//!
//! Only the shard that owns the connection.  Replies, broadcasts, pings, and
//! the final close frame are all written by the shard through the
//! [`Transport`] impl below, under the hub's write deadline.  The read pump
//! never writes.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use fanout_core::{Frame, FrameKind};
use fanout_hub::{ConnectionHandle, Hub, Transport, TransportError};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::accept_hdr_async_with_config;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{header::ORIGIN, StatusCode};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tracing::{debug, error, info, warn};

use crate::domain::config::GatewayConfig;
use crate::domain::message::normalize;

/// How often the accept loop wakes up to check the `running` flag.
const ACCEPT_POLL: Duration = Duration::from_millis(200);

// ── Settings ──────────────────────────────────────────────────────────────────

/// Per-connection rules applied by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Origins allowed to connect.  Empty allows all.
    pub allowed_origins: Vec<String>,
    /// Longest silence tolerated from a client before it is dropped.
    pub pong_wait: Duration,
    /// Largest inbound message accepted, in bytes.
    pub max_message_size: usize,
}

impl ServerSettings {
    pub fn from_config(config: &GatewayConfig) -> Self {
        let liveness = config.liveness_config();
        Self {
            allowed_origins: config.server.allowed_origins.clone(),
            pong_wait: liveness.pong_wait,
            max_message_size: liveness.max_message_size,
        }
    }

    /// Whether a handshake carrying `origin` may proceed.
    pub fn origin_allowed(&self, origin: Option<&str>) -> bool {
        if self.allowed_origins.is_empty() {
            return true;
        }
        origin.is_some_and(|origin| {
            self.allowed_origins
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(origin))
        })
    }

    fn websocket_config(&self) -> WebSocketConfig {
        WebSocketConfig {
            max_message_size: Some(self.max_message_size),
            max_frame_size: Some(self.max_message_size),
            ..WebSocketConfig::default()
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self::from_config(&GatewayConfig::default())
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Binds `addr` and serves WebSocket clients into `hub` until `running` is
/// set to `false`.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot be bound (port in use, missing
/// permission).
pub async fn run_server(
    addr: SocketAddr,
    hub: Hub,
    settings: ServerSettings,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind WebSocket listener on {addr}"))?;

    info!("WebSocket gateway listening on {addr}");
    serve(listener, hub, settings, running).await
}

/// Runs the accept loop on an already bound listener.
///
/// Each accepted socket gets its own task, so a slow handshake never delays
/// the next client.
///
/// # Errors
///
/// Currently never fails; accept errors are logged and the loop continues.
pub async fn serve(
    listener: TcpListener,
    hub: Hub,
    settings: ServerSettings,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let settings = Arc::new(settings);

    loop {
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set; stopping accept loop");
            break;
        }

        match timeout(ACCEPT_POLL, listener.accept()).await {
            Ok(Ok((stream, peer_addr))) => {
                debug!("new connection from {peer_addr}");
                let hub = hub.clone();
                let settings = Arc::clone(&settings);
                tokio::spawn(async move {
                    handle_client(stream, peer_addr, hub, settings).await;
                });
            }
            Ok(Err(e)) => error!("accept error: {e}"),
            Err(_) => {}
        }
    }

    Ok(())
}

// ── Per-connection handler ────────────────────────────────────────────────────

async fn handle_client(
    stream: TcpStream,
    peer_addr: SocketAddr,
    hub: Hub,
    settings: Arc<ServerSettings>,
) {
    match run_client(stream, peer_addr, hub, &settings).await {
        Ok(()) => debug!("client {peer_addr} disconnected"),
        Err(e) => warn!("client {peer_addr} dropped: {e:#}"),
    }
}

async fn run_client(
    stream: TcpStream,
    peer_addr: SocketAddr,
    hub: Hub,
    settings: &ServerSettings,
) -> anyhow::Result<()> {
    let check_origin = |request: &Request, response: Response| {
        let origin = request
            .headers()
            .get(ORIGIN)
            .and_then(|value| value.to_str().ok());
        if settings.origin_allowed(origin) {
            Ok(response)
        } else {
            warn!("client {peer_addr}: origin {origin:?} refused");
            Err(forbidden())
        }
    };

    let ws_stream =
        accept_hdr_async_with_config(stream, check_origin, Some(settings.websocket_config()))
            .await
            .with_context(|| format!("WebSocket handshake failed with {peer_addr}"))?;

    let (sink, source) = ws_stream.split();
    let handle = hub.register(Box::new(WsTransport::new(sink)));
    info!("client {peer_addr} registered as {}", handle.address());

    let result = read_pump(source, &handle, settings.pong_wait).await;
    handle.unregister();
    result
}

fn forbidden() -> ErrorResponse {
    let mut response = ErrorResponse::new(Some("origin not allowed".to_string()));
    *response.status_mut() = StatusCode::FORBIDDEN;
    response
}

/// Reads client frames until the client leaves or goes quiet.
///
/// Text is normalised before it reaches the hub.  Pings and pongs count as
/// activity.  A read that takes longer than `pong_wait` ends the connection.
///
/// # Errors
///
/// Returns an error for a read timeout or a protocol violation, such as a
/// message larger than the configured limit.
pub async fn read_pump<S>(
    mut source: S,
    handle: &ConnectionHandle,
    pong_wait: Duration,
) -> anyhow::Result<()>
where
    S: Stream<Item = Result<WsMessage, WsError>> + Unpin,
{
    loop {
        let message = match timeout(pong_wait, source.next()).await {
            Err(_) => anyhow::bail!("no traffic for {pong_wait:?}"),
            Ok(None) | Ok(Some(Err(WsError::ConnectionClosed))) => return Ok(()),
            Ok(Some(Err(e))) => return Err(e).context("read failed"),
            Ok(Some(Ok(message))) => message,
        };

        match message {
            WsMessage::Text(text) => handle.receive(normalize(&text)),
            WsMessage::Binary(bytes) => handle.receive(bytes),
            WsMessage::Ping(_) | WsMessage::Pong(_) => handle.touch(),
            WsMessage::Close(_) => return Ok(()),
            WsMessage::Frame(_) => {}
        }
    }
}

// ── Transport ─────────────────────────────────────────────────────────────────

/// The write half of a WebSocket, as seen by the hub.
pub struct WsTransport<S> {
    sink: S,
}

impl<S> WsTransport<S> {
    pub fn new(sink: S) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl<S> Transport for WsTransport<S>
where
    S: Sink<WsMessage, Error = WsError> + Unpin + Send,
{
    async fn send(&mut self, frame: &Frame) -> Result<(), TransportError> {
        let message = match frame.kind {
            FrameKind::Text => WsMessage::Text(String::from_utf8_lossy(&frame.body).into_owned()),
            FrameKind::Binary => WsMessage::Binary(frame.body.to_vec()),
        };
        self.sink.send(message).await.map_err(to_transport_error)
    }

    async fn ping(&mut self) -> Result<(), TransportError> {
        self.sink
            .send(WsMessage::Ping(Vec::new()))
            .await
            .map_err(to_transport_error)
    }

    async fn close(&mut self) {
        let _ = self.sink.send(WsMessage::Close(None)).await;
        let _ = self.sink.close().await;
    }
}

fn to_transport_error(e: WsError) -> TransportError {
    match e {
        WsError::ConnectionClosed | WsError::AlreadyClosed => TransportError::Closed,
        other => TransportError::Write(other.to_string()),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::convert::Infallible;
    use std::sync::Arc;

    use fanout_core::{HubConfig, LivenessConfig, Protocol};
    use fanout_hub::{ConnectionObserver, NoopObserver};
    use futures_util::stream;
    use tokio::sync::mpsc;

    use super::*;

    fn settings(origins: &[&str]) -> ServerSettings {
        ServerSettings {
            allowed_origins: origins.iter().map(|o| o.to_string()).collect(),
            ..ServerSettings::default()
        }
    }

    fn one_shard_hub(observer: Arc<dyn ConnectionObserver>) -> Hub {
        let config = HubConfig {
            max_connections: 1,
            shard_capacity: 1,
            min_shards: 1,
        };
        Hub::new(Protocol::Ws, 3, &config, LivenessConfig::default(), observer)
    }

    struct Forward(mpsc::UnboundedSender<Vec<u8>>);

    impl ConnectionObserver for Forward {
        fn on_message(&self, _conn: &ConnectionHandle, message: &[u8]) {
            let _ = self.0.send(message.to_vec());
        }
    }

    #[test]
    fn test_empty_allow_list_accepts_any_origin() {
        let settings = settings(&[]);

        assert!(settings.origin_allowed(Some("https://anywhere.test")));
        assert!(settings.origin_allowed(None));
    }

    #[test]
    fn test_allow_list_refuses_unknown_and_missing_origins() {
        let settings = settings(&["https://app.example.com"]);

        assert!(settings.origin_allowed(Some("https://app.example.com")));
        assert!(settings.origin_allowed(Some("HTTPS://APP.EXAMPLE.COM")));
        assert!(!settings.origin_allowed(Some("https://evil.test")));
        assert!(!settings.origin_allowed(None));
    }

    #[test]
    fn test_settings_follow_liveness_section() {
        let mut config = GatewayConfig::default();
        config.liveness.pong_wait_secs = 20;
        config.liveness.max_message_size = 1024;

        let settings = ServerSettings::from_config(&config);

        assert_eq!(settings.pong_wait, Duration::from_secs(20));
        assert_eq!(settings.max_message_size, 1024);
        assert_eq!(settings.websocket_config().max_message_size, Some(1024));
    }

    #[test]
    fn test_forbidden_response_is_403() {
        assert_eq!(forbidden().status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_read_pump_normalises_text_and_stops_at_close() {
        // Arrange
        let (tx, mut rx) = mpsc::unbounded_channel();
        let hub = one_shard_hub(Arc::new(Forward(tx)));
        let (transport, _peer) = fanout_hub::memory_transport();
        let handle = hub.register(Box::new(transport));
        let frames = stream::iter(vec![
            Ok::<_, WsError>(WsMessage::Text(" line one\nline two \n".to_string())),
            Ok(WsMessage::Pong(Vec::new())),
            Ok(WsMessage::Binary(vec![1, 2])),
            Ok(WsMessage::Close(None)),
            Ok(WsMessage::Text("after close".to_string())),
        ]);

        // Act
        let result = read_pump(frames, &handle, Duration::from_secs(5)).await;

        // Assert
        assert!(result.is_ok());
        assert_eq!(rx.recv().await, Some(b"line one line two".to_vec()));
        assert_eq!(rx.recv().await, Some(vec![1, 2]));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_pump_gives_up_on_a_silent_client() {
        let hub = one_shard_hub(Arc::new(NoopObserver));
        let (transport, _peer) = fanout_hub::memory_transport();
        let handle = hub.register(Box::new(transport));

        let result = read_pump(
            stream::pending::<Result<WsMessage, WsError>>(),
            &handle,
            Duration::from_secs(60),
        )
        .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_read_pump_reports_protocol_errors() {
        let hub = one_shard_hub(Arc::new(NoopObserver));
        let (transport, _peer) = fanout_hub::memory_transport();
        let handle = hub.register(Box::new(transport));
        let frames = stream::iter(vec![Err::<WsMessage, _>(WsError::AttackAttempt)]);

        let result = read_pump(frames, &handle, Duration::from_secs(5)).await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_transport_writes_text_binary_ping_and_close() {
        // Arrange
        let sink =
            Vec::<WsMessage>::new().sink_map_err(|never: Infallible| -> WsError { match never {} });
        let mut transport = WsTransport::new(sink);

        // Act
        transport.send(&Frame::text("hi")).await.expect("text");
        transport.send(&Frame::binary(vec![7])).await.expect("binary");
        transport.ping().await.expect("ping");
        transport.close().await;

        // Assert
        assert_eq!(
            transport.sink.get_ref(),
            &vec![
                WsMessage::Text("hi".to_string()),
                WsMessage::Binary(vec![7]),
                WsMessage::Ping(Vec::new()),
                WsMessage::Close(None),
            ]
        );
    }
}
