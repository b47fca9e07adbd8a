//! End-to-end tests: real TCP sockets, real WebSocket handshakes, and a
//! `ChatRoom` hub behind the gateway.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fanout_core::{HubConfig, LivenessConfig, Protocol};
use fanout_gateway::application::chat_room::{ChatRoom, ACK};
use fanout_gateway::infrastructure::{serve, ServerSettings};
use fanout_hub::Hub;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Gateway {
    addr: SocketAddr,
    hub: Hub,
    running: Arc<AtomicBool>,
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        self.hub.shutdown();
    }
}

async fn start(settings: ServerSettings) -> Gateway {
    start_with_liveness(settings, LivenessConfig::default()).await
}

async fn start_with_liveness(settings: ServerSettings, liveness: LivenessConfig) -> Gateway {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let config = HubConfig {
        max_connections: 2,
        shard_capacity: 1,
        min_shards: 1,
    };
    let hub = Hub::new(
        Protocol::Ws,
        1,
        &config,
        liveness,
        Arc::new(ChatRoom),
    );
    let running = Arc::new(AtomicBool::new(true));
    tokio::spawn(serve(listener, hub.clone(), settings, Arc::clone(&running)));
    Gateway { addr, hub, running }
}

async fn connect(gateway: &Gateway) -> Client {
    let (client, _response) = connect_async(format!("ws://{}", gateway.addr))
        .await
        .expect("handshake");
    client
}

/// Next text frame, skipping control frames.
async fn next_text(client: &mut Client) -> String {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .expect("read error");
        if let Message::Text(text) = message {
            return text;
        }
    }
}

/// Reads until `period` elapses.  Returns the number of pings seen and
/// whether the socket was still open at the end.
async fn read_for(client: &mut Client, period: Duration) -> (usize, bool) {
    let deadline = tokio::time::Instant::now() + period;
    let mut pings = 0;
    loop {
        match tokio::time::timeout_at(deadline, client.next()).await {
            Err(_) => return (pings, true),
            Ok(Some(Ok(Message::Ping(_)))) => pings += 1,
            Ok(Some(Ok(Message::Close(_)))) | Ok(Some(Err(_))) | Ok(None) => {
                return (pings, false)
            }
            Ok(Some(Ok(_))) => {}
        }
    }
}

/// One-second pong deadline with a sweep interval far too long to meet it
/// unless the shard shortens its tick.
async fn start_with_short_pong_wait() -> Gateway {
    let pong_wait = Duration::from_millis(1000);
    let liveness = LivenessConfig {
        pong_wait,
        ping_period: Duration::from_millis(600),
        sweep_interval: Duration::from_millis(1000),
        ..LivenessConfig::default()
    };
    let settings = ServerSettings {
        pong_wait,
        ..ServerSettings::default()
    };
    start_with_liveness(settings, liveness).await
}

#[tokio::test]
async fn test_client_is_announced_on_connect() {
    let gateway = start(ServerSettings::default()).await;

    let mut client = connect(&gateway).await;

    assert!(next_text(&mut client)
        .await
        .starts_with("connection registered: ws:1:"));
}

#[tokio::test]
async fn test_message_is_acknowledged_and_broadcast() {
    // Arrange
    let gateway = start(ServerSettings::default()).await;
    let mut alice = connect(&gateway).await;
    next_text(&mut alice).await;
    let mut bob = connect(&gateway).await;
    next_text(&mut bob).await;
    next_text(&mut alice).await;

    // Act
    alice
        .send(Message::Text("hello\nworld\n".to_string()))
        .await
        .expect("send");

    // Assert
    assert_eq!(next_text(&mut alice).await, ACK);
    assert_eq!(next_text(&mut alice).await, "hello world");
    assert_eq!(next_text(&mut bob).await, "hello world");
}

#[tokio::test]
async fn test_departure_is_announced() {
    let gateway = start(ServerSettings::default()).await;
    let mut alice = connect(&gateway).await;
    next_text(&mut alice).await;
    let mut bob = connect(&gateway).await;
    let bob_joined = next_text(&mut bob).await;
    next_text(&mut alice).await;
    let bob_address = bob_joined
        .strip_prefix("connection registered: ")
        .expect("announcement")
        .to_string();

    bob.close(None).await.expect("close");

    assert_eq!(
        next_text(&mut alice).await,
        format!("connection unregistered: {bob_address}")
    );
}

#[tokio::test]
async fn test_origin_outside_allow_list_is_refused() {
    // Arrange
    let gateway = start(ServerSettings {
        allowed_origins: vec!["https://app.example.com".to_string()],
        ..ServerSettings::default()
    })
    .await;
    let url = format!("ws://{}", gateway.addr);
    let mut refused = url.as_str().into_client_request().expect("request");
    refused
        .headers_mut()
        .insert("Origin", HeaderValue::from_static("https://evil.test"));
    let mut allowed = url.as_str().into_client_request().expect("request");
    allowed
        .headers_mut()
        .insert("Origin", HeaderValue::from_static("https://app.example.com"));

    // Act / Assert
    assert!(connect_async(refused).await.is_err());
    assert!(connect_async(allowed).await.is_ok());
}

#[tokio::test]
async fn test_oversized_message_drops_the_client() {
    // Arrange
    let gateway = start(ServerSettings {
        max_message_size: 16,
        ..ServerSettings::default()
    })
    .await;
    let mut client = connect(&gateway).await;
    next_text(&mut client).await;

    // Act
    let _ = client.send(Message::Text("x".repeat(64))).await;

    // Assert: the server closes the socket without echoing anything.
    let outcome = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match client.next().await {
                Some(Ok(Message::Text(text))) => return Some(text),
                Some(Ok(_)) => continue,
                Some(Err(_)) | None => return None,
            }
        }
    })
    .await
    .expect("server reacted");
    assert_eq!(outcome, None);
    for _ in 0..500 {
        if gateway.hub.connection_count() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("connection was never unregistered");
}

#[tokio::test]
async fn test_silent_reader_is_pinged_and_stays_connected() {
    // Arrange
    let gateway = start_with_short_pong_wait().await;
    tokio::time::sleep(Duration::from_millis(500)).await;
    let mut client = connect(&gateway).await;

    // Act
    let (pings, open) = read_for(&mut client, Duration::from_secs(3)).await;

    // Assert
    assert!(open, "client was dropped after {pings} ping(s)");
    assert!(pings >= 2);
    assert_eq!(gateway.hub.connection_count(), 1);
}

#[tokio::test]
async fn test_receive_only_client_is_still_pinged() {
    // Arrange: the hub keeps writing to the client, which never writes back.
    let gateway = start_with_short_pong_wait().await;
    let mut client = connect(&gateway).await;
    let hub = gateway.hub.clone();
    let ticker = tokio::spawn(async move {
        loop {
            hub.send_all("tick");
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    });

    // Act
    let (pings, open) = read_for(&mut client, Duration::from_secs(3)).await;
    ticker.abort();

    // Assert
    assert!(open, "client was dropped after {pings} ping(s)");
    assert!(pings >= 2);
}
