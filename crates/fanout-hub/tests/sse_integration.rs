//! Integration tests for SSE endpoints and the hub registry.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{eventually, shards, Event, RecordingObserver};
use fanout_core::{
    Base64JsonCodec, Frame, LivenessConfig, Protocol, SessionCodec, SessionDescription, SessionKind,
    SignalingConfig,
};
use fanout_hub::{
    memory_transport, EnabledProtocols, Hub, HubRegistry, LoopbackConnector, NegotiationRequest,
    NoopObserver, RegisteredHub, SseEndpoint, SseEvent,
};
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

fn sse_hub(id: u64, liveness: LivenessConfig) -> (Hub, common::Events) {
    let (observer, events) = RecordingObserver::new();
    (
        Hub::new(Protocol::Sse, id, &shards(1), liveness, observer),
        events,
    )
}

// ── SSE ───────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_stream_starts_with_connect_event() {
    // Arrange
    let (hub, _events) = sse_hub(5, LivenessConfig::default());
    let endpoint = SseEndpoint::new(hub);

    // Act
    let (handle, mut stream) = endpoint.connect(8);

    // Assert
    assert_eq!(handle.address().to_string(), "sse:5:0:1");
    assert_eq!(stream.address(), handle.address());
    assert_eq!(
        stream.recv().await,
        Some(SseEvent::Message {
            id: "sse:5:1".to_string(),
            event: "connect".to_string(),
            data: r#"{"client_id":"sse:5:0:1"}"#.to_string(),
        })
    );
}

#[tokio::test]
async fn test_hub_messages_become_message_events() {
    let (hub, mut events) = sse_hub(5, LivenessConfig::default());
    let endpoint = SseEndpoint::new(hub.clone());
    let (handle, mut stream) = endpoint.connect(8);
    stream.next().await;
    events.next().await;

    hub.send(&handle.address().to_string(), "hello");

    let event = stream.next().await.expect("message event");
    assert_eq!(event.event(), Some("message"));
    assert_eq!(event.data(), Some("hello"));
    assert_eq!(
        event.to_wire(),
        "id: sse:5:2\nevent: message\ndata: hello\n\n"
    );
}

#[tokio::test]
async fn test_posted_messages_reach_the_observer() {
    let (hub, mut events) = sse_hub(5, LivenessConfig::default());
    let endpoint = SseEndpoint::new(hub);
    let (handle, _stream) = endpoint.connect(8);
    events.next().await;

    assert!(endpoint.post(&handle.address().to_string(), "from client"));
    assert!(!endpoint.post("sse:5:0", "malformed"));
    assert!(!endpoint.post("ws:5:0:1", "wrong protocol"));

    assert_eq!(
        events.next().await,
        Event::Message(handle.address(), b"from client".to_vec())
    );
}

#[tokio::test]
async fn test_unregister_ends_the_stream() {
    let (hub, mut events) = sse_hub(5, LivenessConfig::default());
    let endpoint = SseEndpoint::new(hub);
    let (handle, mut stream) = endpoint.connect(8);
    stream.recv().await;

    handle.unregister();

    assert_eq!(stream.recv().await, None);
    assert_eq!(events.take(2).await[1], Event::Close(handle.address()));
}

#[tokio::test(start_paused = true)]
async fn test_client_that_stops_reading_is_evicted() {
    // Arrange: the unread connect event fills the one-slot buffer.
    let liveness = LivenessConfig {
        write_wait: Duration::from_millis(50),
        ..LivenessConfig::default()
    };
    let (hub, mut events) = sse_hub(5, liveness);
    let endpoint = SseEndpoint::new(hub.clone());
    let (handle, _stream) = endpoint.connect(1);
    events.next().await;

    // Act
    hub.send(&handle.address().to_string(), "never read");

    // Assert
    assert_eq!(events.next().await, Event::Close(handle.address()));
    assert_eq!(hub.connection_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_is_a_comment() {
    let liveness = LivenessConfig {
        sweep_interval: Duration::from_secs(60),
        ping_period: Duration::from_secs(54),
        ..LivenessConfig::default()
    };
    let (hub, _events) = sse_hub(5, liveness);
    let endpoint = SseEndpoint::new(hub);
    let (_handle, mut stream) = endpoint.connect(8);
    stream.recv().await;

    tokio::time::sleep(Duration::from_secs(61)).await;

    assert_eq!(
        stream.recv().await,
        Some(SseEvent::Comment("heartbeat".to_string()))
    );
}

// ── Registry ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_registry_routes_by_hub_id() {
    // Arrange
    let registry = HubRegistry::new(EnabledProtocols::all());
    let ws = registry
        .register_hub(
            Protocol::Ws,
            &shards(1),
            LivenessConfig::default(),
            Arc::new(NoopObserver),
        )
        .expect("ws enabled");
    let other = registry
        .register_hub(
            Protocol::Ws,
            &shards(1),
            LivenessConfig::default(),
            Arc::new(NoopObserver),
        )
        .expect("ws enabled");
    let (a, mut peer_a) = memory_transport();
    let (b, mut peer_b) = memory_transport();
    let a = ws.register(Box::new(a));
    let b = other.register(Box::new(b));

    // Act
    registry.send(&a.address().to_string(), "for a");
    registry.send(&format!("ws:{}:0:1", other.id() + 1), "nowhere");
    registry.send_all(Protocol::Ws, "everyone");

    // Assert
    assert!(other.id() > ws.id());
    assert_eq!(a.address().conn_id, b.address().conn_id);
    assert_eq!(peer_a.recv().await, Some(Frame::text("for a")));
    assert_eq!(peer_a.recv().await, Some(Frame::text("everyone")));
    assert_eq!(peer_b.recv().await, Some(Frame::text("everyone")));
}

#[tokio::test]
async fn test_registry_finds_the_signaling_hub_of_an_item() {
    // Arrange
    let registry = HubRegistry::new(EnabledProtocols::all());
    let connector = Arc::new(LoopbackConnector::new());
    let first = registry
        .register_signaling_hub(
            SignalingConfig::default(),
            connector.clone(),
            Arc::new(NoopObserver),
        )
        .expect("webrtc enabled");
    let second = registry
        .register_signaling_hub(SignalingConfig::default(), connector, Arc::new(NoopObserver))
        .expect("webrtc enabled");
    let offer = Base64JsonCodec
        .encode(&SessionDescription::offer("v=0"))
        .expect("offer encodes");

    // Act
    second
        .negotiate(
            NegotiationRequest::open(SessionKind::Stream, offer).with_key(12),
            CancellationToken::new(),
        )
        .await
        .expect("answer");

    // Assert
    let owner = registry.signaling_hub_for_item(12).await.expect("owner");
    assert_eq!(owner.id(), second.id());
    assert!(registry.signaling_hub_for_item(13).await.is_none());
    let idle = registry.least_loaded_signaling_hub().expect("hubs exist");
    assert_eq!(idle.id(), first.id());
    assert!(matches!(
        registry.hub(second.id()),
        Some(RegisteredHub::Signaling(_))
    ));
}

#[tokio::test]
async fn test_registry_shutdown_stops_every_hub() {
    let registry = HubRegistry::default();
    let (observer, mut events) = RecordingObserver::new();
    let hub = registry
        .register_hub(Protocol::Ws, &shards(2), LivenessConfig::default(), observer)
        .expect("ws enabled");
    let (transport, peer) = memory_transport();
    let conn = hub.register(Box::new(transport));
    events.next().await;

    registry.shutdown();

    assert_eq!(events.next().await, Event::Close(conn.address()));
    eventually("transport closed", || peer.is_closed()).await;
}
