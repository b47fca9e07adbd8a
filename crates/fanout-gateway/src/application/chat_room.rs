//! ChatRoom: a broadcast chat on top of one hub.
//!
//! Every client of the hub is in the same room:
//!
//! - a new client is announced to everyone, itself included;
//! - a message is acknowledged to its sender with `send...` and then
//!   rebroadcast to everyone;
//! - a departing client is announced to the clients that remain.
//!
//! All replies are queued through the connection handle, so the callbacks
//! never block the shard that calls them.

use fanout_core::Payload;
use fanout_hub::{ConnectionHandle, ConnectionObserver};
use tracing::debug;

/// Acknowledgement sent back to the author of each message.
pub const ACK: &str = "send...";

/// Observer that turns a hub into a single chat room.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChatRoom;

impl ConnectionObserver for ChatRoom {
    fn on_connect(&self, conn: &ConnectionHandle) {
        conn.send_all(format!("connection registered: {}", conn.address()));
    }

    fn on_message(&self, conn: &ConnectionHandle, message: &[u8]) {
        debug!("{}: {} byte message", conn.address(), message.len());
        conn.send(ACK);
        let payload = match std::str::from_utf8(message) {
            Ok(text) => Payload::from(text),
            Err(_) => Payload::from(message),
        };
        conn.send_all(payload);
    }

    fn on_close(&self, conn: &ConnectionHandle) {
        conn.send_all(format!("connection unregistered: {}", conn.address()));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use fanout_core::{Frame, HubConfig, LivenessConfig, Protocol};
    use fanout_hub::{memory_transport, Hub, MemoryPeer};

    use super::*;

    fn room() -> Hub {
        let config = HubConfig {
            max_connections: 1,
            shard_capacity: 1,
            min_shards: 1,
        };
        Hub::new(
            Protocol::Ws,
            9,
            &config,
            LivenessConfig::default(),
            Arc::new(ChatRoom),
        )
    }

    fn join(hub: &Hub) -> (ConnectionHandle, MemoryPeer) {
        let (transport, peer) = memory_transport();
        (hub.register(Box::new(transport)), peer)
    }

    #[tokio::test]
    async fn test_join_is_announced_to_everyone() {
        // Arrange
        let hub = room();
        let (_a, mut peer_a) = join(&hub);
        assert_eq!(
            peer_a.recv().await,
            Some(Frame::text("connection registered: ws:9:0:1"))
        );

        // Act
        let (_b, mut peer_b) = join(&hub);

        // Assert
        let announcement = Frame::text("connection registered: ws:9:0:2");
        assert_eq!(peer_a.recv().await, Some(announcement.clone()));
        assert_eq!(peer_b.recv().await, Some(announcement));
    }

    #[tokio::test]
    async fn test_message_is_acknowledged_then_rebroadcast() {
        // Arrange
        let hub = room();
        let (a, mut peer_a) = join(&hub);
        let (_b, mut peer_b) = join(&hub);
        peer_a.recv().await;
        peer_a.recv().await;
        peer_b.recv().await;

        // Act
        a.receive("hello room");

        // Assert
        assert_eq!(peer_a.recv().await, Some(Frame::text(ACK)));
        assert_eq!(peer_a.recv().await, Some(Frame::text("hello room")));
        assert_eq!(peer_b.recv().await, Some(Frame::text("hello room")));
    }

    #[tokio::test]
    async fn test_binary_message_is_rebroadcast_as_binary() {
        let hub = room();
        let (a, mut peer_a) = join(&hub);
        peer_a.recv().await;

        a.receive(vec![0xff, 0x00]);

        assert_eq!(peer_a.recv().await, Some(Frame::text(ACK)));
        assert_eq!(peer_a.recv().await, Some(Frame::binary(vec![0xff, 0x00])));
    }

    #[tokio::test]
    async fn test_departure_is_announced_to_the_rest() {
        // Arrange
        let hub = room();
        let (a, mut peer_a) = join(&hub);
        let (_b, mut peer_b) = join(&hub);
        peer_b.recv().await;

        // Act
        a.unregister();

        // Assert
        assert_eq!(
            peer_b.recv().await,
            Some(Frame::text("connection unregistered: ws:9:0:1"))
        );
        assert!(peer_a.is_closed());
    }
}
