//! Connections and connection handles.
//!
//! A [`Connection`] is owned by exactly one shard task: it holds the
//! transport and is the only thing that ever writes to it.  Everything else
//! (read pumps, observers, application code) holds a [`ConnectionHandle`],
//! which knows the connection's address and how to reach the owning hub, and
//! turns every operation into a request for that owner.
//!
//! The one piece of state both sides touch directly is the liveness record:
//! read pumps refresh it on inbound traffic and pongs, the shard reads it
//! during sweeps and stamps it when it pings.  Both stamps are atomics so
//! neither side ever waits for the other.  Outbound writes leave it alone: a
//! peer that only receives still has to answer pings.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use fanout_core::{Address, Frame, Payload};
use tokio::time::{timeout, Instant};
use tracing::debug;

use super::hub::Hub;
use super::signaling::SignalingHub;
use super::transport::Transport;

// ── Liveness ──────────────────────────────────────────────────────────────────

/// Activity stamps shared between a connection and its handles.
#[derive(Debug)]
pub(crate) struct Liveness {
    origin: Instant,
    /// Milliseconds after `origin` of the last inbound frame or pong.
    last_heard_ms: AtomicU64,
    /// Milliseconds after `origin` of the last ping sent.
    last_ping_ms: AtomicU64,
}

impl Liveness {
    pub(crate) fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_heard_ms: AtomicU64::new(0),
            last_ping_ms: AtomicU64::new(0),
        }
    }

    /// Records inbound activity from the peer.
    pub(crate) fn touch(&self) {
        self.last_heard_ms.fetch_max(self.now_ms(), Ordering::Relaxed);
    }

    pub(crate) fn mark_pinged(&self) {
        self.last_ping_ms.fetch_max(self.now_ms(), Ordering::Relaxed);
    }

    /// Time since the peer was last heard from.
    pub(crate) fn idle_for(&self) -> Duration {
        self.since(&self.last_heard_ms)
    }

    pub(crate) fn since_ping(&self) -> Duration {
        self.since(&self.last_ping_ms)
    }

    fn now_ms(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn since(&self, stamp: &AtomicU64) -> Duration {
        let last = Duration::from_millis(stamp.load(Ordering::Relaxed));
        self.origin.elapsed().saturating_sub(last)
    }
}

// ── Connection ────────────────────────────────────────────────────────────────

/// A live connection as owned by its shard.
pub(crate) struct Connection {
    address: Address,
    transport: Box<dyn Transport>,
    liveness: Arc<Liveness>,
    write_wait: Duration,
}

impl Connection {
    pub(crate) fn new(
        address: Address,
        transport: Box<dyn Transport>,
        liveness: Arc<Liveness>,
        write_wait: Duration,
    ) -> Self {
        Self {
            address,
            transport,
            liveness,
            write_wait,
        }
    }

    pub(crate) fn address(&self) -> Address {
        self.address
    }

    pub(crate) fn liveness(&self) -> &Arc<Liveness> {
        &self.liveness
    }

    /// Whether the sweep should ping: the peer has been silent for
    /// `ping_period` and no ping went out within that time either.
    pub(crate) fn needs_ping(&self, ping_period: Duration) -> bool {
        self.liveness.idle_for() > ping_period && self.liveness.since_ping() > ping_period
    }

    /// Writes one frame within the write deadline.
    ///
    /// Returns `false` if the transport failed or stalled past the deadline;
    /// the caller must then evict the connection.
    pub(crate) async fn write(&mut self, frame: &Frame) -> bool {
        match timeout(self.write_wait, self.transport.send(frame)).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                debug!("{}: write failed: {e}", self.address);
                false
            }
            Err(_) => {
                debug!("{}: write exceeded {:?}", self.address, self.write_wait);
                false
            }
        }
    }

    /// Sends a ping within the write deadline and stamps it.
    pub(crate) async fn ping(&mut self) -> bool {
        match timeout(self.write_wait, self.transport.ping()).await {
            Ok(Ok(())) => {
                self.liveness.mark_pinged();
                true
            }
            Ok(Err(e)) => {
                debug!("{}: ping failed: {e}", self.address);
                false
            }
            Err(_) => {
                debug!("{}: ping exceeded {:?}", self.address, self.write_wait);
                false
            }
        }
    }

    /// Best-effort close frame and transport shutdown.
    pub(crate) async fn close(&mut self) {
        if timeout(self.write_wait, self.transport.close()).await.is_err() {
            debug!("{}: close exceeded {:?}", self.address, self.write_wait);
        }
    }
}

// ── Handle ────────────────────────────────────────────────────────────────────

#[derive(Clone)]
enum Route {
    Sharded { hub: Hub, liveness: Arc<Liveness> },
    Signaling(SignalingHub),
}

/// What application code holds to talk to a connection.
///
/// Cheap to clone.  Every operation is a queued request to the task that owns
/// the connection, so none of them block, and all of them are silently
/// dropped once the connection is gone.
#[derive(Clone)]
pub struct ConnectionHandle {
    address: Address,
    route: Route,
}

impl ConnectionHandle {
    pub(crate) fn sharded(address: Address, hub: Hub, liveness: Arc<Liveness>) -> Self {
        Self {
            address,
            route: Route::Sharded { hub, liveness },
        }
    }

    pub(crate) fn signaling(address: Address, hub: SignalingHub) -> Self {
        Self {
            address,
            route: Route::Signaling(hub),
        }
    }

    /// The connection's address.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Sends to this connection.
    pub fn send(&self, payload: impl Into<Payload>) {
        match &self.route {
            Route::Sharded { hub, .. } => hub.send_to(&self.address, payload),
            Route::Signaling(hub) => hub.send_to(&self.address, payload),
        }
    }

    /// Sends to another connection of the same hub.
    pub fn send_to(&self, address: &str, payload: impl Into<Payload>) {
        match &self.route {
            Route::Sharded { hub, .. } => hub.send(address, payload),
            Route::Signaling(hub) => hub.send(address, payload),
        }
    }

    /// Broadcasts to every connection of the same hub.
    pub fn send_all(&self, payload: impl Into<Payload>) {
        match &self.route {
            Route::Sharded { hub, .. } => hub.send_all(payload),
            Route::Signaling(hub) => hub.send_all(payload),
        }
    }

    /// Hands an inbound message to the owning shard, which refreshes liveness
    /// and calls `on_message`.
    ///
    /// WebRTC peers report inbound data through their own event sink, so this
    /// is a no-op for them.
    pub fn receive(&self, message: impl Into<Bytes>) {
        if let Route::Sharded { hub, .. } = &self.route {
            hub.deliver(&self.address, message.into());
        }
    }

    /// Records activity that is not a message, such as a pong.
    pub fn touch(&self) {
        if let Route::Sharded { liveness, .. } = &self.route {
            liveness.touch();
        }
    }

    /// Removes the connection from its hub.  Idempotent.
    pub fn unregister(&self) {
        match &self.route {
            Route::Sharded { hub, .. } => hub.unregister(&self.address),
            Route::Signaling(hub) => hub.evict(&self.address),
        }
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("address", &self.address.to_string())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::transport::{MockTransport, TransportError};
    use fanout_core::Protocol;

    fn connection(transport: MockTransport) -> Connection {
        Connection::new(
            Address::new(Protocol::Ws, 1, 0, 1),
            Box::new(transport),
            Arc::new(Liveness::new()),
            Duration::from_secs(10),
        )
    }

    #[tokio::test]
    async fn test_write_succeeds_without_counting_as_peer_activity() {
        // Arrange
        tokio::time::pause();
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .withf(|frame: &Frame| frame.as_text() == Some("hello"))
            .times(1)
            .returning(|_| Ok(()));
        let mut conn = connection(transport);
        tokio::time::advance(Duration::from_secs(30)).await;

        // Act
        let written = conn.write(&Frame::text("hello")).await;

        // Assert
        assert!(written);
        assert_eq!(conn.liveness().idle_for(), Duration::from_secs(30));
        assert!(conn.needs_ping(Duration::from_secs(20)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_is_not_repeated_within_the_ping_period() {
        // Arrange
        let mut transport = MockTransport::new();
        transport.expect_ping().times(1).returning(|| Ok(()));
        let mut conn = connection(transport);
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(conn.needs_ping(Duration::from_secs(20)));

        // Act
        assert!(conn.ping().await);
        tokio::time::advance(Duration::from_secs(10)).await;

        // Assert
        assert!(!conn.needs_ping(Duration::from_secs(20)));
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(conn.needs_ping(Duration::from_secs(20)));
    }

    #[tokio::test]
    async fn test_write_failure_is_reported() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .returning(|_| Err(TransportError::Write("broken pipe".into())));
        let mut conn = connection(transport);

        assert!(!conn.write(&Frame::text("x")).await);
    }

    #[tokio::test]
    async fn test_failed_ping_is_reported() {
        let mut transport = MockTransport::new();
        transport.expect_ping().returning(|| Err(TransportError::Closed));
        let mut conn = connection(transport);

        assert!(!conn.ping().await);
    }

    #[tokio::test]
    async fn test_close_reaches_transport() {
        let mut transport = MockTransport::new();
        transport.expect_close().times(1).returning(|| ());
        let mut conn = connection(transport);

        conn.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_liveness_tracks_idle_time() {
        // Arrange
        let liveness = Liveness::new();

        // Act
        tokio::time::advance(Duration::from_secs(5)).await;
        let idle_before = liveness.idle_for();
        liveness.touch();
        let idle_after = liveness.idle_for();

        // Assert
        assert_eq!(idle_before, Duration::from_secs(5));
        assert_eq!(idle_after, Duration::ZERO);
    }
}
