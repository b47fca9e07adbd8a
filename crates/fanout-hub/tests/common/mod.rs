//! Shared helpers for the fanout-hub integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use fanout_core::{Address, HubConfig, LivenessConfig, Protocol};
use fanout_hub::{ConnectionHandle, ConnectionObserver, Hub};
use tokio::sync::mpsc;

/// A lifecycle callback as seen by [`RecordingObserver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Connect(Address),
    Message(Address, Vec<u8>),
    Close(Address),
}

/// Observer that forwards every callback into a channel.
pub struct RecordingObserver {
    tx: mpsc::UnboundedSender<Event>,
}

impl RecordingObserver {
    pub fn new() -> (Arc<Self>, Events) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), Events { rx })
    }
}

impl ConnectionObserver for RecordingObserver {
    fn on_connect(&self, conn: &ConnectionHandle) {
        let _ = self.tx.send(Event::Connect(conn.address()));
    }

    fn on_message(&self, conn: &ConnectionHandle, message: &[u8]) {
        let _ = self.tx.send(Event::Message(conn.address(), message.to_vec()));
    }

    fn on_close(&self, conn: &ConnectionHandle) {
        let _ = self.tx.send(Event::Close(conn.address()));
    }
}

/// Receiving end of a [`RecordingObserver`].
pub struct Events {
    rx: mpsc::UnboundedReceiver<Event>,
}

impl Events {
    /// Waits up to five seconds for the next event.
    pub async fn next(&mut self) -> Event {
        tokio::time::timeout(Duration::from_secs(5), self.rx.recv())
            .await
            .expect("timed out waiting for an observer event")
            .expect("observer dropped")
    }

    /// Returns the next event if one is already queued.
    pub fn try_next(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    /// Collects `n` events.
    pub async fn take(&mut self, n: usize) -> Vec<Event> {
        let mut events = Vec::with_capacity(n);
        for _ in 0..n {
            events.push(self.next().await);
        }
        events
    }
}

/// Hub config that yields exactly `shards` shards.
pub fn shards(shards: usize) -> HubConfig {
    HubConfig {
        max_connections: shards,
        shard_capacity: 1,
        min_shards: 1,
    }
}

pub const HUB_ID: u64 = 42;

/// A `ws` hub with id 42.
pub fn ws_hub(
    shard_count: usize,
    liveness: LivenessConfig,
    observer: Arc<dyn ConnectionObserver>,
) -> Hub {
    Hub::new(Protocol::Ws, HUB_ID, &shards(shard_count), liveness, observer)
}

pub fn address(s: &str) -> Address {
    s.parse().expect("valid address")
}

/// Polls `condition` every 10 ms for up to five seconds.
pub async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never reached: {what}");
}
