//! Shards: serialized workers that own a slice of a hub's connections.
//!
//! # How a shard works (for beginners)
//!
//! Each shard is one tokio task with one ordered mailbox.  Everything that
//! touches the shard's connections (registering, writing, delivering
//! inbound messages, unregistering, the periodic liveness sweep) happens
//! inside that task, one request at a time:
//!
//! ```text
//!  Hub::register ──┐
//!  Hub::send     ──┤   mailbox (FIFO)    ┌──────────── shard task ────────────┐
//!  Hub::send_all ──┼──────────────────▶  │ HashMap<ConnId, Connection>        │
//!  handle.receive ─┤                     │ select! { mailbox, sweep tick }    │
//!  unregister    ──┘                     └────────────────────────────────────┘
//! ```
//!
//! Because only this task ever sees the map, it needs no lock.  The only
//! state shared with other threads is the load counter the hub reads when
//! placing new connections.
//!
//! # Eviction
//!
//! A connection whose write or ping fails (or exceeds the write deadline) is
//! evicted on the spot: best-effort close, removal from the map, load
//! decrement clamped at zero, and exactly one `on_close` callback.  Delivery to
//! the shard's other connections continues.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use fanout_core::{ConnId, Frame, HubId, LivenessConfig, Protocol, SequenceCounter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::connection::{Connection, ConnectionHandle};
use super::hub::{Hub, HubInner};
use super::observer::{guarded, ConnectionObserver};

/// Requests a shard processes, in arrival order.
pub(crate) enum ShardCommand {
    Register(Connection),
    /// `target: None` broadcasts to every connection of the shard.
    Dispatch {
        target: Option<ConnId>,
        frame: Frame,
    },
    Inbound {
        conn_id: ConnId,
        data: Bytes,
    },
    Unregister(ConnId),
}

// ── Shard handle (hub side) ───────────────────────────────────────────────────

/// The hub's view of one shard.
pub(crate) struct ShardHandle {
    index: usize,
    mailbox: mpsc::UnboundedSender<ShardCommand>,
    load: Arc<AtomicUsize>,
    conn_ids: SequenceCounter,
}

impl ShardHandle {
    pub(crate) fn index(&self) -> usize {
        self.index
    }

    /// Connections currently assigned to the shard.
    pub(crate) fn load(&self) -> usize {
        self.load.load(Ordering::SeqCst)
    }

    /// Claims a slot for a new connection and returns its id.
    pub(crate) fn reserve(&self) -> ConnId {
        self.load.fetch_add(1, Ordering::SeqCst);
        self.conn_ids.next()
    }

    /// Gives back a slot claimed by [`reserve`](Self::reserve).
    pub(crate) fn release(&self) {
        release(&self.load);
    }

    /// Queues a request.  Returns `false` if the shard task has stopped.
    pub(crate) fn submit(&self, command: ShardCommand) -> bool {
        self.mailbox.send(command).is_ok()
    }
}

fn release(load: &AtomicUsize) {
    let _ = load.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
        Some(n.saturating_sub(1))
    });
}

// ── Shard task ────────────────────────────────────────────────────────────────

pub(crate) struct Shard {
    index: usize,
    hub_id: HubId,
    protocol: Protocol,
    connections: HashMap<ConnId, Connection>,
    load: Arc<AtomicUsize>,
    hub: Weak<HubInner>,
    observer: Arc<dyn ConnectionObserver>,
    liveness: LivenessConfig,
}

impl Shard {
    /// Starts a shard task and returns the handle the hub keeps.
    pub(crate) fn spawn(
        index: usize,
        hub_id: HubId,
        protocol: Protocol,
        hub: Weak<HubInner>,
        observer: Arc<dyn ConnectionObserver>,
        liveness: LivenessConfig,
        shutdown: CancellationToken,
    ) -> (ShardHandle, JoinHandle<()>) {
        let (mailbox, requests) = mpsc::unbounded_channel();
        let load = Arc::new(AtomicUsize::new(0));
        let shard = Shard {
            index,
            hub_id,
            protocol,
            connections: HashMap::new(),
            load: Arc::clone(&load),
            hub,
            observer,
            liveness,
        };
        let task = tokio::spawn(shard.run(requests, shutdown));
        let handle = ShardHandle {
            index,
            mailbox,
            load,
            conn_ids: SequenceCounter::starting_at(1),
        };
        (handle, task)
    }

    async fn run(
        mut self,
        mut requests: mpsc::UnboundedReceiver<ShardCommand>,
        shutdown: CancellationToken,
    ) {
        let period = self.liveness.sweep_period();
        let mut sweep = interval_at(Instant::now() + period, period);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                request = requests.recv() => match request {
                    Some(request) => self.handle(request).await,
                    None => break,
                },
                _ = sweep.tick() => self.sweep().await,
            }
        }

        self.close_all().await;
        debug!(
            "{} hub {} shard {}: stopped",
            self.protocol, self.hub_id, self.index
        );
    }

    async fn handle(&mut self, request: ShardCommand) {
        match request {
            ShardCommand::Register(conn) => self.register(conn),
            ShardCommand::Dispatch {
                target: Some(conn_id),
                frame,
            } => self.unicast(conn_id, &frame).await,
            ShardCommand::Dispatch {
                target: None,
                frame,
            } => self.broadcast(&frame).await,
            ShardCommand::Inbound { conn_id, data } => self.inbound(conn_id, &data),
            ShardCommand::Unregister(conn_id) => self.unregister(conn_id).await,
        }
    }

    fn register(&mut self, conn: Connection) {
        let address = conn.address();
        if self.connections.contains_key(&address.conn_id) {
            // Ids come from a per-shard sequence, so only a buggy caller gets here.
            warn!("{address}: duplicate registration refused");
            release(&self.load);
            tokio::spawn(async move {
                let mut conn = conn;
                conn.close().await;
            });
            return;
        }

        let handle = self.handle_for(&conn);
        self.connections.insert(address.conn_id, conn);
        debug!("{address}: registered");

        if let Some(handle) = handle {
            guarded("on_connect", &handle, || self.observer.on_connect(&handle));
        }
    }

    async fn unicast(&mut self, conn_id: ConnId, frame: &Frame) {
        let Some(conn) = self.connections.get_mut(&conn_id) else {
            debug!(
                "{} hub {} shard {}: no connection {conn_id}, message dropped",
                self.protocol, self.hub_id, self.index
            );
            return;
        };
        if !conn.write(frame).await {
            self.evict(conn_id, "write failed").await;
        }
    }

    async fn broadcast(&mut self, frame: &Frame) {
        let mut failed = Vec::new();
        for (conn_id, conn) in self.connections.iter_mut() {
            if !conn.write(frame).await {
                failed.push(*conn_id);
            }
        }
        for conn_id in failed {
            self.evict(conn_id, "write failed").await;
        }
    }

    fn inbound(&mut self, conn_id: ConnId, data: &[u8]) {
        let Some(conn) = self.connections.get(&conn_id) else {
            return;
        };
        conn.liveness().touch();
        if let Some(handle) = self.handle_for(conn) {
            guarded("on_message", &handle, || {
                self.observer.on_message(&handle, data)
            });
        }
    }

    async fn unregister(&mut self, conn_id: ConnId) {
        if let Some(conn) = self.connections.remove(&conn_id) {
            debug!("{}: unregistered", conn.address());
            self.retire(conn).await;
        }
    }

    async fn evict(&mut self, conn_id: ConnId, reason: &str) {
        if let Some(conn) = self.connections.remove(&conn_id) {
            warn!("{}: evicted ({reason})", conn.address());
            self.retire(conn).await;
        }
    }

    /// Closes a connection already removed from the map and reports it.
    async fn retire(&mut self, mut conn: Connection) {
        conn.close().await;
        release(&self.load);
        if let Some(handle) = self.handle_for(&conn) {
            guarded("on_close", &handle, || self.observer.on_close(&handle));
        }
    }

    /// Pings every connection whose peer has been silent longer than the ping
    /// period and evicts the ones that cannot be reached.
    async fn sweep(&mut self) {
        let ping_period = self.liveness.ping_period;
        let mut dead = Vec::new();
        for (conn_id, conn) in self.connections.iter_mut() {
            if conn.needs_ping(ping_period) && !conn.ping().await {
                dead.push(*conn_id);
            }
        }
        for conn_id in dead {
            self.evict(conn_id, "ping failed").await;
        }
    }

    async fn close_all(&mut self) {
        let ids: Vec<ConnId> = self.connections.keys().copied().collect();
        if !ids.is_empty() {
            info!(
                "{} hub {} shard {}: closing {} connection(s)",
                self.protocol,
                self.hub_id,
                self.index,
                ids.len()
            );
        }
        for conn_id in ids {
            self.unregister(conn_id).await;
        }
    }

    fn handle_for(&self, conn: &Connection) -> Option<ConnectionHandle> {
        let inner = self.hub.upgrade()?;
        Some(ConnectionHandle::sharded(
            conn.address(),
            Hub::from_inner(inner),
            Arc::clone(conn.liveness()),
        ))
    }
}
