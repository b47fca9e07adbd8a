//! Hubs: a pool of shards behind one address space.
//!
//! # Placement
//!
//! A new connection goes to the shard with the fewest connections, lowest
//! index first on ties.  The pick and the load increment happen together
//! under a short assignment lock, so two connections registered one after the
//! other on an idle two-shard hub always land on shards 0 and 1, and shard
//! loads never differ by more than one under sequential registration.
//!
//! # Routing
//!
//! `send` parses the target address and forwards the frame to the owning
//! shard.  Addresses for another protocol or hub, a shard index out of range,
//! or connection id 0 are dropped without error: a stale address is an
//! expected event for a fan-out server, not a failure.

use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use fanout_core::{
    least_loaded, Address, HubConfig, HubId, LivenessConfig, Payload, Protocol,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use super::connection::{Connection, ConnectionHandle, Liveness};
use super::observer::ConnectionObserver;
use super::shard::{Shard, ShardCommand, ShardHandle};
use super::transport::Transport;

pub(crate) struct HubInner {
    id: HubId,
    protocol: Protocol,
    shards: Vec<ShardHandle>,
    /// Serialises placement so pick-and-increment is atomic.
    assignment: Mutex<()>,
    liveness: LivenessConfig,
    shutdown: CancellationToken,
}

/// A sharded hub for one protocol.
///
/// Cheap to clone; all clones refer to the same shards.  The shard tasks stop,
/// closing their connections, when [`shutdown`](Self::shutdown) is called or
/// the last clone is dropped.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl Hub {
    /// Creates a hub and starts its shard tasks.
    ///
    /// Must be called from within a tokio runtime.  Most callers go through
    /// [`crate::HubRegistry::register_hub`], which also picks the hub id.
    pub fn new(
        protocol: Protocol,
        id: HubId,
        config: &HubConfig,
        liveness: LivenessConfig,
        observer: Arc<dyn ConnectionObserver>,
    ) -> Self {
        let shard_count = config.shard_count();
        let shutdown = CancellationToken::new();

        let inner = Arc::new_cyclic(|weak| {
            let shards = (0..shard_count)
                .map(|index| {
                    let (handle, _task) = Shard::spawn(
                        index,
                        id,
                        protocol,
                        weak.clone(),
                        Arc::clone(&observer),
                        liveness.clone(),
                        shutdown.child_token(),
                    );
                    handle
                })
                .collect();
            HubInner {
                id,
                protocol,
                shards,
                assignment: Mutex::new(()),
                liveness,
                shutdown,
            }
        });

        info!("{protocol} hub {id}: started with {shard_count} shard(s)");
        Self { inner }
    }

    pub(crate) fn from_inner(inner: Arc<HubInner>) -> Self {
        Self { inner }
    }

    // ── Identity & diagnostics ────────────────────────────────────────────────

    /// The hub id used in every address it hands out.
    pub fn id(&self) -> HubId {
        self.inner.id
    }

    /// The protocol tag used in every address it hands out.
    pub fn protocol(&self) -> Protocol {
        self.inner.protocol
    }

    pub fn shard_count(&self) -> usize {
        self.inner.shards.len()
    }

    /// Current connection count of each shard, by shard index.
    pub fn shard_loads(&self) -> Vec<usize> {
        self.inner.shards.iter().map(ShardHandle::load).collect()
    }

    /// Total connections across all shards.
    pub fn connection_count(&self) -> usize {
        self.inner.shards.iter().map(ShardHandle::load).sum()
    }

    // ── Registration ──────────────────────────────────────────────────────────

    /// Registers a connection on the least-loaded shard.
    pub fn register(&self, transport: Box<dyn Transport>) -> ConnectionHandle {
        self.register_with(|_| transport)
    }

    /// Registers a connection whose transport needs to know its own address,
    /// for example to announce it to the peer before anything else is sent.
    pub fn register_with<F>(&self, make_transport: F) -> ConnectionHandle
    where
        F: FnOnce(&Address) -> Box<dyn Transport>,
    {
        let (shard, conn_id) = self.assign();
        let address = Address::new(self.protocol(), self.id(), shard.index() as u64, conn_id);
        let liveness = Arc::new(Liveness::new());
        let conn = Connection::new(
            address,
            make_transport(&address),
            Arc::clone(&liveness),
            self.inner.liveness.write_wait,
        );

        if !shard.submit(ShardCommand::Register(conn)) {
            shard.release();
            debug!("{address}: shard stopped, registration dropped");
        }
        ConnectionHandle::sharded(address, self.clone(), liveness)
    }

    fn assign(&self) -> (&ShardHandle, u64) {
        let _guard = self
            .inner
            .assignment
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let index = least_loaded(self.inner.shards.iter().map(ShardHandle::load)).unwrap_or(0);
        let shard = &self.inner.shards[index];
        (shard, shard.reserve())
    }

    // ── Routing ───────────────────────────────────────────────────────────────

    /// Sends to one connection by address string.  Invalid or stale addresses
    /// are ignored.
    pub fn send(&self, address: &str, payload: impl Into<Payload>) {
        match Address::parse(address) {
            Ok(address) => self.send_to(&address, payload),
            Err(e) => trace!(
                "{} hub {}: dropping send to {address:?}: {e}",
                self.protocol(),
                self.id()
            ),
        }
    }

    /// Sends to one connection by parsed address.
    pub fn send_to(&self, address: &Address, payload: impl Into<Payload>) {
        if let Some(shard) = self.shard_for(address) {
            shard.submit(ShardCommand::Dispatch {
                target: Some(address.conn_id),
                frame: payload.into().into_frame(),
            });
        }
    }

    /// Sends to every connection of the hub.  Shards without connections are
    /// skipped.
    pub fn send_all(&self, payload: impl Into<Payload>) {
        let frame = payload.into().into_frame();
        for shard in self.inner.shards.iter().filter(|s| s.load() > 0) {
            shard.submit(ShardCommand::Dispatch {
                target: None,
                frame: frame.clone(),
            });
        }
    }

    /// Delivers an inbound message that arrived outside the connection's own
    /// transport, such as an SSE client's POST.
    ///
    /// Returns `false` if the address cannot belong to this hub.  The owning
    /// shard still ignores the message if the connection is gone.
    pub fn deliver_inbound(&self, address: &str, message: impl Into<Bytes>) -> bool {
        match Address::parse(address) {
            Ok(address) => self.deliver(&address, message.into()),
            Err(e) => {
                trace!(
                    "{} hub {}: dropping inbound from {address:?}: {e}",
                    self.protocol(),
                    self.id()
                );
                false
            }
        }
    }

    pub(crate) fn deliver(&self, address: &Address, data: Bytes) -> bool {
        match self.shard_for(address) {
            Some(shard) => shard.submit(ShardCommand::Inbound {
                conn_id: address.conn_id,
                data,
            }),
            None => false,
        }
    }

    pub(crate) fn unregister(&self, address: &Address) {
        if let Some(shard) = self.shard_for(address) {
            shard.submit(ShardCommand::Unregister(address.conn_id));
        }
    }

    /// Stops every shard, closing all connections.
    pub fn shutdown(&self) {
        info!("{} hub {}: shutting down", self.protocol(), self.id());
        self.inner.shutdown.cancel();
    }

    fn shard_for(&self, address: &Address) -> Option<&ShardHandle> {
        if address.protocol != self.protocol()
            || address.hub_id != self.id()
            || address.conn_id == 0
        {
            trace!("{} hub {}: {address} does not belong here", self.protocol(), self.id());
            return None;
        }
        let shard = usize::try_from(address.slot)
            .ok()
            .and_then(|index| self.inner.shards.get(index));
        if shard.is_none() {
            trace!("{} hub {}: {address} names no shard", self.protocol(), self.id());
        }
        shard
    }
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("id", &self.id())
            .field("protocol", &self.protocol())
            .field("shards", &self.shard_count())
            .finish()
    }
}
