//! In-process transport.
//!
//! [`memory_transport`] returns a [`MemoryTransport`] to register with a hub
//! and the [`MemoryPeer`] that plays the remote side: it receives every frame
//! the hub writes and can inject write failures, ping failures, or stalls.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use fanout_core::Frame;
use tokio::sync::mpsc;

use crate::application::transport::{Transport, TransportError};

#[derive(Debug, Default)]
struct Switches {
    fail_writes: AtomicBool,
    fail_pings: AtomicBool,
    stall_writes: AtomicBool,
    closed: AtomicBool,
    pings: AtomicUsize,
}

/// Local half: register this with a hub.
#[derive(Debug)]
pub struct MemoryTransport {
    outbound: mpsc::UnboundedSender<Frame>,
    switches: Arc<Switches>,
}

/// Remote half: observes and steers the transport.
#[derive(Debug)]
pub struct MemoryPeer {
    inbound: mpsc::UnboundedReceiver<Frame>,
    switches: Arc<Switches>,
}

/// Creates a connected transport/peer pair.
pub fn memory_transport() -> (MemoryTransport, MemoryPeer) {
    let (outbound, inbound) = mpsc::unbounded_channel();
    let switches = Arc::new(Switches::default());
    (
        MemoryTransport {
            outbound,
            switches: Arc::clone(&switches),
        },
        MemoryPeer { inbound, switches },
    )
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&mut self, frame: &Frame) -> Result<(), TransportError> {
        if self.switches.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if self.switches.stall_writes.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.switches.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::Write("injected failure".to_string()));
        }
        self.outbound
            .send(frame.clone())
            .map_err(|_| TransportError::Closed)
    }

    async fn ping(&mut self) -> Result<(), TransportError> {
        if self.switches.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.switches.pings.fetch_add(1, Ordering::SeqCst);
        if self.switches.fail_pings.load(Ordering::SeqCst) {
            return Err(TransportError::Write("injected ping failure".to_string()));
        }
        Ok(())
    }

    async fn close(&mut self) {
        self.switches.closed.store(true, Ordering::SeqCst);
    }
}

impl MemoryPeer {
    /// Waits for the next frame.  Returns `None` once the transport is gone.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.inbound.recv().await
    }

    /// Returns the next frame if one is already queued.
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.inbound.try_recv().ok()
    }

    /// Makes every later write fail.
    pub fn fail_writes(&self) {
        self.switches.fail_writes.store(true, Ordering::SeqCst);
    }

    /// Makes every later ping fail.
    pub fn fail_pings(&self) {
        self.switches.fail_pings.store(true, Ordering::SeqCst);
    }

    /// Makes every later write hang forever.
    pub fn stall_writes(&self) {
        self.switches.stall_writes.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once the hub closed the transport.
    pub fn is_closed(&self) -> bool {
        self.switches.closed.load(Ordering::SeqCst)
    }

    /// Pings received so far.
    pub fn ping_count(&self) -> usize {
        self.switches.pings.load(Ordering::SeqCst)
    }
}
