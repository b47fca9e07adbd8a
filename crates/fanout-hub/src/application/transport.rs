//! The write side of one physical connection.
//!
//! Each protocol supplies its own implementation: the gateway wraps the sink
//! half of a WebSocket, [`crate::infrastructure::sse`] wraps the event channel
//! feeding an HTTP response, and [`crate::infrastructure::memory`] records
//! frames for tests.
//!
//! The shard that owns a transport applies the write deadline around every
//! call, so implementations may simply await their underlying I/O.

use async_trait::async_trait;
use fanout_core::Frame;
use thiserror::Error;

/// Errors a transport reports for a failed write.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer or the local side already closed the transport.
    #[error("transport closed")]
    Closed,

    /// The underlying I/O failed.
    #[error("write failed: {0}")]
    Write(String),
}

/// Outbound half of a live connection.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send {
    /// Writes one frame.
    async fn send(&mut self, frame: &Frame) -> Result<(), TransportError>;

    /// Writes a liveness ping (a WebSocket ping, an SSE comment line).
    async fn ping(&mut self) -> Result<(), TransportError>;

    /// Sends a close frame if the protocol has one and releases the
    /// transport.  Best effort: errors are ignored.
    async fn close(&mut self);
}
