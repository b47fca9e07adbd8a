//! The boundary to the WebRTC library.
//!
//! The hub never touches ICE, DTLS or SDP internals.  A [`PeerConnector`]
//! creates one [`PeerSession`] per accepted offer and is handed a
//! [`PeerEvents`] sink through which the library reports connection-state
//! changes and inbound data-channel messages back to the owning session task.

use async_trait::async_trait;
use bytes::Bytes;
use fanout_core::{Address, ConnId, Frame, PeerRole, SessionDescription, SessionKind};
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors reported by the WebRTC library.
#[derive(Debug, Error)]
pub enum PeerError {
    /// The peer connection could not be created.
    #[error("peer connection setup failed: {0}")]
    Setup(String),

    /// A session description was rejected or could not be produced.
    #[error("session description failed: {0}")]
    Description(String),

    /// A data-channel write failed.
    #[error("data channel write failed: {0}")]
    Write(String),

    /// The peer connection is already closed.
    #[error("peer connection closed")]
    Closed,
}

/// Connection state as reported by the library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl PeerState {
    /// Returns `true` for states the peer never recovers from.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PeerState::Disconnected | PeerState::Failed | PeerState::Closed
        )
    }
}

/// What the connector needs to know about the peer it creates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSpec {
    pub address: Address,
    pub kind: SessionKind,
    pub role: PeerRole,
}

/// An event reported by a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEventKind {
    State(PeerState),
    Message(Bytes),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEvent {
    pub conn_id: ConnId,
    pub kind: PeerEventKind,
}

/// Sink through which a peer's library callbacks reach its session task.
///
/// Cheap to clone into callbacks.  Events sent after the session ended are
/// dropped.
#[derive(Debug, Clone)]
pub struct PeerEvents {
    conn_id: ConnId,
    tx: mpsc::UnboundedSender<PeerEvent>,
}

impl PeerEvents {
    pub(crate) fn new(conn_id: ConnId, tx: mpsc::UnboundedSender<PeerEvent>) -> Self {
        Self { conn_id, tx }
    }

    pub fn conn_id(&self) -> ConnId {
        self.conn_id
    }

    /// Reports a connection-state change.
    pub fn state_changed(&self, state: PeerState) {
        self.emit(PeerEventKind::State(state));
    }

    /// Reports an inbound data-channel message.
    pub fn message(&self, data: impl Into<Bytes>) {
        self.emit(PeerEventKind::Message(data.into()));
    }

    fn emit(&self, kind: PeerEventKind) {
        let _ = self.tx.send(PeerEvent {
            conn_id: self.conn_id,
            kind,
        });
    }
}

/// Creates peer connections.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    /// Creates a peer connection for one offer.
    async fn open(
        &self,
        spec: &PeerSpec,
        events: PeerEvents,
    ) -> Result<Box<dyn PeerSession>, PeerError>;
}

/// One peer connection.
#[async_trait]
pub trait PeerSession: Send {
    async fn set_remote_description(
        &mut self,
        offer: &SessionDescription,
    ) -> Result<(), PeerError>;

    async fn create_answer(&mut self) -> Result<SessionDescription, PeerError>;

    async fn set_local_description(
        &mut self,
        answer: &SessionDescription,
    ) -> Result<(), PeerError>;

    /// The local description once candidate gathering has produced a
    /// complete answer.
    async fn local_description(&mut self) -> Result<SessionDescription, PeerError>;

    /// Returns `true` if the peer negotiated a data channel.
    fn has_data_channel(&self) -> bool;

    /// Writes one frame to the data channel.
    async fn send(&mut self, frame: &Frame) -> Result<(), PeerError>;

    /// Closes the peer connection.  Best effort.
    async fn close(&mut self);
}
