//! WebRTC signaling: negotiation sessions and their dispatch loop.
//!
//! # How a WebRTC connection is set up (for beginners)
//!
//! A browser that wants a WebRTC connection creates an SDP *offer* describing
//! the media and data channels it wants, and posts it to the server as an
//! opaque token.  The server creates a peer connection, applies the offer,
//! creates an *answer*, waits for candidate gathering to finish, and returns
//! the answer token.  Once the browser applies the answer, ICE connects the
//! two sides and the peer reports `Connected`.
//!
//! # Sessions
//!
//! Peers are grouped into negotiation sessions ("items"), each identified by a
//! key and tagged with a [`fanout_core::SessionKind`]:
//!
//! ```text
//! SignalingHub task ── HashMap<ItemKey, ItemEntry>
//!      │ negotiate / send / send_all / evict
//!      ▼
//! Item task (one per session) ── HashMap<ConnId, Peer>
//!      ▲ state changes, data-channel messages
//!      │
//! PeerSession (WebRTC library)
//! ```
//!
//! The hub task decides, via [`fanout_core::admit`], whether an offer creates
//! a session, joins one, or is refused.  Each session task then negotiates its
//! offers one at a time, tracks its peers, and completes when its lifetime cap
//! expires or the peer it depends on goes away.

mod hub;
mod item;
mod peer;

use std::time::Duration;

use fanout_core::{Address, Intent, ItemKey, SessionKind, TokenError};
use thiserror::Error;

pub use hub::SignalingHub;
pub use peer::{
    PeerConnector, PeerError, PeerEvent, PeerEventKind, PeerEvents, PeerSession, PeerSpec,
    PeerState,
};

/// An offer from a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationRequest {
    pub kind: SessionKind,
    pub intent: Intent,
    /// Session key; `None` lets the hub assign one (only valid with
    /// [`Intent::Open`]).
    pub key: Option<ItemKey>,
    /// The offer token, as posted by the client.
    pub offer: String,
    /// Overrides the kind's default lifetime cap when creating a session.
    pub max_lifetime: Option<Duration>,
}

impl NegotiationRequest {
    /// Opens a session, with a hub-assigned key unless one is added.
    pub fn open(kind: SessionKind, offer: impl Into<String>) -> Self {
        Self {
            kind,
            intent: Intent::Open,
            key: None,
            offer: offer.into(),
            max_lifetime: None,
        }
    }

    /// Joins the session with the given key.
    pub fn join(kind: SessionKind, key: ItemKey, offer: impl Into<String>) -> Self {
        Self {
            kind,
            intent: Intent::Join,
            key: Some(key),
            offer: offer.into(),
            max_lifetime: None,
        }
    }

    pub fn with_key(mut self, key: ItemKey) -> Self {
        self.key = Some(key);
        self
    }

    pub fn with_max_lifetime(mut self, max_lifetime: Duration) -> Self {
        self.max_lifetime = Some(max_lifetime);
        self
    }
}

/// A successful negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    /// The answer token to return to the client.
    pub token: String,
    /// Address of the new peer, usable with `send` once it connects.
    pub address: Address,
}

/// Why a negotiation produced no answer.
#[derive(Debug, Error)]
pub enum NegotiationError {
    /// The offer token could not be decoded.
    #[error("invalid offer: {0}")]
    InvalidOffer(#[from] TokenError),

    /// A session with this key already runs and takes no more peers this way.
    #[error("session {key} is already provisioned")]
    AlreadyProvisioned { key: ItemKey },

    /// There is no session to join.
    #[error("session {key:?} is not provisioned")]
    NotProvisioned { key: Option<ItemKey> },

    /// The key belongs to a session of another kind.
    #[error("session {key} is a {existing:?} session, not {requested:?}")]
    KindMismatch {
        key: ItemKey,
        existing: SessionKind,
        requested: SessionKind,
    },

    /// The session gave up on the offer (a negotiation step failed or the
    /// session ended first).
    #[error("negotiation failed")]
    Failed,

    /// No answer within the deadline.
    #[error("negotiation timed out")]
    Timeout,

    /// The caller cancelled before an answer arrived.
    #[error("negotiation cancelled")]
    Cancelled,

    /// The signaling hub has stopped.
    #[error("signaling hub is shut down")]
    HubClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_request_defaults() {
        let request = NegotiationRequest::open(SessionKind::Channel, "tok");

        assert_eq!(request.intent, Intent::Open);
        assert_eq!(request.key, None);
        assert_eq!(request.max_lifetime, None);
    }

    #[test]
    fn test_builders_set_key_and_lifetime() {
        let request = NegotiationRequest::open(SessionKind::Recording, "tok")
            .with_key(7)
            .with_max_lifetime(Duration::from_secs(60));

        assert_eq!(request.key, Some(7));
        assert_eq!(request.max_lifetime, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_error_messages_name_the_key() {
        let err = NegotiationError::AlreadyProvisioned { key: 7 };

        assert_eq!(err.to_string(), "session 7 is already provisioned");
    }
}
