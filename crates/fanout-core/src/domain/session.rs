//! WebRTC negotiation session kinds and admission rules.
//!
//! A negotiation session ("item") groups the peer connections that share one
//! purpose: a data-channel chat, a camera recording, a live camera stream with
//! its viewers, or playback of a stored file.  The kind decides how many peers
//! a session takes, how long it may live, and whether application broadcasts
//! reach it.
//!
//! [`admit`] is the single table that decides what happens to an incoming
//! offer: create a new session, forward the offer to an existing one, or
//! refuse it.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Category of a negotiation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    /// One peer exchanging data-channel messages with the server.
    Channel,
    /// One publisher sending media for the server to store.
    Recording,
    /// One publisher plus any number of viewers.
    Stream,
    /// Server-hosted media watched by any number of viewers.
    Playback,
}

/// What the caller wants to do with the session key it names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// Provision the session (or, for playback, watch it).
    Open,
    /// Attach to a session someone else provisioned.
    Join,
}

/// Role a peer plays inside its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    /// Sole peer of a channel session.
    Participant,
    /// Media source of a recording or stream.
    Publisher,
    /// Receiver of a stream or playback.
    Viewer,
}

/// Why an offer was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// A session with this key is already running and takes no further peers
    /// through this intent.
    AlreadyProvisioned,
    /// There is no session to join.
    NotProvisioned,
}

/// Outcome of [`admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Start a new session and hand it the offer.
    Create,
    /// Hand the offer to the existing session.
    Forward,
    /// Refuse the offer.
    Reject(Rejection),
}

impl SessionKind {
    /// Returns `true` if the session accepts more than one peer.
    pub fn is_multi_peer(self) -> bool {
        matches!(self, SessionKind::Stream | SessionKind::Playback)
    }

    /// Returns `true` if hub-wide broadcasts are delivered to this session.
    pub fn receives_broadcast(self) -> bool {
        matches!(self, SessionKind::Channel)
    }

    /// Returns `true` if the session ends when its last peer leaves, even
    /// without an anchor peer.
    pub fn completes_when_empty(self) -> bool {
        matches!(self, SessionKind::Playback)
    }

    /// Lifetime cap applied when the request does not carry its own.
    pub fn default_lifetime(self) -> Option<Duration> {
        match self {
            SessionKind::Channel | SessionKind::Playback => None,
            SessionKind::Recording => Some(Duration::from_secs(10 * 60)),
            SessionKind::Stream => Some(Duration::from_secs(10 * 60 * 60)),
        }
    }

    /// Role of the peer whose offer creates the session.
    pub fn creator_role(self) -> PeerRole {
        match self {
            SessionKind::Channel => PeerRole::Participant,
            SessionKind::Recording | SessionKind::Stream => PeerRole::Publisher,
            SessionKind::Playback => PeerRole::Viewer,
        }
    }

    /// Role of a peer whose offer is forwarded to an existing session.
    pub fn joiner_role(self) -> PeerRole {
        PeerRole::Viewer
    }
}

impl PeerRole {
    /// Returns `true` if the session cannot outlive this peer.
    pub fn is_anchor(self) -> bool {
        matches!(self, PeerRole::Participant | PeerRole::Publisher)
    }
}

/// Decides what to do with an offer.
///
/// | Intent | Session exists | Kind         | Result                         |
/// |--------|----------------|--------------|--------------------------------|
/// | Open   | no             | any          | Create                         |
/// | Open   | yes            | Playback     | Forward                        |
/// | Open   | yes            | other        | Reject(AlreadyProvisioned)     |
/// | Join   | yes            | multi-peer   | Forward                        |
/// | Join   | yes            | single-peer  | Reject(AlreadyProvisioned)     |
/// | Join   | no             | any          | Reject(NotProvisioned)         |
///
/// # Examples
///
/// ```rust
/// use fanout_core::{admit, Admission, Intent, Rejection, SessionKind};
///
/// assert_eq!(admit(SessionKind::Stream, Intent::Open, false), Admission::Create);
/// assert_eq!(admit(SessionKind::Stream, Intent::Join, true), Admission::Forward);
/// assert_eq!(
///     admit(SessionKind::Stream, Intent::Join, false),
///     Admission::Reject(Rejection::NotProvisioned)
/// );
/// ```
pub fn admit(kind: SessionKind, intent: Intent, exists: bool) -> Admission {
    match (intent, exists) {
        (Intent::Open, false) => Admission::Create,
        (Intent::Open, true) if kind == SessionKind::Playback => Admission::Forward,
        (Intent::Open, true) => Admission::Reject(Rejection::AlreadyProvisioned),
        (Intent::Join, true) if kind.is_multi_peer() => Admission::Forward,
        (Intent::Join, true) => Admission::Reject(Rejection::AlreadyProvisioned),
        (Intent::Join, false) => Admission::Reject(Rejection::NotProvisioned),
    }
}
