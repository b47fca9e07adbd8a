//! Connection addresses.
//!
//! Every live connection is named by a four-field string:
//!
//! ```text
//! {protocol}:{hub_id}:{slot}:{conn_id}
//!
//! ws:1718000000:3:42        WebSocket, shard 3, connection 42
//! sse:1718000001:0:7        SSE stream, shard 0, connection 7
//! webrtc:1718000002:1001:5  WebRTC peer 5 of session 1001
//! ```
//!
//! For the sharded protocols (`ws`, `sse`) the third field is the shard index.
//! For `webrtc` it is the key of the negotiation session that owns the peer.
//!
//! Parsing here is purely syntactic.  Whether the hub, shard and connection
//! named by a well-formed address actually exist is decided by the routing
//! code, which treats a stale address as a silent no-op.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identity of a hub, derived from its creation time.
pub type HubId = u64;

/// Identity of a connection within its shard or session.
pub type ConnId = u64;

/// Key of a WebRTC negotiation session within its hub.
pub type ItemKey = u64;

/// Separator between address fields.
pub const SEPARATOR: char = ':';

/// Errors produced when a string cannot be parsed as an [`Address`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    /// The string does not have exactly four `:`-separated fields.
    #[error("expected 4 address fields, got {0}")]
    FieldCount(usize),

    /// The first field is not a known protocol tag.
    #[error("unknown protocol tag: {0:?}")]
    UnknownProtocol(String),

    /// A numeric field is empty, negative, or not a base-10 integer.
    #[error("address field {index} is not an unsigned integer: {value:?}")]
    InvalidSegment { index: usize, value: String },
}

/// Transport family a connection belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// WebSocket sockets.
    Ws,
    /// Server-Sent-Event streams.
    Sse,
    /// WebRTC peer connections.
    Webrtc,
}

impl Protocol {
    /// All protocols, in a stable order.
    pub const ALL: [Protocol; 3] = [Protocol::Ws, Protocol::Sse, Protocol::Webrtc];

    /// The short tag used as the first address field.
    pub fn tag(self) -> &'static str {
        match self {
            Protocol::Ws => "ws",
            Protocol::Sse => "sse",
            Protocol::Webrtc => "webrtc",
        }
    }

    /// Returns `true` for protocols whose connections live in shards.
    pub fn is_sharded(self) -> bool {
        matches!(self, Protocol::Ws | Protocol::Sse)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Protocol {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ws" => Ok(Protocol::Ws),
            "sse" => Ok(Protocol::Sse),
            "webrtc" => Ok(Protocol::Webrtc),
            other => Err(AddressError::UnknownProtocol(other.to_string())),
        }
    }
}

/// A parsed connection address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    /// Protocol tag (first field).
    pub protocol: Protocol,
    /// Owning hub (second field).
    pub hub_id: HubId,
    /// Shard index for sharded protocols, session key for WebRTC.
    pub slot: u64,
    /// Connection identity within the shard or session.
    pub conn_id: ConnId,
}

impl Address {
    /// Creates an address from its parts.
    pub fn new(protocol: Protocol, hub_id: HubId, slot: u64, conn_id: ConnId) -> Self {
        Self {
            protocol,
            hub_id,
            slot,
            conn_id,
        }
    }

    /// Parses an address string.
    ///
    /// # Errors
    ///
    /// Returns [`AddressError`] unless the input has exactly four fields, a
    /// known protocol tag, and three unsigned base-10 integers.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use fanout_core::{Address, Protocol};
    ///
    /// let addr = Address::parse("ws:1718000000:3:42").unwrap();
    /// assert_eq!(addr.protocol, Protocol::Ws);
    /// assert_eq!(addr.slot, 3);
    /// assert_eq!(addr.to_string(), "ws:1718000000:3:42");
    /// ```
    pub fn parse(s: &str) -> Result<Self, AddressError> {
        let fields: Vec<&str> = s.split(SEPARATOR).collect();
        if fields.len() != 4 {
            return Err(AddressError::FieldCount(fields.len()));
        }

        let protocol = fields[0].parse::<Protocol>()?;
        let hub_id = parse_segment(fields[1], 1)?;
        let slot = parse_segment(fields[2], 2)?;
        let conn_id = parse_segment(fields[3], 3)?;

        Ok(Self::new(protocol, hub_id, slot, conn_id))
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Address::parse(s)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.protocol, self.hub_id, self.slot, self.conn_id
        )
    }
}

// ── Private helpers ───────────────────────────────────────────────────────────

fn parse_segment(value: &str, index: usize) -> Result<u64, AddressError> {
    // `u64::from_str` accepts a leading '+', which no address writer produces.
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AddressError::InvalidSegment {
            index,
            value: value.to_string(),
        });
    }
    value.parse::<u64>().map_err(|_| AddressError::InvalidSegment {
        index,
        value: value.to_string(),
    })
}
