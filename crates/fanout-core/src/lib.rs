//! # fanout-core
//!
//! Shared library for the fanout connection hub containing connection
//! addresses, outbound payloads, the session-description token codec, and the
//! pure rules that decide how connections are spread across shards and how
//! WebRTC sessions are admitted.
//!
//! It has zero dependencies on sockets, timers, or async runtimes.
//!
//! # Architecture overview (for beginners)
//!
//! The fanout server keeps thousands of long-lived connections open at once
//! (WebSocket sockets, Server-Sent-Event streams, WebRTC peers) and lets
//! application code talk to any of them by a short string address such as
//! `ws:1718000000:3:42`.
//!
//! This crate (`fanout-core`) is the shared vocabulary.  It defines:
//!
//! - **`protocol`** – What travels between application code and connections:
//!   the [`Address`] that names a connection, the [`Payload`] callers hand in,
//!   the [`Frame`] that is actually written, and the token format used to
//!   carry WebRTC offers and answers.
//!
//! - **`domain`** – Pure decisions with no I/O: how many shards a hub gets,
//!   which shard a new connection lands on, which WebRTC requests create,
//!   join, or are refused a session, and the runtime configuration types.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `fanout_core::Address` instead of `fanout_core::protocol::address::Address`.
pub use domain::balance::least_loaded;
pub use domain::config::{HubConfig, LivenessConfig, SignalingConfig};
pub use domain::session::{admit, Admission, Intent, PeerRole, Rejection, SessionKind};
pub use protocol::address::{Address, AddressError, ConnId, HubId, ItemKey, Protocol};
pub use protocol::payload::{Frame, FrameKind, Payload};
pub use protocol::sequence::SequenceCounter;
pub use protocol::session_description::{
    Base64JsonCodec, SdpType, SessionCodec, SessionDescription, TokenError,
};
