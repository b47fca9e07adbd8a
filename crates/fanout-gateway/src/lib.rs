//! fanout-gateway library crate.
//!
//! The network front of the fanout hub: it accepts WebSocket clients, plugs
//! each one into a sharded hub, and runs the read pump that feeds inbound
//! messages to the hub's observer.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! Browser / client (WebSocket)
//!         ↕
//! [fanout-gateway]
//!   ├── domain/           GatewayConfig (TOML), inbound text normalisation
//!   ├── application/      ChatRoom: the observer the gateway runs with
//!   └── infrastructure/
//!         └── ws_server/  Accept loop, origin check, read pump (tokio-tungstenite)
//!         ↕
//! [fanout-hub]            Hubs, shards, routing, liveness sweeps
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O and no async code.
//! - `application` depends on `domain` and the hub's observer API only.
//! - `infrastructure` depends on all other layers plus `tokio` and `tungstenite`.
//!
//! # For beginners: where does a message go?
//!
//! A client's text frame is read by the connection's read pump, normalised,
//! and handed to the hub with `ConnectionHandle::receive`.  The shard that
//! owns the connection then calls `ChatRoom::on_message`, which replies and
//! rebroadcasts through the same hub.  Outbound frames are written by the
//! shard through [`infrastructure::ws_server::WsTransport`].

/// Domain layer: configuration and pure text rules.
pub mod domain;

/// Application layer: the connection observer.
pub mod application;

/// Infrastructure layer: the WebSocket server.
pub mod infrastructure;
