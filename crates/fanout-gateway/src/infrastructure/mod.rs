//! Infrastructure layer: the WebSocket server.
//!
//! Everything here touches the network.  The accept loop, the handshake with
//! its origin check, and the per-connection read pump live in [`ws_server`];
//! the outbound side of each socket is [`ws_server::WsTransport`], which the
//! hub's shards write through.

pub mod ws_server;

pub use ws_server::{run_server, serve, ServerSettings};
