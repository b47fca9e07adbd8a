//! Application layer of the hub engine.
//!
//! # What is the "application" layer? (for beginners)
//!
//! In Clean Architecture the *application* layer sits between the domain
//! (pure rules in `fanout-core`) and the infrastructure (sockets, browsers,
//! WebRTC stacks).
//!
//! Code in this layer:
//!
//! - **Orchestrates** the domain rules: it asks `fanout_core::least_loaded`
//!   where a connection goes and `fanout_core::admit` whether an offer may
//!   open a session, then acts on the answer.
//! - **Depends on abstractions** ([`transport::Transport`],
//!   [`signaling::PeerConnector`], [`observer::ConnectionObserver`]) rather
//!   than on concrete sockets, so tests drive it with in-memory doubles.
//!
//! # Sub-modules
//!
//! - **`observer`**   – Lifecycle callbacks application code plugs in.
//! - **`transport`**  – The write side of one physical connection.
//! - **`connection`** – A transport plus its liveness stamp, and the handle
//!   application code uses to address it.
//! - **`shard`**      – A serialized worker owning a slice of connections.
//! - **`hub`**        – The shard pool, placement, and address routing.
//! - **`signaling`**  – WebRTC negotiation sessions and their dispatch loop.
//! - **`registry`**   – All hubs of the process, keyed by hub id.

pub mod connection;
pub mod hub;
pub mod observer;
pub mod registry;
pub mod shard;
pub mod signaling;
pub mod transport;
