//! Infrastructure layer of the hub engine.
//!
//! Concrete adapters behind the application layer's traits:
//!
//! - **`sse`**      – Server-Sent-Event streams: a [`crate::Transport`] that
//!   feeds an HTTP response body, plus the endpoint that registers streams
//!   and accepts their out-of-band POSTed messages.
//! - **`memory`**   – An in-process transport whose far end is a channel, for
//!   tests and for embedding the hub behind another transport.
//! - **`loopback`** – An in-process [`crate::PeerConnector`] that answers
//!   offers without a WebRTC stack and lets tests drive peer state.
//!
//! The WebSocket transport lives in the gateway binary next to its accept
//! loop.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `fanout_core`, but MUST NOT be imported by the `application` layer.

pub mod loopback;
pub mod memory;
pub mod sse;
