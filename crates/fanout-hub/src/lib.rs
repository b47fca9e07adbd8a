//! fanout-hub library entry point.
//!
//! The hub engine: sharded registries of live connections, unicast and
//! broadcast routing by address, liveness sweeps, WebRTC negotiation
//! sessions, and the registry that ties hubs together.
//!
//! Re-exports the types application code needs so that the gateway binary and
//! the integration tests in `tests/` share the same module tree.

pub mod application;
pub mod infrastructure;

pub use application::connection::ConnectionHandle;
pub use application::hub::Hub;
pub use application::observer::{ConnectionObserver, NoopObserver};
pub use application::registry::{EnabledProtocols, HubRegistry, RegisteredHub, RegistryError};
pub use application::signaling::{
    Answer, NegotiationError, NegotiationRequest, PeerConnector, PeerError, PeerEvents,
    PeerSession, PeerSpec, PeerState, SignalingHub,
};
pub use application::transport::{Transport, TransportError};
pub use infrastructure::loopback::{LoopbackConnector, LoopbackPeer, NegotiationStep};
pub use infrastructure::memory::{memory_transport, MemoryPeer, MemoryTransport};
pub use infrastructure::sse::{SseEndpoint, SseEvent, SseStream, SseTransport};
