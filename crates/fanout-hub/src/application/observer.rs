//! Lifecycle callbacks.
//!
//! An application plugs one [`ConnectionObserver`] into each hub when it is
//! created.  The hub calls it from the task that owns the connection, so
//! callbacks for one connection never run concurrently and always arrive in
//! the order connect → messages → close.
//!
//! Callbacks are synchronous and must not block.  Sending from inside a
//! callback (`conn.send(..)`, `conn.send_all(..)`) is fine: sends only queue
//! a request and return immediately.

use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::error;

use super::connection::ConnectionHandle;

/// Receives connection lifecycle events.
pub trait ConnectionObserver: Send + Sync + 'static {
    /// The connection is registered and may be addressed.
    fn on_connect(&self, _conn: &ConnectionHandle) {}

    /// The peer sent a message.
    fn on_message(&self, _conn: &ConnectionHandle, _message: &[u8]) {}

    /// The connection was unregistered or evicted.  Called exactly once.
    fn on_close(&self, _conn: &ConnectionHandle) {}
}

/// Observer that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ConnectionObserver for NoopObserver {}

/// Runs one observer callback.  A panic is logged and does not unwind into
/// the shard or session task.
pub(crate) fn guarded<F>(event: &str, conn: &ConnectionHandle, callback: F)
where
    F: FnOnce(),
{
    if catch_unwind(AssertUnwindSafe(callback)).is_err() {
        error!("{}: {event} callback panicked", conn.address());
    }
}
