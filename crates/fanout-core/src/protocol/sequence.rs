//! Thread-safe id sequence.
//!
//! # Where are sequences used? (for beginners)
//!
//! The hub hands out several kinds of small integer ids that must never
//! repeat while the previous holder may still be alive:
//!
//! - **Connection ids** – each shard numbers its connections 1, 2, 3, …
//! - **Session keys** – a signaling hub numbers the WebRTC sessions it
//!   creates itself, starting just above a reserved floor.
//! - **SSE event ids** – every event pushed to an SSE stream carries a
//!   hub-wide increasing number so browsers can resume with `Last-Event-ID`.
//!
//! # Thread safety
//!
//! The counter uses `AtomicU64` internally.  An atomic operation reads,
//! modifies, and writes a value as a single indivisible step, so the hub's
//! assignment path and a shard task can both call `next()` at the same time
//! without ever producing the same id twice, and without taking a lock.

use std::sync::atomic::{AtomicU64, Ordering};

/// A thread-safe, monotonically increasing id counter.
///
/// # Examples
///
/// ```rust
/// use fanout_core::SequenceCounter;
///
/// let ids = SequenceCounter::starting_at(1);
/// assert_eq!(ids.next(), 1);
/// assert_eq!(ids.next(), 2);
/// ```
#[derive(Debug)]
pub struct SequenceCounter {
    inner: AtomicU64,
}

impl SequenceCounter {
    /// Creates a counter whose first [`next`](Self::next) returns 0.
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Creates a counter whose first [`next`](Self::next) returns `first`.
    pub fn starting_at(first: u64) -> Self {
        Self {
            inner: AtomicU64::new(first),
        }
    }

    /// Returns the next id and atomically advances the counter.
    ///
    /// Wraps from `u64::MAX` to 0 without panicking.
    ///
    /// `Ordering::Relaxed` is enough: ids only need to be unique, they are
    /// not used to publish other memory between threads.
    pub fn next(&self) -> u64 {
        self.inner.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns the id the next call to [`next`](Self::next) would hand out.
    pub fn current(&self) -> u64 {
        self.inner.load(Ordering::Relaxed)
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}
