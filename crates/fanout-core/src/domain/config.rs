//! Runtime configuration for hubs, connection liveness, and signaling.
//!
//! These are the resolved, typed values the engine runs with.  The gateway
//! binary reads its TOML file and command line and converts them into these
//! structs; tests build them directly, usually starting from `Default`.

use std::time::Duration;

// ── Hub sizing ────────────────────────────────────────────────────────────────

/// Sizing of a sharded hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubConfig {
    /// Expected peak number of concurrent connections.
    pub max_connections: usize,
    /// Connections each shard is sized for.  Used to compute the shard count
    /// only; a shard never refuses a connection.
    pub shard_capacity: usize,
    /// Lower bound on the shard count.
    pub min_shards: usize,
}

impl HubConfig {
    /// Default shard capacity.
    pub const DEFAULT_SHARD_CAPACITY: usize = 5_000;
    /// Default minimum number of shards.
    pub const DEFAULT_MIN_SHARDS: usize = 50;

    /// Default sizing for the given expected peak.
    pub fn with_max_connections(max_connections: usize) -> Self {
        Self {
            max_connections,
            ..Self::default()
        }
    }

    /// Number of shards a hub with this configuration creates.
    ///
    /// `max(ceil(max_connections / shard_capacity), min_shards)`, and never 0.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use fanout_core::HubConfig;
    ///
    /// assert_eq!(HubConfig::with_max_connections(1_000_000).shard_count(), 200);
    /// assert_eq!(HubConfig::with_max_connections(10).shard_count(), 50);
    /// ```
    pub fn shard_count(&self) -> usize {
        let capacity = self.shard_capacity.max(1);
        self.max_connections
            .div_ceil(capacity)
            .max(self.min_shards)
            .max(1)
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_connections: 1_000_000,
            shard_capacity: Self::DEFAULT_SHARD_CAPACITY,
            min_shards: Self::DEFAULT_MIN_SHARDS,
        }
    }
}

// ── Liveness ──────────────────────────────────────────────────────────────────

/// Timing rules for detecting and evicting dead peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivenessConfig {
    /// Deadline for a single outbound write (message, ping, or close frame).
    pub write_wait: Duration,
    /// How long a connection may stay silent before its read pump gives up.
    pub pong_wait: Duration,
    /// Idle time after which the sweep pings a connection.  Must be shorter
    /// than `pong_wait` so the peer has time to answer.
    pub ping_period: Duration,
    /// How often each shard runs its liveness sweep, at most.  See
    /// [`sweep_period`](Self::sweep_period).
    pub sweep_interval: Duration,
    /// Largest inbound message accepted, in bytes.
    pub max_message_size: usize,
}

impl LivenessConfig {
    /// Builds a configuration whose ping period is 9/10 of `pong_wait`.
    pub fn from_pong_wait(pong_wait: Duration) -> Self {
        Self {
            pong_wait,
            ping_period: pong_wait * 9 / 10,
            ..Self::default()
        }
    }

    /// The sweep tick a shard actually runs with.
    ///
    /// A silent peer is pinged on the first tick after `ping_period` and must
    /// answer before `pong_wait`, so the tick is capped at half the gap
    /// between the two.
    pub fn sweep_period(&self) -> Duration {
        let gap = self.pong_wait.saturating_sub(self.ping_period);
        let period = if gap.is_zero() {
            self.sweep_interval
        } else {
            self.sweep_interval.min(gap / 2)
        };
        period.max(Duration::from_millis(1))
    }
}

impl Default for LivenessConfig {
    fn default() -> Self {
        let pong_wait = Duration::from_secs(60);
        Self {
            write_wait: Duration::from_secs(10),
            pong_wait,
            ping_period: pong_wait * 9 / 10,
            sweep_interval: Duration::from_secs(60),
            max_message_size: 512 * 1024,
        }
    }
}

// ── Signaling ─────────────────────────────────────────────────────────────────

/// Settings for a WebRTC signaling hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalingConfig {
    /// How long a caller waits for an answer before giving up.
    pub negotiation_timeout: Duration,
    /// Hub-assigned session keys start just above this value, leaving the
    /// range below it to fixed keys chosen by applications.
    pub assigned_key_floor: u64,
    /// Deadline for a single data-channel write.
    pub write_wait: Duration,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            negotiation_timeout: Duration::from_secs(10),
            assigned_key_floor: 1000,
            write_wait: Duration::from_secs(10),
        }
    }
}
