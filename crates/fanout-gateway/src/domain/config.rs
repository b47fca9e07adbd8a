//! Gateway configuration file.
//!
//! The gateway reads one TOML file at startup.  Every field has a default, so
//! a missing file, an empty file, or a file from an older release all load
//! cleanly:
//!
//! ```toml
//! [server]
//! bind_address = "0.0.0.0"
//! ws_port = 8080
//! allowed_origins = ["https://app.example.com"]
//!
//! [features]
//! ws = true
//! sse = false
//! webrtc = false
//!
//! [hub]
//! max_connections = 1000000
//! shard_capacity = 5000
//! min_shards = 50
//!
//! [liveness]
//! write_wait_secs = 10
//! pong_wait_secs = 60
//! sweep_interval_secs = 60
//! max_message_size = 524288
//!
//! [signaling]
//! negotiation_timeout_secs = 10
//! assigned_key_floor = 1000
//!
//! [logging]
//! level = "info"
//! ```
//!
//! The file holds plain numbers and strings; the `*_config()` methods turn
//! them into the typed structs the hub engine runs with.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fanout_core::{HubConfig, LivenessConfig, SignalingConfig};
use fanout_hub::EnabledProtocols;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// `bind_address` and `ws_port` do not form a socket address.
    #[error("invalid bind address '{0}'")]
    BindAddress(String),
}

// ── Schema ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub features: FeaturesSection,
    #[serde(default)]
    pub hub: HubSection,
    #[serde(default)]
    pub liveness: LivenessSection,
    #[serde(default)]
    pub signaling: SignalingSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Listener settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerSection {
    /// IP address to bind to.  `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_ws_port")]
    pub ws_port: u16,
    /// Origins allowed to open a WebSocket.  Empty allows every origin,
    /// including clients that send no `Origin` header.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

/// Per-protocol switches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeaturesSection {
    #[serde(default = "default_true")]
    pub ws: bool,
    #[serde(default)]
    pub sse: bool,
    #[serde(default)]
    pub webrtc: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HubSection {
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_shard_capacity")]
    pub shard_capacity: usize,
    #[serde(default = "default_min_shards")]
    pub min_shards: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LivenessSection {
    #[serde(default = "default_write_wait_secs")]
    pub write_wait_secs: u64,
    #[serde(default = "default_pong_wait_secs")]
    pub pong_wait_secs: u64,
    /// Idle time before a ping.  Defaults to 9/10 of `pong_wait_secs`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ping_period_secs: Option<u64>,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignalingSection {
    #[serde(default = "default_negotiation_timeout_secs")]
    pub negotiation_timeout_secs: u64,
    #[serde(default = "default_assigned_key_floor")]
    pub assigned_key_floor: u64,
    #[serde(default = "default_write_wait_secs")]
    pub write_wait_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingSection {
    /// `tracing` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_ws_port() -> u16 {
    8080
}
fn default_true() -> bool {
    true
}
fn default_max_connections() -> usize {
    HubConfig::default().max_connections
}
fn default_shard_capacity() -> usize {
    HubConfig::DEFAULT_SHARD_CAPACITY
}
fn default_min_shards() -> usize {
    HubConfig::DEFAULT_MIN_SHARDS
}
fn default_write_wait_secs() -> u64 {
    10
}
fn default_pong_wait_secs() -> u64 {
    60
}
fn default_sweep_interval_secs() -> u64 {
    60
}
fn default_max_message_size() -> usize {
    512 * 1024
}
fn default_negotiation_timeout_secs() -> u64 {
    10
}
fn default_assigned_key_floor() -> u64 {
    1000
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            ws_port: default_ws_port(),
            allowed_origins: Vec::new(),
        }
    }
}

impl Default for FeaturesSection {
    fn default() -> Self {
        Self {
            ws: true,
            sse: false,
            webrtc: false,
        }
    }
}

impl Default for HubSection {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            shard_capacity: default_shard_capacity(),
            min_shards: default_min_shards(),
        }
    }
}

impl Default for LivenessSection {
    fn default() -> Self {
        Self {
            write_wait_secs: default_write_wait_secs(),
            pong_wait_secs: default_pong_wait_secs(),
            ping_period_secs: None,
            sweep_interval_secs: default_sweep_interval_secs(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for SignalingSection {
    fn default() -> Self {
        Self {
            negotiation_timeout_secs: default_negotiation_timeout_secs(),
            assigned_key_floor: default_assigned_key_floor(),
            write_wait_secs: default_write_wait_secs(),
        }
    }
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ── Loading and saving ────────────────────────────────────────────────────────

impl GatewayConfig {
    /// Loads the config from `path`, returning the defaults if the file does
    /// not exist.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] for file-system errors other than "not found",
    /// [`ConfigError::Parse`] if the TOML is malformed.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(toml::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Writes the config to `path`, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] for file-system failures,
    /// [`ConfigError::Serialize`] if serialization fails.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    // ── Typed views ───────────────────────────────────────────────────────────

    /// The WebSocket listener address.
    ///
    /// # Errors
    ///
    /// [`ConfigError::BindAddress`] if `bind_address` is not an IP address.
    pub fn ws_bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let raw = format!("{}:{}", self.server.bind_address, self.server.ws_port);
        raw.parse().map_err(|_| ConfigError::BindAddress(raw))
    }

    pub fn enabled_protocols(&self) -> EnabledProtocols {
        EnabledProtocols {
            ws: self.features.ws,
            sse: self.features.sse,
            webrtc: self.features.webrtc,
        }
    }

    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            max_connections: self.hub.max_connections,
            shard_capacity: self.hub.shard_capacity,
            min_shards: self.hub.min_shards,
        }
    }

    pub fn liveness_config(&self) -> LivenessConfig {
        let section = &self.liveness;
        let pong_wait = Duration::from_secs(section.pong_wait_secs);
        let mut config = LivenessConfig::from_pong_wait(pong_wait);
        if let Some(secs) = section.ping_period_secs {
            config.ping_period = Duration::from_secs(secs);
        }
        config.write_wait = Duration::from_secs(section.write_wait_secs);
        config.sweep_interval = Duration::from_secs(section.sweep_interval_secs);
        config.max_message_size = section.max_message_size;
        config
    }

    pub fn signaling_config(&self) -> SignalingConfig {
        SignalingConfig {
            negotiation_timeout: Duration::from_secs(self.signaling.negotiation_timeout_secs),
            assigned_key_floor: self.signaling.assigned_key_floor,
            write_wait: Duration::from_secs(self.signaling.write_wait_secs),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
