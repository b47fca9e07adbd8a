//! fanout gateway: entry point.
//!
//! Loads the gateway config, creates the WebSocket hub inside a hub registry,
//! and serves WebSocket clients until Ctrl+C.
//!
//! # Usage
//!
//! ```text
//! fanout-gateway [OPTIONS]
//!
//! Options:
//!   --config    <PATH>   TOML config file [default: fanout.toml]
//!   --ws-port   <PORT>   WebSocket listener port (overrides [server] ws_port)
//!   --bind      <IP>     Bind address (overrides [server] bind_address)
//!   --log-level <LEVEL>  Log filter (overrides [logging] level)
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable         | Overrides                 |
//! |------------------|---------------------------|
//! | `FANOUT_CONFIG`  | `--config`                |
//! | `FANOUT_WS_PORT` | `[server] ws_port`        |
//! | `FANOUT_BIND`    | `[server] bind_address`   |
//! | `FANOUT_LOG`     | `[logging] level`         |
//!
//! Command-line values win over environment variables, which win over the
//! file.  `RUST_LOG`, when set, replaces the log filter entirely.

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use clap::Parser;
use fanout_core::Protocol;
use fanout_hub::HubRegistry;
use tracing::info;
use tracing_subscriber::EnvFilter;

use fanout_gateway::application::ChatRoom;
use fanout_gateway::domain::config::GatewayConfig;
use fanout_gateway::infrastructure::{run_server, ServerSettings};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Multi-protocol connection hub: WebSocket gateway.
#[derive(Debug, Parser)]
#[command(
    name = "fanout-gateway",
    about = "WebSocket gateway for the fanout connection hub",
    version
)]
struct Cli {
    /// Path to the TOML config file.  A missing file means all defaults.
    #[arg(long, default_value = "fanout.toml", env = "FANOUT_CONFIG")]
    config: PathBuf,

    /// TCP port for the WebSocket listener.
    #[arg(long, env = "FANOUT_WS_PORT")]
    ws_port: Option<u16>,

    /// IP address to bind the WebSocket listener to.
    #[arg(long, env = "FANOUT_BIND")]
    bind: Option<String>,

    /// Log filter such as `info` or `fanout_hub=debug`.
    #[arg(long, env = "FANOUT_LOG")]
    log_level: Option<String>,
}

impl Cli {
    /// Loads the config file and applies the command-line overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    fn into_gateway_config(self) -> anyhow::Result<GatewayConfig> {
        let mut config = GatewayConfig::load_from(&self.config)
            .with_context(|| format!("failed to load config from {}", self.config.display()))?;
        self.apply_overrides(&mut config);
        Ok(config)
    }

    fn apply_overrides(self, config: &mut GatewayConfig) {
        if let Some(port) = self.ws_port {
            config.server.ws_port = port;
        }
        if let Some(bind) = self.bind {
            config.server.bind_address = bind;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Program entry point.
///
/// # What happens at startup
///
/// 1. CLI arguments are parsed and merged over the config file.
/// 2. `tracing_subscriber` is initialised from `RUST_LOG`, falling back to the
///    configured level.
/// 3. A [`HubRegistry`] is created with the configured protocol switches and
///    the WebSocket hub is registered in it with a [`ChatRoom`] observer.
/// 4. A Ctrl+C handler clears the shared `running` flag.
/// 5. [`run_server`] accepts clients until the flag is cleared, then every
///    hub is shut down, closing the remaining connections.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Cli::parse().into_gateway_config()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .init();

    let addr = config.ws_bind_addr()?;
    let registry = HubRegistry::new(config.enabled_protocols());
    let hub = registry
        .get_or_register_hub(
            Protocol::Ws,
            &config.hub_config(),
            config.liveness_config(),
            Arc::new(ChatRoom),
        )
        .context("cannot start the WebSocket hub")?;

    info!(
        "fanout gateway starting: ws={addr}, hub={}, shards={}",
        hub.id(),
        hub.shard_count()
    );

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C; shutting down");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!("failed to listen for Ctrl+C signal: {e}");
            }
        }
    });

    let result = run_server(addr, hub, ServerSettings::from_config(&config), running).await;
    registry.shutdown();

    info!("fanout gateway stopped");
    result
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("fanout-gateway").chain(args.iter().copied()))
    }

    #[test]
    fn test_cli_defaults_leave_the_file_in_charge() {
        // Arrange / Act
        let cli = Cli {
            config: PathBuf::from("fanout.toml"),
            ws_port: None,
            bind: None,
            log_level: None,
        };
        let mut config = GatewayConfig::default();
        config.server.ws_port = 7000;

        cli.apply_overrides(&mut config);

        // Assert
        assert_eq!(config.server.ws_port, 7000);
        assert_eq!(config.server.bind_address, "0.0.0.0");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_cli_config_path_override() {
        let cli = cli(&["--config", "/etc/fanout/gateway.toml"]);
        assert_eq!(cli.config, PathBuf::from("/etc/fanout/gateway.toml"));
    }

    #[test]
    fn test_cli_ws_port_override() {
        let cli = cli(&["--ws-port", "9999"]);
        assert_eq!(cli.ws_port, Some(9999));
    }

    #[test]
    fn test_cli_rejects_out_of_range_port() {
        let result = Cli::try_parse_from(["fanout-gateway", "--ws-port", "70000"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_overrides_replace_file_values() {
        // Arrange
        let cli = cli(&["--ws-port", "9001", "--bind", "127.0.0.1", "--log-level", "debug"]);
        let mut config = GatewayConfig::default();

        // Act
        cli.apply_overrides(&mut config);

        // Assert
        assert_eq!(config.server.ws_port, 9001);
        assert_eq!(config.server.bind_address, "127.0.0.1");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(
            config.ws_bind_addr().expect("valid").to_string(),
            "127.0.0.1:9001"
        );
    }

    #[test]
    fn test_missing_config_file_yields_defaults() {
        let cli = Cli {
            config: std::env::temp_dir().join("fanout-gateway-no-such-file.toml"),
            ws_port: Some(8123),
            bind: None,
            log_level: None,
        };

        let config = cli.into_gateway_config().expect("defaults");

        assert_eq!(config.server.ws_port, 8123);
        assert!(config.features.ws);
    }

    #[test]
    fn test_invalid_bind_override_is_reported() {
        let cli = Cli {
            config: std::env::temp_dir().join("fanout-gateway-no-such-file.toml"),
            ws_port: None,
            bind: Some("not.an.ip".to_string()),
            log_level: None,
        };

        let config = cli.into_gateway_config().expect("file loads");

        assert!(config.ws_bind_addr().is_err());
    }
}
