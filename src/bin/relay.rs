//! cursor-relay-server binary
//!
//! Hosts the relay core behind the framed-TCP transport.
//!
//! ## Configuration (flags / env / TOML via `config` crate)
//!
//! | Key                     | Default   | Description                     |
//! |-------------------------|-----------|---------------------------------|
//! | `CURSOR_RELAY_LISTEN`   | `0.0.0.0` | Listen address                  |
//! | `CURSOR_RELAY_PORT`     | `8081`    | Listen port                     |
//! | `CURSOR_RELAY_TICK_MS`  | `30`      | Broadcast tick period (ms)      |
//! | `CURSOR_RELAY_WORLD`    | `lobby`   | World joined by every client    |

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use cursor_relay::gateway::RelayGateway;
use cursor_relay::service::RelayService;
use cursor_relay::transport;
use cursor_relay::types::RelayConfig;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "cursor-relay-server", about = "Cursor position relay", version)]
struct Args {
    /// TOML config file; flags below override its values
    #[arg(long, env = "CURSOR_RELAY_CONFIG")]
    config: Option<String>,

    /// Listen address
    #[arg(long, env = "CURSOR_RELAY_LISTEN")]
    listen: Option<String>,

    /// Listen port
    #[arg(long, env = "CURSOR_RELAY_PORT")]
    port: Option<u16>,

    /// Broadcast tick period in milliseconds
    #[arg(long, env = "CURSOR_RELAY_TICK_MS")]
    tick_ms: Option<u64>,

    /// World every connection joins
    #[arg(long, env = "CURSOR_RELAY_WORLD")]
    world: Option<String>,
}

impl Args {
    fn into_config(self) -> Result<RelayConfig> {
        let mut cfg = match &self.config {
            Some(path) => RelayConfig::from_file(path)
                .with_context(|| format!("loading config from {path}"))?,
            None => RelayConfig::default(),
        };
        if let Some(listen) = self.listen {
            cfg.listen = listen;
        }
        if let Some(port) = self.port {
            cfg.port = port;
        }
        if let Some(tick_ms) = self.tick_ms {
            cfg.tick_interval_ms = tick_ms;
        }
        if let Some(world) = self.world {
            cfg.world = world;
        }
        Ok(cfg)
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("cursor_relay=debug".parse()?),
        )
        .init();

    let config = Args::parse().into_config()?;

    log::info!(
        "Starting cursor-relay-server (listen={}:{}, tick={}ms, world='{}')",
        config.listen,
        config.port,
        config.tick_interval_ms,
        config.world,
    );

    let service = Arc::new(Mutex::new(RelayService::new()));
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    // The transport feeds connection events; the gateway owns the tick.
    let transport_handle = tokio::spawn(transport::listen(config.clone(), events_tx));

    let result = RelayGateway::new(config, service).run(events_rx).await;

    // Stop accepting; anything in flight dies with the process.
    transport_handle.abort();
    result
}
