//! Core relay types shared across all modules.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Connection identity
// ---------------------------------------------------------------------------

/// Transport-level connection key, assigned by the hosting transport.
///
/// Distinct from the wire-visible cursor id: a `ConnectionId` never leaves
/// the process.
pub type ConnectionId = u64;

// ---------------------------------------------------------------------------
// Viewport
// ---------------------------------------------------------------------------

/// Reporting surface assumed for a client until it declares its own.
pub const DEFAULT_VIEWPORT: Viewport = Viewport {
    width: 1370,
    height: 600,
};

/// A client's reporting surface (page scrollable area, in its own pixels).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl std::fmt::Display for Viewport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

// ---------------------------------------------------------------------------
// Stats & config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayStats {
    pub connections: usize,
    pub live_cursors: usize,
    pub pending_removal: usize,
    pub worlds: usize,
    pub total_ticks: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Listen address for the hosting transport.
    pub listen: String,
    /// Listen port.
    pub port: u16,
    /// Broadcast tick period in milliseconds.
    pub tick_interval_ms: u64,
    /// World every transport connection joins.
    pub world: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0".into(),
            port: 8081,
            tick_interval_ms: 30,
            world: "lobby".into(),
        }
    }
}

impl RelayConfig {
    /// Load from a TOML file, with `CURSOR_RELAY_*` environment overrides.
    pub fn from_file(path: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("CURSOR_RELAY"))
            .build()?
            .try_deserialize()
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Connection-scoped failures. None of these are fatal to the process.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The allocator kept colliding with live cursor ids.
    #[error("no unused cursor id after {attempts} attempts")]
    IdSpaceExhausted { attempts: u32 },
    /// The transport handed over a connection key that is already registered.
    #[error("connection {0} is already registered")]
    DuplicateConnection(ConnectionId),
}
