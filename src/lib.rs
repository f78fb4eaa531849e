//! Cursor Relay
//!
//! A real-time cursor-position-sharing service: clients report their own
//! pointer position and lightweight identity (nickname, color) over a
//! persistent duplex channel and receive one broadcast frame per tick
//! describing every other cursor in their world.
//!
//! ## Architecture
//!
//! ```text
//! transport.rs  (framed-TCP host)            → ConnectionEvent
//!   └── RelayGateway  (gateway.rs)           ← tick timer, frame dispatch
//!         └── RelayService  (service.rs)     ← mutations + broadcast pass
//!               ├── CursorRegistry (registry.rs) ← live state, visibility
//!               ├── record_for     (encode.rs)   ← record-kind decision
//!               └── protocol.rs                  ← bytes on the wire
//! ```
//!
//! The per-(observer, subject) decision in [`encode`] is the core:
//! it owns visibility edges and the dirty flag, and encoding is the only
//! state transition either ever takes.

// Protocol and shared types are always available (no server feature needed).
pub mod protocol;
pub mod types;

// Server-side modules require the `server` feature.
#[cfg(feature = "server")]
pub mod encode;
#[cfg(feature = "server")]
pub mod gateway;
#[cfg(feature = "server")]
pub mod ident;
#[cfg(feature = "server")]
pub mod registry;
#[cfg(feature = "server")]
pub mod service;
#[cfg(feature = "server")]
pub mod transport;

// Convenience re-exports (server only)
#[cfg(feature = "server")]
pub use gateway::{ConnectionEvent, RelayGateway};
#[cfg(feature = "server")]
pub use registry::{Cursor, CursorRegistry};
#[cfg(feature = "server")]
pub use service::{RelayService, TickOutput};
pub use types::{ConnectionId, RelayConfig, RelayError, RelayStats, Viewport};
