//! RelayService – registry mutations and the tick-driven broadcast pass.

use bytes::Bytes;
use log::debug;

use crate::encode::{record_for, FrameBuilder, ObserverView};
use crate::ident;
use crate::protocol::{self, ClientMessage, FrameError};
use crate::registry::{Cursor, CursorRegistry};
use crate::types::{ConnectionId, RelayError, RelayStats};

/// Allocation re-rolls before a connection is refused.
const ID_ATTEMPTS: u32 = 8;

// ---------------------------------------------------------------------------
// Tick result
// ---------------------------------------------------------------------------

/// Everything one [`RelayService::tick`] call produced.
///
/// Callers (typically the gateway) dispatch the frames after releasing the
/// service lock.
pub struct TickOutput {
    /// The tick counter value that produced this pass.
    pub tick: u64,
    /// One outbound frame per live observer, in registry order.
    pub frames: Vec<(ConnectionId, Bytes)>,
    /// Cursors reaped after the pass, their deletion records already built.
    pub removed: Vec<Cursor>,
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

pub struct RelayService {
    registry: CursorRegistry,
    tick_count: u64,
}

impl RelayService {
    pub fn new() -> Self {
        Self {
            registry: CursorRegistry::new(),
            tick_count: 0,
        }
    }

    // -----------------------------------------------------------------------
    // Connection lifecycle
    // -----------------------------------------------------------------------

    /// Admit a fresh connection into `world`.
    ///
    /// Allocates a wire id and returns the hello frame to send back. A
    /// duplicate connection key or an exhausted id space refuses this
    /// connection only, never the process.
    pub fn connect(
        &mut self,
        conn: ConnectionId,
        world: impl Into<String>,
    ) -> Result<Bytes, RelayError> {
        if self.registry.contains(conn) {
            return Err(RelayError::DuplicateConnection(conn));
        }

        let id = (0..ID_ATTEMPTS)
            .map(|_| ident::allocate())
            .find(|id| !self.registry.id_in_use(*id))
            .ok_or(RelayError::IdSpaceExhausted {
                attempts: ID_ATTEMPTS,
            })?;

        let world = world.into();
        debug!("connection {conn} joined world '{world}' as cursor {id:#010x}");
        self.registry.insert(conn, Cursor::new(id, world));
        Ok(protocol::hello_frame(id))
    }

    /// Tombstone a disconnecting cursor.
    ///
    /// Physical removal is deferred to the tick boundary so every observer
    /// with a visibility edge receives its deletion record first.
    pub fn disconnect(&mut self, conn: ConnectionId) {
        if !self.registry.mark_for_removal(conn) {
            debug!("disconnect for unknown connection {conn}");
        }
    }

    // -----------------------------------------------------------------------
    // Inbound frames
    // -----------------------------------------------------------------------

    /// Apply one inbound frame. Returns a direct reply where the protocol
    /// calls for one (keepalive echo).
    ///
    /// Malformed frames are dropped without touching state and without a
    /// reply; the periodic broadcast makes loss self-correcting.
    pub fn handle_message(&mut self, conn: ConnectionId, frame: &[u8]) -> Option<Bytes> {
        let Some(cursor) = self.registry.get_mut(conn) else {
            debug!("frame from unknown connection {conn}");
            return None;
        };

        match ClientMessage::decode(frame) {
            Ok(ClientMessage::Keepalive) => return Some(protocol::keepalive_frame()),
            Ok(ClientMessage::Viewport { width, height }) => {
                if !cursor.set_viewport(width, height) {
                    debug!("connection {conn} sent degenerate viewport {width}x{height}");
                }
            }
            Ok(ClientMessage::Position { x, y }) => cursor.set_position(x, y),
            Ok(ClientMessage::Nickname(nickname)) => cursor.set_nickname(nickname),
            Ok(ClientMessage::Color(color)) => cursor.set_color(color),
            Err(err @ FrameError::UnknownOpcode(_)) => debug!("connection {conn}: {err}"),
            Err(err) => debug!("connection {conn}: dropped frame: {err}"),
        }
        None
    }

    // -----------------------------------------------------------------------
    // Main tick
    // -----------------------------------------------------------------------

    /// Run one broadcast pass.
    ///
    /// Every non-tombstoned cursor acts as observer and gets exactly one
    /// frame covering every other cursor in its world — tombstoned subjects
    /// included, so each observer receives its deletion record on the same
    /// pass that reaps the subject.
    pub fn tick(&mut self) -> TickOutput {
        self.tick_count += 1;
        let tick = self.tick_count;

        // Observer snapshot first: the subject pass iterates the registry
        // mutably. No structural map mutation happens mid-pass, so subject
        // order is stable across all frames of one tick.
        let observers: Vec<(ConnectionId, ObserverView)> = self
            .registry
            .iter()
            .filter(|(_, cursor)| !cursor.pending_removal)
            .map(|(conn, cursor)| (conn, ObserverView::of(cursor)))
            .collect();

        let subject_count = self.registry.len();
        let mut frames = Vec::with_capacity(observers.len());

        for (conn, observer) in &observers {
            let mut frame = FrameBuilder::new(subject_count.saturating_sub(1));
            for subject in self.registry.cursors_mut() {
                if let Some(record) = record_for(observer, subject, tick) {
                    frame.push(&record);
                }
            }
            frames.push((*conn, frame.finish()));
        }

        let removed = self.registry.drain_removed();
        if !removed.is_empty() {
            debug!("tick {tick}: reaped {} cursor(s)", removed.len());
        }

        TickOutput {
            tick,
            frames,
            removed,
        }
    }

    // -----------------------------------------------------------------------
    // Stats
    // -----------------------------------------------------------------------

    pub fn stats(&self) -> RelayStats {
        let pending = self
            .registry
            .cursors()
            .filter(|c| c.pending_removal)
            .count();
        let worlds: std::collections::HashSet<&str> = self
            .registry
            .cursors()
            .map(|c| c.world.as_str())
            .collect();
        RelayStats {
            connections: self.registry.len(),
            live_cursors: self.registry.len() - pending,
            pending_removal: pending,
            worlds: worlds.len(),
            total_ticks: self.tick_count,
        }
    }

    /// Number of registered connections, tombstoned included.
    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }
}

impl Default for RelayService {
    fn default() -> Self {
        Self::new()
    }
}
