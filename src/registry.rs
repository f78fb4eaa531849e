//! Live cursor state and the connection-keyed registry.

use std::collections::{HashMap, HashSet};

use crate::types::{ConnectionId, Viewport, DEFAULT_VIEWPORT};

// ---------------------------------------------------------------------------
// Cursor
// ---------------------------------------------------------------------------

/// One connected client's authoritative state.
///
/// Mutations from inbound frames land here synchronously; the broadcast
/// pass reads and updates the visibility/dirty bookkeeping. The coarse
/// service lock keeps the two from interleaving.
#[derive(Debug, Clone)]
pub struct Cursor {
    /// Wire-visible id, allocated once at connect.
    pub id: u32,
    /// Partition key; only same-world cursors see each other.
    pub world: String,
    /// Position, normalized into the full `u32` range at receipt so it is
    /// independent of the reporting viewport.
    pub x: u32,
    pub y: u32,
    /// The client's reporting surface; fallback until declared.
    pub viewport: Viewport,
    pub nickname: String,
    pub color: [u8; 3],
    /// Tombstone: reaped by `drain_removed` between ticks, never during one.
    pub pending_removal: bool,
    metadata_dirty: bool,
    /// Tick that last consumed `metadata_dirty` (see [`Cursor::take_dirty`]).
    refreshed_tick: Option<u64>,
    /// Observer ids already introduced to this cursor.
    seen_by: HashSet<u32>,
}

impl Cursor {
    pub fn new(id: u32, world: impl Into<String>) -> Self {
        Self {
            id,
            world: world.into(),
            x: 0,
            y: 0,
            viewport: DEFAULT_VIEWPORT,
            nickname: String::new(),
            color: [0; 3],
            pending_removal: false,
            metadata_dirty: false,
            refreshed_tick: None,
            seen_by: HashSet::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Mutations from inbound frames
    // -----------------------------------------------------------------------

    /// Declare the reporting surface.
    ///
    /// Zero dimensions would poison the position scaling, so they are
    /// dropped like any other malformed update. Returns whether the update
    /// was applied.
    pub fn set_viewport(&mut self, width: u32, height: u32) -> bool {
        if width == 0 || height == 0 {
            return false;
        }
        self.viewport = Viewport::new(width, height);
        true
    }

    /// Store a position reported in this cursor's own viewport space,
    /// normalized into the full `u32` range.
    pub fn set_position(&mut self, raw_x: u32, raw_y: u32) {
        self.x = normalize(raw_x, self.viewport.width);
        self.y = normalize(raw_y, self.viewport.height);
    }

    pub fn set_nickname(&mut self, nickname: String) {
        self.nickname = nickname;
        self.metadata_dirty = true;
    }

    pub fn set_color(&mut self, color: [u8; 3]) {
        self.color = color;
        self.metadata_dirty = true;
    }

    // -----------------------------------------------------------------------
    // Visibility edges
    // -----------------------------------------------------------------------

    pub fn has_seen(&self, observer_id: u32) -> bool {
        self.seen_by.contains(&observer_id)
    }

    pub fn mark_seen(&mut self, observer_id: u32) {
        self.seen_by.insert(observer_id);
    }

    pub fn clear_seen(&mut self, observer_id: u32) {
        self.seen_by.remove(&observer_id);
    }

    // -----------------------------------------------------------------------
    // Dirty bookkeeping
    // -----------------------------------------------------------------------

    /// Consume the dirty flag for `tick`.
    ///
    /// The first caller in a tick clears the flag and latches the tick
    /// number; later callers in the same tick still observe dirtiness, so
    /// every already-introduced observer gets the same record kind. The
    /// next tick reads clean.
    pub fn take_dirty(&mut self, tick: u64) -> bool {
        if self.metadata_dirty {
            self.metadata_dirty = false;
            self.refreshed_tick = Some(tick);
            return true;
        }
        self.refreshed_tick == Some(tick)
    }
}

/// Scale a coordinate from `0..=extent` into the full `u32` range.
/// Reports beyond the declared viewport clamp to the far edge.
fn normalize(raw: u32, extent: u32) -> u32 {
    debug_assert!(extent != 0);
    ((raw as u64 * u32::MAX as u64) / extent as u64).min(u32::MAX as u64) as u32
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// All connected cursors, keyed by transport connection.
#[derive(Debug, Default)]
pub struct CursorRegistry {
    cursors: HashMap<ConnectionId, Cursor>,
}

impl CursorRegistry {
    pub fn new() -> Self {
        Self {
            cursors: HashMap::new(),
        }
    }

    pub fn insert(&mut self, conn: ConnectionId, cursor: Cursor) {
        self.cursors.insert(conn, cursor);
    }

    pub fn contains(&self, conn: ConnectionId) -> bool {
        self.cursors.contains_key(&conn)
    }

    pub fn get(&self, conn: ConnectionId) -> Option<&Cursor> {
        self.cursors.get(&conn)
    }

    pub fn get_mut(&mut self, conn: ConnectionId) -> Option<&mut Cursor> {
        self.cursors.get_mut(&conn)
    }

    /// Tombstone a cursor; it stays iterable until [`CursorRegistry::drain_removed`].
    /// Returns false for unknown connections.
    pub fn mark_for_removal(&mut self, conn: ConnectionId) -> bool {
        match self.cursors.get_mut(&conn) {
            Some(cursor) => {
                cursor.pending_removal = true;
                true
            }
            None => false,
        }
    }

    /// True when some registered cursor already answers to `id`.
    pub fn id_in_use(&self, id: u32) -> bool {
        self.cursors.values().any(|c| c.id == id)
    }

    pub fn len(&self) -> usize {
        self.cursors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cursors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ConnectionId, &Cursor)> {
        self.cursors.iter().map(|(conn, cursor)| (*conn, cursor))
    }

    pub fn cursors(&self) -> impl Iterator<Item = &Cursor> {
        self.cursors.values()
    }

    pub fn cursors_mut(&mut self) -> impl Iterator<Item = &mut Cursor> {
        self.cursors.values_mut()
    }

    /// Erase every tombstoned cursor and return them.
    ///
    /// Called only between ticks. Drained ids are also cleared out of the
    /// survivors' visibility sets so no edge outlives its observer — the
    /// allocator may hand the id out again later.
    pub fn drain_removed(&mut self) -> Vec<Cursor> {
        let doomed: Vec<ConnectionId> = self
            .cursors
            .iter()
            .filter(|(_, c)| c.pending_removal)
            .map(|(conn, _)| *conn)
            .collect();

        let mut removed = Vec::with_capacity(doomed.len());
        for conn in doomed {
            if let Some(cursor) = self.cursors.remove(&conn) {
                removed.push(cursor);
            }
        }

        if !removed.is_empty() {
            for survivor in self.cursors.values_mut() {
                for gone in &removed {
                    survivor.clear_seen(gone.id);
                }
            }
        }

        removed
    }
}
