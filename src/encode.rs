//! Frame encoder: the per-(observer, subject) record decision.
//!
//! Encoding *is* the state transition: picking a record kind is what flips
//! visibility edges and consumes the dirty flag, so this module is the only
//! place either is touched.

use bytes::{BufMut, Bytes, BytesMut};

use crate::protocol::{opcodes, Record};
use crate::registry::Cursor;
use crate::types::Viewport;

/// Pre-size hint per subject when assembling a tick frame. Most records are
/// 13 bytes; nickname-bearing ones reserve again before the variable tail.
const RECORD_SIZE_HINT: usize = 16;

// ---------------------------------------------------------------------------
// Observer view
// ---------------------------------------------------------------------------

/// The slice of an observer's state the encoder needs, snapshotted before
/// the subject pass so the registry can be iterated mutably.
#[derive(Debug, Clone)]
pub struct ObserverView {
    pub id: u32,
    pub world: String,
    pub viewport: Viewport,
}

impl ObserverView {
    pub fn of(cursor: &Cursor) -> Self {
        Self {
            id: cursor.id,
            world: cursor.world.clone(),
            viewport: cursor.viewport,
        }
    }
}

// ---------------------------------------------------------------------------
// Record decision
// ---------------------------------------------------------------------------

/// Decide which record `observer` receives for `subject` on `tick`.
///
/// Returns `None` for self-pairs and cross-world pairs. The full table:
///
/// | edge   | subject         | record    | side effect     |
/// |--------|-----------------|-----------|-----------------|
/// | any    | pending_removal | Delete    | edge cleared    |
/// | unseen | live            | Introduce | edge set        |
/// | seen   | live, dirty     | Refresh   | dirty consumed  |
/// | seen   | live, clean     | Update    | —               |
pub fn record_for<'s>(
    observer: &ObserverView,
    subject: &'s mut Cursor,
    tick: u64,
) -> Option<Record<'s>> {
    if subject.id == observer.id || subject.world != observer.world {
        return None;
    }

    if subject.pending_removal {
        subject.clear_seen(observer.id);
        return Some(Record::Delete { id: subject.id });
    }

    let x = scale(subject.x, observer.viewport.width);
    let y = scale(subject.y, observer.viewport.height);

    if !subject.has_seen(observer.id) {
        subject.mark_seen(observer.id);
        return Some(Record::Introduce {
            id: subject.id,
            x,
            y,
        });
    }

    if subject.take_dirty(tick) {
        Some(Record::Refresh {
            id: subject.id,
            x,
            y,
            nickname: &subject.nickname,
            color: subject.color,
        })
    } else {
        Some(Record::Update {
            id: subject.id,
            x,
            y,
            nickname: &subject.nickname,
            color: subject.color,
        })
    }
}

/// Rescale a stored full-range coordinate into the observer's viewport, so
/// relative layout survives differing client surfaces.
fn scale(stored: u32, extent: u32) -> f32 {
    (stored as u64 * extent as u64) as f32 / u32::MAX as f32
}

// ---------------------------------------------------------------------------
// Frame assembly
// ---------------------------------------------------------------------------

/// Builds one outbound 0xA4 tick frame for a single observer.
pub struct FrameBuilder {
    buf: BytesMut,
}

impl FrameBuilder {
    /// `expected_subjects` sizes the buffer conservatively up front;
    /// [`Record::encode`] reserves again before any variable-length tail.
    pub fn new(expected_subjects: usize) -> Self {
        let mut buf = BytesMut::with_capacity(1 + RECORD_SIZE_HINT * expected_subjects);
        buf.put_u8(opcodes::SC_TICK);
        Self { buf }
    }

    pub fn push(&mut self, record: &Record<'_>) {
        record.encode(&mut self.buf);
    }

    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}
