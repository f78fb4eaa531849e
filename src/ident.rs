//! Cursor id allocation.

use std::time::{SystemTime, UNIX_EPOCH};

/// Produce a fresh wire-visible cursor id.
///
/// Low wall-clock millisecond bits XORed with a random word — collision-
/// resistant without a global counter. Ids are opaque handles, not ordering
/// keys; callers must still check the result against currently-live ids and
/// re-roll on a hit.
pub fn allocate() -> u32 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u32)
        .unwrap_or(0);
    millis ^ fastrand::u32(..)
}
