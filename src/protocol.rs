//! Client ⇄ server wire protocol.
//!
//! This module owns **every byte that crosses the connection boundary**
//! between the relay and any client (browser, bot, test harness…).
//!
//! ## Frames
//!
//! | Direction       | First byte      | Carries                          |
//! |-----------------|-----------------|----------------------------------|
//! | client → server | opcode (below)  | one state update or probe        |
//! | server → client | `0xA1`          | allocated cursor id (on connect) |
//! | server → client | `0xA4`          | per-subject records (per tick)   |
//! | server → client | `0x00`          | keepalive echo                   |
//!
//! ## Design rules
//!
//! 1. Little-endian, hand-encoded. Serde never touches the wire.
//! 2. Inbound frames too short for their opcode are dropped without a
//!    reply — the periodic broadcast makes loss self-correcting.
//! 3. Record kinds are a tagged variant with one encoder each, never an
//!    in-place flag tangle.
//! 4. An `Introduce` record omits appearance so first contact stays
//!    fixed-size; the full payload follows once the observer holds a
//!    visibility edge.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// First-byte tags, both directions.
pub mod opcodes {
    /// Client → server: keepalive probe, echoed back verbatim.
    pub const CS_KEEPALIVE: u8 = 0x00;
    /// Client → server: viewport dimensions (u32 width, u32 height).
    pub const CS_VIEWPORT: u8 = 0x01;
    /// Client → server: cursor position (u32 x, u32 y, own viewport space).
    pub const CS_POSITION: u8 = 0x02;
    /// Client → server: nickname (remaining bytes).
    pub const CS_NICKNAME: u8 = 0x03;
    /// Client → server: alias some clients use for viewport declarations.
    pub const CS_VIEWPORT_ALT: u8 = 0x04;
    /// Client → server: color (3 bytes RGB).
    pub const CS_COLOR: u8 = 0x05;

    /// Server → client: keepalive echo.
    pub const SC_KEEPALIVE: u8 = 0x00;
    /// Server → client: allocated cursor id, sent once on connect.
    pub const SC_HELLO: u8 = 0xA1;
    /// Server → client: one broadcast frame per tick.
    pub const SC_TICK: u8 = 0xA4;
}

/// Per-record flag byte inside a tick frame.
pub mod flags {
    pub const INTRODUCE: u8 = 0x00;
    pub const UPDATE: u8 = 0x01;
    pub const REFRESH: u8 = 0x02;
    pub const DELETE: u8 = 0x03;
}

/// Longest nickname accepted, in bytes. Bounds worst-case record size.
pub const NICKNAME_MAX: usize = 64;

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// Why an inbound frame was dropped.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("empty frame")]
    Empty,
    #[error("frame too short for opcode {opcode:#04x} ({len} bytes)")]
    Truncated { opcode: u8, len: usize },
    #[error("unknown opcode {0:#04x}")]
    UnknownOpcode(u8),
}

/// A decoded client → server message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    Keepalive,
    Viewport { width: u32, height: u32 },
    Position { x: u32, y: u32 },
    Nickname(String),
    Color([u8; 3]),
}

impl ClientMessage {
    /// Decode one inbound frame.
    ///
    /// The protocol is best-effort: callers log the error and drop the
    /// frame, leaving cursor state untouched.
    pub fn decode(frame: &[u8]) -> Result<Self, FrameError> {
        let (&opcode, body) = frame.split_first().ok_or(FrameError::Empty)?;
        match opcode {
            opcodes::CS_KEEPALIVE => Ok(Self::Keepalive),
            opcodes::CS_VIEWPORT | opcodes::CS_VIEWPORT_ALT => {
                let (width, height) = read_u32_pair(opcode, body)?;
                Ok(Self::Viewport { width, height })
            }
            opcodes::CS_POSITION => {
                let (x, y) = read_u32_pair(opcode, body)?;
                Ok(Self::Position { x, y })
            }
            opcodes::CS_NICKNAME => Ok(Self::Nickname(sanitize_nickname(body))),
            opcodes::CS_COLOR => match body {
                [r, g, b, ..] => Ok(Self::Color([*r, *g, *b])),
                _ => Err(FrameError::Truncated {
                    opcode,
                    len: frame.len(),
                }),
            },
            other => Err(FrameError::UnknownOpcode(other)),
        }
    }
}

fn read_u32_pair(opcode: u8, body: &[u8]) -> Result<(u32, u32), FrameError> {
    if body.len() < 8 {
        return Err(FrameError::Truncated {
            opcode,
            len: body.len() + 1,
        });
    }
    let a = u32::from_le_bytes([body[0], body[1], body[2], body[3]]);
    let b = u32::from_le_bytes([body[4], body[5], body[6], body[7]]);
    Ok((a, b))
}

/// Nicknames are NUL-terminated on the wire, so an embedded NUL ends the
/// name; anything past [`NICKNAME_MAX`] bytes is cut.
fn sanitize_nickname(body: &[u8]) -> String {
    let end = body.iter().position(|&b| b == 0).unwrap_or(body.len());
    let trimmed = &body[..end.min(NICKNAME_MAX)];
    String::from_utf8_lossy(trimmed).into_owned()
}

// ---------------------------------------------------------------------------
// Outbound records
// ---------------------------------------------------------------------------

/// One per-subject record inside a tick frame.
///
/// `Update` and `Refresh` carry the identical payload; the flag byte alone
/// tells the client whether its cached appearance for that cursor is stale.
#[derive(Debug, Clone, PartialEq)]
pub enum Record<'a> {
    /// First contact: position only, appearance deliberately withheld.
    Introduce { id: u32, x: f32, y: f32 },
    /// Steady state: position plus unchanged appearance.
    Update {
        id: u32,
        x: f32,
        y: f32,
        nickname: &'a str,
        color: [u8; 3],
    },
    /// Appearance changed this tick.
    Refresh {
        id: u32,
        x: f32,
        y: f32,
        nickname: &'a str,
        color: [u8; 3],
    },
    /// The cursor is gone; drop it client-side.
    Delete { id: u32 },
}

impl Record<'_> {
    /// The wire flag byte for this record kind.
    pub fn flag(&self) -> u8 {
        match self {
            Record::Introduce { .. } => flags::INTRODUCE,
            Record::Update { .. } => flags::UPDATE,
            Record::Refresh { .. } => flags::REFRESH,
            Record::Delete { .. } => flags::DELETE,
        }
    }

    /// The subject this record describes.
    pub fn subject_id(&self) -> u32 {
        match *self {
            Record::Introduce { id, .. }
            | Record::Update { id, .. }
            | Record::Refresh { id, .. }
            | Record::Delete { id } => id,
        }
    }

    /// Append the record to `buf`.
    ///
    /// Reserves ahead of the variable-length tail so a grow never lands
    /// mid-record.
    pub fn encode(&self, buf: &mut BytesMut) {
        match *self {
            Record::Introduce { id, x, y } => {
                buf.reserve(13);
                buf.put_u32_le(id);
                buf.put_u8(flags::INTRODUCE);
                buf.put_f32_le(x);
                buf.put_f32_le(y);
            }
            Record::Update {
                id,
                x,
                y,
                nickname,
                color,
            }
            | Record::Refresh {
                id,
                x,
                y,
                nickname,
                color,
            } => {
                buf.reserve(13 + nickname.len() + 1 + 3);
                buf.put_u32_le(id);
                buf.put_u8(self.flag());
                buf.put_f32_le(x);
                buf.put_f32_le(y);
                buf.put_slice(nickname.as_bytes());
                buf.put_u8(0); // NUL terminator
                buf.put_slice(&color);
            }
            Record::Delete { id } => {
                buf.reserve(5);
                buf.put_u32_le(id);
                buf.put_u8(flags::DELETE);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Standalone outbound frames
// ---------------------------------------------------------------------------

/// The 0xA1 frame greeting a fresh connection with its allocated id.
pub fn hello_frame(id: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(5);
    buf.put_u8(opcodes::SC_HELLO);
    buf.put_u32_le(id);
    buf.freeze()
}

/// The echo reply to a keepalive probe.
pub fn keepalive_frame() -> Bytes {
    Bytes::from_static(&[opcodes::SC_KEEPALIVE])
}
