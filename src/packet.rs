//! Packets, the per-stream packet buffer, and the packet wire format.
//!
//! Inside the packet region a packet is
//!
//! ```text
//! 'P'  uint32v stream_id  uint32v body_len  body[body_len]
//! ```
//!
//! and the body is
//!
//! ```text
//! uint32v  wire flags        low 16 bits: PacketFlags, high bits: HAS_* presence
//! int64v   pts               if HAS_PTS
//! int64v   duration          if HAS_DURATION
//! uint32v  interlace mode    if the stream carries it
//! uint32v  field2 offset     if the stream carries it
//! uint64v  timecode          if HAS_TIMECODE
//! int32v   x y w h dx dy     overlay streams
//! ...      payload           rest of the body
//! ```
//!
//! Writer and reader both track the next inferred PTS of each stream; the
//! PTS goes on the wire whenever the stream requires it or inference would
//! produce a different value.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::io::{Cursor, Write};

use crate::error::Result;
use crate::format::InterlaceMode;
use crate::io::{ReadVarExt, WriteVarExt};

const WIRE_HAS_PTS:      u32 = 1 << 16;
const WIRE_HAS_DURATION: u32 = 1 << 17;
const WIRE_HAS_TIMECODE: u32 = 1 << 18;
const WIRE_FLAGS_MASK:   u32 = 0xFFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
pub struct PacketFlags(pub u32);

impl PacketFlags {
    pub const TYPE_I:    u32 = 1;
    pub const TYPE_P:    u32 = 2;
    pub const TYPE_B:    u32 = 3;
    pub const TYPE_MASK: u32 = 0x3;
    /// Random access point.
    pub const KEYFRAME:  u32 = 1 << 2;
    /// Packet holds two field pictures; `field2_offset` is valid.
    pub const FIELD_PIC: u32 = 1 << 3;

    pub fn keyframe() -> Self { PacketFlags(Self::TYPE_I | Self::KEYFRAME) }

    pub fn p_frame() -> Self { PacketFlags(Self::TYPE_P) }

    pub fn b_frame() -> Self { PacketFlags(Self::TYPE_B) }

    pub fn is_keyframe(self) -> bool { self.0 & Self::KEYFRAME != 0 }

    pub fn is_b_frame(self) -> bool { self.0 & Self::TYPE_MASK == Self::TYPE_B }

    pub fn is_p_frame(self) -> bool { self.0 & Self::TYPE_MASK == Self::TYPE_P }

    pub fn has_field2(self) -> bool { self.0 & Self::FIELD_PIC != 0 }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Packet {
    pub stream_id:      u32,
    /// Presentation time in the stream timescale.
    pub pts:            i64,
    pub duration:       i64,
    pub flags:          PacketFlags,
    pub interlace_mode: InterlaceMode,
    /// Byte offset of the second field inside `data`.
    pub field2_offset:  u32,
    pub timecode:       Option<u64>,
    /// Overlay source rectangle.
    pub src_rect:       Rect,
    pub dst_x:          i32,
    pub dst_y:          i32,
    pub data:           Vec<u8>,
}

impl Packet {
    pub fn new(pts: i64, duration: i64, flags: PacketFlags, data: Vec<u8>) -> Self {
        Self { pts, duration, flags, data, ..Default::default() }
    }

    pub fn is_keyframe(&self) -> bool { self.flags.is_keyframe() }

    pub fn end_pts(&self) -> i64 { self.pts.saturating_add(self.duration) }
}

/// Which optional header fields a stream puts in every packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketFields {
    pub pts:       bool,
    pub duration:  bool,
    pub interlace: bool,
    pub field2:    bool,
    pub rect:      bool,
}

/// Inference state shared by writer and reader.
#[derive(Debug, Clone, Copy)]
pub(crate) struct WireContext {
    pub fields:           PacketFields,
    pub next_pts:         Option<i64>,
    pub default_duration: i64,
}

/// Encode a packet body (everything after the length prefix).
pub(crate) fn encode_body(pkt: &Packet, ctx: &WireContext, out: &mut Vec<u8>) -> Result<()> {
    let mut wire = pkt.flags.0 & WIRE_FLAGS_MASK;
    if ctx.fields.pts || ctx.next_pts != Some(pkt.pts) {
        wire |= WIRE_HAS_PTS;
    }
    if ctx.fields.duration || pkt.duration != ctx.default_duration {
        wire |= WIRE_HAS_DURATION;
    }
    if pkt.timecode.is_some() {
        wire |= WIRE_HAS_TIMECODE;
    }

    out.write_uint32v(wire)?;
    if wire & WIRE_HAS_PTS != 0 {
        out.write_int64v(pkt.pts)?;
    }
    if wire & WIRE_HAS_DURATION != 0 {
        out.write_int64v(pkt.duration)?;
    }
    if ctx.fields.interlace {
        out.write_uint32v(pkt.interlace_mode.code())?;
    }
    if ctx.fields.field2 {
        out.write_uint32v(pkt.field2_offset)?;
    }
    if let Some(tc) = pkt.timecode {
        out.write_uint64v(tc)?;
    }
    if ctx.fields.rect {
        for v in [pkt.src_rect.x, pkt.src_rect.y, pkt.src_rect.w, pkt.src_rect.h, pkt.dst_x, pkt.dst_y] {
            out.write_int32v(v)?;
        }
    }
    out.write_all(&pkt.data)?;
    Ok(())
}

/// Decode a packet body.  The payload reuses the body allocation.
pub(crate) fn decode_body(stream_id: u32, mut body: Vec<u8>, ctx: &WireContext) -> Result<Packet> {
    let mut pkt = Packet { stream_id, ..Default::default() };
    let header_len = {
        let mut r = Cursor::new(body.as_slice());
        let wire = r.read_uint32v()?;
        pkt.flags = PacketFlags(wire & WIRE_FLAGS_MASK);

        pkt.pts = if wire & WIRE_HAS_PTS != 0 {
            r.read_int64v()?
        } else {
            ctx.next_pts.unwrap_or(0)
        };
        pkt.duration = if wire & WIRE_HAS_DURATION != 0 {
            r.read_int64v()?
        } else {
            ctx.default_duration
        };
        if ctx.fields.interlace {
            pkt.interlace_mode = InterlaceMode::from_code(r.read_uint32v()?)?;
        }
        if ctx.fields.field2 {
            pkt.field2_offset = r.read_uint32v()?;
        }
        if wire & WIRE_HAS_TIMECODE != 0 {
            pkt.timecode = Some(r.read_uint64v()?);
        }
        if ctx.fields.rect {
            pkt.src_rect = Rect {
                x: r.read_int32v()?,
                y: r.read_int32v()?,
                w: r.read_int32v()?,
                h: r.read_int32v()?,
            };
            pkt.dst_x = r.read_int32v()?;
            pkt.dst_y = r.read_int32v()?;
        }
        r.position() as usize
    };
    body.drain(..header_len);
    pkt.data = body;
    Ok(pkt)
}

/// FIFO of packets that are not yet written (mux) or not yet consumed.
#[derive(Debug, Default)]
pub struct PacketBuffer {
    packets: VecDeque<Packet>,
}

impl PacketBuffer {
    pub fn push(&mut self, pkt: Packet) { self.packets.push_back(pkt) }

    pub fn pop(&mut self) -> Option<Packet> { self.packets.pop_front() }

    pub fn peek(&self) -> Option<&Packet> { self.packets.front() }

    pub fn len(&self) -> usize { self.packets.len() }

    pub fn is_empty(&self) -> bool { self.packets.is_empty() }

    pub fn clear(&mut self) { self.packets.clear() }
}
