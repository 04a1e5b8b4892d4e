//! Top-level chunk framing.
//!
//! Every chunk starts on an 8-byte boundary and is framed as
//!
//! ```text
//! [u8; 8] tag   ASCII, e.g. "GAVFPHDR"
//! i64     len   big-endian body length, 0 = unknown (streamed sink)
//! ...     body
//! ```
//!
//! Seekable sinks write a zero placeholder and patch the length in
//! [`Chunk::finish`].  Non-seekable sinks use [`Chunk::write_buffered`],
//! which assembles the body in memory so the length is known up front.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, SeekFrom, Write};
use tracing::debug;

use crate::error::{GavfError, Result};
use crate::io::{GavfIo, IoBackend};

pub type Tag = [u8; 8];

pub const TAG_PROGRAM_HEADER: Tag = *b"GAVFPHDR";
pub const TAG_PACKETS:        Tag = *b"GAVFPKTS";
pub const TAG_SYNC_HEADER:    Tag = *b"GAVFSYNC";
pub const TAG_SYNC_INDEX:     Tag = *b"GAVFSIDX";
pub const TAG_PACKET_INDEX:   Tag = *b"GAVFPIDX";
pub const TAG_FOOTER:         Tag = *b"GAVFFOOT";
pub const TAG_TAIL:           Tag = *b"GAVFTAIL";

/// Single-byte marker that opens a packet inside the packet region.
pub const PACKET_TAG: u8 = b'P';

/// Tag + length.
pub const CHUNK_HEADER_SIZE: u64 = 16;
/// The trailer is always a header plus one fixed-width offset.
pub const TAIL_SIZE: u64 = CHUNK_HEADER_SIZE + 8;

/// Tags that may legitimately follow the packet region.
pub fn is_trailing_tag(tag: &Tag) -> bool {
    [TAG_FOOTER, TAG_SYNC_INDEX, TAG_PACKET_INDEX, TAG_TAIL].contains(tag)
}

pub fn tag_str(tag: &Tag) -> String {
    String::from_utf8_lossy(tag).into_owned()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub tag:   Tag,
    /// Body length, 0 if unknown.
    pub len:   i64,
    /// Offset of the tag.
    pub start: u64,
}

impl Chunk {
    /// Align, then write the tag and a zero length placeholder.
    pub fn start<B: IoBackend>(io: &mut GavfIo<B>, tag: Tag) -> Result<Self> {
        io.align_write()?;
        let start = io.position();
        io.write_all(&tag)?;
        io.write_i64::<BigEndian>(0)?;
        debug!(tag = %tag_str(&tag), start, "chunk start");
        Ok(Self { tag, len: 0, start })
    }

    /// Patch the real body length if the sink allows it, then return to
    /// the end of the chunk.
    pub fn finish<B: IoBackend>(&mut self, io: &mut GavfIo<B>) -> Result<()> {
        let end = io.position();
        self.len = (end - self.start - CHUNK_HEADER_SIZE) as i64;
        if io.can_seek() {
            io.seek(SeekFrom::Start(self.start + 8))?;
            io.write_i64::<BigEndian>(self.len)?;
            io.seek(SeekFrom::Start(end))?;
        }
        debug!(tag = %tag_str(&self.tag), len = self.len, patched = io.can_seek(), "chunk finish");
        Ok(())
    }

    /// Build the body in memory, then copy header and body to the sink.
    pub fn write_buffered<B, F>(io: &mut GavfIo<B>, tag: Tag, body: F) -> Result<Self>
    where
        B: IoBackend,
        F: FnOnce(&mut Vec<u8>) -> Result<()>,
    {
        let mut buf = Vec::new();
        body(&mut buf)?;
        io.align_write()?;
        let start = io.position();
        io.write_all(&tag)?;
        io.write_i64::<BigEndian>(buf.len() as i64)?;
        io.write_all(&buf)?;
        debug!(tag = %tag_str(&tag), start, len = buf.len(), "chunk written");
        Ok(Self { tag, len: buf.len() as i64, start })
    }

    /// Write a complete chunk, streaming the body when the length can be
    /// patched afterwards.
    pub fn write<B, F>(io: &mut GavfIo<B>, tag: Tag, body: F) -> Result<Self>
    where
        B: IoBackend,
        F: FnOnce(&mut dyn Write) -> Result<()>,
    {
        if io.can_seek() {
            let mut chunk = Chunk::start(io, tag)?;
            body(io)?;
            chunk.finish(io)?;
            Ok(chunk)
        } else {
            Chunk::write_buffered(io, tag, |buf| body(buf))
        }
    }

    /// Align, then read a chunk header.
    pub fn read_header<B: IoBackend>(io: &mut GavfIo<B>) -> Result<Self> {
        io.align_read()?;
        let start = io.position();
        let mut tag = [0u8; 8];
        io.read_exact(&mut tag)?;
        let len = io.read_i64::<BigEndian>()?;
        if len < 0 {
            return Err(GavfError::format(format!("negative length in chunk {}", tag_str(&tag))));
        }
        Ok(Self { tag, len, start })
    }

    /// Read the remaining body of a chunk whose header was just read.
    pub fn read_body<B: IoBackend>(&self, io: &mut GavfIo<B>) -> Result<Vec<u8>> {
        if self.len == 0 {
            return Err(GavfError::format(format!("chunk {} has unknown length", tag_str(&self.tag))));
        }
        let mut body = Vec::new();
        Read::by_ref(io).take(self.len as u64).read_to_end(&mut body)?;
        if body.len() as u64 != self.len as u64 {
            return Err(GavfError::TruncatedStream);
        }
        Ok(body)
    }

    pub fn body_start(&self) -> u64 {
        self.start + CHUNK_HEADER_SIZE
    }

    /// End of the body, if the length is known.
    pub fn body_end(&self) -> Option<u64> {
        (self.len > 0).then(|| self.body_start() + self.len as u64)
    }

    /// Skip the body of a chunk whose header was just read.
    pub fn skip<B: IoBackend>(&self, io: &mut GavfIo<B>) -> Result<()> {
        match self.body_end() {
            Some(end) => io.skip(end.saturating_sub(io.position())),
            None => Err(GavfError::format(format!("cannot skip chunk {} of unknown length", tag_str(&self.tag)))),
        }
    }
}
