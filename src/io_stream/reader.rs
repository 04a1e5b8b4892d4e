//! Demuxer: walks the chunk sequence, decodes sync headers and packets,
//! and seeks through the sync index.
//!
//! The packet loop is tolerant of damaged input: a short read inside a
//! record or an unexpected tag ends the stream instead of failing the
//! call.  [`GavfReader::end_reason`] tells the cases apart.

use byteorder::{BigEndian, ReadBytesExt};
use std::io::{Cursor, Read, SeekFrom};
use tracing::{debug, trace, warn};

use crate::chunk::{
    is_trailing_tag, tag_str, Chunk, Tag, PACKET_TAG, TAG_FOOTER, TAG_PACKETS, TAG_PACKET_INDEX,
    TAG_PROGRAM_HEADER, TAG_SYNC_HEADER, TAG_SYNC_INDEX, TAG_TAIL, TAIL_SIZE,
};
use crate::error::{GavfError, Result};
use crate::header::ProgramHeader;
use crate::index::{PacketIndex, SyncIndex};
use crate::io::{GavfIo, IoBackend, ReadVarExt, ALIGNMENT};
use crate::options::Options;
use crate::packet::{decode_body, Packet};
use crate::stream::StreamRuntime;
use crate::time::{self, TIME_SCALE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemuxState {
    SeekingProgram,
    Streaming,
    Eof,
}

/// Why the packet region stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// End of the packet region, a record boundary at end of input, or a
    /// trailing chunk.
    Clean,
    /// Input ended inside a record.
    Truncated,
    UnknownTag(Tag),
}

/// A packet whose body has not been read yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub stream_id: u32,
    /// Body length in bytes.
    pub len:       u32,
    /// Offset of the packet tag.
    pub pos:       u64,
}

/// Consumes the body of a skipped packet: `(stream_id, len, io)`.  Must read
/// exactly `len` bytes.
pub type SkipCallback<B> = Box<dyn FnMut(u32, u32, &mut GavfIo<B>) -> Result<()>>;

/// One record of the packet region.
pub(crate) enum Record {
    Packet(PacketHeader),
    Sync { pos: u64, pts: Vec<Option<i64>> },
    Trailer { tag: Tag, pos: u64 },
    End(EndReason),
}

pub struct GavfReader<B: IoBackend> {
    pub(crate) io:             GavfIo<B>,
    pub(crate) header:         ProgramHeader,
    pub(crate) streams:        Vec<StreamRuntime>,
    pub(crate) sync_pts:       Vec<Option<i64>>,
    pub(crate) state:          DemuxState,
    pub(crate) options:        Options,
    pub(crate) sync_index:     Option<SyncIndex>,
    pub(crate) packet_index:   Option<PacketIndex>,
    pub(crate) first_sync_pos: Option<u64>,
    /// End of the packet region when its length is known.
    pub(crate) packets_end:    Option<u64>,
    pub(crate) end_reason:     Option<EndReason>,
    pub(crate) pending:        Option<PacketHeader>,
    footer_loaded:             bool,
    offset_applied:            bool,
    /// Unscaled time subtracted from every presented PTS.
    time_offset:               i64,
    skip_callbacks:            Vec<Option<SkipCallback<B>>>,
}

impl<B: IoBackend> GavfReader<B> {
    /// Read chunks up to the first sync header.
    pub fn open(backend: B, options: Options) -> Result<Self> {
        options.validate()?;
        let mut rd = Self {
            io: GavfIo::new(backend),
            header: ProgramHeader::default(),
            streams: Vec::new(),
            sync_pts: Vec::new(),
            state: DemuxState::SeekingProgram,
            options,
            sync_index: None,
            packet_index: None,
            first_sync_pos: None,
            packets_end: None,
            end_reason: None,
            pending: None,
            footer_loaded: false,
            offset_applied: false,
            time_offset: 0,
            skip_callbacks: Vec::new(),
        };
        rd.read_program()?;
        Ok(rd)
    }

    fn read_program(&mut self) -> Result<()> {
        let mut have_header = false;
        loop {
            let chunk = Chunk::read_header(&mut self.io)?;
            match chunk.tag {
                TAG_PROGRAM_HEADER => {
                    let body = chunk.read_body(&mut self.io)?;
                    self.install_header(ProgramHeader::read(&mut Cursor::new(body))?);
                    have_header = true;
                    if self.io.can_seek() {
                        let resume = self.io.position();
                        self.load_trailer();
                        self.io.seek_to(resume)?;
                    }
                }
                TAG_PACKETS => {
                    if !have_header {
                        return Err(GavfError::format("packet region before program header"));
                    }
                    self.packets_end = chunk.body_end();
                    self.state = DemuxState::Streaming;
                    // the region opens with a sync header unless it is empty
                    match self.read_record()? {
                        Record::Sync { pos, pts } => self.apply_sync(pos, pts),
                        Record::Trailer { tag, pos } => self.read_trailing(tag, pos),
                        Record::End(reason) => self.finish(reason),
                        Record::Packet(_) => {
                            return Err(GavfError::format("packet before first sync header"));
                        }
                    }
                    return Ok(());
                }
                other => {
                    warn!(tag = %tag_str(&other), "skipping unexpected chunk");
                    chunk.skip(&mut self.io)?;
                }
            }
        }
    }

    fn install_header(&mut self, header: ProgramHeader) {
        let n = header.streams.len();
        self.streams = header.streams.iter().map(|s| StreamRuntime::new(s, n)).collect();
        self.sync_pts = vec![None; n];
        self.skip_callbacks = (0..n).map(|_| None).collect();
        if self.options.dump_headers {
            debug!("program header:\n{}", header.describe());
        }
        self.header = header;
    }

    /// Load footer and indices via the tail.  Missing or damaged trailers
    /// only cost the extra information.
    fn load_trailer(&mut self) {
        if let Err(e) = self.try_load_trailer() {
            warn!(error = %e, "no usable trailer, continuing without footer and indices");
        }
    }

    fn try_load_trailer(&mut self) -> Result<()> {
        self.io.seek(SeekFrom::End(-(TAIL_SIZE as i64)))?;
        let tail = Chunk::read_header(&mut self.io)?;
        if tail.tag != TAG_TAIL {
            return Err(GavfError::format(format!("expected tail, found {}", tag_str(&tail.tag))));
        }
        let footer_pos = self.io.read_u64::<BigEndian>()?;
        self.io.seek_to(footer_pos)?;
        loop {
            let chunk = Chunk::read_header(&mut self.io)?;
            match chunk.tag {
                TAG_FOOTER => {
                    let body = chunk.read_body(&mut self.io)?;
                    self.header.read_footer(&mut Cursor::new(body))?;
                    self.footer_loaded = true;
                }
                TAG_SYNC_INDEX => {
                    let body = chunk.read_body(&mut self.io)?;
                    let index = SyncIndex::read(&mut Cursor::new(body))?;
                    if index.num_streams != self.streams.len() {
                        return Err(GavfError::format("sync index width does not match stream count"));
                    }
                    if self.options.dump_indices {
                        debug!(entries = index.len(), "sync index: {:?}", index.entries);
                    }
                    self.sync_index = Some(index);
                }
                TAG_PACKET_INDEX => {
                    let body = chunk.read_body(&mut self.io)?;
                    let index = PacketIndex::read(&mut Cursor::new(body))?;
                    if self.options.dump_indices {
                        debug!(entries = index.len(), "packet index: {:?}", index.entries);
                    }
                    self.packet_index = Some(index);
                }
                TAG_TAIL => return Ok(()),
                other => {
                    warn!(tag = %tag_str(&other), "skipping unknown trailing chunk");
                    chunk.skip(&mut self.io)?;
                }
            }
        }
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn header(&self) -> &ProgramHeader { &self.header }

    pub fn state(&self) -> DemuxState { self.state }

    pub fn options(&self) -> &Options { &self.options }

    /// `None` while packets remain.
    pub fn end_reason(&self) -> Option<EndReason> { self.end_reason }

    pub fn sync_index(&self) -> Option<&SyncIndex> { self.sync_index.as_ref() }

    pub fn packet_index(&self) -> Option<&PacketIndex> { self.packet_index.as_ref() }

    pub fn first_sync_pos(&self) -> Option<u64> { self.first_sync_pos }

    /// PTS vector of the last sync header read.
    pub fn sync_pts(&self) -> &[Option<i64>] { &self.sync_pts }

    pub fn stream(&self, id: u32) -> Option<&StreamRuntime> {
        self.header.index_of(id).map(|i| &self.streams[i])
    }

    pub fn first_pts(&self) -> Option<&[Option<i64>]> {
        self.sync_index.as_ref()?.first_pts()
    }

    pub fn end_pts(&self) -> Option<&[Option<i64>]> {
        self.sync_index.as_ref()?.end_pts()
    }

    pub fn into_inner(mut self) -> Option<B> {
        self.io.take_backend()
    }

    fn stream_index(&self, id: u32) -> Result<usize> {
        self.header.index_of(id).ok_or(GavfError::InvalidStreamId(id))
    }

    // ── Skipping ─────────────────────────────────────────────────────────────

    /// Drop every packet of `id` without decoding it.
    pub fn set_skip(&mut self, id: u32, skip: bool) -> Result<()> {
        let idx = self.stream_index(id)?;
        let s = &mut self.streams[idx];
        if s.skip && !skip {
            s.awaiting_sync = true;
        }
        s.skip = skip;
        Ok(())
    }

    /// Skip `id` and hand each of its packet bodies to `callback`.
    pub fn set_skip_callback<F>(&mut self, id: u32, callback: F) -> Result<()>
    where
        F: FnMut(u32, u32, &mut GavfIo<B>) -> Result<()> + 'static,
    {
        let idx = self.stream_index(id)?;
        self.streams[idx].skip = true;
        self.skip_callbacks[idx] = Some(Box::new(callback));
        Ok(())
    }

    // ── Packet loop ──────────────────────────────────────────────────────────

    /// Read the next record of the packet region without touching stream
    /// state.
    pub(crate) fn read_record(&mut self) -> Result<Record> {
        match self.read_record_inner() {
            Err(GavfError::TruncatedStream) => Ok(Record::End(EndReason::Truncated)),
            other => other,
        }
    }

    fn read_record_inner(&mut self) -> Result<Record> {
        let pos = self.io.position();
        if self.packets_end.is_some_and(|end| pos >= end) {
            return Ok(Record::End(EndReason::Clean));
        }
        let mut byte = [0u8; 1];
        if self.io.read(&mut byte)? == 0 {
            return Ok(Record::End(EndReason::Clean));
        }
        if byte[0] == PACKET_TAG {
            let stream_id = self.io.read_uint32v()?;
            let len = self.io.read_uint32v()?;
            return Ok(Record::Packet(PacketHeader { stream_id, len, pos }));
        }

        // streamed files pad between the packet region and the footer
        let mut tag: Tag = [0u8; 8];
        let tag_pos = if byte[0] == 0 && pos % ALIGNMENT != 0 {
            self.io.align_read()?;
            let p = self.io.position();
            self.io.read_exact(&mut tag)?;
            p
        } else {
            tag[0] = byte[0];
            self.io.read_exact(&mut tag[1..])?;
            pos
        };

        if tag == TAG_SYNC_HEADER {
            let pts = (0..self.streams.len())
                .map(|_| self.io.read_opt_pts())
                .collect::<std::io::Result<Vec<_>>>()?;
            return Ok(Record::Sync { pos: tag_pos, pts });
        }
        if is_trailing_tag(&tag) {
            return Ok(Record::Trailer { tag, pos: tag_pos });
        }
        Ok(Record::End(EndReason::UnknownTag(tag)))
    }

    fn apply_sync(&mut self, pos: u64, pts: Vec<Option<i64>>) {
        for (s, v) in self.streams.iter_mut().zip(&pts) {
            s.apply_sync(*v);
        }
        trace!(pos, pts = ?pts, "sync header");
        self.sync_pts = pts;
        if self.first_sync_pos.is_none() {
            self.first_sync_pos = Some(pos);
        }
        if !self.offset_applied {
            self.offset_applied = true;
            self.calc_pts_offset();
        }
    }

    /// A trailing chunk ends the packet region.  On streamed input the
    /// footer is only reachable here, so read it in passing.
    fn read_trailing(&mut self, tag: Tag, pos: u64) {
        if tag == TAG_FOOTER && !self.footer_loaded {
            let loaded = self.io.read_i64::<BigEndian>().map_err(GavfError::from).and_then(|len| {
                let body = Chunk { tag, len, start: pos }.read_body(&mut self.io)?;
                self.header.read_footer(&mut Cursor::new(body))
            });
            match loaded {
                Ok(()) => self.footer_loaded = true,
                Err(e) => warn!(error = %e, "unreadable footer"),
            }
        }
        self.finish(EndReason::Clean);
    }

    fn finish(&mut self, reason: EndReason) {
        match reason {
            EndReason::Clean => debug!(pos = self.io.position(), "end of packets"),
            EndReason::Truncated => warn!(pos = self.io.position(), "input truncated inside a record"),
            EndReason::UnknownTag(tag) => {
                warn!(pos = self.io.position(), tag = %tag_str(&tag), "unknown tag ends the packet region")
            }
        }
        self.state = DemuxState::Eof;
        self.end_reason = Some(reason);
        self.pending = None;
    }

    /// Advance to the next packet of a stream that is not skipped.
    /// `Ok(None)` at end of stream.
    pub fn next_packet_header(&mut self) -> Result<Option<PacketHeader>> {
        if let Some(hdr) = self.pending.take() {
            // body never read: drop it, and the stream loses PTS inference
            self.io.skip(hdr.len as u64).or_else(|e| match e {
                GavfError::TruncatedStream => Ok(()),
                e => Err(e),
            })?;
            if let Ok(idx) = self.stream_index(hdr.stream_id) {
                self.streams[idx].awaiting_sync = true;
            }
        }
        loop {
            match self.state {
                DemuxState::Eof => return Ok(None),
                DemuxState::SeekingProgram => return Err(GavfError::State("program not read")),
                DemuxState::Streaming => {}
            }
            match self.read_record()? {
                Record::Packet(hdr) => {
                    let idx = self.stream_index(hdr.stream_id)?;
                    if self.streams[idx].skip || self.streams[idx].awaiting_sync {
                        self.skip_body(idx, hdr)?;
                        continue;
                    }
                    self.pending = Some(hdr);
                    return Ok(Some(hdr));
                }
                Record::Sync { pos, pts } => self.apply_sync(pos, pts),
                Record::Trailer { tag, pos } => self.read_trailing(tag, pos),
                Record::End(reason) => self.finish(reason),
            }
        }
    }

    fn skip_body(&mut self, idx: usize, hdr: PacketHeader) -> Result<()> {
        let start = self.io.position();
        let result = match self.skip_callbacks[idx].as_mut() {
            Some(cb) if self.streams[idx].skip => cb(hdr.stream_id, hdr.len, &mut self.io),
            _ => self.io.skip(hdr.len as u64),
        };
        match result {
            Err(GavfError::TruncatedStream) => {
                self.finish(EndReason::Truncated);
                return Ok(());
            }
            other => other?,
        }
        let consumed = self.io.position() - start;
        if consumed != hdr.len as u64 {
            return Err(GavfError::format(format!(
                "skip callback for stream {} consumed {consumed} of {} bytes",
                hdr.stream_id, hdr.len
            )));
        }
        // packets of a skipped stream are not decoded, so its next PTS is unknown
        self.streams[idx].next_pts = None;
        Ok(())
    }

    /// Read the body of the packet announced by [`next_packet_header`].
    ///
    /// [`next_packet_header`]: GavfReader::next_packet_header
    pub fn read_packet_body(&mut self, hdr: &PacketHeader) -> Result<Packet> {
        if self.pending != Some(*hdr) {
            return Err(GavfError::State("no pending packet with this header"));
        }
        self.pending = None;
        let idx = self.stream_index(hdr.stream_id)?;

        let mut body = Vec::new();
        Read::by_ref(&mut self.io).take(hdr.len as u64).read_to_end(&mut body)?;
        if body.len() != hdr.len as usize {
            self.finish(EndReason::Truncated);
            return Err(GavfError::TruncatedStream);
        }

        let s = &mut self.streams[idx];
        let mut pkt = decode_body(hdr.stream_id, body, &s.wire_context())?;
        s.next_pts = Some(pkt.end_pts());
        s.packets_since_sync += 1;
        pkt.pts += s.pts_offset;
        if self.options.dump_packets {
            trace!(stream = pkt.stream_id, pts = pkt.pts, duration = pkt.duration, len = pkt.data.len(), "packet");
        }
        Ok(pkt)
    }

    /// Next packet of any stream that is not skipped.  `Ok(None)` at end of
    /// stream, including a truncated last packet.
    pub fn read_packet(&mut self) -> Result<Option<Packet>> {
        let Some(hdr) = self.next_packet_header()? else { return Ok(None) };
        match self.read_packet_body(&hdr) {
            Ok(pkt) => Ok(Some(pkt)),
            Err(GavfError::TruncatedStream) => Ok(None),
            Err(e) => Err(e),
        }
    }

    // ── Timing ───────────────────────────────────────────────────────────────

    /// Shift every stream so that the earliest one starts at zero.
    fn calc_pts_offset(&mut self) {
        if !self.options.pts_normalization {
            return;
        }
        let mut earliest: Option<(usize, i64, i64)> = None;
        for (i, s) in self.streams.iter().enumerate() {
            if s.discontinuous {
                continue;
            }
            let Some(pts) = self.sync_pts.get(i).copied().flatten() else { continue };
            let start = pts + s.pre_skip as i64;
            let unscaled = time::unscale(s.timescale, start);
            if earliest.map_or(true, |(_, u, _)| unscaled < u) {
                earliest = Some((i, unscaled, start));
            }
        }
        let Some((first, unscaled, start)) = earliest else { return };
        for (i, s) in self.streams.iter_mut().enumerate() {
            s.pts_offset = if i == first { -start } else { -time::rescale(TIME_SCALE, s.timescale, unscaled) };
        }
        self.time_offset = unscaled;
        debug!(offset_us = unscaled, "pts normalization");
    }

    // ── Random access ────────────────────────────────────────────────────────

    /// Position before the latest sync point at or before `time` (in
    /// `scale` ticks, on the presented time axis) for every continuous
    /// stream.  Returns the sync PTS vector there, offsets applied.
    pub fn seek(&mut self, time: i64, scale: u32) -> Result<Vec<Option<i64>>> {
        if !self.io.can_seek() {
            return Err(GavfError::SeekUnsupported);
        }
        let index = self.sync_index.as_ref().ok_or(GavfError::SeekUnsupported)?;
        let timescales: Vec<u32> = self.streams.iter().map(|s| s.timescale).collect();
        let discontinuous: Vec<bool> = self.streams.iter().map(|s| s.discontinuous).collect();
        let target = time::rescale(scale, TIME_SCALE, time) + self.time_offset;
        let i = index
            .find(target, TIME_SCALE, &timescales, &discontinuous)
            .ok_or(GavfError::SeekUnsupported)?;
        let entry = index.entries[i].clone();

        self.io.seek_to(entry.pos)?;
        self.resume_streaming();
        debug!(time, scale, entry = i, pos = entry.pos, "seek");
        Ok(entry
            .pts
            .iter()
            .zip(&self.streams)
            .map(|(p, s)| p.map(|p| p + s.pts_offset))
            .collect())
    }

    /// Go back to the first sync header.
    pub fn reset(&mut self) -> Result<()> {
        let pos = self.first_sync_pos.ok_or(GavfError::State("no sync header read"))?;
        if !self.io.can_seek() {
            return Err(GavfError::SeekUnsupported);
        }
        self.io.seek_to(pos)?;
        self.resume_streaming();
        Ok(())
    }

    pub(crate) fn resume_streaming(&mut self) {
        self.state = DemuxState::Streaming;
        self.end_reason = None;
        self.pending = None;
        for s in &mut self.streams {
            s.awaiting_sync = false;
        }
    }
}
