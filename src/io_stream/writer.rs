//! Muxer: buffers packets per stream, decides the write order and where
//! sync headers go, and serializes everything through the chunk layer.

use byteorder::{BigEndian, WriteBytesExt};
use std::cmp::Ordering;
use std::io::Write;
use tracing::{debug, error, trace};

use crate::chunk::{
    Chunk, PACKET_TAG, TAG_FOOTER, TAG_PACKETS, TAG_PACKET_INDEX, TAG_PROGRAM_HEADER,
    TAG_SYNC_HEADER, TAG_SYNC_INDEX, TAG_TAIL,
};
use crate::error::{GavfError, Result};
use crate::header::ProgramHeader;
use crate::index::{PacketIndex, PacketIndexEntry, SyncIndex};
use crate::io::{GavfIo, IoBackend, WriteVarExt};
use crate::options::Options;
use crate::packet::{encode_body, Packet};
use crate::stream::StreamRuntime;
use crate::time;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeMode {
    /// Waiting for the first packet of every continuous stream.
    Starting,
    /// Packets are written as they arrive.
    Synchronous,
    /// Packets are buffered and written in PTS order.
    Interleave,
}

pub struct GavfWriter<B: IoBackend> {
    io:             GavfIo<B>,
    header:         ProgramHeader,
    streams:        Vec<StreamRuntime>,
    sync_pts:       Vec<Option<i64>>,
    mode:           EncodeMode,
    options:        Options,
    sync_index:     Option<SyncIndex>,
    packet_index:   Option<PacketIndex>,
    first_sync_pos: Option<u64>,
    /// Unscaled PTS of the packet that triggered the last sync header.
    last_sync_time: Option<i64>,
    /// Any stream with P-frames switches sync placement to keyframes.
    has_p_frames:   bool,
    packets_chunk:  Option<Chunk>,
    header_written: bool,
    closed:         bool,
    scratch:        Vec<u8>,
}

impl<B: IoBackend> GavfWriter<B> {
    pub fn new(backend: B, header: ProgramHeader, options: Options) -> Result<Self> {
        options.validate()?;
        if header.streams.is_empty() {
            return Err(GavfError::State("program header declares no streams"));
        }
        let n = header.streams.len();
        let streams: Vec<StreamRuntime> = header.streams.iter().map(|s| StreamRuntime::new(s, n)).collect();
        let has_p_frames = streams.iter().any(|s| s.has_p_frames);
        Ok(Self {
            io: GavfIo::new(backend),
            sync_index: options.sync_index.then(|| SyncIndex::new(n)),
            packet_index: options.packet_index.then(PacketIndex::default),
            header,
            streams,
            sync_pts: vec![None; n],
            mode: EncodeMode::Starting,
            options,
            first_sync_pos: None,
            last_sync_time: None,
            has_p_frames,
            packets_chunk: None,
            header_written: false,
            closed: false,
            scratch: Vec::new(),
        })
    }

    pub fn header(&self) -> &ProgramHeader { &self.header }

    pub fn mode(&self) -> EncodeMode { self.mode }

    pub fn options(&self) -> &Options { &self.options }

    pub fn sync_index(&self) -> Option<&SyncIndex> { self.sync_index.as_ref() }

    pub fn packet_index(&self) -> Option<&PacketIndex> { self.packet_index.as_ref() }

    /// PTS vector of the last sync header written.
    pub fn sync_pts(&self) -> &[Option<i64>] { &self.sync_pts }

    pub fn position(&self) -> u64 { self.io.position() }

    /// Write the program header and open the packet region.  Called
    /// implicitly by the first packet.
    pub fn write_header(&mut self) -> Result<()> {
        if self.header_written {
            return Ok(());
        }
        if self.options.dump_headers {
            debug!("program header:\n{}", self.header.describe());
        }
        let header = &self.header;
        Chunk::write(&mut self.io, TAG_PROGRAM_HEADER, |w| header.write(w))?;
        self.packets_chunk = Some(Chunk::start(&mut self.io, TAG_PACKETS)?);
        self.header_written = true;
        Ok(())
    }

    fn stream_index(&self, id: u32) -> Result<usize> {
        self.header.index_of(id).ok_or(GavfError::InvalidStreamId(id))
    }

    /// Queue a packet whose PTS and duration are in the stream timescale.
    pub fn put_packet(&mut self, id: u32, mut pkt: Packet) -> Result<()> {
        if self.closed {
            return Err(GavfError::State("writer is closed"));
        }
        let idx = self.stream_index(id)?;
        if self.streams[idx].finished {
            return Err(GavfError::State("packet for a finished stream"));
        }
        self.write_header()?;
        pkt.stream_id = id;

        match self.mode {
            EncodeMode::Synchronous => self.write_packet(idx, pkt),
            EncodeMode::Interleave => {
                self.streams[idx].buffer.push(pkt);
                self.flush_packets(false)
            }
            EncodeMode::Starting => {
                self.streams[idx].buffer.push(pkt);
                self.try_begin()
            }
        }
    }

    /// Queue a packet whose PTS and duration are in `scale` ticks per second.
    pub fn put_packet_scaled(&mut self, id: u32, mut pkt: Packet, scale: u32) -> Result<()> {
        let idx = self.stream_index(id)?;
        let ts = self.streams[idx].timescale;
        pkt.pts = time::rescale(scale, ts, pkt.pts);
        pkt.duration = time::rescale(scale, ts, pkt.duration);
        self.put_packet(id, pkt)
    }

    /// No more packets will come for `id`; it stops holding back the others.
    pub fn finish_stream(&mut self, id: u32) -> Result<()> {
        let idx = self.stream_index(id)?;
        self.streams[idx].finished = true;
        match self.mode {
            EncodeMode::Starting => self.try_begin(),
            EncodeMode::Interleave => self.flush_packets(false),
            EncodeMode::Synchronous => Ok(()),
        }
    }

    fn try_begin(&mut self) -> Result<()> {
        let ready = if self.streams.len() < 2 || !self.options.interleave {
            true
        } else {
            self.streams.iter().all(|s| !s.blocks_interleave() || !s.buffer.is_empty())
        };
        if ready {
            self.begin()?;
        }
        Ok(())
    }

    fn begin(&mut self) -> Result<()> {
        for s in self.streams.iter_mut().filter(|s| !s.discontinuous) {
            if let Some(head) = s.buffer.peek() {
                s.next_sync_pts = Some(head.pts);
            }
        }
        self.mode = if self.streams.len() >= 2 && self.options.interleave {
            EncodeMode::Interleave
        } else {
            EncodeMode::Synchronous
        };
        debug!(mode = ?self.mode, "muxer started");
        match self.mode {
            EncodeMode::Interleave => self.flush_packets(false),
            _ => self.flush_packets(true),
        }
    }

    /// Write buffered packets in presentation order.
    ///
    /// Without `force`, stops as soon as a continuous stream that has not
    /// finished runs dry, since its next PTS is unknown.
    pub fn flush_packets(&mut self, force: bool) -> Result<()> {
        loop {
            for i in 0..self.streams.len() {
                if !self.streams[i].discontinuous {
                    continue;
                }
                while let Some(pkt) = self.streams[i].buffer.pop() {
                    self.write_packet(i, pkt)?;
                }
            }

            let mut best: Option<usize> = None;
            for (i, s) in self.streams.iter().enumerate() {
                if s.discontinuous {
                    continue;
                }
                let Some(head) = s.buffer.peek() else {
                    if !force && !s.finished {
                        return Ok(());
                    }
                    continue;
                };
                let earlier = match best {
                    None => true,
                    Some(b) => {
                        let other = &self.streams[b];
                        let other_head = other.buffer.peek().map_or(0, |p| p.pts);
                        time::compare(head.pts, s.timescale, other_head, other.timescale) == Ordering::Less
                    }
                };
                if earlier {
                    best = Some(i);
                }
            }

            let Some(i) = best else { return Ok(()) };
            let Some(pkt) = self.streams[i].buffer.pop() else { return Ok(()) };
            self.write_packet(i, pkt)?;

            // B-frames following a reference frame belong to its mini-GOP
            if self.streams[i].is_video {
                while self.streams[i].buffer.peek().is_some_and(|p| p.flags.is_b_frame()) {
                    if let Some(b) = self.streams[i].buffer.pop() {
                        self.write_packet(i, b)?;
                    }
                }
            }
        }
    }

    fn sync_due(&self, idx: usize, pkt: &Packet) -> bool {
        if self.first_sync_pos.is_none() {
            return true;
        }
        let s = &self.streams[idx];
        if !self.has_p_frames {
            let now = time::unscale(s.timescale, pkt.pts);
            return self.last_sync_time.map_or(true, |t| now - t >= self.options.sync_distance);
        }
        s.is_video
            && s.has_p_frames
            && pkt.is_keyframe()
            && self.streams.iter().map(|s| s.packets_since_sync).sum::<u64>() > 0
    }

    fn write_sync(&mut self, trigger: usize, pkt: &Packet) -> Result<()> {
        let pts: Vec<Option<i64>> = self
            .streams
            .iter()
            .enumerate()
            .map(|(j, s)| {
                if j == trigger {
                    Some(pkt.pts)
                } else if s.has_b_frames {
                    s.buffer.peek().filter(|h| h.is_keyframe()).map(|h| h.pts)
                } else if s.discontinuous && !s.synced {
                    Some(0)
                } else {
                    s.next_sync_pts
                }
            })
            .collect();

        let pos = self.io.position();
        self.io.write_all(&TAG_SYNC_HEADER)?;
        for v in &pts {
            self.io.write_opt_pts(*v)?;
        }
        if let Some(index) = self.sync_index.as_mut() {
            index.push(pos, pts.clone())?;
        }
        if self.first_sync_pos.is_none() {
            self.first_sync_pos = Some(pos);
        }
        for (s, v) in self.streams.iter_mut().zip(&pts) {
            s.apply_sync(*v);
        }
        self.last_sync_time = Some(time::unscale(self.streams[trigger].timescale, pkt.pts));
        debug!(pos, pts = ?pts, "sync header");
        self.sync_pts = pts;
        Ok(())
    }

    fn write_packet(&mut self, idx: usize, pkt: Packet) -> Result<()> {
        if self.sync_due(idx, &pkt) {
            self.write_sync(idx, &pkt)?;
        }

        let pos = self.io.position();
        if let Some(index) = self.packet_index.as_mut() {
            index.push(PacketIndexEntry { stream_id: pkt.stream_id, flags: pkt.flags.0, pos, pts: pkt.pts });
        }

        let mut body = std::mem::take(&mut self.scratch);
        body.clear();
        encode_body(&pkt, &self.streams[idx].wire_context(), &mut body)?;
        self.io.write_u8(PACKET_TAG)?;
        self.io.write_uint32v(pkt.stream_id)?;
        self.io.write_uint32v(body.len() as u32)?;
        self.io.write_all(&body)?;
        self.scratch = body;

        if self.options.dump_packets {
            trace!(stream = pkt.stream_id, pts = pkt.pts, duration = pkt.duration, len = pkt.data.len(), pos, "packet");
        }

        let s = &mut self.streams[idx];
        let end = pkt.end_pts();
        s.next_pts = Some(end);
        s.next_sync_pts = Some(s.next_sync_pts.map_or(end, |v| v.max(end)));
        s.packets_since_sync += 1;
        self.header.streams[idx].stats.update(&pkt);
        Ok(())
    }

    /// Flush everything and write the trailing chunks.  Safe to call more
    /// than once; only the first call does anything.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        self.write_header()?;
        if self.mode == EncodeMode::Starting {
            self.begin()?;
        }
        self.flush_packets(true)?;
        if let Some(mut chunk) = self.packets_chunk.take() {
            chunk.finish(&mut self.io)?;
        }

        for s in &mut self.header.streams {
            s.apply_stats();
        }
        let header = &self.header;
        let footer = Chunk::write(&mut self.io, TAG_FOOTER, |w| header.write_footer(w))?;

        if let Some(index) = self.sync_index.as_ref() {
            if self.options.dump_indices {
                debug!(entries = index.len(), "sync index: {:?}", index.entries);
            }
            Chunk::write(&mut self.io, TAG_SYNC_INDEX, |w| index.write(w))?;
        }
        if let Some(index) = self.packet_index.as_ref() {
            if self.options.dump_indices {
                debug!(entries = index.len(), "packet index: {:?}", index.entries);
            }
            Chunk::write(&mut self.io, TAG_PACKET_INDEX, |w| index.write(w))?;
        }
        Chunk::write_buffered(&mut self.io, TAG_TAIL, |b| Ok(b.write_u64::<BigEndian>(footer.start)?))?;
        self.io.flush()?;
        debug!(bytes = self.io.position(), "muxer closed");
        Ok(())
    }

    /// Close and hand back the backend.
    pub fn finish(mut self) -> Result<B> {
        self.close()?;
        self.io.take_backend().ok_or(GavfError::State("backend already released"))
    }
}

impl<B: IoBackend> Drop for GavfWriter<B> {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.close() {
                error!(error = %e, "failed to close GAVF writer");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{CodecId, CompressionInfo, FLAG_HAS_B_FRAMES, FLAG_HAS_P_FRAMES};
    use crate::format::{AudioFormat, FramerateMode, VideoFormat};
    use crate::io::Seekable;
    use crate::packet::PacketFlags;
    use crate::value::Dictionary;

    fn two_audio(opts: Options) -> GavfWriter<Seekable<std::io::Cursor<Vec<u8>>>> {
        let mut h = ProgramHeader::new();
        h.add_audio_stream(CompressionInfo::new(CodecId::Pcm), AudioFormat::new(1000, 1), Dictionary::new());
        h.add_audio_stream(CompressionInfo::new(CodecId::Pcm), AudioFormat::new(1000, 1), Dictionary::new());
        GavfWriter::new(Seekable::memory(), h, opts).unwrap()
    }

    fn order(w: &GavfWriter<Seekable<std::io::Cursor<Vec<u8>>>>) -> Vec<(u32, i64)> {
        w.packet_index().unwrap().entries.iter().map(|e| (e.stream_id, e.pts)).collect()
    }

    #[test]
    fn starting_waits_for_every_stream() {
        let mut w = two_audio(Options { packet_index: true, ..Default::default() });
        w.put_packet(1, Packet::new(0, 10, PacketFlags::keyframe(), vec![0])).unwrap();
        w.put_packet(1, Packet::new(10, 10, PacketFlags::keyframe(), vec![0])).unwrap();
        assert_eq!(w.mode(), EncodeMode::Starting);
        assert!(order(&w).is_empty());
        w.put_packet(2, Packet::new(5, 10, PacketFlags::keyframe(), vec![0])).unwrap();
        assert_eq!(w.mode(), EncodeMode::Interleave);
        assert_eq!(order(&w), vec![(1, 0), (2, 5)]);
    }

    #[test]
    fn finished_stream_stops_blocking() {
        let mut w = two_audio(Options { packet_index: true, ..Default::default() });
        w.put_packet(1, Packet::new(0, 10, PacketFlags::keyframe(), vec![0])).unwrap();
        w.put_packet(2, Packet::new(0, 10, PacketFlags::keyframe(), vec![0])).unwrap();
        w.finish_stream(2).unwrap();
        w.put_packet(1, Packet::new(10, 10, PacketFlags::keyframe(), vec![0])).unwrap();
        assert_eq!(order(&w), vec![(1, 0), (2, 0), (1, 10)]);
        assert!(matches!(
            w.put_packet(2, Packet::new(20, 10, PacketFlags::keyframe(), vec![0])),
            Err(GavfError::State(_))
        ));
    }

    #[test]
    fn zero_sync_distance_syncs_every_packet() {
        let mut w = two_audio(Options { sync_distance: 0, interleave: false, ..Default::default() });
        for i in 0..4 {
            w.put_packet(1 + (i % 2) as u32, Packet::new(i * 10, 10, PacketFlags::keyframe(), vec![0])).unwrap();
        }
        assert_eq!(w.mode(), EncodeMode::Synchronous);
        assert_eq!(w.sync_index().unwrap().len(), 4);
    }

    #[test]
    fn b_frame_streams_record_undefined_without_keyframe_head() {
        let mut h = ProgramHeader::new();
        h.add_audio_stream(CompressionInfo::new(CodecId::Pcm), AudioFormat::new(25, 1), Dictionary::new());
        let ci = CompressionInfo::new(CodecId::H264).with_flags(FLAG_HAS_P_FRAMES | FLAG_HAS_B_FRAMES);
        let mut fmt = VideoFormat::new(320, 240, 25, 1);
        fmt.framerate_mode = FramerateMode::Variable;
        h.add_video_stream(ci, fmt, Dictionary::new());
        let mut w = GavfWriter::new(Seekable::memory(), h, Options::default()).unwrap();

        w.put_packet(2, Packet::new(1, 1, PacketFlags::b_frame(), vec![0])).unwrap();
        w.put_packet(1, Packet::new(0, 1, PacketFlags::keyframe(), vec![0])).unwrap();
        // first sync is triggered by audio; video head is a B-frame
        assert_eq!(w.sync_index().unwrap().entries[0].pts, vec![Some(0), None]);
        w.close().unwrap();
    }

    #[test]
    fn empty_header_is_rejected() {
        assert!(GavfWriter::new(Seekable::memory(), ProgramHeader::new(), Options::default()).is_err());
        let bad = Options { sync_distance: -1, ..Default::default() };
        let mut h = ProgramHeader::new();
        h.add_msg_stream(Dictionary::new());
        assert!(matches!(GavfWriter::new(Seekable::memory(), h, bad), Err(GavfError::InvalidOptions(_))));
    }
}
