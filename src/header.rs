//! Program header — the stream table of a GAVF file.
//!
//! The header is written once, as the `GAVFPHDR` chunk, before the first
//! packet.  Per-stream statistics are only known at the end and go into
//! the `GAVFFOOT` chunk; a reader that finds the footer folds them back in
//! and recomputes the implicit metadata derived from them.
//!
//! The same declaration can be exported as a generic JSON "track"
//! document ([`ProgramHeader::to_track`]) for use outside the container.

use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

use crate::codec::CompressionInfo;
use crate::error::{GavfError, Result};
use crate::format::{AudioFormat, FramerateMode, VideoFormat};
use crate::io::{ReadVarExt, WriteVarExt};
use crate::packet::Packet;
use crate::time::{self, TIME_SCALE};
use crate::value::{Dictionary, Value};

/// Metadata derived from the stats.  Stripped from caller input and
/// recomputed whenever stats become available.
pub const META_AVG_BITRATE:     &str = "avg_bitrate";
pub const META_MAX_PACKET_SIZE: &str = "max_packet_size";
pub const META_DURATION:        &str = "duration";

pub const IMPLICIT_METADATA: &[&str] = &[META_AVG_BITRATE, META_MAX_PACKET_SIZE, META_DURATION];

const STREAM_AUDIO:   u32 = 1;
const STREAM_VIDEO:   u32 = 2;
const STREAM_TEXT:    u32 = 3;
const STREAM_OVERLAY: u32 = 4;
const STREAM_MSG:     u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamType {
    Audio,
    Video,
    Text,
    Overlay,
    Msg,
}

impl StreamType {
    pub fn name(self) -> &'static str {
        match self {
            StreamType::Audio   => "audio",
            StreamType::Video   => "video",
            StreamType::Text    => "text",
            StreamType::Overlay => "overlay",
            StreamType::Msg     => "msg",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamFormat {
    Audio(AudioFormat),
    Video(VideoFormat),
    Text { timescale: u32 },
    Overlay(VideoFormat),
    Msg,
}

// ── Stats ─────────────────────────────────────────────────────────────────────

/// Accumulated per-stream statistics.  `None` until a packet is seen.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Stats {
    pub size_min:      Option<u32>,
    pub size_max:      Option<u32>,
    pub duration_min:  Option<i64>,
    pub duration_max:  Option<i64>,
    pub pts_start:     Option<i64>,
    pub pts_end:       Option<i64>,
    pub total_bytes:   u64,
    pub total_packets: u64,
}

impl Stats {
    pub fn update(&mut self, pkt: &Packet) {
        let size = pkt.data.len() as u32;
        self.size_min     = Some(self.size_min.map_or(size, |v| v.min(size)));
        self.size_max     = Some(self.size_max.map_or(size, |v| v.max(size)));
        self.duration_min = Some(self.duration_min.map_or(pkt.duration, |v| v.min(pkt.duration)));
        self.duration_max = Some(self.duration_max.map_or(pkt.duration, |v| v.max(pkt.duration)));
        self.pts_start    = Some(self.pts_start.map_or(pkt.pts, |v| v.min(pkt.pts)));
        self.pts_end      = Some(self.pts_end.map_or(pkt.end_pts(), |v| v.max(pkt.end_pts())));
        self.total_bytes   += pkt.data.len() as u64;
        self.total_packets += 1;
    }

    pub fn is_defined(&self) -> bool {
        self.total_packets > 0
    }

    /// Covered time in stream ticks.
    pub fn duration(&self) -> Option<i64> {
        Some(self.pts_end? - self.pts_start?)
    }

    /// Average bits per second.
    pub fn avg_bitrate(&self, timescale: u32) -> Option<f64> {
        let ticks = self.duration()?;
        if ticks <= 0 || timescale == 0 {
            return None;
        }
        Some(self.total_bytes as f64 * 8.0 * timescale as f64 / ticks as f64)
    }

    pub fn write<W: Write + ?Sized>(&self, w: &mut W) -> Result<()> {
        w.write_opt_pts(self.size_min.map(i64::from))?;
        w.write_opt_pts(self.size_max.map(i64::from))?;
        w.write_opt_pts(self.duration_min)?;
        w.write_opt_pts(self.duration_max)?;
        w.write_opt_pts(self.pts_start)?;
        w.write_opt_pts(self.pts_end)?;
        w.write_uint64v(self.total_bytes)?;
        w.write_uint64v(self.total_packets)?;
        Ok(())
    }

    pub fn read<R: Read + ?Sized>(r: &mut R) -> Result<Self> {
        let size = |v: Option<i64>| -> Result<Option<u32>> {
            v.map(|v| u32::try_from(v).map_err(|_| GavfError::format("packet size out of range")))
                .transpose()
        };
        Ok(Self {
            size_min:      size(r.read_opt_pts()?)?,
            size_max:      size(r.read_opt_pts()?)?,
            duration_min:  r.read_opt_pts()?,
            duration_max:  r.read_opt_pts()?,
            pts_start:     r.read_opt_pts()?,
            pts_end:       r.read_opt_pts()?,
            total_bytes:   r.read_uint64v()?,
            total_packets: r.read_uint64v()?,
        })
    }
}

// ── StreamHeader ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamHeader {
    /// 1-based, in declaration order.
    pub id:       u32,
    #[serde(default)]
    pub ci:       CompressionInfo,
    pub format:   StreamFormat,
    #[serde(default)]
    pub metadata: Dictionary,
    #[serde(default)]
    pub stats:    Stats,
}

impl StreamHeader {
    pub fn stream_type(&self) -> StreamType {
        match self.format {
            StreamFormat::Audio(_)     => StreamType::Audio,
            StreamFormat::Video(_)     => StreamType::Video,
            StreamFormat::Text { .. }  => StreamType::Text,
            StreamFormat::Overlay(_)   => StreamType::Overlay,
            StreamFormat::Msg          => StreamType::Msg,
        }
    }

    /// Ticks per second of every PTS and duration in this stream.
    pub fn timescale(&self) -> u32 {
        match &self.format {
            StreamFormat::Audio(f)           => f.samplerate,
            StreamFormat::Video(f)
            | StreamFormat::Overlay(f)       => f.timescale,
            StreamFormat::Text { timescale } => *timescale,
            StreamFormat::Msg                => TIME_SCALE,
        }
    }

    pub fn audio_format(&self) -> Option<&AudioFormat> {
        match &self.format {
            StreamFormat::Audio(f) => Some(f),
            _ => None,
        }
    }

    pub fn video_format(&self) -> Option<&VideoFormat> {
        match &self.format {
            StreamFormat::Video(f) | StreamFormat::Overlay(f) => Some(f),
            _ => None,
        }
    }

    pub fn is_still(&self) -> bool {
        matches!(&self.format, StreamFormat::Video(f) if f.framerate_mode == FramerateMode::Still)
    }

    /// Refresh the implicit metadata from the stats.
    pub fn apply_stats(&mut self) {
        for key in IMPLICIT_METADATA {
            self.metadata.remove(key);
        }
        if !self.stats.is_defined() {
            return;
        }
        let timescale = self.timescale();
        if let Some(rate) = self.stats.avg_bitrate(timescale) {
            self.metadata.set(META_AVG_BITRATE, rate);
        }
        if let Some(max) = self.stats.size_max {
            self.metadata.set(META_MAX_PACKET_SIZE, max as i64);
            if self.ci.max_packet_size == 0 {
                self.ci.max_packet_size = max;
            }
        }
        if let Some(d) = self.stats.duration() {
            self.metadata.set(META_DURATION, d);
        }
    }

    fn write<W: Write + ?Sized>(&self, w: &mut W) -> Result<()> {
        let kind = match self.stream_type() {
            StreamType::Audio   => STREAM_AUDIO,
            StreamType::Video   => STREAM_VIDEO,
            StreamType::Text    => STREAM_TEXT,
            StreamType::Overlay => STREAM_OVERLAY,
            StreamType::Msg     => STREAM_MSG,
        };
        w.write_uint32v(kind)?;
        w.write_uint32v(self.id)?;
        match &self.format {
            StreamFormat::Audio(f) => {
                self.ci.write(w)?;
                f.write(w)?;
            }
            StreamFormat::Video(f) | StreamFormat::Overlay(f) => {
                self.ci.write(w)?;
                f.write(w)?;
            }
            StreamFormat::Text { timescale } => w.write_uint32v(*timescale)?,
            StreamFormat::Msg => {}
        }
        self.metadata.write(w)
    }

    fn read<R: Read + ?Sized>(r: &mut R) -> Result<Self> {
        let kind = r.read_uint32v()?;
        let id = r.read_uint32v()?;
        let (ci, format) = match kind {
            STREAM_AUDIO => {
                let ci = CompressionInfo::read(r)?;
                (ci, StreamFormat::Audio(AudioFormat::read(r)?))
            }
            STREAM_VIDEO => {
                let ci = CompressionInfo::read(r)?;
                (ci, StreamFormat::Video(VideoFormat::read(r)?))
            }
            STREAM_OVERLAY => {
                let ci = CompressionInfo::read(r)?;
                (ci, StreamFormat::Overlay(VideoFormat::read(r)?))
            }
            STREAM_TEXT => (CompressionInfo::default(), StreamFormat::Text { timescale: r.read_uint32v()? }),
            STREAM_MSG  => (CompressionInfo::default(), StreamFormat::Msg),
            other => return Err(GavfError::format(format!("unknown stream type {other}"))),
        };
        let metadata = Dictionary::read(r)?;
        Ok(Self { id, ci, format, metadata, stats: Stats::default() })
    }
}

// ── ProgramHeader ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProgramHeader {
    pub streams:  Vec<StreamHeader>,
    #[serde(default)]
    pub metadata: Dictionary,
}

impl ProgramHeader {
    pub fn new() -> Self { Self::default() }

    pub fn num_streams(&self) -> usize { self.streams.len() }

    fn append(&mut self, ci: CompressionInfo, format: StreamFormat, mut metadata: Dictionary) -> u32 {
        for key in IMPLICIT_METADATA {
            metadata.remove(key);
        }
        let id = self.streams.len() as u32 + 1;
        self.streams.push(StreamHeader { id, ci, format, metadata, stats: Stats::default() });
        id
    }

    pub fn add_audio_stream(&mut self, ci: CompressionInfo, format: AudioFormat, metadata: Dictionary) -> u32 {
        self.append(ci, StreamFormat::Audio(format), metadata)
    }

    pub fn add_video_stream(&mut self, ci: CompressionInfo, format: VideoFormat, metadata: Dictionary) -> u32 {
        self.append(ci, StreamFormat::Video(format), metadata)
    }

    pub fn add_text_stream(&mut self, timescale: u32, metadata: Dictionary) -> u32 {
        self.append(CompressionInfo::default(), StreamFormat::Text { timescale }, metadata)
    }

    pub fn add_overlay_stream(&mut self, ci: CompressionInfo, format: VideoFormat, metadata: Dictionary) -> u32 {
        self.append(ci, StreamFormat::Overlay(format), metadata)
    }

    pub fn add_msg_stream(&mut self, metadata: Dictionary) -> u32 {
        self.append(CompressionInfo::default(), StreamFormat::Msg, metadata)
    }

    /// Re-declare an existing stream (e.g. from another file) under a new id.
    pub fn add_stream(&mut self, stream: &StreamHeader) -> u32 {
        self.append(stream.ci.clone(), stream.format.clone(), stream.metadata.clone())
    }

    pub fn stream(&self, id: u32) -> Option<&StreamHeader> {
        self.index_of(id).map(|i| &self.streams[i])
    }

    pub fn index_of(&self, id: u32) -> Option<usize> {
        self.streams.iter().position(|s| s.id == id)
    }

    /// Earliest start and latest end over all streams, in [`TIME_SCALE`]
    /// units.  `None` if no stream has stats.
    pub fn duration(&self) -> Option<(i64, i64)> {
        let mut range: Option<(i64, i64)> = None;
        for s in &self.streams {
            let (Some(start), Some(end)) = (s.stats.pts_start, s.stats.pts_end) else { continue };
            let ts = s.timescale();
            let (start, end) = (time::unscale(ts, start), time::unscale(ts, end));
            range = Some(match range {
                None => (start, end),
                Some((a, b)) => (a.min(start), b.max(end)),
            });
        }
        range
    }

    // ── Native chunk body ────────────────────────────────────────────────────

    pub fn write<W: Write + ?Sized>(&self, w: &mut W) -> Result<()> {
        w.write_uint32v(self.streams.len() as u32)?;
        for s in &self.streams {
            s.write(w)?;
        }
        self.metadata.write(w)
    }

    pub fn read<R: Read + ?Sized>(r: &mut R) -> Result<Self> {
        let num = r.read_uint32v()?;
        let mut streams = Vec::new();
        for _ in 0..num {
            streams.push(StreamHeader::read(r)?);
        }
        let metadata = Dictionary::read(r)?;
        let header = Self { streams, metadata };
        header.check_ids()?;
        Ok(header)
    }

    /// Stream ids must run 1..=n in header order.
    fn check_ids(&self) -> Result<()> {
        for (i, s) in self.streams.iter().enumerate() {
            if s.id != i as u32 + 1 {
                return Err(GavfError::format(format!("stream {i} has id {}", s.id)));
            }
        }
        Ok(())
    }

    /// Footer body: the stats of every stream, in header order.
    pub fn write_footer<W: Write + ?Sized>(&self, w: &mut W) -> Result<()> {
        w.write_uint32v(self.streams.len() as u32)?;
        for s in &self.streams {
            s.stats.write(w)?;
        }
        Ok(())
    }

    pub fn read_footer<R: Read + ?Sized>(&mut self, r: &mut R) -> Result<()> {
        let num = r.read_uint32v()? as usize;
        if num != self.streams.len() {
            return Err(GavfError::format(format!(
                "footer describes {num} streams, header declares {}",
                self.streams.len()
            )));
        }
        for s in &mut self.streams {
            s.stats = Stats::read(r)?;
            s.apply_stats();
        }
        Ok(())
    }

    // ── Track document ───────────────────────────────────────────────────────

    pub fn to_track(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_track(track: &serde_json::Value) -> Result<Self> {
        let header: ProgramHeader = serde_json::from_value(track.clone())?;
        header.check_ids()?;
        Ok(header)
    }

    /// Human-readable description, one line per stream.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        for s in &self.streams {
            let detail = match &s.format {
                StreamFormat::Audio(f) => format!("{} Hz, {} ch", f.samplerate, f.num_channels),
                StreamFormat::Video(f) | StreamFormat::Overlay(f) => format!(
                    "{}x{}, timescale {}, {:?}",
                    f.image_width, f.image_height, f.timescale, f.framerate_mode
                ),
                StreamFormat::Text { timescale } => format!("timescale {timescale}"),
                StreamFormat::Msg => String::new(),
            };
            out.push_str(&format!(
                "stream {} [{}] {} ({}) {}\n",
                s.id,
                s.stream_type().name(),
                s.ci.id.name(),
                s.ci.id.long_name(),
                detail
            ));
            for (name, value) in s.metadata.iter() {
                out.push_str(&format!("    {name}: {}\n", display_value(value)));
            }
        }
        out
    }
}

fn display_value(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Int(i)    => i.to_string(),
        Value::Long(l)   => l.to_string(),
        Value::Float(f)  => format!("{f:.3}"),
        other            => format!("{other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{CodecId, FLAG_HAS_P_FRAMES};
    use crate::packet::PacketFlags;
    use std::io::Cursor;

    fn av_header() -> ProgramHeader {
        let mut h = ProgramHeader::new();
        let mut audio_meta = Dictionary::new();
        audio_meta.set("language", "eng");
        audio_meta.set(META_AVG_BITRATE, 1.0f64);
        let a = h.add_audio_stream(CompressionInfo::new(CodecId::Aac), AudioFormat::new(48000, 2), audio_meta);
        let mut video_meta = Dictionary::new();
        video_meta.set("title", "main");
        let v = h.add_video_stream(
            CompressionInfo::new(CodecId::H264).with_flags(FLAG_HAS_P_FRAMES),
            VideoFormat::new(1280, 720, 25, 1),
            video_meta,
        );
        assert_eq!((a, v), (1, 2));
        h.metadata.set("software", "gavf");
        h
    }

    #[test]
    fn implicit_metadata_is_stripped() {
        let h = av_header();
        assert!(h.streams[0].metadata.get(META_AVG_BITRATE).is_none());
        assert_eq!(h.streams[0].metadata.get_str("language"), Some("eng"));
    }

    #[test]
    fn native_roundtrip_preserves_streams() {
        let h = av_header();
        let mut buf = Vec::new();
        h.write(&mut buf).unwrap();
        let back = ProgramHeader::read(&mut Cursor::new(buf)).unwrap();
        assert_eq!(back, h);
        assert_eq!(back.streams[0].stream_type(), StreamType::Audio);
        assert_eq!(back.streams[1].stream_type(), StreamType::Video);
        assert_eq!(back.streams[1].timescale(), 25);
    }

    #[test]
    fn duplicate_stream_ids_are_rejected() {
        let mut h = av_header();
        h.streams[1].id = 1;
        let mut buf = Vec::new();
        h.write(&mut buf).unwrap();
        let err = ProgramHeader::read(&mut Cursor::new(buf)).unwrap_err();
        assert!(matches!(err, GavfError::Format(_)));
        assert!(ProgramHeader::from_track(&h.to_track().unwrap()).is_err());
    }

    #[test]
    fn track_document_is_equivalent() {
        let mut h = av_header();
        h.add_text_stream(1000, Dictionary::new());
        h.add_msg_stream(Dictionary::new());
        let track = h.to_track().unwrap();
        assert_eq!(track["streams"][1]["format"]["type"], "video");
        assert_eq!(ProgramHeader::from_track(&track).unwrap(), h);
    }

    #[test]
    fn footer_roundtrip_and_duration() {
        let mut h = av_header();
        for i in 0..4 {
            h.streams[0].stats.update(&Packet::new(1024 * i, 1024, PacketFlags::keyframe(), vec![0; 100]));
        }
        h.streams[1].stats.update(&Packet::new(0, 1, PacketFlags::keyframe(), vec![0; 5000]));
        h.streams[1].stats.update(&Packet::new(1, 1, PacketFlags::p_frame(), vec![0; 300]));

        let mut buf = Vec::new();
        h.write_footer(&mut buf).unwrap();
        let mut back = av_header();
        back.read_footer(&mut Cursor::new(buf)).unwrap();

        let stats = &back.streams[1].stats;
        assert_eq!(stats.size_min, Some(300));
        assert_eq!(stats.size_max, Some(5000));
        assert_eq!(stats.pts_end, Some(2));
        assert_eq!(back.streams[1].metadata.get(META_MAX_PACKET_SIZE), Some(&Value::Long(5000)));
        assert_eq!(back.streams[1].ci.max_packet_size, 5000);

        // audio ends at 4096/48000 s, video at 2/25 s
        assert_eq!(back.duration(), Some((0, 85_333)));
        assert_eq!(av_header().duration(), None);
    }
}
