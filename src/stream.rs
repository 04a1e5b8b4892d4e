//! Per-stream state that lives alongside the header while muxing or
//! demuxing.  Nothing here is persisted.

use crate::codec::CodecId;
use crate::format::{FramerateMode, InterlaceMode};
use crate::header::{StreamFormat, StreamHeader};
use crate::packet::{PacketBuffer, PacketFields, WireContext};

#[derive(Debug)]
pub struct StreamRuntime {
    pub id:               u32,
    pub timescale:        u32,
    /// Duration assumed for packets that carry none.  0 means every packet
    /// carries its own.
    pub default_duration: i64,
    pub fields:           PacketFields,
    /// Excluded from interleave ordering (stills and overlays).
    pub discontinuous:    bool,
    pub has_b_frames:     bool,
    pub has_p_frames:     bool,
    pub is_video:         bool,
    pub pre_skip:         u32,

    /// Last value written to or read from a sync header.
    pub last_sync_pts:      Option<i64>,
    /// Value the next sync header will carry for this stream.
    pub next_sync_pts:      Option<i64>,
    /// PTS inferred for the next packet without an explicit one.
    pub next_pts:           Option<i64>,
    pub pts_offset:         i64,
    pub packets_since_sync: u64,
    pub synced:             bool,

    pub skip:     bool,
    /// Demux: packets were dropped without decoding, so PTS inference is
    /// unreliable until the next sync header.
    pub awaiting_sync: bool,
    pub finished: bool,
    pub buffer:   PacketBuffer,
}

impl StreamRuntime {
    pub fn new(header: &StreamHeader, num_streams: usize) -> Self {
        let ci = &header.ci;
        let (default_duration, fields, discontinuous, is_video) = match &header.format {
            StreamFormat::Audio(fmt) => {
                let fixed = ci.id.constant_frame_size() || ci.id == CodecId::None;
                let dur = if fixed { fmt.samples_per_frame as i64 } else { 0 };
                (dur, PacketFields::default(), false, false)
            }
            StreamFormat::Video(fmt) => {
                let dur = if fmt.framerate_mode == FramerateMode::Constant && !ci.has_b_frames() {
                    fmt.frame_duration as i64
                } else {
                    0
                };
                let fields = PacketFields {
                    interlace: ci.is_uncompressed() && fmt.interlace_mode == InterlaceMode::Mixed,
                    field2: ci.has_field_pictures(),
                    ..Default::default()
                };
                let still = fmt.framerate_mode == FramerateMode::Still;
                (dur, fields, still && num_streams > 1, true)
            }
            StreamFormat::Overlay(_) => {
                let fields = PacketFields { pts: true, rect: true, ..Default::default() };
                (0, fields, num_streams > 1, false)
            }
            StreamFormat::Text { .. } | StreamFormat::Msg => (0, PacketFields::default(), false, false),
        };

        let mut fields = fields;
        fields.pts |= ci.has_b_frames();
        fields.duration |= default_duration == 0;

        Self {
            id: header.id,
            timescale: header.timescale(),
            default_duration,
            fields,
            discontinuous,
            has_b_frames: ci.has_b_frames(),
            has_p_frames: ci.has_p_frames(),
            is_video,
            pre_skip: ci.pre_skip,
            last_sync_pts: None,
            next_sync_pts: None,
            next_pts: None,
            pts_offset: 0,
            packets_since_sync: 0,
            synced: false,
            skip: false,
            awaiting_sync: false,
            finished: false,
            buffer: PacketBuffer::default(),
        }
    }

    pub(crate) fn wire_context(&self) -> WireContext {
        WireContext {
            fields: self.fields,
            next_pts: self.next_pts,
            default_duration: self.default_duration,
        }
    }

    /// Record the value a sync header carries for this stream.
    pub(crate) fn apply_sync(&mut self, pts: Option<i64>) {
        if pts.is_some() {
            self.last_sync_pts = pts;
            self.synced = true;
        }
        self.next_pts = pts;
        self.packets_since_sync = 0;
        self.awaiting_sync = false;
    }

    /// Continuous streams that have not ended gate interleaving.
    pub(crate) fn blocks_interleave(&self) -> bool {
        !self.discontinuous && !self.finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{CompressionInfo, FLAG_HAS_B_FRAMES, FLAG_HAS_P_FRAMES};
    use crate::format::{AudioFormat, VideoFormat};
    use crate::header::ProgramHeader;
    use crate::value::Dictionary;

    #[test]
    fn audio_defaults_follow_frame_size() {
        let mut h = ProgramHeader::new();
        let mut fmt = AudioFormat::new(48000, 2);
        fmt.samples_per_frame = 1024;
        h.add_audio_stream(CompressionInfo::new(CodecId::Aac), fmt.clone(), Dictionary::new());
        h.add_audio_stream(CompressionInfo::new(CodecId::Vorbis), fmt, Dictionary::new());

        let aac = StreamRuntime::new(&h.streams[0], 2);
        assert_eq!(aac.timescale, 48000);
        assert_eq!(aac.default_duration, 1024);
        assert!(!aac.fields.duration);

        let vorbis = StreamRuntime::new(&h.streams[1], 2);
        assert_eq!(vorbis.default_duration, 0);
        assert!(vorbis.fields.duration);
    }

    #[test]
    fn b_frames_force_explicit_pts() {
        let mut h = ProgramHeader::new();
        let ci = CompressionInfo::new(CodecId::H264).with_flags(FLAG_HAS_P_FRAMES | FLAG_HAS_B_FRAMES);
        h.add_video_stream(ci, VideoFormat::new(640, 480, 25, 1), Dictionary::new());
        let rt = StreamRuntime::new(&h.streams[0], 1);
        assert!(rt.fields.pts);
        assert!(rt.fields.duration);
        assert!(rt.has_b_frames && rt.has_p_frames && rt.is_video);
    }

    #[test]
    fn stills_and_overlays_are_discontinuous_with_company() {
        let mut h = ProgramHeader::new();
        let mut still = VideoFormat::new(640, 480, 1000, 0);
        still.framerate_mode = FramerateMode::Still;
        h.add_video_stream(CompressionInfo::new(CodecId::Png), still, Dictionary::new());
        h.add_overlay_stream(CompressionInfo::new(CodecId::Png), VideoFormat::new(64, 64, 1000, 0), Dictionary::new());

        assert!(!StreamRuntime::new(&h.streams[0], 1).discontinuous);
        assert!(StreamRuntime::new(&h.streams[0], 2).discontinuous);
        let overlay = StreamRuntime::new(&h.streams[1], 2);
        assert!(overlay.discontinuous && overlay.fields.rect && overlay.fields.pts);
    }
}
