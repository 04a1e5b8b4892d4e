//! Codec identities and compression capabilities.
//!
//! # Identity rules
//! Every codec has a frozen numeric id that is written into the program
//! header.  Ids are never reused.  An id this build does not know decodes
//! to [`CodecId::Unknown`] so the stream can still be copied or skipped.
//!
//! # Capabilities
//! [`CompressionInfo`] carries what the container needs from the codec
//! layer: whether packets depend on earlier (P) or later (B) pictures,
//! whether pictures are coded as field pairs, the pre-skip and the
//! maximum packet size.

use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

use crate::error::Result;
use crate::io::{ReadVarExt, WriteVarExt};

// ── Compression flags ────────────────────────────────────────────────────────

/// Packets may reference earlier pictures.
pub const FLAG_HAS_P_FRAMES:        u32 = 1 << 0;
/// Packets may reference later pictures (out-of-order decoding).
pub const FLAG_HAS_B_FRAMES:        u32 = 1 << 1;
/// Pictures may be coded as two separate fields.
pub const FLAG_HAS_FIELD_PICTURES:  u32 = 1 << 2;
/// AAC with spectral band replication (doubles the frame size).
pub const FLAG_SBR:                 u32 = 1 << 3;

// ── CodecId enum ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodecId {
    /// Uncompressed audio samples or video frames.
    #[default]
    None,
    Pcm,
    Mp2,
    Mp3,
    Ac3,
    Aac,
    Vorbis,
    Flac,
    Opus,
    Speex,
    Jpeg,
    Png,
    Tiff,
    Mpeg1,
    Mpeg2,
    Mpeg4Asp,
    H264,
    Hevc,
    Theora,
    Dirac,
    Dv,
    Vp8,
    Vp9,
    Av1,
    Unknown(u32),
}

impl CodecId {
    /// Frozen wire id.
    pub fn code(self) -> u32 {
        match self {
            CodecId::None     => 0,
            CodecId::Pcm      => 1,
            CodecId::Mp2      => 0x100,
            CodecId::Mp3      => 0x101,
            CodecId::Ac3      => 0x102,
            CodecId::Aac      => 0x103,
            CodecId::Vorbis   => 0x104,
            CodecId::Flac     => 0x105,
            CodecId::Opus     => 0x106,
            CodecId::Speex    => 0x107,
            CodecId::Jpeg     => 0x10000,
            CodecId::Png      => 0x10001,
            CodecId::Tiff     => 0x10002,
            CodecId::Mpeg1    => 0x10003,
            CodecId::Mpeg2    => 0x10004,
            CodecId::Mpeg4Asp => 0x10005,
            CodecId::H264     => 0x10006,
            CodecId::Hevc     => 0x10007,
            CodecId::Theora   => 0x10008,
            CodecId::Dirac    => 0x10009,
            CodecId::Dv       => 0x1000a,
            CodecId::Vp8      => 0x1000b,
            CodecId::Vp9      => 0x1000c,
            CodecId::Av1      => 0x1000d,
            CodecId::Unknown(c) => c,
        }
    }

    pub fn from_code(code: u32) -> Self {
        match code {
            0       => CodecId::None,
            1       => CodecId::Pcm,
            0x100   => CodecId::Mp2,
            0x101   => CodecId::Mp3,
            0x102   => CodecId::Ac3,
            0x103   => CodecId::Aac,
            0x104   => CodecId::Vorbis,
            0x105   => CodecId::Flac,
            0x106   => CodecId::Opus,
            0x107   => CodecId::Speex,
            0x10000 => CodecId::Jpeg,
            0x10001 => CodecId::Png,
            0x10002 => CodecId::Tiff,
            0x10003 => CodecId::Mpeg1,
            0x10004 => CodecId::Mpeg2,
            0x10005 => CodecId::Mpeg4Asp,
            0x10006 => CodecId::H264,
            0x10007 => CodecId::Hevc,
            0x10008 => CodecId::Theora,
            0x10009 => CodecId::Dirac,
            0x1000a => CodecId::Dv,
            0x1000b => CodecId::Vp8,
            0x1000c => CodecId::Vp9,
            0x1000d => CodecId::Av1,
            other   => CodecId::Unknown(other),
        }
    }

    /// Short name (diagnostics and CLI only).
    pub fn name(self) -> &'static str {
        match self {
            CodecId::None     => "none",
            CodecId::Pcm      => "pcm",
            CodecId::Mp2      => "mp2",
            CodecId::Mp3      => "mp3",
            CodecId::Ac3      => "ac3",
            CodecId::Aac      => "aac",
            CodecId::Vorbis   => "vorbis",
            CodecId::Flac     => "flac",
            CodecId::Opus     => "opus",
            CodecId::Speex    => "speex",
            CodecId::Jpeg     => "jpeg",
            CodecId::Png      => "png",
            CodecId::Tiff     => "tiff",
            CodecId::Mpeg1    => "mpeg1",
            CodecId::Mpeg2    => "mpeg2",
            CodecId::Mpeg4Asp => "mpeg4",
            CodecId::H264     => "h264",
            CodecId::Hevc     => "hevc",
            CodecId::Theora   => "theora",
            CodecId::Dirac    => "dirac",
            CodecId::Dv       => "dv",
            CodecId::Vp8      => "vp8",
            CodecId::Vp9      => "vp9",
            CodecId::Av1      => "av1",
            CodecId::Unknown(_) => "unknown",
        }
    }

    pub fn long_name(self) -> &'static str {
        match self {
            CodecId::None     => "Uncompressed",
            CodecId::Pcm      => "PCM",
            CodecId::Mp2      => "MPEG layer 2",
            CodecId::Mp3      => "MPEG layer 3",
            CodecId::Ac3      => "AC3",
            CodecId::Aac      => "AAC",
            CodecId::Vorbis   => "Vorbis",
            CodecId::Flac     => "FLAC",
            CodecId::Opus     => "Opus",
            CodecId::Speex    => "Speex",
            CodecId::Jpeg     => "JPEG image",
            CodecId::Png      => "PNG image",
            CodecId::Tiff     => "TIFF image",
            CodecId::Mpeg1    => "MPEG-1",
            CodecId::Mpeg2    => "MPEG-2",
            CodecId::Mpeg4Asp => "MPEG-4 Part 2",
            CodecId::H264     => "H.264",
            CodecId::Hevc     => "H.265",
            CodecId::Theora   => "Theora",
            CodecId::Dirac    => "Dirac",
            CodecId::Dv       => "DV",
            CodecId::Vp8      => "VP8",
            CodecId::Vp9      => "VP9",
            CodecId::Av1      => "AV1",
            CodecId::Unknown(_) => "Unknown codec",
        }
    }

    pub fn mimetype(self) -> Option<&'static str> {
        match self {
            CodecId::Mp2      => Some("audio/mpeg"),
            CodecId::Mp3      => Some("audio/mpeg"),
            CodecId::Ac3      => Some("audio/ac3"),
            CodecId::Aac      => Some("audio/aac"),
            CodecId::Vorbis   => Some("audio/vorbis"),
            CodecId::Flac     => Some("audio/flac"),
            CodecId::Opus     => Some("audio/opus"),
            CodecId::Speex    => Some("audio/speex"),
            CodecId::Jpeg     => Some("image/jpeg"),
            CodecId::Png      => Some("image/png"),
            CodecId::Tiff     => Some("image/tiff"),
            CodecId::Mpeg1    => Some("video/mpeg"),
            CodecId::Mpeg2    => Some("video/mpeg2"),
            CodecId::Mpeg4Asp => Some("video/mp4v-es"),
            CodecId::H264     => Some("video/h264"),
            CodecId::Hevc     => Some("video/h265"),
            CodecId::Theora   => Some("video/theora"),
            CodecId::Dirac    => Some("video/dirac"),
            CodecId::Dv       => Some("video/dv"),
            CodecId::Vp8      => Some("video/vp8"),
            CodecId::Vp9      => Some("video/vp9"),
            CodecId::Av1      => Some("video/av1"),
            _ => None,
        }
    }

    /// Parse from a CLI string.
    pub fn from_name(s: &str) -> Option<Self> {
        let s = s.to_lowercase();
        ALL_CODECS.iter().copied().find(|c| c.name() == s)
    }

    /// Every packet decodes to the same number of samples.
    pub fn constant_frame_size(self) -> bool {
        matches!(self, CodecId::Mp2 | CodecId::Mp3 | CodecId::Ac3 | CodecId::Aac | CodecId::Speex)
    }

    /// Intra-only still image codecs.
    pub fn is_still_image(self) -> bool {
        matches!(self, CodecId::Jpeg | CodecId::Png | CodecId::Tiff)
    }
}

const ALL_CODECS: &[CodecId] = &[
    CodecId::None, CodecId::Pcm, CodecId::Mp2, CodecId::Mp3, CodecId::Ac3,
    CodecId::Aac, CodecId::Vorbis, CodecId::Flac, CodecId::Opus, CodecId::Speex,
    CodecId::Jpeg, CodecId::Png, CodecId::Tiff, CodecId::Mpeg1, CodecId::Mpeg2,
    CodecId::Mpeg4Asp, CodecId::H264, CodecId::Hevc, CodecId::Theora, CodecId::Dirac,
    CodecId::Dv, CodecId::Vp8, CodecId::Vp9, CodecId::Av1,
];

// ── CompressionInfo ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CompressionInfo {
    pub id:                CodecId,
    pub flags:             u32,
    /// Bits per second, 0 if unknown, negative for VBR.
    pub bitrate:           i32,
    pub max_packet_size:   u32,
    /// Samples the decoder discards at the start.
    pub pre_skip:          u32,
    pub video_buffer_size: u32,
    pub max_ref_frames:    u32,
    pub global_header:     Vec<u8>,
}

impl CompressionInfo {
    pub fn new(id: CodecId) -> Self {
        Self { id, ..Default::default() }
    }

    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags |= flags;
        self
    }

    pub fn has_p_frames(&self) -> bool { self.flags & FLAG_HAS_P_FRAMES != 0 }

    pub fn has_b_frames(&self) -> bool { self.flags & FLAG_HAS_B_FRAMES != 0 }

    pub fn has_field_pictures(&self) -> bool { self.flags & FLAG_HAS_FIELD_PICTURES != 0 }

    pub fn is_uncompressed(&self) -> bool { self.id == CodecId::None }

    pub fn write<W: Write + ?Sized>(&self, w: &mut W) -> Result<()> {
        w.write_uint32v(self.flags)?;
        w.write_uint32v(self.id.code())?;
        w.write_int32v(self.bitrate)?;
        w.write_uint32v(self.max_packet_size)?;
        w.write_uint32v(self.pre_skip)?;
        w.write_uint32v(self.video_buffer_size)?;
        w.write_uint32v(self.max_ref_frames)?;
        w.write_buffer(&self.global_header)?;
        Ok(())
    }

    pub fn read<R: Read + ?Sized>(r: &mut R) -> Result<Self> {
        Ok(Self {
            flags:             r.read_uint32v()?,
            id:                CodecId::from_code(r.read_uint32v()?),
            bitrate:           r.read_int32v()?,
            max_packet_size:   r.read_uint32v()?,
            pre_skip:          r.read_uint32v()?,
            video_buffer_size: r.read_uint32v()?,
            max_ref_frames:    r.read_uint32v()?,
            global_header:     r.read_buffer()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        for c in ALL_CODECS {
            assert_eq!(CodecId::from_code(c.code()), *c);
        }
        assert_eq!(CodecId::from_code(0xdead), CodecId::Unknown(0xdead));
        assert_eq!(CodecId::Unknown(0xdead).code(), 0xdead);
    }

    #[test]
    fn name_lookup() {
        assert_eq!(CodecId::from_name("H264"), Some(CodecId::H264));
        assert_eq!(CodecId::from_name("nope"), None);
        assert_eq!(CodecId::Opus.mimetype(), Some("audio/opus"));
    }

    #[test]
    fn compression_info_roundtrip() {
        let ci = CompressionInfo {
            bitrate: 128_000,
            pre_skip: 312,
            global_header: vec![1, 2, 3, 4],
            ..CompressionInfo::new(CodecId::Opus)
        };
        let mut buf = Vec::new();
        ci.write(&mut buf).unwrap();
        assert_eq!(CompressionInfo::read(&mut std::io::Cursor::new(buf)).unwrap(), ci);
    }
}
