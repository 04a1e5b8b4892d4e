//! Audio and video format descriptors as declared in the program header.
//!
//! Only the fields the container itself needs (timescales, frame sizes,
//! interlacing) are interpreted here; sample and pixel formats are carried
//! as opaque codes for the conversion layer.

use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

use crate::error::{GavfError, Result};
use crate::io::{ReadVarExt, WriteVarExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterleaveMode {
    #[default]
    None,
    Two,
    All,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AudioFormat {
    pub samplerate:        u32,
    pub num_channels:      u32,
    /// Samples per packet for constant frame size codecs, 0 otherwise.
    pub samples_per_frame: u32,
    pub sample_format:     u32,
    pub interleave_mode:   InterleaveMode,
}

impl AudioFormat {
    pub fn new(samplerate: u32, num_channels: u32) -> Self {
        Self { samplerate, num_channels, ..Default::default() }
    }

    pub fn write<W: Write + ?Sized>(&self, w: &mut W) -> Result<()> {
        w.write_uint32v(self.samplerate)?;
        w.write_uint32v(self.num_channels)?;
        w.write_uint32v(self.samples_per_frame)?;
        w.write_uint32v(self.sample_format)?;
        w.write_uint32v(match self.interleave_mode {
            InterleaveMode::None => 0,
            InterleaveMode::Two  => 1,
            InterleaveMode::All  => 2,
        })?;
        Ok(())
    }

    pub fn read<R: Read + ?Sized>(r: &mut R) -> Result<Self> {
        Ok(Self {
            samplerate:        r.read_uint32v()?,
            num_channels:      r.read_uint32v()?,
            samples_per_frame: r.read_uint32v()?,
            sample_format:     r.read_uint32v()?,
            interleave_mode:   match r.read_uint32v()? {
                0 => InterleaveMode::None,
                1 => InterleaveMode::Two,
                2 => InterleaveMode::All,
                other => return Err(GavfError::format(format!("bad interleave mode {other}"))),
            },
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FramerateMode {
    #[default]
    Constant,
    Variable,
    /// Still images shown until the next one arrives.
    Still,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterlaceMode {
    #[default]
    None,
    TopFirst,
    BottomFirst,
    /// Interlacing changes per frame; carried in every packet.
    Mixed,
}

impl InterlaceMode {
    pub(crate) fn code(self) -> u32 {
        match self {
            InterlaceMode::None        => 0,
            InterlaceMode::TopFirst    => 1,
            InterlaceMode::BottomFirst => 2,
            InterlaceMode::Mixed       => 3,
        }
    }

    pub(crate) fn from_code(code: u32) -> Result<Self> {
        Ok(match code {
            0 => InterlaceMode::None,
            1 => InterlaceMode::TopFirst,
            2 => InterlaceMode::BottomFirst,
            3 => InterlaceMode::Mixed,
            other => return Err(GavfError::format(format!("bad interlace mode {other}"))),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VideoFormat {
    pub frame_width:    u32,
    pub frame_height:   u32,
    pub image_width:    u32,
    pub image_height:   u32,
    pub pixel_width:    u32,
    pub pixel_height:   u32,
    pub pixelformat:    u32,
    /// Ticks per frame for constant framerate.
    pub frame_duration: i32,
    pub timescale:      u32,
    pub framerate_mode: FramerateMode,
    pub interlace_mode: InterlaceMode,
}

impl VideoFormat {
    /// Square-pixel progressive format at `timescale / frame_duration` fps.
    pub fn new(width: u32, height: u32, timescale: u32, frame_duration: i32) -> Self {
        Self {
            frame_width:  width,
            frame_height: height,
            image_width:  width,
            image_height: height,
            pixel_width:  1,
            pixel_height: 1,
            frame_duration,
            timescale,
            ..Default::default()
        }
    }

    pub fn write<W: Write + ?Sized>(&self, w: &mut W) -> Result<()> {
        w.write_uint32v(self.frame_width)?;
        w.write_uint32v(self.frame_height)?;
        w.write_uint32v(self.image_width)?;
        w.write_uint32v(self.image_height)?;
        w.write_uint32v(self.pixel_width)?;
        w.write_uint32v(self.pixel_height)?;
        w.write_uint32v(self.pixelformat)?;
        w.write_int32v(self.frame_duration)?;
        w.write_uint32v(self.timescale)?;
        w.write_uint32v(match self.framerate_mode {
            FramerateMode::Constant => 0,
            FramerateMode::Variable => 1,
            FramerateMode::Still    => 2,
        })?;
        w.write_uint32v(self.interlace_mode.code())?;
        Ok(())
    }

    pub fn read<R: Read + ?Sized>(r: &mut R) -> Result<Self> {
        Ok(Self {
            frame_width:    r.read_uint32v()?,
            frame_height:   r.read_uint32v()?,
            image_width:    r.read_uint32v()?,
            image_height:   r.read_uint32v()?,
            pixel_width:    r.read_uint32v()?,
            pixel_height:   r.read_uint32v()?,
            pixelformat:    r.read_uint32v()?,
            frame_duration: r.read_int32v()?,
            timescale:      r.read_uint32v()?,
            framerate_mode: match r.read_uint32v()? {
                0 => FramerateMode::Constant,
                1 => FramerateMode::Variable,
                2 => FramerateMode::Still,
                other => return Err(GavfError::format(format!("bad framerate mode {other}"))),
            },
            interlace_mode: InterlaceMode::from_code(r.read_uint32v()?)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn video_format_roundtrip() {
        let mut fmt = VideoFormat::new(1280, 720, 25, 1);
        fmt.interlace_mode = InterlaceMode::Mixed;
        fmt.framerate_mode = FramerateMode::Variable;
        let mut buf = Vec::new();
        fmt.write(&mut buf).unwrap();
        assert_eq!(VideoFormat::read(&mut Cursor::new(buf)).unwrap(), fmt);
    }

    #[test]
    fn bad_enum_code_is_format_error() {
        let mut buf = Vec::new();
        AudioFormat::new(44100, 2).write(&mut buf).unwrap();
        *buf.last_mut().unwrap() = 9;
        assert!(matches!(AudioFormat::read(&mut Cursor::new(buf)), Err(GavfError::Format(_))));
    }
}
