//! Sync index and packet index.
//!
//! Both are append-only while writing and go to trailing chunks at close.
//! The sync index maps byte offsets of sync headers to the per-stream PTS
//! they carry and drives seeking; the packet index is a lookup aid.

use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

use crate::error::{GavfError, Result};
use crate::io::{ReadVarExt, WriteVarExt};
use crate::time;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncIndexEntry {
    /// Offset of the sync header tag.
    pub pos: u64,
    /// One slot per declared stream.
    pub pts: Vec<Option<i64>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncIndex {
    pub num_streams: usize,
    pub entries:     Vec<SyncIndexEntry>,
}

impl SyncIndex {
    pub fn new(num_streams: usize) -> Self {
        Self { num_streams, entries: Vec::new() }
    }

    pub fn len(&self) -> usize { self.entries.len() }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    pub fn push(&mut self, pos: u64, pts: Vec<Option<i64>>) -> Result<()> {
        if pts.len() != self.num_streams {
            return Err(GavfError::format(format!(
                "sync entry has {} slots, expected {}",
                pts.len(),
                self.num_streams
            )));
        }
        self.entries.push(SyncIndexEntry { pos, pts });
        Ok(())
    }

    pub fn first_pts(&self) -> Option<&[Option<i64>]> {
        self.entries.first().map(|e| e.pts.as_slice())
    }

    pub fn end_pts(&self) -> Option<&[Option<i64>]> {
        self.entries.last().map(|e| e.pts.as_slice())
    }

    /// Index of the entry to resume from so that every continuous stream
    /// starts at or before `target` (given in `scale` ticks).
    ///
    /// For each continuous stream the latest entry whose PTS is defined
    /// and not after the target is taken, or entry 0 if there is none; the
    /// earliest of those wins.
    pub fn find(&self, target: i64, scale: u32, timescales: &[u32], discontinuous: &[bool]) -> Option<usize> {
        if self.entries.is_empty() {
            return None;
        }
        let mut best: Option<usize> = None;
        for (s, &ts) in timescales.iter().enumerate() {
            if discontinuous.get(s).copied().unwrap_or(false) {
                continue;
            }
            let t = time::rescale(scale, ts, target);
            let idx = self
                .entries
                .iter()
                .rposition(|e| matches!(e.pts.get(s), Some(Some(p)) if *p <= t))
                .unwrap_or(0);
            best = Some(best.map_or(idx, |b| b.min(idx)));
        }
        best
    }

    pub fn write<W: Write + ?Sized>(&self, w: &mut W) -> Result<()> {
        w.write_uint64v(self.entries.len() as u64)?;
        w.write_uint32v(self.num_streams as u32)?;
        for e in &self.entries {
            w.write_uint64v(e.pos)?;
            for pts in &e.pts {
                w.write_opt_pts(*pts)?;
            }
        }
        Ok(())
    }

    pub fn read<R: Read + ?Sized>(r: &mut R) -> Result<Self> {
        let count = r.read_uint64v()?;
        let num_streams = r.read_uint32v()? as usize;
        let mut index = SyncIndex::new(num_streams);
        for _ in 0..count {
            let pos = r.read_uint64v()?;
            let pts = (0..num_streams).map(|_| r.read_opt_pts()).collect::<std::io::Result<Vec<_>>>()?;
            index.entries.push(SyncIndexEntry { pos, pts });
        }
        Ok(index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketIndexEntry {
    pub stream_id: u32,
    pub flags:     u32,
    /// Offset of the packet tag.
    pub pos:       u64,
    pub pts:       i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PacketIndex {
    pub entries: Vec<PacketIndexEntry>,
}

impl PacketIndex {
    pub fn len(&self) -> usize { self.entries.len() }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    pub fn push(&mut self, entry: PacketIndexEntry) {
        self.entries.push(entry);
    }

    pub fn write<W: Write + ?Sized>(&self, w: &mut W) -> Result<()> {
        w.write_uint64v(self.entries.len() as u64)?;
        for e in &self.entries {
            w.write_uint32v(e.stream_id)?;
            w.write_uint32v(e.flags)?;
            w.write_uint64v(e.pos)?;
            w.write_int64v(e.pts)?;
        }
        Ok(())
    }

    pub fn read<R: Read + ?Sized>(r: &mut R) -> Result<Self> {
        let count = r.read_uint64v()?;
        let mut index = PacketIndex::default();
        for _ in 0..count {
            index.entries.push(PacketIndexEntry {
                stream_id: r.read_uint32v()?,
                flags:     r.read_uint32v()?,
                pos:       r.read_uint64v()?,
                pts:       r.read_int64v()?,
            });
        }
        Ok(index)
    }
}
