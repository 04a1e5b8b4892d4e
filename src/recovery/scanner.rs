//! Index rebuild scanner.
//!
//! # How it works
//!
//! Starting at the first sync header, every record of the packet region is
//! read in order.  Sync headers become sync index entries; packets become
//! packet index entries.  Packet bodies are decoded only as far as their
//! flags and timing so the PTS inference state can be followed.
//!
//! ## End of scan
//!
//! | End | Meaning |
//! |-----|---------|
//! | `Clean` | Packet region complete |
//! | `Truncated` | Input stops inside a record; everything before it is indexed |
//! | `UnknownTag` | Garbage after the last good record |
//!
//! The reader is left at the first sync header afterwards, as after
//! [`GavfReader::reset`].

use std::io::Read;
use tracing::{debug, info};

use crate::error::{GavfError, Result};
use crate::index::{PacketIndex, PacketIndexEntry, SyncIndex};
use crate::io::IoBackend;
use crate::io_stream::reader::{EndReason, GavfReader, Record};
use crate::packet::{decode_body, WireContext};

/// Result of [`GavfReader::rebuild_index`].
#[derive(Debug, Clone, PartialEq)]
pub struct ScanReport {
    pub sync_index:     SyncIndex,
    pub packet_index:   PacketIndex,
    /// Packets seen, all streams.
    pub packets:        u64,
    /// Payload bytes seen, all streams.
    pub bytes:          u64,
    /// Packets seen per stream, in header order.
    pub stream_packets: Vec<u64>,
    pub end:            EndReason,
}

impl ScanReport {
    /// Summary line for display.
    pub fn summary(&self) -> String {
        format!(
            "{} sync point(s), {} packet(s), {:.2} MiB payload, end: {:?}",
            self.sync_index.len(),
            self.packets,
            self.bytes as f64 / 1024.0 / 1024.0,
            self.end,
        )
    }
}

impl<B: IoBackend> GavfReader<B> {
    /// Rebuild both indices by scanning the packet region.
    ///
    /// Requires a seekable input.  Does not change the installed indices;
    /// see [`install_index`](GavfReader::install_index).
    pub fn rebuild_index(&mut self) -> Result<ScanReport> {
        let start = self.first_sync_pos.ok_or(GavfError::State("no sync header read"))?;
        if !self.io.can_seek() {
            return Err(GavfError::SeekUnsupported);
        }
        self.io.seek_to(start)?;

        let n = self.streams.len();
        let mut report = ScanReport {
            sync_index:     SyncIndex::new(n),
            packet_index:   PacketIndex::default(),
            packets:        0,
            bytes:          0,
            stream_packets: vec![0; n],
            end:            EndReason::Clean,
        };
        let mut next_pts: Vec<Option<i64>> = vec![None; n];

        loop {
            match self.read_record()? {
                Record::Sync { pos, pts } => {
                    next_pts.clone_from(&pts);
                    report.sync_index.push(pos, pts)?;
                }
                Record::Packet(hdr) => {
                    let idx = self.header.index_of(hdr.stream_id).ok_or(GavfError::InvalidStreamId(hdr.stream_id))?;
                    let mut body = Vec::new();
                    Read::by_ref(&mut self.io).take(hdr.len as u64).read_to_end(&mut body)?;
                    if body.len() != hdr.len as usize {
                        report.end = EndReason::Truncated;
                        break;
                    }
                    let s = &self.streams[idx];
                    let ctx = WireContext {
                        fields:           s.fields,
                        next_pts:         next_pts[idx],
                        default_duration: s.default_duration,
                    };
                    let pkt = decode_body(hdr.stream_id, body, &ctx)?;
                    next_pts[idx] = Some(pkt.end_pts());
                    report.packet_index.push(PacketIndexEntry {
                        stream_id: hdr.stream_id,
                        flags:     pkt.flags.0,
                        pos:       hdr.pos,
                        pts:       pkt.pts,
                    });
                    report.packets += 1;
                    report.bytes += pkt.data.len() as u64;
                    report.stream_packets[idx] += 1;
                }
                Record::Trailer { .. } => break,
                Record::End(reason) => {
                    report.end = reason;
                    break;
                }
            }
        }
        debug!(end = ?report.end, pos = self.io.position(), "scan stopped");
        info!("{}", report.summary());

        self.io.seek_to(start)?;
        self.resume_streaming();
        Ok(report)
    }

    /// Use the indices of a scan for seeking.
    pub fn install_index(&mut self, report: ScanReport) -> Result<()> {
        if report.sync_index.num_streams != self.streams.len() {
            return Err(GavfError::format("scan report does not match this file"));
        }
        self.sync_index = Some(report.sync_index);
        self.packet_index = Some(report.packet_index);
        Ok(())
    }
}
