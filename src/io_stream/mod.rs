//! Mux and demux engines.
//!
//! # Writer
//! [`GavfWriter`] takes packets per stream, interleaves them by
//! presentation time and places sync headers.  The program header goes out
//! before the first packet; footer, indices and tail are written by
//! [`GavfWriter::close`].  A non-seekable sink gets the same layout with
//! the packet region length left at 0.
//!
//! # Reader
//! [`GavfReader`] reads the program header, picks up footer and indices
//! through the tail when the input can seek, and then hands out packets
//! one at a time.  Streams can be skipped without decoding, and the sync
//! index allows seeking by time.
//!
//! # Endianness
//! Fixed-width fields are big-endian; everything else is varint coded, see
//! [`crate::io::varint`].

pub mod reader;
pub mod writer;

pub use reader::{DemuxState, EndReason, GavfReader, PacketHeader, SkipCallback};
pub use writer::{EncodeMode, GavfWriter};
