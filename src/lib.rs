pub mod error;
pub mod time;
pub mod io;
pub mod value;
pub mod codec;
pub mod format;
pub mod chunk;
pub mod header;
pub mod packet;
pub mod stream;
pub mod index;
pub mod options;
pub mod io_stream;
pub mod recovery;

pub use error::{GavfError, Result};
pub use codec::{CodecId, CompressionInfo};
pub use format::{AudioFormat, FramerateMode, InterlaceMode, VideoFormat};
pub use header::{ProgramHeader, StreamFormat, StreamHeader, StreamType, Stats};
pub use packet::{Packet, PacketFlags, Rect};
pub use index::{PacketIndex, SyncIndex};
pub use io::{GavfIo, IoBackend, ReadStream, Seekable, WriteStream};
pub use io_stream::{EndReason, GavfReader, GavfWriter, PacketHeader};
pub use options::Options;
pub use recovery::ScanReport;
pub use value::{Dictionary, Value};
