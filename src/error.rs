use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GavfError {
    #[error("IO error: {0}")]
    Io(io::Error),
    /// Garbled or unexpected tag inside a section that is already open.
    #[error("Format error: {0}")]
    Format(String),
    #[error("Seeking is not supported by this I/O backend")]
    SeekUnsupported,
    #[error("Invalid stream id: {0}")]
    InvalidStreamId(u32),
    /// Input ended before a complete record could be read.
    #[error("Truncated stream")]
    TruncatedStream,
    #[error("Invalid options: {0}")]
    InvalidOptions(String),
    #[error("Invalid state: {0}")]
    State(&'static str),
    #[error("Track document error: {0}")]
    Track(#[from] serde_json::Error),
}

impl From<io::Error> for GavfError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof => GavfError::TruncatedStream,
            io::ErrorKind::InvalidData   => GavfError::Format(e.to_string()),
            _                            => GavfError::Io(e),
        }
    }
}

impl GavfError {
    pub(crate) fn format(msg: impl Into<String>) -> Self {
        GavfError::Format(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, GavfError>;
