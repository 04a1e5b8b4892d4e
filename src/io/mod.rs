//! Wire I/O — the pluggable byte backend shared by the writer and reader.
//!
//! [`IoBackend`] is the capability a container context is built on.  Seeking
//! is optional: streamed sinks and sources report `can_seek() == false` and
//! callers must check before relying on it.  [`GavfIo`] wraps a backend,
//! tracks the byte position and implements `std::io::{Read, Write}` so the
//! `byteorder` and [`varint`] extension traits work on it directly.

pub mod varint;

use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::error::{GavfError, Result};

pub use varint::{int64v_len, uint64v_len, ReadVarExt, WriteVarExt};

/// Alignment of every top-level chunk.
pub const ALIGNMENT: u64 = 8;

pub trait IoBackend {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    fn seek(&mut self, _pos: SeekFrom) -> Result<u64> {
        Err(GavfError::SeekUnsupported)
    }

    fn can_seek(&self) -> bool {
        false
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<B: IoBackend + ?Sized> IoBackend for Box<B> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> { (**self).read(buf) }
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> { (**self).write(buf) }
    fn seek(&mut self, pos: SeekFrom) -> Result<u64> { (**self).seek(pos) }
    fn can_seek(&self) -> bool { (**self).can_seek() }
    fn flush(&mut self) -> io::Result<()> { (**self).flush() }
}

// ── Built-in backends ─────────────────────────────────────────────────────────

/// Random-access backend: files, `Cursor<Vec<u8>>`.
#[derive(Debug)]
pub struct Seekable<T>(pub T);

impl<T> Seekable<T> {
    pub fn into_inner(self) -> T { self.0 }
}

impl Seekable<io::Cursor<Vec<u8>>> {
    /// Empty in-memory buffer, ready for writing.
    pub fn memory() -> Self {
        Seekable(io::Cursor::new(Vec::new()))
    }

    /// In-memory buffer positioned at the start of `data`.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Seekable(io::Cursor::new(data))
    }
}

impl<T: Read + Write + Seek> IoBackend for Seekable<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> { self.0.read(buf) }
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> { self.0.write(buf) }
    fn seek(&mut self, pos: SeekFrom) -> Result<u64> { Ok(self.0.seek(pos)?) }
    fn can_seek(&self) -> bool { true }
    fn flush(&mut self) -> io::Result<()> { self.0.flush() }
}

/// Forward-only source (pipes, sockets).
#[derive(Debug)]
pub struct ReadStream<R>(pub R);

impl<R: Read> IoBackend for ReadStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> { self.0.read(buf) }
    fn write(&mut self, _: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "read-only stream"))
    }
}

/// Forward-only sink.
#[derive(Debug)]
pub struct WriteStream<W>(pub W);

impl<W> WriteStream<W> {
    pub fn into_inner(self) -> W { self.0 }
}

impl<W: Write> IoBackend for WriteStream<W> {
    fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "write-only stream"))
    }
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> { self.0.write(buf) }
    fn flush(&mut self) -> io::Result<()> { self.0.flush() }
}

// ── GavfIo ────────────────────────────────────────────────────────────────────

/// Position-tracking handle around an [`IoBackend`].
pub struct GavfIo<B: IoBackend> {
    backend: Option<B>,
    pos:     u64,
}

impl<B: IoBackend> GavfIo<B> {
    pub fn new(backend: B) -> Self {
        Self { backend: Some(backend), pos: 0 }
    }

    fn backend(&mut self) -> io::Result<&mut B> {
        self.backend
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "I/O backend already released"))
    }

    /// Current byte offset.
    pub fn position(&self) -> u64 { self.pos }

    pub fn can_seek(&self) -> bool {
        self.backend.as_ref().is_some_and(|b| b.can_seek())
    }

    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        if !self.can_seek() {
            return Err(GavfError::SeekUnsupported);
        }
        let new_pos = self.backend()?.seek(pos)?;
        self.pos = new_pos;
        Ok(new_pos)
    }

    pub fn seek_to(&mut self, pos: u64) -> Result<()> {
        self.seek(SeekFrom::Start(pos)).map(|_| ())
    }

    /// Advance `n` bytes: seek when possible, otherwise read and discard.
    pub fn skip(&mut self, n: u64) -> Result<()> {
        if n == 0 {
            return Ok(());
        }
        if self.can_seek() {
            self.seek(SeekFrom::Current(n as i64))?;
            return Ok(());
        }
        let copied = io::copy(&mut Read::by_ref(self).take(n), &mut io::sink())?;
        if copied != n {
            return Err(GavfError::TruncatedStream);
        }
        Ok(())
    }

    /// Zero-pad the output up to the next chunk boundary.
    pub fn align_write(&mut self) -> Result<()> {
        let pad = padding(self.pos);
        if pad > 0 {
            self.write_all(&[0u8; ALIGNMENT as usize][..pad as usize])?;
        }
        Ok(())
    }

    /// Skip input padding up to the next chunk boundary.
    pub fn align_read(&mut self) -> Result<()> {
        self.skip(padding(self.pos))
    }

    /// Release the backend.  Every later operation fails.
    pub fn take_backend(&mut self) -> Option<B> {
        self.backend.take()
    }
}

fn padding(pos: u64) -> u64 {
    (ALIGNMENT - pos % ALIGNMENT) % ALIGNMENT
}

impl<B: IoBackend> Read for GavfIo<B> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.backend()?.read(buf)?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl<B: IoBackend> Write for GavfIo<B> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.backend()?.write(buf)?;
        self.pos += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.backend()?.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_padding() {
        let mut io = GavfIo::new(Seekable::memory());
        io.write_all(b"abc").unwrap();
        io.align_write().unwrap();
        assert_eq!(io.position(), 8);
        io.align_write().unwrap();
        assert_eq!(io.position(), 8);

        let bytes = io.take_backend().unwrap().into_inner().into_inner();
        assert_eq!(&bytes, b"abc\0\0\0\0\0");
    }

    #[test]
    fn skip_without_seek_reads_through() {
        let data: Vec<u8> = (0u8..32).collect();
        let mut io = GavfIo::new(ReadStream(io::Cursor::new(data)));
        assert!(!io.can_seek());
        io.skip(5).unwrap();
        io.align_read().unwrap();
        assert_eq!(io.position(), 8);
        let mut b = [0u8; 1];
        io.read_exact(&mut b).unwrap();
        assert_eq!(b[0], 8);
        assert!(matches!(io.seek(SeekFrom::Start(0)), Err(GavfError::SeekUnsupported)));
        assert!(matches!(io.skip(100), Err(GavfError::TruncatedStream)));
    }

    #[test]
    fn released_backend_fails() {
        let mut io = GavfIo::new(Seekable::memory());
        io.take_backend();
        assert!(io.write_all(b"x").is_err());
    }
}
