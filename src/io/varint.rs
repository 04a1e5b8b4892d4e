//! Variable-length and fixed-width wire primitives.
//!
//! # Unsigned varint
//! The number of leading `1` bits in the first byte gives the number of
//! bytes that follow it.  A code of length `n <= 8` carries `7n` payload
//! bits, packed MSB-first right after the prefix.  Length 9 is `0xFF`
//! followed by the full big-endian 64-bit value.
//!
//! ```text
//! 0xxxxxxx                              7 bits
//! 10xxxxxx xxxxxxxx                    14 bits
//! 110xxxxx xxxxxxxx xxxxxxxx           21 bits
//! ...
//! 11111110 + 7 bytes                   56 bits
//! 11111111 + 8 bytes                   64 bits
//! ```
//!
//! # Signed varint
//! Length class `n <= 8` covers `[-2^(7n-1), 2^(7n-1))` and stores
//! `v + 2^(7n-1)`.  The 9-byte class stores the raw bits with the sign bit
//! flipped.
//!
//! # Fixed width
//! Big-endian through `byteorder`.  Doubles are written as their IEEE-754
//! bit pattern.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

use crate::time::PTS_UNDEFINED;

const MAX_LEN: usize = 9;

/// Encoded length of an unsigned varint.
pub fn uint64v_len(v: u64) -> usize {
    (1..MAX_LEN).find(|&n| v < 1u64 << (7 * n)).unwrap_or(MAX_LEN)
}

/// Encoded length of a signed varint.
pub fn int64v_len(v: i64) -> usize {
    (1..MAX_LEN)
        .find(|&n| {
            let half = 1i64 << (7 * n - 1);
            v >= -half && v < half
        })
        .unwrap_or(MAX_LEN)
}

fn encode_raw(v: u64, len: usize, out: &mut [u8; MAX_LEN]) {
    if len == MAX_LEN {
        out[0] = 0xFF;
        out[1..].copy_from_slice(&v.to_be_bytes());
        return;
    }
    let bytes = v.to_be_bytes();
    out[..len].copy_from_slice(&bytes[8 - len..]);
    out[0] |= !(0xFFu8 >> (len - 1));
}

fn read_raw<R: Read + ?Sized>(r: &mut R) -> io::Result<(u64, usize)> {
    let first = r.read_u8()?;
    let len = first.leading_ones() as usize + 1;
    if len == MAX_LEN {
        return Ok((r.read_u64::<BigEndian>()?, len));
    }
    let mut v = (first as u64) & (0xFFu64 >> len);
    for _ in 1..len {
        v = (v << 8) | r.read_u8()? as u64;
    }
    Ok((v, len))
}

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}

pub trait WriteVarExt: Write {
    fn write_uint64v(&mut self, v: u64) -> io::Result<()> {
        let len = uint64v_len(v);
        let mut buf = [0u8; MAX_LEN];
        encode_raw(v, len, &mut buf);
        self.write_all(&buf[..len])
    }

    fn write_int64v(&mut self, v: i64) -> io::Result<()> {
        let len = int64v_len(v);
        let raw = if len == MAX_LEN {
            (v as u64) ^ (1u64 << 63)
        } else {
            (v + (1i64 << (7 * len - 1))) as u64
        };
        let mut buf = [0u8; MAX_LEN];
        encode_raw(raw, len, &mut buf);
        self.write_all(&buf[..len])
    }

    fn write_uint32v(&mut self, v: u32) -> io::Result<()> {
        self.write_uint64v(v as u64)
    }

    fn write_int32v(&mut self, v: i32) -> io::Result<()> {
        self.write_int64v(v as i64)
    }

    fn write_double(&mut self, v: f64) -> io::Result<()> {
        self.write_u64::<BigEndian>(v.to_bits())
    }

    /// Length-prefixed UTF-8.  The empty string doubles as null.
    fn write_string(&mut self, s: &str) -> io::Result<()> {
        let len = u32::try_from(s.len()).map_err(|_| invalid("string too long"))?;
        self.write_uint32v(len)?;
        self.write_all(s.as_bytes())
    }

    fn write_buffer(&mut self, buf: &[u8]) -> io::Result<()> {
        let len = u32::try_from(buf.len()).map_err(|_| invalid("buffer too long"))?;
        self.write_uint32v(len)?;
        self.write_all(buf)
    }

    /// Optional timestamp; `None` goes out as the undefined sentinel.
    fn write_opt_pts(&mut self, pts: Option<i64>) -> io::Result<()> {
        self.write_int64v(pts.unwrap_or(PTS_UNDEFINED))
    }
}

impl<W: Write + ?Sized> WriteVarExt for W {}

pub trait ReadVarExt: Read {
    fn read_uint64v(&mut self) -> io::Result<u64> {
        read_raw(self).map(|(v, _)| v)
    }

    fn read_int64v(&mut self) -> io::Result<i64> {
        let (raw, len) = read_raw(self)?;
        if len == MAX_LEN {
            Ok((raw ^ (1u64 << 63)) as i64)
        } else {
            Ok(raw as i64 - (1i64 << (7 * len - 1)))
        }
    }

    fn read_uint32v(&mut self) -> io::Result<u32> {
        let v = self.read_uint64v()?;
        u32::try_from(v).map_err(|_| invalid("uint32 varint out of range"))
    }

    fn read_int32v(&mut self) -> io::Result<i32> {
        let v = self.read_int64v()?;
        i32::try_from(v).map_err(|_| invalid("int32 varint out of range"))
    }

    fn read_double(&mut self) -> io::Result<f64> {
        Ok(f64::from_bits(self.read_u64::<BigEndian>()?))
    }

    fn read_string(&mut self) -> io::Result<String> {
        let bytes = self.read_buffer()?;
        String::from_utf8(bytes).map_err(|_| invalid("string is not valid UTF-8"))
    }

    fn read_buffer(&mut self) -> io::Result<Vec<u8>> {
        let len = self.read_uint32v()? as u64;
        let mut out = Vec::new();
        self.take(len).read_to_end(&mut out)?;
        if out.len() as u64 != len {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        Ok(out)
    }

    fn read_opt_pts(&mut self) -> io::Result<Option<i64>> {
        let v = self.read_int64v()?;
        Ok((v != PTS_UNDEFINED).then_some(v))
    }
}

impl<R: Read + ?Sized> ReadVarExt for R {}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    fn uint_roundtrip(v: u64) -> (u64, usize) {
        let mut buf = Vec::new();
        buf.write_uint64v(v).unwrap();
        let len = buf.len();
        (Cursor::new(buf).read_uint64v().unwrap(), len)
    }

    fn int_roundtrip(v: i64) -> (i64, usize) {
        let mut buf = Vec::new();
        buf.write_int64v(v).unwrap();
        let len = buf.len();
        (Cursor::new(buf).read_int64v().unwrap(), len)
    }

    #[test]
    fn unsigned_boundaries() {
        for v in [0u64, 63, 64, 127, 128, 8191, 8192, 16383, 16384, (1 << 49) - 1, 1 << 49, (1 << 49) + 1, (1 << 56) - 1, 1 << 56, (1 << 63) - 1, u64::MAX] {
            let (back, len) = uint_roundtrip(v);
            assert_eq!(back, v);
            assert_eq!(len, uint64v_len(v));
        }
        assert_eq!(uint64v_len(127), 1);
        assert_eq!(uint64v_len(128), 2);
        assert_eq!(uint64v_len((1 << 56) - 1), 8);
        assert_eq!(uint64v_len(1 << 56), 9);
        assert_eq!(uint64v_len(1 << 49), 8);
    }

    #[test]
    fn signed_boundaries() {
        for v in [-1i64, 0, -64, 63, 64, -65, -8192, 8191, -8193, 1 << 48, -(1 << 48), -(1 << 48) - 1, (1 << 55) - 1, -(1 << 55), i64::MIN, i64::MAX] {
            let (back, len) = int_roundtrip(v);
            assert_eq!(back, v);
            assert_eq!(len, int64v_len(v));
        }
        assert_eq!(int64v_len(-64), 1);
        assert_eq!(int64v_len(63), 1);
        assert_eq!(int64v_len(64), 2);
        assert_eq!(int64v_len(-8193), 3);
        assert_eq!(int64v_len(1 << 48), 8);
        assert_eq!(int64v_len(-(1 << 48) - 1), 8);
        assert_eq!(int64v_len(i64::MIN), 9);
    }

    #[test]
    fn prefix_layout() {
        let mut buf = Vec::new();
        buf.write_uint64v(0x7F).unwrap();
        buf.write_uint64v(0x80).unwrap();
        buf.write_uint64v(u64::MAX).unwrap();
        assert_eq!(&buf[..3], &[0x7F, 0x80, 0x80]);
        assert_eq!(buf[3], 0xFF);
        assert_eq!(buf.len(), 3 + 9);

        let mut buf = Vec::new();
        buf.write_uint64v(1 << 49).unwrap();
        assert_eq!(buf, [0xFE, 0x02, 0, 0, 0, 0, 0, 0]);
        assert_eq!(Cursor::new(buf).read_uint64v().unwrap(), 1 << 49);
    }

    #[test]
    fn undefined_pts_roundtrip() {
        let mut buf = Vec::new();
        buf.write_opt_pts(None).unwrap();
        buf.write_opt_pts(Some(-5)).unwrap();
        let mut r = Cursor::new(buf);
        assert_eq!(r.read_opt_pts().unwrap(), None);
        assert_eq!(r.read_opt_pts().unwrap(), Some(-5));
    }

    #[test]
    fn truncated_varint_is_eof() {
        let mut r = Cursor::new(vec![0xC0u8, 0x01]);
        let err = r.read_uint64v().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn strings_and_buffers() {
        let mut buf = Vec::new();
        buf.write_string("héllo").unwrap();
        buf.write_string("").unwrap();
        buf.write_buffer(&[1, 2, 3]).unwrap();
        buf.write_double(-0.25).unwrap();
        let mut r = Cursor::new(buf);
        assert_eq!(r.read_string().unwrap(), "héllo");
        assert_eq!(r.read_string().unwrap(), "");
        assert_eq!(r.read_buffer().unwrap(), vec![1, 2, 3]);
        assert_eq!(r.read_double().unwrap(), -0.25);
    }

    proptest! {
        #[test]
        fn uint64v_any(v in any::<u64>()) {
            prop_assert_eq!(uint_roundtrip(v).0, v);
        }

        #[test]
        fn int64v_any(v in any::<i64>()) {
            prop_assert_eq!(int_roundtrip(v).0, v);
        }
    }
}
