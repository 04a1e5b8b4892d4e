//! Tagged metadata values and dictionaries.
//!
//! Wire contract: a type-tag varint followed by a type-specific payload.
//! Dictionaries are a count followed by `(name, value)` pairs, arrays a
//! count followed by values.  Tags 5 and 6 (audio/video format values) are
//! reserved and rejected on read.

use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

use crate::error::{GavfError, Result};
use crate::io::{ReadVarExt, WriteVarExt};

const TYPE_UNDEFINED:  u32 = 0;
const TYPE_INT:        u32 = 1;
const TYPE_LONG:       u32 = 2;
const TYPE_FLOAT:      u32 = 3;
const TYPE_STRING:     u32 = 4;
const TYPE_COLOR_RGB:  u32 = 7;
const TYPE_COLOR_RGBA: u32 = 8;
const TYPE_POSITION:   u32 = 9;
const TYPE_DICTIONARY: u32 = 10;
const TYPE_ARRAY:      u32 = 11;
const TYPE_BINARY:     u32 = 12;

// Nesting guard for hostile input.
const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "v", rename_all = "snake_case")]
pub enum Value {
    #[default]
    Undefined,
    Int(i32),
    Long(i64),
    Float(f64),
    String(String),
    ColorRgb([f64; 3]),
    ColorRgba([f64; 4]),
    Position([f64; 2]),
    Dictionary(Dictionary),
    Array(Vec<Value>),
    Binary(Vec<u8>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v)  => Some(*v as i64),
            Value::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v)   => Some(*v as f64),
            Value::Long(v)  => Some(*v as f64),
            _ => None,
        }
    }

    pub fn write<W: Write + ?Sized>(&self, w: &mut W) -> Result<()> {
        match self {
            Value::Undefined => w.write_uint32v(TYPE_UNDEFINED)?,
            Value::Int(v) => {
                w.write_uint32v(TYPE_INT)?;
                w.write_int32v(*v)?;
            }
            Value::Long(v) => {
                w.write_uint32v(TYPE_LONG)?;
                w.write_int64v(*v)?;
            }
            Value::Float(v) => {
                w.write_uint32v(TYPE_FLOAT)?;
                w.write_double(*v)?;
            }
            Value::String(s) => {
                w.write_uint32v(TYPE_STRING)?;
                w.write_string(s)?;
            }
            Value::ColorRgb(c) => {
                w.write_uint32v(TYPE_COLOR_RGB)?;
                for v in c { w.write_double(*v)?; }
            }
            Value::ColorRgba(c) => {
                w.write_uint32v(TYPE_COLOR_RGBA)?;
                for v in c { w.write_double(*v)?; }
            }
            Value::Position(p) => {
                w.write_uint32v(TYPE_POSITION)?;
                for v in p { w.write_double(*v)?; }
            }
            Value::Dictionary(d) => {
                w.write_uint32v(TYPE_DICTIONARY)?;
                d.write(w)?;
            }
            Value::Array(arr) => {
                w.write_uint32v(TYPE_ARRAY)?;
                w.write_uint32v(arr.len() as u32)?;
                for v in arr { v.write(w)?; }
            }
            Value::Binary(b) => {
                w.write_uint32v(TYPE_BINARY)?;
                w.write_buffer(b)?;
            }
        }
        Ok(())
    }

    pub fn read<R: Read + ?Sized>(r: &mut R) -> Result<Self> {
        Self::read_nested(r, 0)
    }

    fn read_nested<R: Read + ?Sized>(r: &mut R, depth: usize) -> Result<Self> {
        if depth > MAX_DEPTH {
            return Err(GavfError::format("value nesting too deep"));
        }
        let tag = r.read_uint32v()?;
        Ok(match tag {
            TYPE_UNDEFINED  => Value::Undefined,
            TYPE_INT        => Value::Int(r.read_int32v()?),
            TYPE_LONG       => Value::Long(r.read_int64v()?),
            TYPE_FLOAT      => Value::Float(r.read_double()?),
            TYPE_STRING     => Value::String(r.read_string()?),
            TYPE_COLOR_RGB  => Value::ColorRgb([r.read_double()?, r.read_double()?, r.read_double()?]),
            TYPE_COLOR_RGBA => Value::ColorRgba([r.read_double()?, r.read_double()?, r.read_double()?, r.read_double()?]),
            TYPE_POSITION   => Value::Position([r.read_double()?, r.read_double()?]),
            TYPE_DICTIONARY => Value::Dictionary(Dictionary::read_nested(r, depth + 1)?),
            TYPE_ARRAY => {
                let count = r.read_uint32v()?;
                let mut arr = Vec::new();
                for _ in 0..count {
                    arr.push(Value::read_nested(r, depth + 1)?);
                }
                Value::Array(arr)
            }
            TYPE_BINARY => Value::Binary(r.read_buffer()?),
            other => return Err(GavfError::format(format!("unknown value type tag {other}"))),
        })
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self { Value::String(s.to_owned()) }
}

impl From<String> for Value {
    fn from(s: String) -> Self { Value::String(s) }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self { Value::Int(v) }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self { Value::Long(v) }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self { Value::Float(v) }
}

/// Ordered name → value map.  Insertion order is preserved on the wire.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Dictionary {
    entries: Vec<(String, Value)>,
}

impl Dictionary {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize { self.entries.len() }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    /// Insert or replace `name`, keeping its original position on replace.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name.to_owned(), value)),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let idx = self.entries.iter().position(|(n, _)| n == name)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn write<W: Write + ?Sized>(&self, w: &mut W) -> Result<()> {
        w.write_uint32v(self.entries.len() as u32)?;
        for (name, value) in &self.entries {
            w.write_string(name)?;
            value.write(w)?;
        }
        Ok(())
    }

    pub fn read<R: Read + ?Sized>(r: &mut R) -> Result<Self> {
        Self::read_nested(r, 0)
    }

    fn read_nested<R: Read + ?Sized>(r: &mut R, depth: usize) -> Result<Self> {
        let count = r.read_uint32v()?;
        let mut dict = Dictionary::new();
        for _ in 0..count {
            let name = r.read_string()?;
            let value = Value::read_nested(r, depth)?;
            dict.entries.push((name, value));
        }
        Ok(dict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    fn roundtrip(d: &Dictionary) -> Dictionary {
        let mut buf = Vec::new();
        d.write(&mut buf).unwrap();
        Dictionary::read(&mut Cursor::new(buf)).unwrap()
    }

    #[test]
    fn nested_dictionary_roundtrip() {
        let mut inner = Dictionary::new();
        inner.set("lang", "eng");
        inner.set("bits", Value::Binary(vec![0, 1, 255]));

        let mut d = Dictionary::new();
        d.set("title", "Big Buck Bunny");
        d.set("track", 3i32);
        d.set("offset", -1_000_000_000_000i64);
        d.set("gain", 0.5f64);
        d.set("pos", Value::Position([0.25, 0.75]));
        d.set("color", Value::ColorRgba([1.0, 0.0, 0.5, 1.0]));
        d.set("inner", Value::Dictionary(inner));
        d.set("list", Value::Array(vec![Value::Undefined, Value::Int(7), "x".into()]));

        assert_eq!(roundtrip(&d), d);
    }

    #[test]
    fn set_replaces_in_place() {
        let mut d = Dictionary::new();
        d.set("a", 1i32);
        d.set("b", 2i32);
        d.set("a", 3i32);
        let names: Vec<&str> = d.iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["a", "b"]);
        assert_eq!(d.get("a").and_then(Value::as_i64), Some(3));
        assert_eq!(d.remove("a"), Some(Value::Int(3)));
        assert_eq!(d.len(), 1);
    }

    #[test]
    fn reserved_tag_rejected() {
        let mut buf = Vec::new();
        buf.write_uint32v(5).unwrap();
        assert!(matches!(Value::read(&mut Cursor::new(buf)), Err(GavfError::Format(_))));
    }

    proptest! {
        #[test]
        fn string_and_long_values(s in ".{0,40}", v in any::<i64>()) {
            let mut d = Dictionary::new();
            d.set("s", s.as_str());
            d.set("v", v);
            prop_assert_eq!(roundtrip(&d), d);
        }
    }
}
