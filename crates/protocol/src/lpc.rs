//! LPC value codec.
//!
//! MudMode payloads are LPC values serialized with a one-byte type tag
//! followed by a type-specific payload, all lengths and integers in
//! network byte order, strings in UTF-8 with no terminator.
//!
//! Tags: 0 string, 1 integer (i32), 2 array, 3 mapping, 4 float (f64),
//! 5 buffer. There is no null tag — integer zero stands in for null at
//! packet header positions, and the packet layer translates it to and
//! from the empty string.

use std::fmt;

/// Nesting limit for arrays/mappings. Anything deeper is hostile input.
pub const MAX_DEPTH: usize = 64;

const TAG_STRING: u8 = 0;
const TAG_INT: u8 = 1;
const TAG_ARRAY: u8 = 2;
const TAG_MAPPING: u8 = 3;
const TAG_FLOAT: u8 = 4;
const TAG_BUFFER: u8 = 5;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Value model
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A decoded LPC value.
///
/// Mappings preserve insertion order as a pair vector, so
/// `decode(encode(x)) == x` holds for every representable value.
#[derive(Debug, Clone, PartialEq)]
pub enum LpcValue {
    Int(i32),
    String(String),
    Float(f64),
    Array(Vec<LpcValue>),
    Mapping(Vec<(LpcValue, LpcValue)>),
    Buffer(Vec<u8>),
}

impl LpcValue {
    /// Integer zero — the wire representation of null.
    pub const NULL: LpcValue = LpcValue::Int(0);

    pub fn str(s: impl Into<String>) -> Self {
        LpcValue::String(s.into())
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            LpcValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            LpcValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[LpcValue]> {
        match self {
            LpcValue::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&[(LpcValue, LpcValue)]> {
        match self {
            LpcValue::Mapping(pairs) => Some(pairs),
            _ => None,
        }
    }

    /// True for integer zero, the wire null.
    pub fn is_null(&self) -> bool {
        matches!(self, LpcValue::Int(0))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            LpcValue::Int(_) => "int",
            LpcValue::String(_) => "string",
            LpcValue::Float(_) => "float",
            LpcValue::Array(_) => "array",
            LpcValue::Mapping(_) => "mapping",
            LpcValue::Buffer(_) => "buffer",
        }
    }
}

impl fmt::Display for LpcValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LpcValue::Int(n) => write!(f, "{n}"),
            LpcValue::String(s) => write!(f, "{s:?}"),
            LpcValue::Float(x) => write!(f, "{x}"),
            LpcValue::Array(items) => {
                write!(f, "({{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "}})")
            }
            LpcValue::Mapping(pairs) => {
                write!(f, "([")?;
                for (i, (k, v)) in pairs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{k}:{v}")?;
                }
                write!(f, "])")
            }
            LpcValue::Buffer(bytes) => write!(f, "<buffer {} bytes>", bytes.len()),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Errors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum LpcError {
    #[error("truncated input: needed {needed} more bytes at offset {offset}")]
    Truncated { offset: usize, needed: usize },

    #[error("negative length {length} at offset {offset}")]
    NegativeLength { offset: usize, length: i64 },

    #[error("length {length} at offset {offset} exceeds {remaining} remaining bytes")]
    LengthExceedsInput {
        offset: usize,
        length: usize,
        remaining: usize,
    },

    #[error("unknown type tag {tag} at offset {offset}")]
    UnknownTag { offset: usize, tag: u8 },

    #[error("nesting exceeds {MAX_DEPTH} levels at offset {offset}")]
    TooDeep { offset: usize },

    #[error("invalid UTF-8 in string at offset {offset}")]
    InvalidUtf8 { offset: usize },

    #[error("{trailing} trailing bytes after the top-level value")]
    TrailingBytes { trailing: usize },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Encode
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Serialize a value into a fresh buffer.
pub fn encode(value: &LpcValue) -> Vec<u8> {
    let mut out = Vec::with_capacity(64);
    encode_into(value, &mut out);
    out
}

/// Serialize a value, appending to `out`.
pub fn encode_into(value: &LpcValue, out: &mut Vec<u8>) {
    match value {
        LpcValue::Int(n) => {
            out.push(TAG_INT);
            out.extend_from_slice(&n.to_be_bytes());
        }
        LpcValue::String(s) => {
            out.push(TAG_STRING);
            out.extend_from_slice(&(s.len() as u32).to_be_bytes());
            out.extend_from_slice(s.as_bytes());
        }
        LpcValue::Float(x) => {
            out.push(TAG_FLOAT);
            out.extend_from_slice(&x.to_be_bytes());
        }
        LpcValue::Array(items) => {
            out.push(TAG_ARRAY);
            out.extend_from_slice(&(items.len() as u32).to_be_bytes());
            for item in items {
                encode_into(item, out);
            }
        }
        LpcValue::Mapping(pairs) => {
            out.push(TAG_MAPPING);
            out.extend_from_slice(&(pairs.len() as u32).to_be_bytes());
            for (k, v) in pairs {
                encode_into(k, out);
                encode_into(v, out);
            }
        }
        LpcValue::Buffer(bytes) => {
            out.push(TAG_BUFFER);
            out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
            out.extend_from_slice(bytes);
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Decode
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Decode exactly one value spanning the whole input.
pub fn decode(input: &[u8]) -> Result<LpcValue, LpcError> {
    let mut cursor = Cursor { buf: input, pos: 0 };
    let value = cursor.value(0)?;
    let trailing = input.len() - cursor.pos;
    if trailing > 0 {
        return Err(LpcError::TrailingBytes { trailing });
    }
    Ok(value)
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], LpcError> {
        let remaining = self.buf.len() - self.pos;
        if remaining < n {
            return Err(LpcError::Truncated {
                offset: self.pos,
                needed: n - remaining,
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn byte(&mut self) -> Result<u8, LpcError> {
        Ok(self.take(1)?[0])
    }

    /// Read a u32 length field, rejecting values that would be negative
    /// as an i32 or that exceed the remaining input.
    fn length(&mut self) -> Result<usize, LpcError> {
        let offset = self.pos;
        let raw = u32::from_be_bytes(self.take(4)?.try_into().unwrap());
        if raw > i32::MAX as u32 {
            return Err(LpcError::NegativeLength {
                offset,
                length: raw as i32 as i64,
            });
        }
        let length = raw as usize;
        let remaining = self.buf.len() - self.pos;
        if length > remaining {
            return Err(LpcError::LengthExceedsInput {
                offset,
                length,
                remaining,
            });
        }
        Ok(length)
    }

    /// Like [`Cursor::length`] but for element counts, where the bound is
    /// one byte of payload per element at minimum.
    fn count(&mut self) -> Result<usize, LpcError> {
        self.length()
    }

    fn value(&mut self, depth: usize) -> Result<LpcValue, LpcError> {
        if depth > MAX_DEPTH {
            return Err(LpcError::TooDeep { offset: self.pos });
        }
        let offset = self.pos;
        let tag = self.byte()?;
        match tag {
            TAG_STRING => {
                let len = self.length()?;
                let start = self.pos;
                let bytes = self.take(len)?;
                let s = std::str::from_utf8(bytes)
                    .map_err(|_| LpcError::InvalidUtf8 { offset: start })?;
                Ok(LpcValue::String(s.to_owned()))
            }
            TAG_INT => {
                let bytes = self.take(4)?;
                Ok(LpcValue::Int(i32::from_be_bytes(bytes.try_into().unwrap())))
            }
            TAG_ARRAY => {
                let count = self.count()?;
                let mut items = Vec::with_capacity(count.min(1_024));
                for _ in 0..count {
                    items.push(self.value(depth + 1)?);
                }
                Ok(LpcValue::Array(items))
            }
            TAG_MAPPING => {
                let count = self.count()?;
                let mut pairs = Vec::with_capacity(count.min(1_024));
                for _ in 0..count {
                    let key = self.value(depth + 1)?;
                    let value = self.value(depth + 1)?;
                    pairs.push((key, value));
                }
                Ok(LpcValue::Mapping(pairs))
            }
            TAG_FLOAT => {
                let bytes = self.take(8)?;
                Ok(LpcValue::Float(f64::from_be_bytes(bytes.try_into().unwrap())))
            }
            TAG_BUFFER => {
                let len = self.length()?;
                Ok(LpcValue::Buffer(self.take(len)?.to_vec()))
            }
            tag => Err(LpcError::UnknownTag { offset, tag }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(value: LpcValue) {
        let encoded = encode(&value);
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn round_trip_scalars() {
        round_trip(LpcValue::Int(0));
        round_trip(LpcValue::Int(-1));
        round_trip(LpcValue::Int(i32::MAX));
        round_trip(LpcValue::Int(i32::MIN));
        round_trip(LpcValue::str(""));
        round_trip(LpcValue::str("hello"));
        round_trip(LpcValue::str("héllo wörld ☃"));
        round_trip(LpcValue::Float(0.0));
        round_trip(LpcValue::Float(-123.456));
        round_trip(LpcValue::Buffer(vec![]));
        round_trip(LpcValue::Buffer(vec![0, 255, 128]));
    }

    #[test]
    fn round_trip_nested() {
        round_trip(LpcValue::Array(vec![
            LpcValue::str("tell"),
            LpcValue::Int(200),
            LpcValue::Array(vec![LpcValue::Int(1), LpcValue::str("x")]),
        ]));
        round_trip(LpcValue::Mapping(vec![
            (LpcValue::str("tell"), LpcValue::Int(1)),
            (LpcValue::str("channel"), LpcValue::Int(1)),
            (LpcValue::Int(7), LpcValue::Array(vec![LpcValue::Float(1.5)])),
        ]));
    }

    #[test]
    fn mapping_order_is_preserved() {
        let mapping = LpcValue::Mapping(vec![
            (LpcValue::str("z"), LpcValue::Int(1)),
            (LpcValue::str("a"), LpcValue::Int(2)),
        ]);
        let decoded = decode(&encode(&mapping)).unwrap();
        let pairs = decoded.as_mapping().unwrap();
        assert_eq!(pairs[0].0.as_str(), Some("z"));
        assert_eq!(pairs[1].0.as_str(), Some("a"));
    }

    #[test]
    fn string_encoding_layout() {
        // tag 0, u32be length, bytes, no terminator.
        let encoded = encode(&LpcValue::str("hi"));
        assert_eq!(encoded, vec![0, 0, 0, 0, 2, b'h', b'i']);
    }

    #[test]
    fn int_encoding_layout() {
        let encoded = encode(&LpcValue::Int(200));
        assert_eq!(encoded, vec![1, 0, 0, 0, 200]);
        let encoded = encode(&LpcValue::Int(-1));
        assert_eq!(encoded, vec![1, 255, 255, 255, 255]);
    }

    #[test]
    fn truncated_string_rejected() {
        let mut encoded = encode(&LpcValue::str("hello"));
        encoded.truncate(encoded.len() - 2);
        assert!(matches!(
            decode(&encoded),
            Err(LpcError::LengthExceedsInput { .. })
        ));
    }

    #[test]
    fn truncated_int_rejected() {
        assert!(matches!(
            decode(&[TAG_INT, 0, 0]),
            Err(LpcError::Truncated { .. })
        ));
    }

    #[test]
    fn negative_length_rejected() {
        // 0xFFFFFFFF as a string length is negative as an i32.
        let input = [TAG_STRING, 0xFF, 0xFF, 0xFF, 0xFF];
        assert!(matches!(
            decode(&input),
            Err(LpcError::NegativeLength { .. })
        ));
    }

    #[test]
    fn length_past_end_rejected() {
        let input = [TAG_STRING, 0, 0, 0, 10, b'a'];
        assert!(matches!(
            decode(&input),
            Err(LpcError::LengthExceedsInput {
                length: 10,
                remaining: 1,
                ..
            })
        ));
    }

    #[test]
    fn unknown_tag_rejected() {
        assert!(matches!(
            decode(&[9, 0, 0]),
            Err(LpcError::UnknownTag { tag: 9, .. })
        ));
    }

    #[test]
    fn deep_nesting_rejected() {
        // 70 nested single-element arrays around an int.
        let mut encoded = Vec::new();
        for _ in 0..70 {
            encoded.push(TAG_ARRAY);
            encoded.extend_from_slice(&1u32.to_be_bytes());
        }
        encoded.push(TAG_INT);
        encoded.extend_from_slice(&0i32.to_be_bytes());
        assert!(matches!(decode(&encoded), Err(LpcError::TooDeep { .. })));
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut encoded = encode(&LpcValue::Int(1));
        encoded.push(0);
        assert!(matches!(
            decode(&encoded),
            Err(LpcError::TrailingBytes { trailing: 1 })
        ));
    }

    #[test]
    fn invalid_utf8_rejected() {
        let input = [TAG_STRING, 0, 0, 0, 2, 0xC3, 0x28];
        assert!(matches!(decode(&input), Err(LpcError::InvalidUtf8 { .. })));
    }

    #[test]
    fn int_zero_is_null() {
        assert!(LpcValue::Int(0).is_null());
        assert!(!LpcValue::Int(1).is_null());
        assert!(!LpcValue::str("").is_null());
    }
}
