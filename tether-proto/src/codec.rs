//! Self-delimiting tagged value codec over any `Read`/`Write` stream.
//!
//! Every value starts with a one-byte tag. Fixed-width payloads follow
//! directly (big-endian); strings carry a `u32` byte length and sequences a
//! `u32` element count. There is no outer frame: one encoded value is one
//! message, and a decoding failure leaves the stream unusable.

use std::io::{self, Read, Write};

use crate::value::{Handle, WireValue};

/// Tag of `WireValue::Unit`.
const TAG_UNIT: u8 = b'n';
/// Tag of a one-byte boolean.
const TAG_BOOL: u8 = b'b';
/// Tag of an 8-byte big-endian integer.
const TAG_INT: u8 = b'i';
/// Tag of an 8-byte big-endian float.
const TAG_FLOAT: u8 = b'f';
/// Tag of a length-prefixed UTF-8 string.
const TAG_STR: u8 = b's';
/// Tag of a tuple.
const TAG_TUPLE: u8 = b'(';
/// Tag of a list.
const TAG_LIST: u8 = b'[';
/// Tag of a set.
const TAG_SET: u8 = b'{';
/// Tag of a map; the length counts pairs.
const TAG_MAP: u8 = b'<';
/// Tag of an object handle.
const TAG_HANDLE: u8 = b'w';

/// Default ceiling on sequence nesting accepted from a peer.
pub const DEFAULT_MAX_DEPTH: usize = 128;

/// Default ceiling on string byte length and sequence element count (16 MiB).
pub const DEFAULT_MAX_LEN: u32 = 16 * 1024 * 1024;

/// Bounds applied while decoding untrusted input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub struct Limits {
    /// Maximum number of nested sequences.
    pub max_depth: usize,
    /// Maximum string length in bytes and sequence length in elements.
    pub max_len: u32,
}

impl Limits {
    /// Bounds with the given nesting depth and length ceiling.
    pub const fn new(max_depth: usize, max_len: u32) -> Self {
        Self { max_depth, max_len }
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH, DEFAULT_MAX_LEN)
    }
}

/// Decoding failure.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CodecError {
    /// The peer closed the stream cleanly between two values.
    #[error("stream closed")]
    Closed,
    /// The stream ended in the middle of a value.
    #[error("truncated stream")]
    Truncated,
    /// A tag byte outside the known set.
    #[error("unknown tag 0x{0:02x}")]
    UnknownTag(u8),
    /// A boolean payload other than 0 or 1.
    #[error("invalid boolean byte 0x{0:02x}")]
    InvalidBool(u8),
    /// String payload is not UTF-8.
    #[error("string payload is not valid UTF-8")]
    InvalidUtf8,
    /// Sequences nested deeper than [`Limits::max_depth`].
    #[error("sequence nesting exceeds {0} levels")]
    TooDeep(usize),
    /// Length prefix larger than [`Limits::max_len`].
    #[error("length {len} exceeds limit {limit}")]
    TooLong {
        /// Length announced by the peer.
        len: u32,
        /// Configured ceiling.
        limit: u32,
    },
    /// Underlying stream failure.
    #[error(transparent)]
    Io(io::Error),
}

impl CodecError {
    /// Returns `true` for failures caused by the byte content rather than the
    /// transport.
    pub const fn is_malformed(&self) -> bool {
        !matches!(self, Self::Closed | Self::Io(_))
    }
}

impl From<io::Error> for CodecError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            Self::Truncated
        } else {
            Self::Io(e)
        }
    }
}

/// Encodes `value` and writes it to `w` in one write, then flushes.
pub fn encode<W: Write>(w: &mut W, value: &WireValue) -> io::Result<()> {
    let mut buf = Vec::with_capacity(64);
    encode_into(&mut buf, value)?;
    w.write_all(&buf)?;
    w.flush()
}

/// Appends the encoding of `value` to `buf`.
pub fn encode_into(buf: &mut Vec<u8>, value: &WireValue) -> io::Result<()> {
    match value {
        WireValue::Unit => buf.push(TAG_UNIT),
        WireValue::Bool(b) => {
            buf.push(TAG_BOOL);
            buf.push(u8::from(*b));
        }
        WireValue::Int(n) => {
            buf.push(TAG_INT);
            buf.extend_from_slice(&n.to_be_bytes());
        }
        WireValue::Float(x) => {
            buf.push(TAG_FLOAT);
            buf.extend_from_slice(&x.to_be_bytes());
        }
        WireValue::Str(s) => {
            buf.push(TAG_STR);
            put_len(buf, s.len())?;
            buf.extend_from_slice(s.as_bytes());
        }
        WireValue::Tuple(items) => put_seq(buf, TAG_TUPLE, items)?,
        WireValue::List(items) => put_seq(buf, TAG_LIST, items)?,
        WireValue::Set(items) => put_seq(buf, TAG_SET, items)?,
        WireValue::Map(pairs) => {
            buf.push(TAG_MAP);
            put_len(buf, pairs.len())?;
            for (k, v) in pairs {
                encode_into(buf, k)?;
                encode_into(buf, v)?;
            }
        }
        WireValue::Handle(h) => {
            buf.push(TAG_HANDLE);
            buf.extend_from_slice(&h.0.to_be_bytes());
        }
    }
    Ok(())
}

/// Appends a u32 length prefix.
fn put_len(buf: &mut Vec<u8>, len: usize) -> io::Result<()> {
    let len = u32::try_from(len)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "length exceeds u32::MAX"))?;
    buf.extend_from_slice(&len.to_be_bytes());
    Ok(())
}

/// Appends a tagged, length-prefixed sequence.
fn put_seq(buf: &mut Vec<u8>, tag: u8, items: &[WireValue]) -> io::Result<()> {
    buf.push(tag);
    put_len(buf, items.len())?;
    items.iter().try_for_each(|item| encode_into(buf, item))
}

/// Reads exactly one value from `r`.
///
/// Returns [`CodecError::Closed`] if the stream ends before the first byte,
/// and [`CodecError::Truncated`] if it ends anywhere after that.
pub fn decode(r: &mut impl Read, limits: &Limits) -> Result<WireValue, CodecError> {
    let mut tag = [0u8; 1];
    loop {
        match r.read(&mut tag) {
            Ok(0) => return Err(CodecError::Closed),
            Ok(_) => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(CodecError::Io(e)),
        }
    }
    Decoder { r, limits }.value(tag[0], 0)
}

/// Decodes one value from an in-memory buffer, rejecting trailing bytes.
pub fn decode_slice(bytes: &[u8], limits: &Limits) -> Result<WireValue, CodecError> {
    let mut cursor = io::Cursor::new(bytes);
    let value = decode(&mut cursor, limits)?;
    if usize::try_from(cursor.position()).ok() == Some(bytes.len()) {
        Ok(value)
    } else {
        Err(CodecError::Io(io::Error::new(
            io::ErrorKind::InvalidData,
            "trailing bytes after value",
        )))
    }
}

/// Recursive-descent reader state.
struct Decoder<'a, R> {
    /// Source stream.
    r: &'a mut R,
    /// Bounds for this decode.
    limits: &'a Limits,
}

impl<R: Read> Decoder<'_, R> {
    /// Reads the body of a value whose tag is already consumed.
    fn value(&mut self, tag: u8, depth: usize) -> Result<WireValue, CodecError> {
        Ok(match tag {
            TAG_UNIT => WireValue::Unit,
            TAG_BOOL => match self.byte()? {
                0 => WireValue::Bool(false),
                1 => WireValue::Bool(true),
                b => return Err(CodecError::InvalidBool(b)),
            },
            TAG_INT => WireValue::Int(i64::from_be_bytes(self.array()?)),
            TAG_FLOAT => WireValue::Float(f64::from_be_bytes(self.array()?)),
            TAG_STR => {
                let len = self.len()?;
                let bytes = self.bytes(len)?;
                WireValue::Str(String::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)?)
            }
            TAG_TUPLE => WireValue::Tuple(self.seq(depth)?),
            TAG_LIST => WireValue::List(self.seq(depth)?),
            TAG_SET => WireValue::Set(self.seq(depth)?),
            TAG_MAP => {
                self.enter(depth)?;
                let len = self.len()?;
                let mut pairs = Vec::with_capacity(len.min(1024) as usize);
                for _ in 0..len {
                    let k = self.nested(depth)?;
                    let v = self.nested(depth)?;
                    pairs.push((k, v));
                }
                WireValue::Map(pairs)
            }
            TAG_HANDLE => WireValue::Handle(Handle(u64::from_be_bytes(self.array()?))),
            other => return Err(CodecError::UnknownTag(other)),
        })
    }

    /// Reads a length-prefixed run of nested values.
    fn seq(&mut self, depth: usize) -> Result<Vec<WireValue>, CodecError> {
        self.enter(depth)?;
        let len = self.len()?;
        // Capacity is capped so a lying length prefix cannot force a huge allocation.
        let mut items = Vec::with_capacity(len.min(1024) as usize);
        for _ in 0..len {
            items.push(self.nested(depth)?);
        }
        Ok(items)
    }

    /// Fails once `depth` reaches the nesting limit.
    fn enter(&self, depth: usize) -> Result<(), CodecError> {
        if depth >= self.limits.max_depth {
            return Err(CodecError::TooDeep(self.limits.max_depth));
        }
        Ok(())
    }

    /// Reads one nested value one level deeper.
    fn nested(&mut self, depth: usize) -> Result<WireValue, CodecError> {
        let tag = self.byte()?;
        self.value(tag, depth + 1)
    }

    /// Reads a single byte.
    fn byte(&mut self) -> Result<u8, CodecError> {
        Ok(self.array::<1>()?[0])
    }

    /// Reads exactly `N` bytes.
    fn array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut buf = [0u8; N];
        self.r.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Reads a length prefix and checks it against the limit.
    fn len(&mut self) -> Result<u32, CodecError> {
        let len = u32::from_be_bytes(self.array()?);
        if len > self.limits.max_len {
            return Err(CodecError::TooLong {
                len,
                limit: self.limits.max_len,
            });
        }
        Ok(len)
    }

    /// Reads `len` bytes; a short read is a truncation.
    fn bytes(&mut self, len: u32) -> Result<Vec<u8>, CodecError> {
        let mut buf = Vec::new();
        (&mut *self.r).take(u64::from(len)).read_to_end(&mut buf)?;
        if buf.len() != len as usize {
            return Err(CodecError::Truncated);
        }
        Ok(buf)
    }
}
