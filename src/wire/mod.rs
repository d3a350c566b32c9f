//! Wire codec for the extfs RPC protocols.
//!
//! All multibyte values travel in big-endian (network) order. Variable-length
//! fields are counted: a `u32` length followed by the raw bytes. Messages are
//! exchanged as length-delimited frames, see [`frame`].

pub mod frame;

use std::fmt;
use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

/// Upper bound on a single frame body.
///
/// Extent payloads dominate: a block plus headers stays far below this.
pub const MAX_FRAME: usize = 1 << 20;

/// Upper bound on any counted string (client ids, directory names).
pub const MAX_STRING: usize = 4096;

/// Upper bound on a counted byte field (extent blobs).
pub const MAX_BYTES: usize = MAX_FRAME - 64;

/// Errors produced while decoding wire data.
#[derive(Debug)]
pub enum Error {
    /// Underlying read failed or the input ended early.
    Io(std::io::Error),
    /// An enum field carried a value outside its discriminant set.
    BadDiscriminant(u32),
    /// A counted field announced a length over its limit.
    TooLong { len: usize, max: usize },
    /// A frame header announced a body over [`MAX_FRAME`].
    FrameTooLarge(usize),
    /// A string field was not valid UTF-8.
    BadString,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "wire read failed: {err}"),
            Error::BadDiscriminant(value) => write!(f, "unknown discriminant {value}"),
            Error::TooLong { len, max } => write!(f, "counted field of {len} bytes exceeds {max}"),
            Error::FrameTooLarge(len) => write!(f, "frame of {len} bytes exceeds {MAX_FRAME}"),
            Error::BadString => write!(f, "string field is not valid UTF-8"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

/// Result of decoding operations.
pub type Result<T> = std::result::Result<T, Error>;

/// A value that can cross the wire in both directions.
pub trait Wire: Sized {
    fn encode(&self, dest: &mut impl Write) -> std::io::Result<()>;
    fn decode(src: &mut impl Read) -> Result<Self>;
}

impl Wire for u32 {
    fn encode(&self, dest: &mut impl Write) -> std::io::Result<()> {
        dest.write_u32::<BigEndian>(*self)
    }

    fn decode(src: &mut impl Read) -> Result<Self> {
        src.read_u32::<BigEndian>().map_err(Error::Io)
    }
}

impl Wire for u64 {
    fn encode(&self, dest: &mut impl Write) -> std::io::Result<()> {
        dest.write_u64::<BigEndian>(*self)
    }

    fn decode(src: &mut impl Read) -> Result<Self> {
        src.read_u64::<BigEndian>().map_err(Error::Io)
    }
}

impl Wire for bool {
    fn encode(&self, dest: &mut impl Write) -> std::io::Result<()> {
        dest.write_u32::<BigEndian>(u32::from(*self))
    }

    fn decode(src: &mut impl Read) -> Result<Self> {
        match u32::decode(src)? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(Error::BadDiscriminant(other)),
        }
    }
}

impl Wire for Vec<u8> {
    fn encode(&self, dest: &mut impl Write) -> std::io::Result<()> {
        counted(dest, self)
    }

    fn decode(src: &mut impl Read) -> Result<Self> {
        let len = bounded_len(&mut *src, MAX_BYTES)?;
        let mut buf = vec![0u8; len];
        src.read_exact(&mut buf).map_err(Error::Io)?;
        Ok(buf)
    }
}

impl Wire for String {
    fn encode(&self, dest: &mut impl Write) -> std::io::Result<()> {
        counted(dest, self.as_bytes())
    }

    fn decode(src: &mut impl Read) -> Result<Self> {
        let len = bounded_len(&mut *src, MAX_STRING)?;
        let mut buf = vec![0u8; len];
        src.read_exact(&mut buf).map_err(Error::Io)?;
        String::from_utf8(buf).map_err(|_| Error::BadString)
    }
}

/// Writes a counted byte field: `u32` length then the bytes.
fn counted(dest: &mut impl Write, bytes: &[u8]) -> std::io::Result<()> {
    let len = u32::try_from(bytes.len()).map_err(|_| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "counted field exceeds u32")
    })?;
    dest.write_u32::<BigEndian>(len)?;
    dest.write_all(bytes)
}

/// Reads a counted field length and enforces its limit.
fn bounded_len(src: &mut impl Read, max: usize) -> Result<usize> {
    let len = u32::decode(src)? as usize;
    if len > max {
        return Err(Error::TooLong { len, max });
    }
    Ok(len)
}

/// Encodes a value into a fresh buffer. Writing to a `Vec` cannot fail.
pub fn to_vec<T: Wire>(value: &T) -> Vec<u8> {
    let mut buf = Vec::new();
    value.encode(&mut buf).expect("Vec writes are infallible");
    buf
}

/// Derives [`Wire`] for a struct, field by field in declaration order.
#[macro_export]
macro_rules! wire_struct {
    ($t:ident, $($field:ident),* $(,)?) => {
        impl $crate::wire::Wire for $t {
            fn encode(&self, dest: &mut impl ::std::io::Write) -> ::std::io::Result<()> {
                $($crate::wire::Wire::encode(&self.$field, &mut *dest)?;)*
                Ok(())
            }

            fn decode(src: &mut impl ::std::io::Read) -> $crate::wire::Result<Self> {
                Ok(Self { $($field: $crate::wire::Wire::decode(&mut *src)?,)* })
            }
        }
    };
}
