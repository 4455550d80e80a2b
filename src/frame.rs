// https://redis.io/docs/reference/protocol-spec

use std::fmt;
use std::io::{self, Cursor};

use bytes::Bytes;
use thiserror::Error as ThisError;

static CRLF: &[u8; 2] = b"\r\n";

// Arrays nested deeper than this are rejected instead of recursing further.
const MAX_DEPTH: usize = 128;

/// How many more bytes a parse attempt needs before a retry can succeed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Needed {
    /// A header line is still missing its terminator; any amount of new data may complete it.
    Unknown,
    /// A length-prefixed body is short by exactly this many bytes.
    Exact(usize),
}

impl fmt::Display for Needed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Needed::Unknown => write!(f, "unknown number of bytes needed"),
            Needed::Exact(n) => write!(f, "{} more bytes needed", n),
        }
    }
}

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("not enough data is available to parse an entire frame ({0})")]
    Incomplete(Needed),
    #[error("invalid frame data type: {0}")]
    InvalidDataType(u8),
    #[error("protocol error; {0}")]
    Malformed(&'static str),
    #[error("stream ended in the middle of a frame")]
    UnexpectedEof,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Incomplete input is the only recoverable outcome: append more bytes and retry.
    pub fn is_incomplete(&self) -> bool {
        matches!(self, Error::Incomplete(_))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    Null,
    Array(Vec<Frame>),
}

// Protocol specification: https://redis.io/docs/reference/protocol-spec/
impl Frame {
    /// Parses one complete value starting at the cursor position and leaves the cursor just
    /// past it. On error the cursor position is unspecified; callers retry from where they
    /// started.
    pub fn parse(src: &mut Cursor<&[u8]>) -> Result<Self, Error> {
        parse_value(src, 0)
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        self.write_to(&mut bytes);
        bytes
    }

    fn write_to(&self, bytes: &mut Vec<u8>) {
        match self {
            Frame::Simple(s) => {
                bytes.push(u8::from(DataType::SimpleString));
                bytes.extend_from_slice(s.as_bytes());
                bytes.extend_from_slice(CRLF);
            }
            Frame::Error(s) => {
                bytes.push(u8::from(DataType::SimpleError));
                bytes.extend_from_slice(s.as_bytes());
                bytes.extend_from_slice(CRLF);
            }
            Frame::Integer(i) => {
                bytes.push(u8::from(DataType::Integer));
                bytes.extend_from_slice(i.to_string().as_bytes());
                bytes.extend_from_slice(CRLF);
            }
            Frame::Bulk(data) => {
                bytes.push(u8::from(DataType::BulkString));
                bytes.extend_from_slice(data.len().to_string().as_bytes());
                bytes.extend_from_slice(CRLF);
                bytes.extend_from_slice(data);
                bytes.extend_from_slice(CRLF);
            }
            // RESP2 null bulk string.
            Frame::Null => {
                bytes.push(u8::from(DataType::BulkString));
                bytes.extend_from_slice(b"-1");
                bytes.extend_from_slice(CRLF);
            }
            Frame::Array(arr) => {
                bytes.push(u8::from(DataType::Array));
                bytes.extend_from_slice(arr.len().to_string().as_bytes());
                bytes.extend_from_slice(CRLF);
                for frame in arr {
                    frame.write_to(bytes);
                }
            }
        }
    }
}

impl From<Frame> for Vec<u8> {
    fn from(frame: Frame) -> Self {
        frame.serialize()
    }
}

fn parse_value(src: &mut Cursor<&[u8]>, depth: usize) -> Result<Frame, Error> {
    // The first byte of every header line identifies the type; the rest of the line is the
    // payload or the length of what follows.
    let line = read_line(src)?;
    let (&first_byte, rest) = line.split_first().ok_or(Error::Malformed("empty line"))?;

    match DataType::try_from(first_byte)? {
        DataType::SimpleString => Ok(Frame::Simple(utf8(rest)?)),
        DataType::SimpleError => Ok(Frame::Error(utf8(rest)?)),
        DataType::Integer => Ok(Frame::Integer(parse_int(rest)?)),
        // $<length>\r\n<data>\r\n
        DataType::BulkString => match parse_len(rest)? {
            None => Ok(Frame::Null),
            Some(len) => read_bulk(src, len).map(Frame::Bulk),
        },
        // *<number-of-elements>\r\n<element-1>...<element-n>
        DataType::Array => {
            let Some(len) = parse_len(rest)? else {
                return Ok(Frame::Null);
            };
            if depth >= MAX_DEPTH {
                return Err(Error::Malformed("arrays nested too deep"));
            }

            // Every element takes at least three bytes, which bounds a hostile length.
            let mut frames = Vec::with_capacity(len.min(remaining(src) / 3));
            for _ in 0..len {
                frames.push(parse_value(src, depth + 1)?);
            }
            Ok(Frame::Array(frames))
        }
    }
}

/// Returns the next line without its CRLF terminator.
fn read_line<'a>(src: &mut Cursor<&'a [u8]>) -> Result<&'a [u8], Error> {
    let buf: &'a [u8] = *src.get_ref();
    let start = src.position() as usize;

    let newline = buf[start..]
        .iter()
        .position(|&b| b == b'\n')
        .map(|index| start + index)
        .ok_or(Error::Incomplete(Needed::Unknown))?;

    if newline == start || buf[newline - 1] != b'\r' {
        return Err(Error::Malformed("bad line terminator"));
    }

    src.set_position((newline + 1) as u64);
    Ok(&buf[start..newline - 1])
}

fn read_bulk(src: &mut Cursor<&[u8]>, len: usize) -> Result<Bytes, Error> {
    let buf: &[u8] = *src.get_ref();
    let start = src.position() as usize;

    let required = len
        .checked_add(CRLF.len())
        .ok_or(Error::Malformed("bulk string length out of range"))?;
    let available = buf.len() - start;
    if available < required {
        return Err(Error::Incomplete(Needed::Exact(required - available)));
    }

    let end = start + len;
    if &buf[end..end + CRLF.len()] != CRLF {
        return Err(Error::Malformed("bad bulk string format"));
    }

    src.set_position((end + CRLF.len()) as u64);
    Ok(Bytes::copy_from_slice(&buf[start..end]))
}

fn remaining(src: &Cursor<&[u8]>) -> usize {
    src.get_ref().len().saturating_sub(src.position() as usize)
}

fn utf8(bytes: &[u8]) -> Result<String, Error> {
    String::from_utf8(bytes.to_vec()).map_err(|_| Error::Malformed("invalid utf-8 in line"))
}

/// Parses a bulk string or array length. `-1` is the null marker and yields `None`.
fn parse_len(p: &[u8]) -> Result<Option<usize>, Error> {
    if p.is_empty() {
        return Err(Error::Malformed("malformed length"));
    }
    if p == b"-1" {
        return Ok(None);
    }

    let mut n: usize = 0;
    for &b in p {
        if !b.is_ascii_digit() {
            return Err(Error::Malformed("illegal bytes in length"));
        }
        n = n
            .checked_mul(10)
            .and_then(|n| n.checked_add(usize::from(b - b'0')))
            .ok_or(Error::Malformed("length out of range"))?;
    }
    Ok(Some(n))
}

fn parse_int(p: &[u8]) -> Result<i64, Error> {
    let (negative, digits) = match p.split_first() {
        Some((b'-', digits)) => (true, digits),
        _ => (false, p),
    };
    if digits.is_empty() {
        return Err(Error::Malformed("malformed integer"));
    }

    let mut n: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(Error::Malformed("illegal bytes in integer"));
        }
        let digit = i64::from(b - b'0');
        // Accumulate on the negative side so that i64::MIN is representable.
        n = n
            .checked_mul(10)
            .and_then(|n| n.checked_sub(digit))
            .ok_or(Error::Malformed("integer out of range"))?;
    }

    if negative {
        Ok(n)
    } else {
        n.checked_neg().ok_or(Error::Malformed("integer out of range"))
    }
}

#[derive(Debug)]
enum DataType {
    SimpleString, // '+'
    SimpleError,  // '-'
    Integer,      // ':'
    BulkString,   // '$'
    Array,        // '*'
}

impl TryFrom<u8> for DataType {
    type Error = Error;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            b'+' => Ok(Self::SimpleString),
            b'-' => Ok(Self::SimpleError),
            b':' => Ok(Self::Integer),
            b'$' => Ok(Self::BulkString),
            b'*' => Ok(Self::Array),
            _ => Err(Error::InvalidDataType(byte)),
        }
    }
}

impl From<DataType> for u8 {
    fn from(value: DataType) -> Self {
        match value {
            DataType::SimpleString => b'+',
            DataType::SimpleError => b'-',
            DataType::Integer => b':',
            DataType::BulkString => b'$',
            DataType::Array => b'*',
        }
    }
}
