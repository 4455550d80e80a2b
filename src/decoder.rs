use std::io::Cursor;

use bytes::{Buf, BytesMut};
use tracing::trace;

use crate::frame::{Error, Frame, Needed};

/// Incremental RESP decoder for one byte stream.
///
/// Bytes handed to [`feed`](RespDecoder::feed) are copied into a buffer the decoder owns, so
/// the caller may reuse its read buffer right away. [`decode`](RespDecoder::decode) parses one
/// top-level value from the front of that buffer:
///
/// - on success only the consumed bytes are dropped; anything after them belongs to the
///   next value and stays buffered,
/// - on `Error::Incomplete` nothing is dropped and [`needed`](RespDecoder::needed) holds the
///   shortfall; feed more bytes and call `decode` again, it re-parses the pending value from
///   its first byte,
/// - any other error means the stream can no longer be framed and must be abandoned.
///
/// Not thread-safe; keep one decoder per connection.
#[derive(Debug)]
pub struct RespDecoder {
    buffer: BytesMut,
    needed: Option<Needed>,
    max_frame_size: usize,
}

impl RespDecoder {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            needed: None,
            max_frame_size,
        }
    }

    /// Appends newly received bytes.
    pub fn feed(&mut self, data: &[u8]) {
        if let Some(Needed::Exact(n)) = self.needed {
            let room = self.max_frame_size.saturating_sub(self.buffer.len());
            self.buffer.reserve(n.min(room).max(data.len()));
        }
        self.buffer.extend_from_slice(data);
    }

    /// Decodes the next value from the buffered bytes.
    pub fn decode(&mut self) -> Result<Frame, Error> {
        let mut cursor = Cursor::new(&self.buffer[..]);

        match Frame::parse(&mut cursor) {
            Ok(frame) => {
                let consumed = cursor.position() as usize;
                self.buffer.advance(consumed);
                self.needed = None;
                Ok(frame)
            }
            Err(Error::Incomplete(needed)) => {
                if exceeds_limit(self.buffer.len(), needed, self.max_frame_size) {
                    return Err(Error::Malformed("frame size exceeds limit"));
                }
                trace!("incomplete frame, {}", needed);
                self.needed = Some(needed);
                Err(Error::Incomplete(needed))
            }
            Err(err) => Err(err),
        }
    }

    /// Shortfall reported by the last incomplete `decode`, cleared by a successful one.
    pub fn needed(&self) -> Option<Needed> {
        self.needed
    }

    /// Number of bytes buffered and not yet decoded.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Call once the underlying stream has ended. Leftover bytes mean the peer went away in
    /// the middle of a value.
    pub fn finish(&self) -> Result<(), Error> {
        if self.buffer.is_empty() {
            Ok(())
        } else {
            Err(Error::UnexpectedEof)
        }
    }
}

/// Whether a pending value, once complete, would be larger than `max_frame_size`. A declared
/// bulk length counts in full as soon as its header has been parsed.
pub(crate) fn exceeds_limit(buffered: usize, needed: Needed, max_frame_size: usize) -> bool {
    let pending = match needed {
        Needed::Exact(n) => buffered.saturating_add(n),
        Needed::Unknown => buffered,
    };
    pending > max_frame_size
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    fn decoder() -> RespDecoder {
        RespDecoder::new(512 * 1024 * 1024)
    }

    #[test]
    fn decode_byte_at_a_time() {
        let message = b"*2\r\n*3\r\n:1\r\n:2\r\n:3\r\n*2\r\n+Foo\r\n$6\r\nfoobar\r\n";
        let expected = Frame::Array(vec![
            Frame::Array(vec![
                Frame::Integer(1),
                Frame::Integer(2),
                Frame::Integer(3),
            ]),
            Frame::Array(vec![
                Frame::Simple("Foo".to_string()),
                Frame::Bulk(Bytes::from("foobar")),
            ]),
        ]);

        let mut whole = decoder();
        whole.feed(message);
        assert_eq!(whole.decode().unwrap(), expected);

        let mut bytewise = decoder();
        let (last, prefix) = message.split_last().unwrap();
        for byte in prefix {
            bytewise.feed(&[*byte]);
            assert!(bytewise.decode().unwrap_err().is_incomplete());
        }
        bytewise.feed(&[*last]);
        assert_eq!(bytewise.decode().unwrap(), expected);
        assert_eq!(bytewise.buffered(), 0);
    }

    #[test]
    fn decode_random_fragments() {
        let message = b"*3\r\n$3\r\nSET\r\n$5\r\nmykey\r\n$7\r\nmyvalue\r\n";
        let expected = Frame::Array(vec![
            Frame::Bulk(Bytes::from("SET")),
            Frame::Bulk(Bytes::from("mykey")),
            Frame::Bulk(Bytes::from("myvalue")),
        ]);
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..100 {
            let mut decoder = decoder();
            let mut rest = &message[..];
            let mut decoded = None;

            while !rest.is_empty() {
                let n = rng.gen_range(1..=rest.len());
                let (chunk, tail) = rest.split_at(n);
                rest = tail;
                decoder.feed(chunk);

                match decoder.decode() {
                    Ok(frame) => decoded = Some(frame),
                    Err(err) => assert!(err.is_incomplete(), "unexpected error: {}", err),
                }
            }

            assert_eq!(decoded, Some(expected.clone()));
        }
    }

    #[test]
    fn decode_reports_exact_bulk_shortfall() {
        let mut decoder = decoder();
        decoder.feed(b"$11\r\nhel");

        let err = decoder.decode().unwrap_err();

        assert!(matches!(err, Error::Incomplete(Needed::Exact(10))));
        assert_eq!(decoder.needed(), Some(Needed::Exact(10)));
        assert_eq!(decoder.buffered(), 8);

        decoder.feed(b"lo worl");
        assert!(matches!(
            decoder.decode(),
            Err(Error::Incomplete(Needed::Exact(3)))
        ));

        decoder.feed(b"d\r\n");
        assert_eq!(decoder.decode().unwrap(), Frame::Bulk(Bytes::from("hello world")));
        assert_eq!(decoder.needed(), None);
    }

    #[test]
    fn decode_reports_unknown_shortfall_for_lines() {
        let mut decoder = decoder();
        decoder.feed(b"+PON");

        assert!(matches!(
            decoder.decode(),
            Err(Error::Incomplete(Needed::Unknown))
        ));
    }

    #[test]
    fn decode_null_bulk_string_consumes_only_the_header() {
        let mut decoder = decoder();
        decoder.feed(b"$-1\r\n:5\r\n");

        assert_eq!(decoder.decode().unwrap(), Frame::Null);
        assert_eq!(decoder.buffered(), 4);
        assert_eq!(decoder.decode().unwrap(), Frame::Integer(5));
    }

    #[test]
    fn decode_keeps_trailing_bytes_for_the_next_value() {
        let mut decoder = decoder();
        decoder.feed(b"*2\r\n$3\r\nfoo\r\n$3\r\nbar\r\n+OK\r\n$5\r\nhel");

        assert_eq!(
            decoder.decode().unwrap(),
            Frame::Array(vec![
                Frame::Bulk(Bytes::from("foo")),
                Frame::Bulk(Bytes::from("bar")),
            ])
        );
        assert_eq!(decoder.decode().unwrap(), Frame::Simple("OK".to_string()));
        assert!(decoder.decode().unwrap_err().is_incomplete());

        decoder.feed(b"lo\r\n");
        assert_eq!(decoder.decode().unwrap(), Frame::Bulk(Bytes::from("hello")));
    }

    #[test]
    fn decode_does_not_alias_the_callers_buffer() {
        let mut decoder = decoder();
        let mut read_buf = *b"$5\r\nhel";

        decoder.feed(&read_buf);
        assert!(decoder.decode().unwrap_err().is_incomplete());

        // The caller reuses its buffer for the next read.
        read_buf.copy_from_slice(b"lo\r\nXXX");
        decoder.feed(&read_buf[..4]);

        assert_eq!(decoder.decode().unwrap(), Frame::Bulk(Bytes::from("hello")));
    }

    #[test]
    fn decode_malformed_is_not_incomplete() {
        let mut decoder = decoder();
        decoder.feed(b"*1\r\n$x\r\n");

        let err = decoder.decode().unwrap_err();

        assert!(!err.is_incomplete());
        assert!(matches!(err, Error::Malformed(_)));
    }

    #[test]
    fn decode_rejects_oversized_frames() {
        let mut decoder = RespDecoder::new(16);
        decoder.feed(b"$100\r\n0123456789abcdef");

        assert!(matches!(
            decoder.decode(),
            Err(Error::Malformed("frame size exceeds limit"))
        ));
    }

    #[test]
    fn decode_rejects_huge_declared_bulk_length() {
        let mut decoder = decoder();
        decoder.feed(b"$99999999999999\r\n");

        assert!(matches!(
            decoder.decode(),
            Err(Error::Malformed("frame size exceeds limit"))
        ));
    }

    #[test]
    fn decode_accepts_a_bulk_string_filling_the_limit() {
        let mut decoder = RespDecoder::new(12);
        decoder.feed(b"$5\r\nhel");
        assert!(decoder.decode().unwrap_err().is_incomplete());

        decoder.feed(b"lo\r\n");

        assert_eq!(decoder.decode().unwrap(), Frame::Bulk(Bytes::from("hello")));
    }

    #[test]
    fn finish_with_leftover_bytes_is_unexpected_eof() {
        let mut decoder = decoder();
        decoder.feed(b"*2\r\n:1\r\n");
        assert!(decoder.decode().unwrap_err().is_incomplete());

        assert!(matches!(decoder.finish(), Err(Error::UnexpectedEof)));
    }

    #[test]
    fn finish_on_a_frame_boundary_is_clean() {
        let mut decoder = decoder();
        decoder.feed(b":1\r\n");
        decoder.decode().unwrap();

        assert!(decoder.finish().is_ok());
    }
}
