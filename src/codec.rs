use bytes::{Buf, BytesMut};
use std::io::Cursor;
use tokio_util::codec::{Decoder, Encoder};

use crate::decoder::exceeds_limit;
use crate::frame::{Error, Frame};

/// RESP framing for `tokio_util::codec::Framed*`, for callers that prefer pulling frames out
/// of an `AsyncRead` over the callback endpoints.
#[derive(Debug)]
pub struct RespCodec {
    max_frame_size: usize,
}

impl RespCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Decoder for RespCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let mut cursor = Cursor::new(&src[..]);
        let frame = match Frame::parse(&mut cursor) {
            Ok(frame) => frame,
            // Not enough data to parse a frame.
            Err(Error::Incomplete(needed))
                if exceeds_limit(src.len(), needed, self.max_frame_size) =>
            {
                return Err(Error::Malformed("frame size exceeds limit"));
            }
            Err(Error::Incomplete(_)) => return Ok(None),
            Err(err) => return Err(err),
        };

        let position = cursor.position() as usize;

        // Remove the parsed frame from the buffer.
        src.advance(position);

        Ok(Some(frame))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(Error::UnexpectedEof),
        }
    }
}

impl Encoder<Frame> for RespCodec {
    type Error = Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(&frame.serialize());
        Ok(())
    }
}
