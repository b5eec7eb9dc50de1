//! Frame codec
//!
//! Decodes the producer's byte stream into [`Frame`]s. Decoding is split in two
//! layers, the same way the rest of the crate separates parsing from I/O:
//!
//! - [`FrameDecoder`] works on an in-memory buffer and reports when it needs
//!   more bytes.
//! - [`FrameReader`] drives a decoder from any `AsyncRead`, and turns an end
//!   of stream in the middle of a unit into [`CodecError::TruncatedStream`].
//!
//! The length field is not trusted: a declared length above the decoder's
//! `max_frame_size` fails before any payload memory is reserved.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::CodecError;

use super::constants::{DEFAULT_MAX_FRAME_SIZE, FRAME_HEADER_SIZE};
use super::frame::Frame;

/// Default read buffer size for [`FrameReader`] (64KB)
const DEFAULT_READ_BUFFER: usize = 64 * 1024;

/// Decode exactly one frame unit from the start of `buf`
///
/// Any bytes after the unit are ignored.
pub fn decode_frame(buf: &[u8]) -> Result<Frame, CodecError> {
    let (pts, length) = parse_header(buf).ok_or(CodecError::TruncatedStream {
        expected: FRAME_HEADER_SIZE,
        received: buf.len(),
    })?;

    let available = buf.len() - FRAME_HEADER_SIZE;
    if available < length {
        return Err(CodecError::TruncatedStream {
            expected: length,
            received: available,
        });
    }

    let payload = Bytes::copy_from_slice(&buf[FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + length]);
    Ok(Frame::new(pts, payload))
}

/// Append the wire encoding of `frame` to `buf`
///
/// The payload must fit in the 32-bit length field.
pub fn encode_frame(frame: &Frame, buf: &mut BytesMut) {
    debug_assert!(frame.payload.len() <= u32::MAX as usize);

    buf.reserve(frame.wire_size());
    buf.put_u64(frame.pts);
    buf.put_u32(frame.payload.len() as u32);
    buf.put_slice(&frame.payload);
}

/// Read pts and payload length from a header, if the header is complete
fn parse_header(buf: &[u8]) -> Option<(u64, usize)> {
    if buf.len() < FRAME_HEADER_SIZE {
        return None;
    }

    let mut header = &buf[..FRAME_HEADER_SIZE];
    let pts = header.get_u64();
    let length = header.get_u32() as usize;
    Some((pts, length))
}

/// Incremental frame decoder
#[derive(Debug, Clone, Copy)]
pub struct FrameDecoder {
    max_frame_size: usize,
}

impl FrameDecoder {
    /// Create a decoder with the default frame size limit
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a decoder that rejects payloads larger than `max_frame_size`
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// Maximum accepted payload length
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Try to decode one frame from the front of `buf`
    ///
    /// Returns `Ok(None)` if the buffer does not yet hold a complete unit.
    /// On success the unit's bytes are consumed from `buf`.
    pub fn decode(&self, buf: &mut BytesMut) -> Result<Option<Frame>, CodecError> {
        let Some((pts, length)) = parse_header(buf) else {
            return Ok(None);
        };

        if length > self.max_frame_size {
            return Err(CodecError::FrameTooLarge {
                length,
                max: self.max_frame_size,
            });
        }

        let unit_size = FRAME_HEADER_SIZE + length;
        if buf.len() < unit_size {
            buf.reserve(unit_size - buf.len());
            return Ok(None);
        }

        buf.advance(FRAME_HEADER_SIZE);
        let payload = buf.split_to(length).freeze();
        Ok(Some(Frame::new(pts, payload)))
    }

    /// Error describing a stream that ended with `buf` still holding a partial unit
    fn truncation(&self, buf: &[u8]) -> CodecError {
        match parse_header(buf) {
            Some((_, length)) => CodecError::TruncatedStream {
                expected: length,
                received: buf.len() - FRAME_HEADER_SIZE,
            },
            None => CodecError::TruncatedStream {
                expected: FRAME_HEADER_SIZE,
                received: buf.len(),
            },
        }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads frames from a producer connection
pub struct FrameReader<R> {
    reader: R,
    decoder: FrameDecoder,
    buf: BytesMut,
    read_buffer_size: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Create a reader with the default decoder and buffer size
    pub fn new(reader: R) -> Self {
        Self::with_decoder(reader, FrameDecoder::new(), DEFAULT_READ_BUFFER)
    }

    /// Create a reader with a custom decoder and read buffer size
    pub fn with_decoder(reader: R, decoder: FrameDecoder, read_buffer_size: usize) -> Self {
        let read_buffer_size = read_buffer_size.max(FRAME_HEADER_SIZE);
        Self {
            reader,
            decoder,
            buf: BytesMut::with_capacity(read_buffer_size),
            read_buffer_size,
        }
    }

    /// Read the next frame
    ///
    /// Returns `Ok(None)` when the stream ends cleanly between two frames.
    /// A stream that ends inside a unit fails with
    /// [`CodecError::TruncatedStream`]; no partial frame is returned.
    ///
    /// Cancel safe: bytes already read stay buffered for the next call.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>, CodecError> {
        loop {
            if let Some(frame) = self.decoder.decode(&mut self.buf)? {
                return Ok(Some(frame));
            }

            if self.buf.capacity() - self.buf.len() < FRAME_HEADER_SIZE {
                self.buf.reserve(self.read_buffer_size);
            }

            let n = self.reader.read_buf(&mut self.buf).await?;
            if n == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(self.decoder.truncation(&self.buf));
            }
        }
    }

    /// Consume the reader, returning the underlying stream
    pub fn into_inner(self) -> R {
        self.reader
    }
}
