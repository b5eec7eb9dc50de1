//! Frame type shared by ingestion and fan-out

use bytes::{Bytes, BytesMut};

use super::codec::encode_frame;
use super::constants::{CODEC_CONFIG_PTS, FRAME_HEADER_SIZE};

/// One discrete unit of payload read from the producer
///
/// Cheap to clone: the payload is reference counted, so every consumer
/// shares the same allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Presentation timestamp as sent by the producer
    pub pts: u64,
    /// Raw payload bytes
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame
    pub fn new(pts: u64, payload: impl Into<Bytes>) -> Self {
        Self {
            pts,
            payload: payload.into(),
        }
    }

    /// Create a codec configuration frame (sent by the producer with pts -1)
    pub fn codec_config(payload: impl Into<Bytes>) -> Self {
        Self::new(CODEC_CONFIG_PTS, payload)
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Check if the payload is empty
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Check if this frame carries decoder configuration rather than media
    pub fn is_codec_config(&self) -> bool {
        self.pts == CODEC_CONFIG_PTS
    }

    /// Size of this frame on the producer wire (header + payload)
    pub fn wire_size(&self) -> usize {
        FRAME_HEADER_SIZE + self.payload.len()
    }

    /// Encode header and payload into a new buffer
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.wire_size());
        encode_frame(self, &mut buf);
        buf.freeze()
    }
}
