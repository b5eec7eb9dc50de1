//! Producer wire protocol
//!
//! The producer sends a sequence of frame units:
//!
//! ```text
//! +----------------+---------------+-----------------+
//! | pts (8, BE u64)| len (4, BE u32)| payload (len)  |
//! +----------------+---------------+-----------------+
//! ```
//!
//! Consumers receive only the payload bytes, concatenated in broadcast order.

pub mod codec;
pub mod constants;
pub mod frame;

pub use codec::{decode_frame, encode_frame, FrameDecoder, FrameReader};
pub use frame::Frame;
