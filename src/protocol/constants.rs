//! Wire protocol constants

/// Size of the per-frame header: 8-byte pts + 4-byte payload length
pub const FRAME_HEADER_SIZE: usize = 12;

/// Pts value the producer writes for codec configuration units (-1 as i64)
pub const CODEC_CONFIG_PTS: u64 = u64::MAX;

/// Default upper bound on a declared payload length (16MB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Default producer port
pub const DEFAULT_PRODUCER_PORT: u16 = 54000;

/// Default consumer (player) port
pub const DEFAULT_CONSUMER_PORT: u16 = 54001;
