//! Statistics for producer sessions, consumers and the registry

use std::time::{Duration, Instant};

use crate::protocol::Frame;

/// Statistics for one producer connection
#[derive(Debug, Clone)]
pub struct IngestStats {
    /// When the producer connected
    pub started_at: Instant,
    /// Frames decoded and broadcast
    pub frames: u64,
    /// Payload bytes decoded
    pub bytes: u64,
    /// Codec configuration frames seen
    pub codec_config_frames: u64,
    /// Pts of the last media frame
    pub last_pts: Option<u64>,
}

impl IngestStats {
    /// Create a new stats tracker starting now
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            frames: 0,
            bytes: 0,
            codec_config_frames: 0,
            last_pts: None,
        }
    }

    /// Record a decoded frame
    pub fn on_frame(&mut self, frame: &Frame) {
        self.frames += 1;
        self.bytes += frame.len() as u64;

        if frame.is_codec_config() {
            self.codec_config_frames += 1;
        } else {
            self.last_pts = Some(frame.pts);
        }
    }

    /// Time since the producer connected
    pub fn duration(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Average payload bitrate (bits/sec), if at least a second has passed
    pub fn bitrate(&self) -> Option<u64> {
        let secs = self.duration().as_secs();
        if secs > 0 {
            Some((self.bytes * 8) / secs)
        } else {
            None
        }
    }
}

impl Default for IngestStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics for one consumer's writer
#[derive(Debug, Clone)]
pub struct ConsumerStats {
    /// When the consumer was registered
    pub connected_at: Instant,
    /// Frames written in full
    pub frames_sent: u64,
    /// Payload bytes written
    pub bytes_sent: u64,
}

impl ConsumerStats {
    /// Create a new stats tracker starting now
    pub fn new() -> Self {
        Self {
            connected_at: Instant::now(),
            frames_sent: 0,
            bytes_sent: 0,
        }
    }

    /// Record a frame written to the consumer
    pub fn on_frame_sent(&mut self, size: usize) {
        self.frames_sent += 1;
        self.bytes_sent += size as u64;
    }

    /// Time since registration
    pub fn duration(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl Default for ConsumerStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of the registry, taken inside the control loop
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Number of registered consumers
    pub consumer_count: usize,
    /// Identities of registered consumers, sorted
    pub consumers: Vec<String>,
    /// Broadcast events processed
    pub frames_broadcast: u64,
    /// Payload bytes broadcast (counted once per frame)
    pub bytes_broadcast: u64,
    /// Frames handed to consumer queues
    pub deliveries: u64,
    /// Consumers removed because they lagged or failed
    pub consumers_dropped: u64,
}

impl RegistryStats {
    /// Check if a consumer is registered
    pub fn contains(&self, identity: &str) -> bool {
        self.consumers.iter().any(|c| c == identity)
    }
}
