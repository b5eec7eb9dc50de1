//! Producer ingestion
//!
//! Reads frames from the producer connection and publishes each one to the
//! registry. A decode failure ends the session; a partially received frame
//! is never forwarded.

use std::net::SocketAddr;

use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::protocol::FrameReader;
use crate::registry::RegistryHandle;
use crate::stats::IngestStats;

/// One producer connection being relayed
pub struct Ingestion<R> {
    session_id: u64,
    peer_addr: SocketAddr,
    reader: FrameReader<R>,
    registry: RegistryHandle,
    stats: IngestStats,
}

impl<R: AsyncRead + Unpin> Ingestion<R> {
    /// Create a new ingestion session
    pub fn new(
        session_id: u64,
        peer_addr: SocketAddr,
        reader: FrameReader<R>,
        registry: RegistryHandle,
    ) -> Self {
        Self {
            session_id,
            peer_addr,
            reader,
            registry,
            stats: IngestStats::new(),
        }
    }

    /// Relay frames until the stream ends, fails, or `cancel` fires
    ///
    /// A clean end of stream or cancellation returns the session's stats.
    /// The connection is closed when this returns.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<IngestStats> {
        tracing::info!(
            session_id = self.session_id,
            peer = %self.peer_addr,
            "Producer connected"
        );

        let result = self.pump(&cancel).await;

        match &result {
            Ok(()) => tracing::info!(
                session_id = self.session_id,
                frames = self.stats.frames,
                bytes = self.stats.bytes,
                duration_secs = self.stats.duration().as_secs(),
                "Producer disconnected"
            ),
            Err(e) => tracing::warn!(
                session_id = self.session_id,
                error = %e,
                frames = self.stats.frames,
                bytes = self.stats.bytes,
                "Producer stream failed"
            ),
        }

        result.map(|()| self.stats)
    }

    async fn pump(&mut self, cancel: &CancellationToken) -> Result<()> {
        loop {
            let frame = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!(session_id = self.session_id, "Producer session cancelled");
                    return Ok(());
                }
                frame = self.reader.read_frame() => frame?,
            };

            let Some(frame) = frame else {
                return Ok(());
            };

            self.stats.on_frame(&frame);
            if frame.is_codec_config() {
                tracing::debug!(
                    session_id = self.session_id,
                    size = frame.len(),
                    "Codec configuration frame"
                );
            } else {
                tracing::trace!(
                    session_id = self.session_id,
                    pts = frame.pts,
                    size = frame.len(),
                    "Frame received"
                );
            }

            // Waits while the registry's queue is full
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                sent = self.registry.broadcast(frame) => sent?,
            }
        }
    }

    /// Statistics so far
    pub fn stats(&self) -> &IngestStats {
        &self.stats
    }
}
