//! Consumer registry control loop
//!
//! The registry's consumer map is owned by a single task. Everything else
//! talks to it through [`RegistryHandle`], so membership changes and
//! broadcasts are applied in one total order without any locking.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle, JoinSet};

use crate::error::ConsumerWriteError;
use crate::protocol::Frame;
use crate::stats::RegistryStats;

use super::config::RegistryConfig;
use super::consumer::Consumer;
use super::event::{RegistryEvent, RegistryHandle};
use super::fanout::{fan_out, run_writer, ConsumerEntry, ConsumerExit};

/// Owner of all consumer state
///
/// Create with [`ConsumerRegistry::new`] and drive with [`ConsumerRegistry::run`],
/// or use [`ConsumerRegistry::spawn`] to do both.
pub struct ConsumerRegistry {
    /// Registered consumers by identity
    consumers: HashMap<String, ConsumerEntry>,

    /// Incoming events
    events: mpsc::Receiver<RegistryEvent>,

    /// One writer task per registered consumer
    writers: JoinSet<ConsumerExit>,

    /// Configuration
    config: RegistryConfig,

    /// Next registration session ID
    next_session_id: u64,

    /// Running counters
    stats: RegistryStats,
}

impl ConsumerRegistry {
    /// Create a registry and the handle used to reach it
    pub fn new(config: RegistryConfig) -> (Self, RegistryHandle) {
        let (tx, rx) = mpsc::channel(config.event_capacity.max(1));

        let registry = Self {
            consumers: HashMap::new(),
            events: rx,
            writers: JoinSet::new(),
            config,
            next_session_id: 1,
            stats: RegistryStats::default(),
        };

        (registry, RegistryHandle::new(tx))
    }

    /// Create a registry and run it on a new task
    pub fn spawn(config: RegistryConfig) -> (RegistryHandle, JoinHandle<()>) {
        let (registry, handle) = Self::new(config);
        let task = tokio::spawn(registry.run());
        (handle, task)
    }

    /// Process events until shutdown or until every handle is dropped
    ///
    /// On exit all consumers are closed; frames already queued for them are
    /// written first, each bounded by the write timeout.
    pub async fn run(mut self) {
        tracing::debug!("Consumer registry started");

        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(RegistryEvent::Register(consumer)) => self.register(consumer),
                    Some(RegistryEvent::Deregister(identity)) => {
                        self.deregister(&identity);
                    }
                    Some(RegistryEvent::Broadcast(frame)) => self.broadcast(&frame),
                    Some(RegistryEvent::Stats(reply)) => {
                        let _ = reply.send(self.snapshot());
                    }
                    Some(RegistryEvent::Shutdown) | None => break,
                },
                Some(joined) = self.writers.join_next(), if !self.writers.is_empty() => {
                    self.on_writer_exit(joined);
                }
            }
        }

        self.close_all().await;
    }

    /// Insert a consumer unless its identity is already present
    ///
    /// A duplicate is dropped, which closes its connection; the first
    /// registration keeps its connection.
    fn register(&mut self, consumer: Consumer) {
        if self.consumers.contains_key(consumer.identity()) {
            tracing::debug!(
                consumer = %consumer.identity(),
                "Consumer already registered, ignoring"
            );
            return;
        }

        let session_id = self.next_session_id;
        self.next_session_id += 1;

        let identity = consumer.identity().to_string();
        let (tx, rx) = mpsc::channel(self.config.consumer_queue_capacity.max(1));
        self.writers
            .spawn(run_writer(consumer, session_id, rx, self.config.write_timeout));
        self.consumers
            .insert(identity.clone(), ConsumerEntry { session_id, tx });

        tracing::info!(
            consumer = %identity,
            session_id = session_id,
            consumers = self.consumers.len(),
            "Consumer registered"
        );
    }

    /// Remove a consumer if present
    ///
    /// Dropping the entry closes its queue; the writer finishes what is
    /// queued and shuts the connection down.
    fn deregister(&mut self, identity: &str) -> bool {
        match self.consumers.remove(identity) {
            Some(entry) => {
                tracing::info!(
                    consumer = %identity,
                    session_id = entry.session_id,
                    consumers = self.consumers.len(),
                    "Consumer deregistered"
                );
                true
            }
            None => {
                tracing::debug!(consumer = %identity, "Deregister for unknown consumer");
                false
            }
        }
    }

    fn broadcast(&mut self, frame: &Frame) {
        let report = fan_out(frame, &self.consumers);

        self.stats.frames_broadcast += 1;
        self.stats.bytes_broadcast += frame.len() as u64;
        self.stats.deliveries += report.delivered as u64;

        tracing::trace!(
            pts = frame.pts,
            size = frame.len(),
            delivered = report.delivered,
            failed = report.failed.len(),
            "Frame broadcast"
        );

        for (identity, error) in report.failed {
            self.drop_consumer(&identity, &error);
        }
    }

    /// Handle a writer task ending on its own
    fn on_writer_exit(&mut self, joined: Result<ConsumerExit, JoinError>) {
        let exit = match joined {
            Ok(exit) => exit,
            Err(e) => {
                // The entry's queue is now closed and is removed on the next broadcast
                tracing::error!(error = %e, "Consumer writer task failed");
                return;
            }
        };

        let Some(error) = exit.error else {
            tracing::debug!(
                consumer = %exit.identity,
                session_id = exit.session_id,
                frames_sent = exit.stats.frames_sent,
                bytes_sent = exit.stats.bytes_sent,
                connected_secs = exit.stats.duration().as_secs(),
                "Consumer writer finished"
            );
            return;
        };

        // Only remove the registration this writer belonged to
        let current = self
            .consumers
            .get(&exit.identity)
            .map(|entry| entry.session_id);
        if current == Some(exit.session_id) {
            self.drop_consumer(&exit.identity, &error);
        }
    }

    fn drop_consumer(&mut self, identity: &str, error: &ConsumerWriteError) {
        if self.consumers.remove(identity).is_none() {
            return;
        }

        self.stats.consumers_dropped += 1;
        match error {
            ConsumerWriteError::Disconnected => tracing::info!(
                consumer = %identity,
                consumers = self.consumers.len(),
                "Consumer disconnected"
            ),
            _ => tracing::warn!(
                consumer = %identity,
                error = %error,
                consumers = self.consumers.len(),
                "Consumer dropped"
            ),
        }
    }

    fn snapshot(&self) -> RegistryStats {
        let mut consumers: Vec<String> = self.consumers.keys().cloned().collect();
        consumers.sort();

        RegistryStats {
            consumer_count: consumers.len(),
            consumers,
            ..self.stats.clone()
        }
    }

    /// Close every consumer and wait for their writers to finish
    async fn close_all(&mut self) {
        self.events.close();

        let closing = self.consumers.len();
        self.consumers.clear();

        while let Some(joined) = self.writers.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Consumer writer task failed during shutdown");
            }
        }

        tracing::info!(consumers = closing, "Consumer registry stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use tokio::io::{duplex, AsyncReadExt, DuplexStream};

    use super::*;

    fn frame(bytes: &'static [u8]) -> Frame {
        Frame::new(0, Bytes::from_static(bytes))
    }

    async fn read_exact(stream: &mut DuplexStream, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        tokio::time::timeout(Duration::from_secs(1), stream.read_exact(&mut buf))
            .await
            .expect("timed out waiting for frame")
            .unwrap();
        buf
    }

    /// Read until EOF, failing if the stream stays open
    async fn read_to_end(stream: &mut DuplexStream) -> Vec<u8> {
        let mut buf = Vec::new();
        tokio::time::timeout(Duration::from_secs(1), stream.read_to_end(&mut buf))
            .await
            .expect("stream was not closed")
            .unwrap();
        buf
    }

    #[tokio::test]
    async fn test_register_and_broadcast() {
        let (handle, _task) = ConsumerRegistry::spawn(RegistryConfig::default());
        let (sink, mut peer) = duplex(1024);

        handle.register(Consumer::new("a", sink)).await.unwrap();
        handle.broadcast(frame(&[1, 2, 3, 4, 5])).await.unwrap();

        assert_eq!(read_exact(&mut peer, 5).await, vec![1, 2, 3, 4, 5]);
        assert_eq!(handle.consumer_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_registration_keeps_first() {
        let (handle, _task) = ConsumerRegistry::spawn(RegistryConfig::default());
        let (first, mut first_peer) = duplex(1024);
        let (second, mut second_peer) = duplex(1024);

        handle.register(Consumer::new("dup", first)).await.unwrap();
        handle.register(Consumer::new("dup", second)).await.unwrap();
        handle.broadcast(frame(b"hello")).await.unwrap();

        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.consumer_count, 1);
        assert_eq!(stats.consumers, vec!["dup".to_string()]);

        assert_eq!(read_exact(&mut first_peer, 5).await, b"hello".to_vec());
        // The second connection was dropped without receiving anything
        assert!(read_to_end(&mut second_peer).await.is_empty());
    }

    #[tokio::test]
    async fn test_deregister_unknown_is_noop() {
        let (handle, _task) = ConsumerRegistry::spawn(RegistryConfig::default());

        handle.deregister("nobody").await.unwrap();

        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.consumer_count, 0);
        assert_eq!(stats.consumers_dropped, 0);
    }

    #[tokio::test]
    async fn test_broadcast_without_consumers() {
        let (handle, _task) = ConsumerRegistry::spawn(RegistryConfig::default());

        handle.broadcast(frame(b"nobody listening")).await.unwrap();

        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.frames_broadcast, 1);
        assert_eq!(stats.deliveries, 0);
        assert_eq!(stats.consumer_count, 0);
    }

    #[tokio::test]
    async fn test_broadcast_follows_event_order() {
        let (handle, _task) = ConsumerRegistry::spawn(RegistryConfig::default());
        let (a, mut a_peer) = duplex(1024);
        let (b, mut b_peer) = duplex(1024);

        // a sees frames 1 and 2, b sees frames 2 and 3
        handle.register(Consumer::new("a", a)).await.unwrap();
        handle.broadcast(frame(b"1")).await.unwrap();
        handle.register(Consumer::new("b", b)).await.unwrap();
        handle.broadcast(frame(b"2")).await.unwrap();
        handle.deregister("a").await.unwrap();
        handle.broadcast(frame(b"3")).await.unwrap();
        handle.deregister("b").await.unwrap();
        handle.broadcast(frame(b"4")).await.unwrap();

        assert_eq!(read_to_end(&mut a_peer).await, b"12".to_vec());
        assert_eq!(read_to_end(&mut b_peer).await, b"23".to_vec());

        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.frames_broadcast, 4);
        assert_eq!(stats.deliveries, 4);
    }

    #[tokio::test]
    async fn test_reregister_after_deregister() {
        let (handle, _task) = ConsumerRegistry::spawn(RegistryConfig::default());
        let (old, mut old_peer) = duplex(1024);
        let (new, mut new_peer) = duplex(1024);

        handle.register(Consumer::new("x", old)).await.unwrap();
        handle.deregister("x").await.unwrap();
        handle.register(Consumer::new("x", new)).await.unwrap();
        handle.broadcast(frame(b"fresh")).await.unwrap();

        assert!(read_to_end(&mut old_peer).await.is_empty());
        assert_eq!(read_exact(&mut new_peer, 5).await, b"fresh".to_vec());
    }

    #[tokio::test]
    async fn test_failed_consumer_is_deregistered() {
        let (handle, _task) = ConsumerRegistry::spawn(RegistryConfig::default());
        let (sink, peer) = duplex(64);
        drop(peer);

        handle.register(Consumer::new("broken", sink)).await.unwrap();
        handle.broadcast(frame(b"data")).await.unwrap();

        let removed = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if handle.consumer_count().await.unwrap() == 0 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(removed.is_ok());
        assert_eq!(handle.stats().await.unwrap().consumers_dropped, 1);
    }

    #[tokio::test]
    async fn test_stalled_consumer_does_not_block_others() {
        let config = RegistryConfig::default()
            .consumer_queue_capacity(2)
            .write_timeout(Duration::from_millis(200));
        let (handle, _task) = ConsumerRegistry::spawn(config);

        // Nobody ever reads from the stalled pipe
        let (stalled, _stalled_peer) = duplex(8);
        let (healthy, mut healthy_peer) = duplex(64 * 1024);
        handle
            .register(Consumer::new("stalled", stalled))
            .await
            .unwrap();
        handle
            .register(Consumer::new("healthy", healthy))
            .await
            .unwrap();

        let delivered = tokio::time::timeout(Duration::from_secs(1), async {
            for i in 0..20u8 {
                handle.broadcast(Frame::new(i as u64, vec![i; 64])).await.unwrap();
                let got = read_exact(&mut healthy_peer, 64).await;
                assert_eq!(got, vec![i; 64]);
            }
        })
        .await;
        assert!(delivered.is_ok(), "healthy consumer was starved");

        let stats = handle.stats().await.unwrap();
        assert!(!stats.contains("stalled"));
        assert!(stats.contains("healthy"));
    }

    #[tokio::test]
    async fn test_shutdown_closes_consumers() {
        let (handle, task) = ConsumerRegistry::spawn(RegistryConfig::default());
        let (sink, mut peer) = duplex(1024);

        handle.register(Consumer::new("a", sink)).await.unwrap();
        handle.broadcast(frame(b"last")).await.unwrap();
        handle.shutdown().await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("registry did not stop")
            .unwrap();

        // Queued frame is delivered, then the connection closes
        assert_eq!(read_to_end(&mut peer).await, b"last".to_vec());
        assert!(handle.is_closed());
        assert!(matches!(
            handle.broadcast(frame(b"late")).await,
            Err(crate::registry::RegistryError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_dropping_handles_stops_loop() {
        let (handle, task) = ConsumerRegistry::spawn(RegistryConfig::default());
        drop(handle);

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("registry did not stop")
            .unwrap();
    }
}
