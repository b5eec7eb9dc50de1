//! Fan-out to consumers
//!
//! Fan-out is split between the control loop and one writer task per
//! consumer. The loop only offers each frame to the consumer's bounded queue
//! and never awaits a socket; the writer task does the actual write with a
//! deadline. A consumer that stalls therefore fills its own queue and gets
//! dropped, while every other consumer keeps receiving frames.
//!
//! ```text
//!   control loop                 writer tasks
//!   ───────────                  ────────────
//!   Broadcast(frame) ──try_send──► queue A ──► write_all(A) ──► TCP
//!                    ──try_send──► queue B ──► write_all(B) ──► TCP
//!                    ──try_send──► queue C (full) ✗ → deregister C
//! ```

use std::collections::HashMap;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::error::ConsumerWriteError;
use crate::protocol::Frame;
use crate::stats::ConsumerStats;

use super::consumer::{Consumer, ConsumerSink, ConsumerSource};

/// Registry-side state for one registered consumer
pub(super) struct ConsumerEntry {
    /// Registration this entry belongs to
    pub session_id: u64,
    /// Outbound queue feeding the writer task
    pub tx: mpsc::Sender<Frame>,
}

/// Returned by a writer task when it ends
#[derive(Debug)]
pub(super) struct ConsumerExit {
    pub identity: String,
    pub session_id: u64,
    pub stats: ConsumerStats,
    /// `None` if the writer stopped because the consumer was deregistered
    pub error: Option<ConsumerWriteError>,
}

/// Outcome of offering one frame to every consumer
#[derive(Debug, Default)]
pub(super) struct FanOutReport {
    /// Consumers the frame was queued for
    pub delivered: usize,
    /// Consumers that could not take the frame
    pub failed: Vec<(String, ConsumerWriteError)>,
}

/// Offer `frame` to every consumer's queue
///
/// Never blocks. Consumers whose queue is full or already closed are listed
/// in the report; the caller removes them.
pub(super) fn fan_out(frame: &Frame, consumers: &HashMap<String, ConsumerEntry>) -> FanOutReport {
    let mut report = FanOutReport::default();

    for (identity, entry) in consumers {
        match entry.tx.try_send(frame.clone()) {
            Ok(()) => report.delivered += 1,
            Err(TrySendError::Full(_)) => {
                report
                    .failed
                    .push((identity.clone(), ConsumerWriteError::Lagged));
            }
            Err(TrySendError::Closed(_)) => {
                report
                    .failed
                    .push((identity.clone(), ConsumerWriteError::Disconnected));
            }
        }
    }

    report
}

/// Write queued frames to one consumer until deregistration or failure
pub(super) async fn run_writer(
    consumer: Consumer,
    session_id: u64,
    mut rx: mpsc::Receiver<Frame>,
    write_timeout: Duration,
) -> ConsumerExit {
    let (identity, mut sink, mut hangup) = consumer.into_parts();
    let mut stats = ConsumerStats::new();

    let error = loop {
        tokio::select! {
            frame = rx.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = write_frame(&mut sink, &frame, write_timeout).await {
                        break Some(e);
                    }
                    stats.on_frame_sent(frame.len());
                }
                // Sender dropped: deregistered or registry shutting down
                None => break None,
            },
            _ = wait_for_hangup(&mut hangup) => break Some(ConsumerWriteError::Disconnected),
        }
    };

    if error.is_none() {
        let _ = tokio::time::timeout(write_timeout, sink.shutdown()).await;
    }

    ConsumerExit {
        identity,
        session_id,
        stats,
        error,
    }
}

/// Write one payload in full, bounded by `write_timeout`
async fn write_frame(
    sink: &mut ConsumerSink,
    frame: &Frame,
    write_timeout: Duration,
) -> Result<(), ConsumerWriteError> {
    let write = async {
        sink.write_all(&frame.payload).await?;
        sink.flush().await
    };

    match tokio::time::timeout(write_timeout, write).await {
        Ok(result) => result.map_err(ConsumerWriteError::from),
        Err(_) => Err(ConsumerWriteError::TimedOut(write_timeout)),
    }
}

/// Resolve once reading from the peer fails (e.g. connection reset)
///
/// A clean end of stream only means the peer stopped sending; a half-closed
/// player can still receive. The source is dropped and watching stops, so
/// a peer that is really gone is caught by the next failed write instead.
/// Pending forever without a source.
async fn wait_for_hangup(hangup: &mut Option<ConsumerSource>) {
    if let Some(source) = hangup.as_mut() {
        let mut discard = [0u8; 512];
        loop {
            match source.read(&mut discard).await {
                Ok(0) => break,
                Ok(_) => continue,
                Err(_) => return,
            }
        }
        *hangup = None;
    }

    std::future::pending().await
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use tokio::io::{duplex, AsyncReadExt};

    use super::*;

    fn entry(session_id: u64, capacity: usize) -> (ConsumerEntry, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity);
        (ConsumerEntry { session_id, tx }, rx)
    }

    #[test]
    fn test_fan_out_no_consumers() {
        let consumers = HashMap::new();
        let report = fan_out(&Frame::new(0, Bytes::from_static(b"x")), &consumers);

        assert_eq!(report.delivered, 0);
        assert!(report.failed.is_empty());
    }

    #[test]
    fn test_fan_out_isolates_full_queue() {
        let mut consumers = HashMap::new();
        let (a, mut rx_a) = entry(1, 4);
        let (b, _rx_b) = entry(2, 1);
        consumers.insert("a".to_string(), a);
        consumers.insert("b".to_string(), b);

        let frame = Frame::new(0, Bytes::from_static(b"frame"));
        assert_eq!(fan_out(&frame, &consumers).delivered, 2);

        // b's single slot is still occupied
        let report = fan_out(&frame, &consumers);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "b");
        assert!(matches!(report.failed[0].1, ConsumerWriteError::Lagged));

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_a.try_recv().is_ok());
    }

    #[test]
    fn test_fan_out_closed_queue() {
        let mut consumers = HashMap::new();
        let (a, rx_a) = entry(1, 4);
        consumers.insert("a".to_string(), a);
        drop(rx_a);

        let report = fan_out(&Frame::new(0, Bytes::from_static(b"x")), &consumers);
        assert_eq!(report.delivered, 0);
        assert!(matches!(
            report.failed[0].1,
            ConsumerWriteError::Disconnected
        ));
    }

    #[tokio::test]
    async fn test_writer_writes_payload_only() {
        let (client, mut server) = duplex(1024);
        let (tx, rx) = mpsc::channel(4);
        let writer = tokio::spawn(run_writer(
            Consumer::new("a", client),
            7,
            rx,
            Duration::from_secs(1),
        ));

        tx.send(Frame::new(42, Bytes::from_static(&[1, 2, 3])))
            .await
            .unwrap();
        tx.send(Frame::new(43, Bytes::from_static(&[4, 5])))
            .await
            .unwrap();
        drop(tx);

        let exit = writer.await.unwrap();
        assert_eq!(exit.identity, "a");
        assert_eq!(exit.session_id, 7);
        assert!(exit.error.is_none());
        assert_eq!(exit.stats.frames_sent, 2);
        assert_eq!(exit.stats.bytes_sent, 5);

        // Queued frames are flushed before the sink is shut down
        let mut received = Vec::new();
        server.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_writer_times_out_on_stalled_sink() {
        // Tiny pipe that nobody reads from
        let (client, _server) = duplex(4);
        let (tx, rx) = mpsc::channel(4);
        let writer = tokio::spawn(run_writer(
            Consumer::new("stalled", client),
            1,
            rx,
            Duration::from_millis(50),
        ));

        tx.send(Frame::new(0, vec![0u8; 64])).await.unwrap();

        let exit = writer.await.unwrap();
        assert!(matches!(exit.error, Some(ConsumerWriteError::TimedOut(_))));
        assert_eq!(exit.stats.frames_sent, 0);
    }

    #[tokio::test]
    async fn test_writer_reports_broken_pipe() {
        let (client, server) = duplex(64);
        drop(server);

        let (tx, rx) = mpsc::channel(4);
        let writer = tokio::spawn(run_writer(
            Consumer::new("gone", client),
            1,
            rx,
            Duration::from_secs(1),
        ));

        tx.send(Frame::new(0, Bytes::from_static(b"data")))
            .await
            .unwrap();

        let exit = writer.await.unwrap();
        assert!(matches!(exit.error, Some(ConsumerWriteError::Io(_))));
    }

    #[tokio::test]
    async fn test_writer_detects_reset() {
        let (sink, _sink_peer) = duplex(64);
        let source = tokio_test::io::Builder::new()
            .read_error(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "reset",
            ))
            .build();
        let (_tx, rx) = mpsc::channel(4);

        let writer = tokio::spawn(run_writer(
            Consumer::new("peer", sink).with_hangup_detection(source),
            3,
            rx,
            Duration::from_secs(1),
        ));

        let exit = tokio::time::timeout(Duration::from_secs(1), writer)
            .await
            .expect("writer should notice the reset")
            .unwrap();
        assert!(matches!(exit.error, Some(ConsumerWriteError::Disconnected)));
    }

    #[tokio::test]
    async fn test_half_closed_peer_keeps_receiving() {
        let (sink, mut sink_peer) = duplex(64);
        let (source, source_peer) = duplex(64);
        let (tx, rx) = mpsc::channel(4);

        let writer = tokio::spawn(run_writer(
            Consumer::new("half-closed", sink).with_hangup_detection(source),
            4,
            rx,
            Duration::from_secs(1),
        ));

        // Peer stops sending but is still reading
        drop(source_peer);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!writer.is_finished());

        tx.send(Frame::new(42, Bytes::from_static(&[1, 2, 3, 4, 5])))
            .await
            .unwrap();
        let mut received = [0u8; 5];
        tokio::time::timeout(Duration::from_secs(1), sink_peer.read_exact(&mut received))
            .await
            .expect("half-closed peer did not receive the frame")
            .unwrap();
        assert_eq!(received, [1, 2, 3, 4, 5]);

        drop(tx);
        let exit = writer.await.unwrap();
        assert!(exit.error.is_none());
        assert_eq!(exit.stats.frames_sent, 1);
    }
}
