//! Frame publisher
//!
//! Producer-side client: connects to the relay's producer endpoint and sends
//! payloads framed with the pts/length header.

use std::io;
use std::net::SocketAddr;

use bytes::{Bytes, BytesMut};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::protocol::{encode_frame, Frame};

/// Events from the publisher
#[derive(Debug)]
pub enum PublishEvent {
    /// Connected to the relay
    Connected(SocketAddr),

    /// Error occurred
    Error(String),

    /// Disconnected
    Disconnected,
}

/// Sends frames to a relay
///
/// # Example
/// ```no_run
/// use bytes::Bytes;
/// use stream_relay::client::FramePublisher;
///
/// # async fn example() -> stream_relay::error::Result<()> {
/// let (mut publisher, mut events) = FramePublisher::new("127.0.0.1:54000".parse().unwrap());
///
/// tokio::spawn(async move {
///     while let Some(event) = events.recv().await {
///         println!("Event: {:?}", event);
///     }
/// });
///
/// publisher.connect().await?;
/// publisher.send_codec_config(Bytes::from_static(b"sps/pps")).await?;
/// publisher.send_media(Bytes::from_static(b"frame"), 1_000_000).await?;
/// # Ok(())
/// # }
/// ```
pub struct FramePublisher {
    addr: SocketAddr,
    event_tx: mpsc::Sender<PublishEvent>,
    stream: Option<TcpStream>,
    /// Presentation time of the first media frame; media pts are relative to it
    pts_origin: Option<u64>,
    buf: BytesMut,
}

impl FramePublisher {
    /// Create a new publisher.
    ///
    /// Returns the publisher and a receiver for events.
    pub fn new(addr: SocketAddr) -> (Self, mpsc::Receiver<PublishEvent>) {
        let (tx, rx) = mpsc::channel(64);

        let publisher = Self {
            addr,
            event_tx: tx,
            stream: None,
            pts_origin: None,
            buf: BytesMut::new(),
        };

        (publisher, rx)
    }

    /// Connect to the relay's producer endpoint.
    pub async fn connect(&mut self) -> Result<()> {
        let stream = TcpStream::connect(self.addr).await?;
        stream.set_nodelay(true)?;

        self.stream = Some(stream);
        self.pts_origin = None;
        let _ = self.event_tx.try_send(PublishEvent::Connected(self.addr));
        Ok(())
    }

    /// Send a frame as-is.
    pub async fn send_frame(&mut self, frame: &Frame) -> Result<()> {
        if frame.len() > u32::MAX as usize {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "payload exceeds 32-bit length field",
            )));
        }

        let stream = self.stream.as_mut().ok_or_else(|| {
            Error::Io(io::Error::new(io::ErrorKind::NotConnected, "Not connected"))
        })?;

        self.buf.clear();
        encode_frame(frame, &mut self.buf);

        if let Err(e) = stream.write_all(&self.buf).await {
            let _ = self.event_tx.try_send(PublishEvent::Error(e.to_string()));
            self.stream = None;
            return Err(e.into());
        }

        Ok(())
    }

    /// Send a media payload.
    ///
    /// `presentation_time_us` is the encoder's timestamp; the pts on the wire
    /// is relative to the first media frame sent on this connection.
    pub async fn send_media(&mut self, payload: Bytes, presentation_time_us: u64) -> Result<()> {
        let origin = *self.pts_origin.get_or_insert(presentation_time_us);
        let pts = presentation_time_us.saturating_sub(origin);

        self.send_frame(&Frame::new(pts, payload)).await
    }

    /// Send decoder configuration (e.g. SPS/PPS), marked with the reserved pts.
    pub async fn send_codec_config(&mut self, payload: Bytes) -> Result<()> {
        self.send_frame(&Frame::codec_config(payload)).await
    }

    /// Disconnect from the relay.
    pub async fn disconnect(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
            let _ = self.event_tx.try_send(PublishEvent::Disconnected);
        }
    }

    /// Check if currently connected.
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    use super::*;
    use crate::protocol::FrameReader;

    #[tokio::test]
    async fn test_send_without_connect() {
        let (mut publisher, _events) = FramePublisher::new("127.0.0.1:9".parse().unwrap());

        let result = publisher
            .send_frame(&Frame::new(0, Bytes::from_static(b"x")))
            .await;
        assert!(matches!(result, Err(Error::Io(e)) if e.kind() == io::ErrorKind::NotConnected));
    }

    #[tokio::test]
    async fn test_publish_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (mut publisher, mut events) = FramePublisher::new(addr);
        publisher.connect().await.unwrap();
        assert!(publisher.is_connected());
        assert!(matches!(events.recv().await, Some(PublishEvent::Connected(a)) if a == addr));

        let (socket, _) = listener.accept().await.unwrap();

        publisher
            .send_codec_config(Bytes::from_static(b"cfg"))
            .await
            .unwrap();
        publisher
            .send_media(Bytes::from_static(b"one"), 5_000_000)
            .await
            .unwrap();
        publisher
            .send_media(Bytes::from_static(b"two"), 5_033_000)
            .await
            .unwrap();
        publisher.disconnect().await;
        assert!(!publisher.is_connected());

        let mut reader = FrameReader::new(socket);
        let config = reader.read_frame().await.unwrap().unwrap();
        assert!(config.is_codec_config());
        assert_eq!(&config.payload[..], b"cfg");

        let first = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(first.pts, 0);
        let second = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(second.pts, 33_000);
        assert_eq!(&second.payload[..], b"two");

        assert!(reader.read_frame().await.unwrap().is_none());
        let mut rest = Vec::new();
        reader.into_inner().read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }
}
