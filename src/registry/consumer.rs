//! Consumer connections
//!
//! A consumer is identified by a string (the peer address for TCP players)
//! and owns the outbound half of its connection. The inbound half, when
//! present, is only watched for the connection failing (e.g. a reset).

use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Outbound byte sink for one consumer
pub type ConsumerSink = Box<dyn AsyncWrite + Send + Unpin>;

/// Inbound side of a consumer connection, read only to detect hang-up
pub type ConsumerSource = Box<dyn AsyncRead + Send + Unpin>;

/// A connected receiver, handed to the registry on registration
pub struct Consumer {
    identity: String,
    pub(super) sink: ConsumerSink,
    pub(super) hangup: Option<ConsumerSource>,
}

impl Consumer {
    /// Create a consumer writing to `sink`
    pub fn new(identity: impl Into<String>, sink: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            identity: identity.into(),
            sink: Box::new(sink),
            hangup: None,
        }
    }

    /// Watch `source` and drop the consumer when reading from it fails
    ///
    /// Anything the peer sends is discarded. A clean end of stream (the peer
    /// half-closing) stops the watch but keeps the consumer registered.
    pub fn with_hangup_detection(mut self, source: impl AsyncRead + Send + Unpin + 'static) -> Self {
        self.hangup = Some(Box::new(source));
        self
    }

    /// Create a consumer from an accepted TCP connection
    ///
    /// The identity is the peer address, e.g. `127.0.0.1:50312`.
    pub fn from_tcp(stream: TcpStream, peer_addr: SocketAddr) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self::new(peer_addr.to_string(), write_half).with_hangup_detection(read_half)
    }

    /// Identity used as the registry key
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub(super) fn into_parts(self) -> (String, ConsumerSink, Option<ConsumerSource>) {
        (self.identity, self.sink, self.hangup)
    }
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("identity", &self.identity)
            .field("hangup_detection", &self.hangup.is_some())
            .finish()
    }
}
