//! Error types for the relay
//!
//! Each layer has its own error enum; [`Error`] wraps them for callers that
//! only care that something failed.

use std::net::SocketAddr;
use std::time::Duration;

pub use crate::registry::RegistryError;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug)]
pub enum Error {
    /// I/O error outside of frame decoding
    Io(std::io::Error),
    /// Failed to bind a listening socket
    Listen {
        addr: SocketAddr,
        source: std::io::Error,
    },
    /// Producer stream could not be decoded
    Codec(CodecError),
    /// Registry control loop is gone
    Registry(RegistryError),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Listen { addr, source } => write!(f, "Failed to listen on {}: {}", addr, source),
            Error::Codec(e) => write!(f, "Codec error: {}", e),
            Error::Registry(e) => write!(f, "Registry error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Listen { source, .. } => Some(source),
            Error::Codec(e) => Some(e),
            Error::Registry(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<CodecError> for Error {
    fn from(e: CodecError) -> Self {
        Error::Codec(e)
    }
}

impl From<RegistryError> for Error {
    fn from(e: RegistryError) -> Self {
        Error::Registry(e)
    }
}

/// Errors from decoding the producer's frame stream
///
/// All variants are fatal for the producer connection.
#[derive(Debug)]
pub enum CodecError {
    /// Stream ended before a complete frame unit was read
    TruncatedStream {
        /// Bytes required to complete the current unit
        expected: usize,
        /// Bytes actually available
        received: usize,
    },
    /// Declared payload length exceeds the configured maximum
    FrameTooLarge { length: usize, max: usize },
    /// Underlying read failed
    Io(std::io::Error),
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecError::TruncatedStream { expected, received } => write!(
                f,
                "Stream truncated: expected {} bytes, received {}",
                expected, received
            ),
            CodecError::FrameTooLarge { length, max } => {
                write!(f, "Frame too large: {} bytes (max {})", length, max)
            }
            CodecError::Io(e) => write!(f, "Read failed: {}", e),
        }
    }
}

impl std::error::Error for CodecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CodecError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CodecError {
    fn from(e: std::io::Error) -> Self {
        CodecError::Io(e)
    }
}

/// A write to one consumer failed
///
/// Never propagated past the consumer's own writer task; it only ends that
/// consumer's registration.
#[derive(Debug)]
pub enum ConsumerWriteError {
    /// Socket write failed (broken pipe, reset, ...)
    Io(std::io::Error),
    /// A single write did not complete within the deadline
    TimedOut(Duration),
    /// Outbound queue was full when a frame was offered
    Lagged,
    /// Peer closed its side of the connection
    Disconnected,
}

impl std::fmt::Display for ConsumerWriteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConsumerWriteError::Io(e) => write!(f, "Write failed: {}", e),
            ConsumerWriteError::TimedOut(d) => write!(f, "Write timed out after {:?}", d),
            ConsumerWriteError::Lagged => write!(f, "Consumer queue full"),
            ConsumerWriteError::Disconnected => write!(f, "Consumer disconnected"),
        }
    }
}

impl std::error::Error for ConsumerWriteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConsumerWriteError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ConsumerWriteError {
    fn from(e: std::io::Error) -> Self {
        ConsumerWriteError::Io(e)
    }
}
