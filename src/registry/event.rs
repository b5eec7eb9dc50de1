//! Registry events and the handle used to submit them

use tokio::sync::{mpsc, oneshot};

use crate::protocol::Frame;
use crate::stats::RegistryStats;

use super::consumer::Consumer;
use super::error::RegistryError;

/// An event processed by the registry's control loop
///
/// Events are handled one at a time, in the order they arrive.
#[derive(Debug)]
pub enum RegistryEvent {
    /// Add a consumer unless its identity is already registered
    Register(Consumer),
    /// Remove the consumer with this identity, if present
    Deregister(String),
    /// Deliver a frame to every currently registered consumer
    Broadcast(Frame),
    /// Report a snapshot of the registry
    Stats(oneshot::Sender<RegistryStats>),
    /// Close every consumer and stop the loop
    Shutdown,
}

/// Cloneable entry point to a running registry
///
/// All methods fail with [`RegistryError::Closed`] once the loop has stopped.
#[derive(Debug, Clone)]
pub struct RegistryHandle {
    tx: mpsc::Sender<RegistryEvent>,
}

impl RegistryHandle {
    pub(super) fn new(tx: mpsc::Sender<RegistryEvent>) -> Self {
        Self { tx }
    }

    /// Submit a raw event, waiting if the queue is full
    pub async fn send(&self, event: RegistryEvent) -> Result<(), RegistryError> {
        self.tx.send(event).await.map_err(|_| RegistryError::Closed)
    }

    /// Register a consumer
    pub async fn register(&self, consumer: Consumer) -> Result<(), RegistryError> {
        self.send(RegistryEvent::Register(consumer)).await
    }

    /// Deregister the consumer with `identity`
    pub async fn deregister(&self, identity: impl Into<String>) -> Result<(), RegistryError> {
        self.send(RegistryEvent::Deregister(identity.into())).await
    }

    /// Broadcast a frame to all registered consumers
    pub async fn broadcast(&self, frame: Frame) -> Result<(), RegistryError> {
        self.send(RegistryEvent::Broadcast(frame)).await
    }

    /// Get a snapshot of the registry, ordered after every event sent before it
    pub async fn stats(&self) -> Result<RegistryStats, RegistryError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(RegistryEvent::Stats(reply_tx)).await?;
        reply_rx.await.map_err(|_| RegistryError::Closed)
    }

    /// Number of registered consumers
    pub async fn consumer_count(&self) -> Result<usize, RegistryError> {
        Ok(self.stats().await?.consumer_count)
    }

    /// Ask the loop to close all consumers and stop
    ///
    /// Events already queued are processed first.
    pub async fn shutdown(&self) -> Result<(), RegistryError> {
        self.send(RegistryEvent::Shutdown).await
    }

    /// Check if the loop has stopped
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
