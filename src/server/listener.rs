//! Relay server listener
//!
//! Runs the two accept loops (producer and consumers) and wires accepted
//! connections to the registry.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::{Error, Result};
use crate::protocol::{FrameDecoder, FrameReader};
use crate::registry::{Consumer, ConsumerRegistry, RegistryConfig, RegistryHandle};
use crate::server::config::ServerConfig;
use crate::server::ingest::Ingestion;
use crate::server::producer::ProducerSlot;

/// Pause after a failed accept before trying again
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Relay server
///
/// Binding happens up front so that bind errors surface before anything
/// runs and so that ephemeral ports can be read back.
pub struct RelayServer {
    config: ServerConfig,
    producer_listener: TcpListener,
    consumer_listener: TcpListener,
    registry: RegistryHandle,
    registry_task: JoinHandle<()>,
}

impl RelayServer {
    /// Bind both listeners and start the registry with default configuration
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        Self::bind_with_registry_config(config, RegistryConfig::default()).await
    }

    /// Bind both listeners and start the registry with custom configuration
    pub async fn bind_with_registry_config(
        config: ServerConfig,
        registry_config: RegistryConfig,
    ) -> Result<Self> {
        let producer_listener = listen(config.producer_addr).await?;
        let consumer_listener = listen(config.consumer_addr).await?;

        tracing::info!(
            producer = %producer_listener.local_addr()?,
            consumer = %consumer_listener.local_addr()?,
            "Relay listening"
        );

        let (registry, registry_task) = ConsumerRegistry::spawn(registry_config);

        Ok(Self {
            config,
            producer_listener,
            consumer_listener,
            registry,
            registry_task,
        })
    }

    /// Address the producer listener is bound to
    pub fn producer_addr(&self) -> Result<SocketAddr> {
        Ok(self.producer_listener.local_addr()?)
    }

    /// Address the consumer listener is bound to
    pub fn consumer_addr(&self) -> Result<SocketAddr> {
        Ok(self.consumer_listener.local_addr()?)
    }

    /// Get a handle to the consumer registry
    pub fn registry(&self) -> &RegistryHandle {
        &self.registry
    }

    /// Run the server
    ///
    /// This method runs until the process is stopped.
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run the server with graceful shutdown
    ///
    /// When `shutdown` completes, both listeners are closed, the active
    /// producer is stopped, and the registry closes every consumer after
    /// processing the events already queued.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let RelayServer {
            config,
            producer_listener,
            consumer_listener,
            registry,
            registry_task,
        } = self;

        let token = CancellationToken::new();
        let tracker = TaskTracker::new();

        tracker.spawn(accept_producers(
            producer_listener,
            config.clone(),
            registry.clone(),
            token.clone(),
            tracker.clone(),
        ));
        tracker.spawn(accept_consumers(
            consumer_listener,
            config,
            registry.clone(),
            token.clone(),
        ));

        shutdown.await;
        tracing::info!("Shutdown signal received");

        token.cancel();
        tracker.close();
        tracker.wait().await;

        // Already closed if every handle went away
        let _ = registry.shutdown().await;
        if let Err(e) = registry_task.await {
            tracing::error!(error = %e, "Registry task failed");
        }

        tracing::info!("Relay stopped");
        Ok(())
    }
}

async fn listen(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| Error::Listen { addr, source })
}

fn configure_socket(socket: &TcpStream, config: &ServerConfig) -> std::io::Result<()> {
    if config.tcp_nodelay {
        socket.set_nodelay(true)?;
    }
    Ok(())
}

/// Accept producers, keeping at most one ingestion session active
async fn accept_producers(
    listener: TcpListener,
    config: ServerConfig,
    registry: RegistryHandle,
    shutdown: CancellationToken,
    tracker: TaskTracker,
) {
    let mut slot = ProducerSlot::new(config.producer_policy);
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<u64>();
    let mut next_session_id: u64 = 1;

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            Some(session_id) = done_rx.recv() => {
                slot.release(session_id);
            }
            accepted = listener.accept() => {
                let (socket, peer_addr) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to accept producer connection");
                        tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                        continue;
                    }
                };

                let session_id = next_session_id;
                next_session_id += 1;

                if let Err(e) = configure_socket(&socket, &config) {
                    tracing::error!(error = %e, peer = %peer_addr, "Failed to configure socket");
                    continue;
                }

                // Dropping the socket closes a rejected producer
                let Some(cancel) = slot.claim(session_id, peer_addr, &shutdown) else {
                    continue;
                };

                let reader = FrameReader::with_decoder(
                    socket,
                    FrameDecoder::with_max_frame_size(config.max_frame_size),
                    config.read_buffer_size,
                );
                let ingestion = Ingestion::new(session_id, peer_addr, reader, registry.clone());
                let done_tx = done_tx.clone();

                tracker.spawn(async move {
                    // Failures are logged by the session itself
                    if let Ok(stats) = ingestion.run(cancel).await {
                        tracing::debug!(
                            session_id = session_id,
                            codec_config_frames = stats.codec_config_frames,
                            last_pts = ?stats.last_pts,
                            bitrate = ?stats.bitrate(),
                            "Producer session ended"
                        );
                    }
                    let _ = done_tx.send(session_id);
                });
            }
        }
    }

    tracing::debug!("Producer listener closed");
}

/// Accept players and register each one
async fn accept_consumers(
    listener: TcpListener,
    config: ServerConfig,
    registry: RegistryHandle,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => {
                let (socket, peer_addr) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to accept consumer connection");
                        tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                        continue;
                    }
                };

                if let Err(e) = configure_socket(&socket, &config) {
                    tracing::error!(error = %e, peer = %peer_addr, "Failed to configure socket");
                    continue;
                }

                tracing::debug!(peer = %peer_addr, "Consumer connection accepted");

                if registry
                    .register(Consumer::from_tcp(socket, peer_addr))
                    .await
                    .is_err()
                {
                    tracing::warn!("Registry closed, no longer accepting consumers");
                    break;
                }
            }
        }
    }

    tracing::debug!("Consumer listener closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_ephemeral_ports() {
        let config = ServerConfig::with_addrs(
            "127.0.0.1:0".parse().unwrap(),
            "127.0.0.1:0".parse().unwrap(),
        );
        let server = RelayServer::bind(config).await.unwrap();

        assert_ne!(server.producer_addr().unwrap().port(), 0);
        assert_ne!(server.consumer_addr().unwrap().port(), 0);
        assert_eq!(server.registry().consumer_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_bind_conflict_is_listen_error() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();

        let config = ServerConfig::with_addrs(addr, "127.0.0.1:0".parse().unwrap());
        let result = RelayServer::bind(config).await;

        assert!(matches!(result, Err(Error::Listen { addr: a, .. }) if a == addr));
    }

    #[tokio::test]
    async fn test_run_until_stops() {
        let config = ServerConfig::with_addrs(
            "127.0.0.1:0".parse().unwrap(),
            "127.0.0.1:0".parse().unwrap(),
        );
        let server = RelayServer::bind(config).await.unwrap();
        let registry = server.registry().clone();

        let result = tokio::time::timeout(Duration::from_secs(2), server.run_until(async {}))
            .await
            .expect("server did not stop");

        assert!(result.is_ok());
        assert!(registry.is_closed());
    }
}
