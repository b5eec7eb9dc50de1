//! Live stream relay
//!
//! Relays one producer's stream of length-prefixed frames to any number of
//! TCP players. The producer sends `[pts u64][len u32][payload]` units; each
//! player receives the raw payload bytes of every frame broadcast while it is
//! connected.
//!
//! # Components
//!
//! - [`protocol`]: frame codec for the producer wire format
//! - [`registry`]: single-owner consumer registry and fan-out
//! - [`server`]: listeners, producer slot and ingestion
//! - [`client`]: producer-side publisher
//! - [`stats`]: counters for producers, consumers and the registry
//!
//! # Example
//! ```no_run
//! use stream_relay::{RelayServer, ServerConfig};
//!
//! # async fn example() -> stream_relay::error::Result<()> {
//! let server = RelayServer::bind(ServerConfig::default()).await?;
//! server
//!     .run_until(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod stats;

pub use error::{Error, Result};
pub use protocol::Frame;
pub use registry::{Consumer, ConsumerRegistry, RegistryConfig, RegistryHandle};
pub use server::{ProducerPolicy, RelayServer, ServerConfig};
