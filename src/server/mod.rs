//! Relay server
//!
//! Two TCP endpoints: one for the single producer, one for any number of
//! players. Accepted connections are handed to the ingestion session or the
//! consumer registry.

pub mod config;
pub mod ingest;
pub mod listener;
pub mod producer;

pub use config::ServerConfig;
pub use ingest::Ingestion;
pub use listener::RelayServer;
pub use producer::{ActiveProducer, ProducerPolicy, ProducerSlot};
