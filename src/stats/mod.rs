//! Relay statistics

pub mod metrics;

pub use metrics::{ConsumerStats, IngestStats, RegistryStats};
