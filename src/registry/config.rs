//! Registry configuration

use std::time::Duration;

/// Configuration for the consumer registry
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Capacity of the registry's event queue
    ///
    /// Producers of events (ingestion, accept loops) wait when it is full.
    pub event_capacity: usize,

    /// Frames that may be queued for one consumer before it counts as lagging
    pub consumer_queue_capacity: usize,

    /// Deadline for writing one frame to one consumer
    pub write_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            event_capacity: 64,
            consumer_queue_capacity: 32,
            write_timeout: Duration::from_secs(5),
        }
    }
}

impl RegistryConfig {
    /// Set the event queue capacity (minimum 1)
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Set the per-consumer queue capacity (minimum 1)
    pub fn consumer_queue_capacity(mut self, capacity: usize) -> Self {
        self.consumer_queue_capacity = capacity.max(1);
        self
    }

    /// Set the per-write deadline
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }
}
