//! Server configuration

use std::net::{Ipv4Addr, SocketAddr};

use crate::protocol::constants::{
    DEFAULT_CONSUMER_PORT, DEFAULT_MAX_FRAME_SIZE, DEFAULT_PRODUCER_PORT,
};

use super::producer::ProducerPolicy;

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the producer connects to
    pub producer_addr: SocketAddr,

    /// Address players connect to
    pub consumer_addr: SocketAddr,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,

    /// Application-level read buffer size for the producer connection
    pub read_buffer_size: usize,

    /// Largest payload length accepted from the producer
    pub max_frame_size: usize,

    /// What to do when a second producer connects
    pub producer_policy: ProducerPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            producer_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PRODUCER_PORT)),
            consumer_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_CONSUMER_PORT)),
            tcp_nodelay: true, // Important for low latency
            read_buffer_size: 64 * 1024, // 64KB
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            producer_policy: ProducerPolicy::Reject,
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind addresses
    pub fn with_addrs(producer_addr: SocketAddr, consumer_addr: SocketAddr) -> Self {
        Self {
            producer_addr,
            consumer_addr,
            ..Default::default()
        }
    }

    /// Set the producer bind address
    pub fn producer_addr(mut self, addr: SocketAddr) -> Self {
        self.producer_addr = addr;
        self
    }

    /// Set the consumer bind address
    pub fn consumer_addr(mut self, addr: SocketAddr) -> Self {
        self.consumer_addr = addr;
        self
    }

    /// Set the maximum accepted payload length
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Set the policy for a producer connecting while another is active
    pub fn producer_policy(mut self, policy: ProducerPolicy) -> Self {
        self.producer_policy = policy;
        self
    }

    /// Enable or disable TCP_NODELAY
    pub fn tcp_nodelay(mut self, enabled: bool) -> Self {
        self.tcp_nodelay = enabled;
        self
    }
}
