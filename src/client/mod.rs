//! Relay client
//!
//! Provides the producer side of the relay protocol for sending frames from
//! an encoder or a test harness.

pub mod publisher;

pub use publisher::{FramePublisher, PublishEvent};
