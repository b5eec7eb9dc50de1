//! Consumer registry
//!
//! The registry owns every connected consumer and applies registrations,
//! deregistrations and broadcasts strictly in arrival order. Its state lives
//! inside a single task; all access goes through [`RegistryHandle`].
//!
//! # Architecture
//!
//! ```text
//!   [consumer accept]   [ingestion]        [writer exits]
//!    Register/Deregister  Broadcast(frame)   (JoinSet)
//!           │                 │                  │
//!           └──────► mpsc ◄───┘                  │
//!                      │                         │
//!                      ▼                         │
//!             ConsumerRegistry::run ◄────────────┘
//!             HashMap<identity, ConsumerEntry>
//!                      │ fan_out (try_send)
//!         ┌────────────┼────────────┐
//!         ▼            ▼            ▼
//!     [writer A]   [writer B]   [writer C]
//!         │            │            │
//!        TCP          TCP          TCP
//! ```
//!
//! # Zero-Copy Design
//!
//! Frames carry their payload as `bytes::Bytes`, so each consumer queue holds
//! a reference to the same allocation rather than a copy.

pub mod config;
pub mod consumer;
pub mod error;
pub mod event;
mod fanout;
pub mod store;

pub use config::RegistryConfig;
pub use consumer::{Consumer, ConsumerSink, ConsumerSource};
pub use error::RegistryError;
pub use event::{RegistryEvent, RegistryHandle};
pub use store::ConsumerRegistry;
