//! Producer slot
//!
//! Only one producer feeds the relay at a time. The slot makes that explicit:
//! it is either empty or occupied by one ingestion session, and the
//! configured [`ProducerPolicy`] decides what happens when another producer
//! connects. The slot is owned by the producer accept loop; ingestion tasks
//! report back when they end so the slot can be released.

use std::net::SocketAddr;

use tokio_util::sync::CancellationToken;

/// Behaviour when a producer connects while the slot is occupied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProducerPolicy {
    /// Close the new connection and keep the current producer
    #[default]
    Reject,
    /// Stop the current producer and let the new one take over
    Replace,
}

/// The producer currently feeding the relay
#[derive(Debug)]
pub struct ActiveProducer {
    /// Session ID of the ingestion task
    pub session_id: u64,
    /// Remote address
    pub peer_addr: SocketAddr,
    cancel: CancellationToken,
}

/// Empty/occupied state for the single producer
#[derive(Debug)]
pub struct ProducerSlot {
    policy: ProducerPolicy,
    current: Option<ActiveProducer>,
}

impl ProducerSlot {
    /// Create an empty slot
    pub fn new(policy: ProducerPolicy) -> Self {
        Self {
            policy,
            current: None,
        }
    }

    /// Check if a producer is active
    pub fn is_occupied(&self) -> bool {
        self.current.is_some()
    }

    /// The active producer, if any
    pub fn current(&self) -> Option<&ActiveProducer> {
        self.current.as_ref()
    }

    /// Try to give the slot to a new producer
    ///
    /// Returns the token the new ingestion task must stop on, or `None` if the
    /// producer is rejected. The token is a child of `parent`, so server
    /// shutdown stops the ingestion task as well.
    pub fn claim(
        &mut self,
        session_id: u64,
        peer_addr: SocketAddr,
        parent: &CancellationToken,
    ) -> Option<CancellationToken> {
        if let Some(active) = &self.current {
            match self.policy {
                ProducerPolicy::Reject => {
                    tracing::warn!(
                        session_id = session_id,
                        peer = %peer_addr,
                        active_session_id = active.session_id,
                        active_peer = %active.peer_addr,
                        "Producer rejected: another producer is active"
                    );
                    return None;
                }
                ProducerPolicy::Replace => {
                    tracing::info!(
                        session_id = session_id,
                        peer = %peer_addr,
                        replaced_session_id = active.session_id,
                        "Producer replacing active producer"
                    );
                    active.cancel.cancel();
                }
            }
        }

        let cancel = parent.child_token();
        self.current = Some(ActiveProducer {
            session_id,
            peer_addr,
            cancel: cancel.clone(),
        });

        Some(cancel)
    }

    /// Empty the slot if it still belongs to `session_id`
    pub fn release(&mut self, session_id: u64) -> bool {
        match &self.current {
            Some(active) if active.session_id == session_id => {
                self.current = None;
                true
            }
            _ => false,
        }
    }
}
