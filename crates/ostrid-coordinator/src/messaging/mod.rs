//! Messaging Channel - agent-to-agent envelope transport
//!
//! Delivery is at-least-once with no ordering across peers. The channel is
//! handed to the coordinator at construction; there is no process-wide
//! routing table.

pub mod loopback;

use async_trait::async_trait;
use ostrid_common::{Ack, Envelope, MessagingError, PeerAddress};
use tokio::sync::mpsc;

pub use loopback::LoopbackChannel;

/// Trait for messaging backends
#[async_trait]
pub trait MessagingChannel: Send + Sync {
    /// Deliver an envelope to a peer
    async fn send(&self, peer: &PeerAddress, envelope: Envelope) -> Result<Ack, MessagingError>;

    /// Register a handler for inbound envelopes
    async fn subscribe(&self, handler: mpsc::Sender<Envelope>) -> Result<(), MessagingError>;
}
