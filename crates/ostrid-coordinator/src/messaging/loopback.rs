//! In-process messaging channel
//!
//! Outbound envelopes are kept in an outbox instead of leaving the process;
//! inbound traffic is injected by the caller. Peers can be marked
//! unreachable to exercise delivery failures.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::Utc;
use ostrid_common::{Ack, Envelope, MessagingError, PeerAddress};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use super::MessagingChannel;

/// Loopback channel
#[derive(Default)]
pub struct LoopbackChannel {
    outbox: RwLock<Vec<(PeerAddress, Envelope)>>,
    unreachable: RwLock<HashSet<PeerAddress>>,
    subscribers: RwLock<Vec<mpsc::Sender<Envelope>>>,
}

impl LoopbackChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make sends to `peer` fail
    pub fn set_unreachable(&self, peer: &PeerAddress) {
        self.unreachable.write().insert(peer.clone());
    }

    /// Everything sent so far, in send order
    pub fn sent(&self) -> Vec<(PeerAddress, Envelope)> {
        self.outbox.read().clone()
    }

    pub fn sent_to(&self, peer: &PeerAddress) -> Vec<Envelope> {
        self.outbox
            .read()
            .iter()
            .filter(|(p, _)| p == peer)
            .map(|(_, e)| e.clone())
            .collect()
    }

    /// Deliver an inbound envelope to every subscriber.
    ///
    /// Returns the number of subscribers that received it.
    pub async fn inject(&self, envelope: Envelope) -> usize {
        let subscribers = self.subscribers.read().clone();
        let mut delivered = 0;
        for subscriber in subscribers {
            if subscriber.send(envelope.clone()).await.is_ok() {
                delivered += 1;
            }
        }
        delivered
    }
}

#[async_trait]
impl MessagingChannel for LoopbackChannel {
    async fn send(&self, peer: &PeerAddress, envelope: Envelope) -> Result<Ack, MessagingError> {
        if self.unreachable.read().contains(peer) {
            return Err(MessagingError::Unreachable(peer.to_string()));
        }

        debug!(peer = %peer, kind = ?envelope.kind, "Envelope sent");
        self.outbox.write().push((peer.clone(), envelope));

        Ok(Ack {
            peer: peer.clone(),
            message_id: Uuid::now_v7(),
            received_at: Utc::now(),
        })
    }

    async fn subscribe(&self, handler: mpsc::Sender<Envelope>) -> Result<(), MessagingError> {
        self.subscribers.write().push(handler);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ostrid_common::{EnvelopeKind, JobId};
    use std::collections::BTreeSet;

    fn envelope() -> Envelope {
        Envelope {
            kind: EnvelopeKind::Negotiate,
            job_id: Some(JobId::from("J1")),
            payload: b"{}".to_vec(),
            extension_tags: BTreeSet::new(),
        }
    }

    #[tokio::test]
    async fn test_send_and_unreachable() {
        let channel = LoopbackChannel::new();
        let peer = PeerAddress::from("a2a://one");
        let down = PeerAddress::from("a2a://down");
        channel.set_unreachable(&down);

        let ack = channel.send(&peer, envelope()).await.unwrap();
        assert_eq!(ack.peer, peer);
        assert!(matches!(
            channel.send(&down, envelope()).await,
            Err(MessagingError::Unreachable(_))
        ));
        assert_eq!(channel.sent_to(&peer).len(), 1);
        assert!(channel.sent_to(&down).is_empty());
    }

    #[tokio::test]
    async fn test_inject_reaches_subscribers() {
        let channel = LoopbackChannel::new();
        let (tx, mut rx) = mpsc::channel(4);
        channel.subscribe(tx).await.unwrap();

        assert_eq!(channel.inject(envelope()).await, 1);
        assert_eq!(rx.recv().await.unwrap(), envelope());
    }
}
