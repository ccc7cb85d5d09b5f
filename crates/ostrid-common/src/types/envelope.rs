//! Envelope - transport unit exchanged over the messaging channel
//!
//! Payloads are JSON-encoded bytes whose shape is fixed by the envelope kind.
//! Ostrid envelopes carry an extension tag so they can be told apart from
//! other traffic on a shared agent channel.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::MessagingError;
use crate::types::attestation::Attestation;
use crate::types::bid::Bid;
use crate::types::ids::JobId;
use crate::types::intent::{NegotiationMode, TaskIntent};
use crate::{NEGOTIATION_EXTENSION, SETTLEMENT_EXTENSION};

/// Address of a remote agent on the messaging backend
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerAddress(pub String);

impl std::fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerAddress {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Envelope discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    IntentInitiate,
    Bid,
    Attest,
    Negotiate,
}

/// Transport unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    /// Absent only on inbound intents, which have no job yet
    pub job_id: Option<JobId>,
    pub payload: Vec<u8>,
    #[serde(default)]
    pub extension_tags: BTreeSet<String>,
}

/// Acknowledgement from the messaging backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub peer: PeerAddress,
    pub message_id: Uuid,
    pub received_at: DateTime<Utc>,
}

/// Payload of an intent-initiate envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentPayload {
    pub intent: TaskIntent,
    pub mode: NegotiationMode,
    /// Bids arriving after this instant are stale
    pub bid_deadline: Option<DateTime<Utc>>,
}

/// Payload of the negotiate envelope sent to the selected bidder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwardNotice {
    pub job_id: JobId,
    pub bidder_id: String,
    pub price: u64,
}

impl Envelope {
    fn encode<T: Serialize>(
        kind: EnvelopeKind,
        job_id: Option<JobId>,
        payload: &T,
        tag: &str,
    ) -> Result<Self, MessagingError> {
        let payload =
            serde_json::to_vec(payload).map_err(|e| MessagingError::Malformed(e.to_string()))?;
        Ok(Self {
            kind,
            job_id,
            payload,
            extension_tags: BTreeSet::from([tag.to_string()]),
        })
    }

    /// Intent broadcast to candidate peers
    pub fn intent_initiate(
        job_id: Option<JobId>,
        payload: &IntentPayload,
    ) -> Result<Self, MessagingError> {
        Self::encode(
            EnvelopeKind::IntentInitiate,
            job_id,
            payload,
            NEGOTIATION_EXTENSION,
        )
    }

    pub fn bid(bid: &Bid) -> Result<Self, MessagingError> {
        Self::encode(
            EnvelopeKind::Bid,
            Some(bid.job_id().clone()),
            bid,
            NEGOTIATION_EXTENSION,
        )
    }

    pub fn attest(attestation: &Attestation) -> Result<Self, MessagingError> {
        Self::encode(
            EnvelopeKind::Attest,
            Some(attestation.job_id().clone()),
            attestation,
            SETTLEMENT_EXTENSION,
        )
    }

    pub fn award(notice: &AwardNotice) -> Result<Self, MessagingError> {
        Self::encode(
            EnvelopeKind::Negotiate,
            Some(notice.job_id.clone()),
            notice,
            NEGOTIATION_EXTENSION,
        )
    }

    /// Decode the payload into the shape the kind implies
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, MessagingError> {
        serde_json::from_slice(&self.payload).map_err(|e| MessagingError::Malformed(e.to_string()))
    }

    /// Whether the envelope belongs to the Ostrid protocol
    pub fn has_ostrid_extension(&self) -> bool {
        self.extension_tags.contains(NEGOTIATION_EXTENSION)
            || self.extension_tags.contains(SETTLEMENT_EXTENSION)
    }

    /// Stable digest of the envelope, for deduplication in transports
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(format!("{:?}", self.kind).as_bytes());
        if let Some(job_id) = &self.job_id {
            hasher.update(job_id.as_str().as_bytes());
        }
        hasher.update(&self.payload);
        *hasher.finalize().as_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::attestation::AttestationStatement;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    #[test]
    fn test_attest_envelope_roundtrip() {
        let key = SigningKey::generate(&mut OsRng);
        let attestation = Attestation::sign(
            AttestationStatement {
                job_id: JobId::from("J1"),
                satisfied: true,
                evidence: serde_json::json!({"ok": true}),
            },
            &key,
        )
        .unwrap();

        let envelope = Envelope::attest(&attestation).unwrap();
        assert_eq!(envelope.kind, EnvelopeKind::Attest);
        assert!(envelope.extension_tags.contains(SETTLEMENT_EXTENSION));
        assert!(envelope.has_ostrid_extension());

        let decoded: Attestation = envelope.decode().unwrap();
        assert_eq!(decoded, attestation);
    }

    #[test]
    fn test_wrong_shape_is_malformed() {
        let envelope = Envelope {
            kind: EnvelopeKind::Bid,
            job_id: Some(JobId::from("J1")),
            payload: b"{\"price\": 1}".to_vec(),
            extension_tags: BTreeSet::new(),
        };
        assert!(!envelope.has_ostrid_extension());
        assert!(matches!(
            envelope.decode::<Bid>(),
            Err(MessagingError::Malformed(_))
        ));
    }

    #[test]
    fn test_digest_ignores_tags() {
        let notice = AwardNotice {
            job_id: JobId::from("J1"),
            bidder_id: "did:key:z6Mk".into(),
            price: 90,
        };
        let a = Envelope::award(&notice).unwrap();
        let mut b = a.clone();
        b.extension_tags.insert("other".into());
        assert_eq!(a.digest(), b.digest());
    }
}
