//! CapabilityProfile - what a remote agent offers
//!
//! Remote agents register a signed profile before they are solicited for
//! intents. The profile's address is where intent envelopes are delivered.

use std::collections::BTreeMap;

use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};

use crate::crypto::mandate;
use crate::error::CryptoError;
use crate::types::envelope::PeerAddress;

/// Unsigned profile terms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileTerms {
    /// did:key of the agent
    pub agent_did: String,
    /// Where the agent receives envelopes
    pub address: PeerAddress,
    pub skills: Vec<String>,
    #[serde(default)]
    pub capabilities: BTreeMap<String, serde_json::Value>,
    /// Externally computed reputation, informational only
    pub reputation: Option<f64>,
}

/// Signed capability profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityProfile {
    pub terms: ProfileTerms,
    pub signature: String,
}

impl CapabilityProfile {
    pub fn sign(terms: ProfileTerms, signing_key: &SigningKey) -> Result<Self, CryptoError> {
        let signature = mandate::sign_payload(signing_key, &terms)?;
        Ok(Self { terms, signature })
    }

    pub fn verify(&self) -> Result<(), CryptoError> {
        mandate::verify_payload(&self.terms.agent_did, &self.terms, &self.signature)
    }

    pub fn agent_did(&self) -> &str {
        &self.terms.agent_did
    }

    pub fn address(&self) -> &PeerAddress {
        &self.terms.address
    }

    pub fn has_skill(&self, skill: &str) -> bool {
        self.terms.skills.iter().any(|s| s == skill)
    }
}
