//! Attestation - signed judgment of delivered work

use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};

use crate::crypto::mandate;
use crate::error::CryptoError;
use crate::types::ids::JobId;

/// Unsigned attestation statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttestationStatement {
    pub job_id: JobId,
    /// Whether the delivered work satisfies the intent
    pub satisfied: bool,
    /// Opaque structured evidence (output digests, proofs, notes)
    #[serde(default)]
    pub evidence: serde_json::Value,
}

/// Signed attestation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attestation {
    pub statement: AttestationStatement,
    /// Base64 Ed25519 signature over `statement`
    pub signature: String,
}

impl Attestation {
    /// Sign a statement with the attester's key
    pub fn sign(
        statement: AttestationStatement,
        signing_key: &SigningKey,
    ) -> Result<Self, CryptoError> {
        let signature = mandate::sign_payload(signing_key, &statement)?;
        Ok(Self {
            statement,
            signature,
        })
    }

    /// Verify against the DID the job expects to attest
    pub fn verify(&self, expected_attester: &str) -> Result<(), CryptoError> {
        mandate::verify_payload(expected_attester, &self.statement, &self.signature)
    }

    pub fn job_id(&self) -> &JobId {
        &self.statement.job_id
    }

    pub fn satisfied(&self) -> bool {
        self.statement.satisfied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::did::did_for_signing_key;
    use rand::rngs::OsRng;
    use serde_json::json;

    #[test]
    fn test_attestation_verifies_against_principal_only() {
        let principal = SigningKey::generate(&mut OsRng);
        let stranger = SigningKey::generate(&mut OsRng);

        let attestation = Attestation::sign(
            AttestationStatement {
                job_id: JobId::from("J1"),
                satisfied: true,
                evidence: json!({"output_digest": "abc123", "pages": 12}),
            },
            &principal,
        )
        .unwrap();

        assert!(attestation.verify(&did_for_signing_key(&principal)).is_ok());
        assert!(attestation.verify(&did_for_signing_key(&stranger)).is_err());
    }

    #[test]
    fn test_flipping_verdict_breaks_signature() {
        let principal = SigningKey::generate(&mut OsRng);
        let mut attestation = Attestation::sign(
            AttestationStatement {
                job_id: JobId::from("J2"),
                satisfied: false,
                evidence: serde_json::Value::Null,
            },
            &principal,
        )
        .unwrap();

        attestation.statement.satisfied = true;
        assert!(attestation.verify(&did_for_signing_key(&principal)).is_err());
    }
}
