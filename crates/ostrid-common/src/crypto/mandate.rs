//! Signed payloads
//!
//! Bids, attestations, and capability profiles are signed over the JSON
//! encoding of their unsigned terms. Signatures travel base64-encoded next to
//! the terms and are verified against the signer's did:key.
//!
//! The encoding must be stable: terms are plain structs (fixed field order)
//! and maps are `BTreeMap`/`serde_json::Map` (sorted keys).

use base64::{engine::general_purpose::STANDARD, Engine as _};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier};
use serde::Serialize;

use super::did::ParsedDid;
use crate::error::CryptoError;

/// Canonical bytes a signature covers
pub fn signing_bytes<T: Serialize>(payload: &T) -> Result<Vec<u8>, CryptoError> {
    serde_json::to_vec(payload).map_err(|e| CryptoError::InvalidEncoding(e.to_string()))
}

/// Sign a payload, returning the base64 signature
pub fn sign_payload<T: Serialize>(
    signing_key: &SigningKey,
    payload: &T,
) -> Result<String, CryptoError> {
    let message = signing_bytes(payload)?;
    let signature = signing_key.sign(&message);
    Ok(STANDARD.encode(signature.to_bytes()))
}

/// Verify a base64 signature over `payload` against a did:key
pub fn verify_payload<T: Serialize>(
    did: &str,
    payload: &T,
    signature_b64: &str,
) -> Result<(), CryptoError> {
    let verifying_key = ParsedDid::parse(did)?.verifying_key()?;

    let raw = STANDARD
        .decode(signature_b64)
        .map_err(|e| CryptoError::InvalidEncoding(e.to_string()))?;
    let bytes: [u8; 64] = raw
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::InvalidSignature)?;
    let signature = Signature::from_bytes(&bytes);

    let message = signing_bytes(payload)?;
    verifying_key
        .verify(&message, &signature)
        .map_err(|_| CryptoError::InvalidSignature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::did::did_for_signing_key;
    use rand::rngs::OsRng;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Terms {
        job_id: String,
        price: u64,
    }

    #[test]
    fn test_sign_and_verify() {
        let key = SigningKey::generate(&mut OsRng);
        let did = did_for_signing_key(&key);
        let terms = Terms {
            job_id: "J1".into(),
            price: 100,
        };

        let signature = sign_payload(&key, &terms).unwrap();
        assert!(verify_payload(&did, &terms, &signature).is_ok());

        let tampered = Terms {
            job_id: "J1".into(),
            price: 1,
        };
        assert_eq!(
            verify_payload(&did, &tampered, &signature),
            Err(CryptoError::InvalidSignature)
        );
    }

    #[test]
    fn test_wrong_signer_rejected() {
        let key = SigningKey::generate(&mut OsRng);
        let other = SigningKey::generate(&mut OsRng);
        let terms = Terms {
            job_id: "J1".into(),
            price: 100,
        };

        let signature = sign_payload(&other, &terms).unwrap();
        assert!(verify_payload(&did_for_signing_key(&key), &terms, &signature).is_err());
    }

    #[test]
    fn test_garbage_signature_rejected() {
        let key = SigningKey::generate(&mut OsRng);
        let terms = Terms {
            job_id: "J1".into(),
            price: 100,
        };
        let did = did_for_signing_key(&key);

        assert!(matches!(
            verify_payload(&did, &terms, "not base64!"),
            Err(CryptoError::InvalidEncoding(_))
        ));
        assert_eq!(
            verify_payload(&did, &terms, &STANDARD.encode([0u8; 10])),
            Err(CryptoError::InvalidSignature)
        );
    }
}
