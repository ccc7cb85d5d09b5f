//! DID (Decentralized Identifier) Operations
//!
//! Parties in a task job are identified by did:key identifiers wrapping an
//! Ed25519 public key, so a signature can be checked against the DID alone.
//!
//! Reference: https://w3c-ccg.github.io/did-method-key/

use ed25519_dalek::{SigningKey, VerifyingKey};

use crate::error::CryptoError;

/// Ed25519 multicodec prefix for did:key
const ED25519_MULTICODEC: [u8; 2] = [0xed, 0x01];

/// Prefix of every did:key identifier with base58btc multibase
const DID_KEY_PREFIX: &str = "did:key:z";

/// Parsed did:key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDid {
    /// Full DID string
    pub did: String,
    /// Raw Ed25519 public key
    pub public_key: [u8; 32],
}

impl ParsedDid {
    /// Parse a DID string, accepting only the did:key method
    pub fn parse(did: &str) -> Result<Self, CryptoError> {
        if !did.starts_with("did:") {
            return Err(CryptoError::InvalidDid("DID must start with 'did:'".into()));
        }

        let parts: Vec<&str> = did.splitn(3, ':').collect();
        if parts.len() < 3 || parts[2].is_empty() {
            return Err(CryptoError::InvalidDid(
                "DID must have method and identifier".into(),
            ));
        }

        if parts[1] != "key" {
            return Err(CryptoError::UnsupportedMethod(parts[1].to_string()));
        }

        Ok(Self {
            did: did.to_string(),
            public_key: decode_did_key(did)?,
        })
    }

    /// Get verifying key for signature verification
    pub fn verifying_key(&self) -> Result<VerifyingKey, CryptoError> {
        VerifyingKey::from_bytes(&self.public_key).map_err(|_| CryptoError::InvalidPublicKey)
    }
}

/// Encode an Ed25519 public key as a did:key identifier
pub fn encode_did_key(public_key: &[u8; 32]) -> String {
    let mut prefixed = Vec::with_capacity(34);
    prefixed.extend_from_slice(&ED25519_MULTICODEC);
    prefixed.extend_from_slice(public_key);

    let encoded = bs58::encode(&prefixed).into_string();
    format!("{}{}", DID_KEY_PREFIX, encoded)
}

/// did:key identifier for a signing key
pub fn did_for_signing_key(signing_key: &SigningKey) -> String {
    encode_did_key(&signing_key.verifying_key().to_bytes())
}

/// Decode a did:key identifier to its Ed25519 public key
pub fn decode_did_key(did: &str) -> Result<[u8; 32], CryptoError> {
    let encoded = did
        .strip_prefix(DID_KEY_PREFIX)
        .ok_or_else(|| CryptoError::InvalidDid(format!("not a base58btc did:key: {did}")))?;

    let decoded = bs58::decode(encoded)
        .into_vec()
        .map_err(|e| CryptoError::InvalidEncoding(e.to_string()))?;

    // Check multicodec prefix
    if decoded.len() != 34 || decoded[..2] != ED25519_MULTICODEC {
        return Err(CryptoError::InvalidDid("invalid multicodec prefix".into()));
    }

    let mut key = [0u8; 32];
    key.copy_from_slice(&decoded[2..34]);
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn test_did_key_roundtrip() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let public_key = signing_key.verifying_key().to_bytes();

        let did = encode_did_key(&public_key);
        assert!(did.starts_with("did:key:z6Mk"));
        assert_eq!(decode_did_key(&did).unwrap(), public_key);
    }

    #[test]
    fn test_parse_did_key() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let did = did_for_signing_key(&signing_key);

        let parsed = ParsedDid::parse(&did).unwrap();
        assert_eq!(parsed.verifying_key().unwrap(), signing_key.verifying_key());
    }

    #[test]
    fn test_invalid_did() {
        assert!(ParsedDid::parse("not-a-did").is_err());
        assert!(matches!(
            ParsedDid::parse("did:web:example.com"),
            Err(CryptoError::UnsupportedMethod(_))
        ));
        assert!(ParsedDid::parse("did:key:zInvalid0OIl").is_err());
    }
}
