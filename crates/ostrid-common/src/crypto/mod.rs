//! Cryptographic helpers for Ostrid
//!
//! This module provides:
//! - did:key identities for principals, bidders, and oracles
//! - Signed JSON payloads (the signature carried by bids, attestations, and
//!   capability profiles)

pub mod did;
pub mod mandate;

// Re-export commonly used items
pub use did::{decode_did_key, encode_did_key, ParsedDid};
pub use mandate::{sign_payload, signing_bytes, verify_payload};
