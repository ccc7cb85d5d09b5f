//! Core data types for the Ostrid task marketplace

pub mod attestation;
pub mod bid;
pub mod envelope;
pub mod ids;
pub mod intent;
pub mod lifecycle;
pub mod profile;
pub mod receipt;
