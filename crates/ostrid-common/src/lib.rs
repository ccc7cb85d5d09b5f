//! # Ostrid Common
//!
//! Shared data model, errors, and signing helpers for the Ostrid task-job
//! coordinator.
//!
//! ## Core Types
//!
//! - [`JobId`]: opaque, time-ordered task-job identifier
//! - [`TaskIntent`]: principal's task request with budget and validation mode
//! - [`Bid`]: signed offer from a remote agent
//! - [`Attestation`]: signed judgment of delivered work
//! - [`Envelope`]: unit exchanged over the messaging channel
//! - [`HoldReceipt`]/[`ReleaseReceipt`]/[`RefundReceipt`]: ledger receipts
//! - [`JobState`]/[`TransitionEvent`]: the task-job lifecycle table
//!
//! ## Crypto
//!
//! - [`crypto::did`]: did:key identities for principals, bidders, and oracles
//! - [`crypto::mandate`]: signed JSON payloads (base64 Ed25519 signatures)

pub mod crypto;
pub mod error;
pub mod types;

// Re-export commonly used types at crate root
pub use error::{CryptoError, LedgerError, MessagingError, OstridError, Result};
pub use types::{
    attestation::{Attestation, AttestationStatement},
    bid::{Bid, BidTerms},
    envelope::{Ack, AwardNotice, Envelope, EnvelopeKind, IntentPayload, PeerAddress},
    ids::JobId,
    intent::{Constraint, NegotiationMode, TaskIntent, ValidationMode},
    lifecycle::{JobState, TransitionEvent},
    profile::{CapabilityProfile, ProfileTerms},
    receipt::{HoldReceipt, Receipt, RefundReceipt, ReleaseReceipt, SettlementReceipt},
};

/// Ostrid version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Extension tag carried by negotiation envelopes
pub const NEGOTIATION_EXTENSION: &str = "ostrid-negotiation";

/// Extension tag carried by settlement envelopes
pub const SETTLEMENT_EXTENSION: &str = "ostrid-settlement";

/// Upper bound for a bid's quality score
pub const MAX_QUALITY: f64 = 1.0;
