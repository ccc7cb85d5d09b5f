//! Error types for the Ostrid coordinator
//!
//! Provides a unified error type and the collaborator-specific error variants
//! (ledger, messaging, crypto) that convert into it.

use thiserror::Error;

use crate::types::ids::JobId;
use crate::types::lifecycle::{JobState, TransitionEvent};

/// Result type alias using OstridError
pub type Result<T> = std::result::Result<T, OstridError>;

/// Unified error type for Ostrid operations
#[derive(Debug, Error)]
pub enum OstridError {
    // Validation errors: caller-correctable, job state unchanged
    #[error("Invalid intent: {0}")]
    InvalidIntent(String),

    #[error("Invalid bid for job {job_id}: {reason}")]
    InvalidBid { job_id: JobId, reason: String },

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Illegal transition for job {job_id}: {event} is not allowed from {from}")]
    IllegalTransition {
        job_id: JobId,
        from: JobState,
        event: TransitionEvent,
    },

    // Stale or duplicate events: absorbed under at-least-once delivery
    #[error("Stale bid for job {job_id} (state: {state:?})")]
    StaleBid {
        job_id: JobId,
        state: Option<JobState>,
    },

    // Negotiation failures
    #[error("No bids received for job {0}")]
    NoBidsReceived(JobId),

    #[error("Negotiation timed out for job {0}")]
    NegotiationTimeout(JobId),

    #[error("No peers available: {0}")]
    NoPeersAvailable(String),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    // Collaborator failures
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),

    #[error("Cryptographic error: {0}")]
    Crypto(#[from] CryptoError),

    // Fatal: correctness violations, the job is halted
    #[error("Invariant violated for job {job_id}: {reason}")]
    InvariantViolation { job_id: JobId, reason: String },

    #[error("Job {0} is halted pending operator review")]
    JobHalted(JobId),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl OstridError {
    /// Stale or duplicate events that are expected under at-least-once delivery.
    pub fn is_benign(&self) -> bool {
        matches!(self, OstridError::StaleBid { .. })
    }

    /// Errors that indicate a correctness violation rather than a normal failure.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            OstridError::InvariantViolation { .. } | OstridError::JobHalted(_)
        )
    }
}

/// Errors reported by the ledger gateway
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Transaction rejected: {0}")]
    Rejected(String),

    #[error("Ledger call timed out: {0}")]
    Timeout(String),

    #[error("Ledger unavailable: {0}")]
    Unavailable(String),

    #[error("No hold exists for job {0}")]
    UnknownHold(JobId),

    #[error("Job {job_id} already settled by {settled_by}")]
    AlreadySettled { job_id: JobId, settled_by: String },

    #[error("Malformed receipt: {0}")]
    MalformedReceipt(String),
}

impl LedgerError {
    /// Whether the outcome of the call is unknown (it may have committed).
    pub fn is_indeterminate(&self) -> bool {
        matches!(self, LedgerError::Timeout(_) | LedgerError::Unavailable(_))
    }
}

/// Errors reported by the messaging channel
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MessagingError {
    #[error("Peer unreachable: {0}")]
    Unreachable(String),

    #[error("Envelope rejected by {peer}: {reason}")]
    Rejected { peer: String, reason: String },

    #[error("Channel closed")]
    Closed,

    #[error("Malformed envelope: {0}")]
    Malformed(String),
}

/// Cryptographic operation errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid public key")]
    InvalidPublicKey,

    #[error("Invalid DID format: {0}")]
    InvalidDid(String),

    #[error("Unsupported DID method: {0}")]
    UnsupportedMethod(String),

    #[error("Invalid encoding: {0}")]
    InvalidEncoding(String),
}

// Implement From for common external error types
impl From<serde_json::Error> for OstridError {
    fn from(err: serde_json::Error) -> Self {
        OstridError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for OstridError {
    fn from(err: anyhow::Error) -> Self {
        OstridError::Internal(err.to_string())
    }
}
