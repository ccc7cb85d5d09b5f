//! Bid - signed offer from a remote agent
//!
//! The bidder signs the terms so the offer cannot be repudiated later.

use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};

use crate::crypto::mandate;
use crate::error::CryptoError;
use crate::types::ids::JobId;
use crate::types::intent::{Constraint, TaskIntent};

/// Unsigned bid terms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BidTerms {
    pub job_id: JobId,
    /// did:key of the bidding agent
    pub bidder_id: String,
    /// Asking price in the smallest currency unit
    pub price: u64,
    /// Self-declared quality, 0..=1
    pub quality: f64,
    /// Estimated time to complete, in seconds
    pub estimated_time_secs: u64,
}

/// Signed bid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bid {
    pub terms: BidTerms,
    /// Base64 Ed25519 signature over `terms`
    pub signature: String,
}

impl Bid {
    /// Sign bid terms with the bidder's key
    pub fn sign(terms: BidTerms, signing_key: &SigningKey) -> Result<Self, CryptoError> {
        let signature = mandate::sign_payload(signing_key, &terms)?;
        Ok(Self { terms, signature })
    }

    /// Verify the signature against `bidder_id`
    pub fn verify(&self) -> Result<(), CryptoError> {
        mandate::verify_payload(&self.terms.bidder_id, &self.terms, &self.signature)
    }

    pub fn job_id(&self) -> &JobId {
        &self.terms.job_id
    }

    pub fn bidder_id(&self) -> &str {
        &self.terms.bidder_id
    }

    /// Quality per unit of price, the default auction score
    pub fn value_ratio(&self) -> f64 {
        self.terms.quality / self.terms.price as f64
    }

    /// Check the bid's terms against the intent it answers.
    ///
    /// Returns a human-readable reason on the first violated rule.
    pub fn check_terms(&self, intent: &TaskIntent) -> Result<(), String> {
        let terms = &self.terms;

        if terms.price == 0 {
            return Err("price must be positive".into());
        }
        if !terms.quality.is_finite() || !(0.0..=crate::MAX_QUALITY).contains(&terms.quality) {
            return Err(format!("quality must be within 0..=1, got {}", terms.quality));
        }
        if terms.price > intent.escrow_amount {
            return Err(format!(
                "price {} exceeds escrow budget {}",
                terms.price, intent.escrow_amount
            ));
        }

        for constraint in &intent.constraints {
            match constraint {
                Constraint::MaxPrice { amount } if terms.price > *amount => {
                    return Err(format!("price {} exceeds max_price {}", terms.price, amount));
                }
                Constraint::MinQuality { value } if terms.quality < *value => {
                    return Err(format!(
                        "quality {} below min_quality {}",
                        terms.quality, value
                    ));
                }
                Constraint::MaxDurationSecs { secs } if terms.estimated_time_secs > *secs => {
                    return Err(format!(
                        "estimated time {}s exceeds max_duration_secs {}",
                        terms.estimated_time_secs, secs
                    ));
                }
                _ => {}
            }
        }

        Ok(())
    }
}
