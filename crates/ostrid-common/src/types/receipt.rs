//! Ledger receipts
//!
//! Typed results of the ledger gateway's hold, release, and refund calls.
//! A receipt is only trusted after [`HoldReceipt::validate`] and friends have
//! checked it against the job it claims to belong to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;
use crate::types::ids::JobId;

/// Funds reserved against a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldReceipt {
    pub job_id: JobId,
    pub amount: u64,
    /// Ledger transaction digest
    pub tx_digest: String,
    pub recorded_at: DateTime<Utc>,
}

/// Held funds transferred to the executing agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseReceipt {
    pub job_id: JobId,
    pub amount: u64,
    pub tx_digest: String,
    pub recorded_at: DateTime<Utc>,
}

/// Held funds returned to the principal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundReceipt {
    pub job_id: JobId,
    pub amount: u64,
    pub tx_digest: String,
    pub recorded_at: DateTime<Utc>,
}

/// Any receipt the gateway can report for a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Receipt {
    Hold(HoldReceipt),
    Release(ReleaseReceipt),
    Refund(RefundReceipt),
}

/// Outcome of settling an attested job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SettlementReceipt {
    Released(ReleaseReceipt),
    Refunded(RefundReceipt),
}

fn check(
    kind: &str,
    receipt_job: &JobId,
    receipt_amount: u64,
    tx_digest: &str,
    job_id: &JobId,
    amount: u64,
) -> Result<(), LedgerError> {
    if receipt_job != job_id {
        return Err(LedgerError::MalformedReceipt(format!(
            "{kind} receipt for job {receipt_job} returned for job {job_id}"
        )));
    }
    if receipt_amount != amount {
        return Err(LedgerError::MalformedReceipt(format!(
            "{kind} receipt amount {receipt_amount} does not match {amount}"
        )));
    }
    if tx_digest.is_empty() {
        return Err(LedgerError::MalformedReceipt(format!(
            "{kind} receipt without transaction digest"
        )));
    }
    Ok(())
}

impl HoldReceipt {
    pub fn validate(&self, job_id: &JobId, amount: u64) -> Result<(), LedgerError> {
        check("hold", &self.job_id, self.amount, &self.tx_digest, job_id, amount)
    }
}

impl ReleaseReceipt {
    pub fn validate(&self, job_id: &JobId, amount: u64) -> Result<(), LedgerError> {
        check("release", &self.job_id, self.amount, &self.tx_digest, job_id, amount)
    }
}

impl RefundReceipt {
    pub fn validate(&self, job_id: &JobId, amount: u64) -> Result<(), LedgerError> {
        check("refund", &self.job_id, self.amount, &self.tx_digest, job_id, amount)
    }
}

impl Receipt {
    pub fn job_id(&self) -> &JobId {
        match self {
            Receipt::Hold(r) => &r.job_id,
            Receipt::Release(r) => &r.job_id,
            Receipt::Refund(r) => &r.job_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Receipt::Hold(_) => "hold",
            Receipt::Release(_) => "release",
            Receipt::Refund(_) => "refund",
        }
    }
}

impl SettlementReceipt {
    pub fn job_id(&self) -> &JobId {
        match self {
            SettlementReceipt::Released(r) => &r.job_id,
            SettlementReceipt::Refunded(r) => &r.job_id,
        }
    }

    pub fn is_release(&self) -> bool {
        matches!(self, SettlementReceipt::Released(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hold(job: &str, amount: u64) -> HoldReceipt {
        HoldReceipt {
            job_id: JobId::from(job),
            amount,
            tx_digest: "0xabc".into(),
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn test_receipt_validation() {
        let job = JobId::from("J1");
        assert!(hold("J1", 1000).validate(&job, 1000).is_ok());
        assert!(hold("J2", 1000).validate(&job, 1000).is_err());
        assert!(hold("J1", 999).validate(&job, 1000).is_err());

        let mut blank = hold("J1", 1000);
        blank.tx_digest.clear();
        assert!(matches!(
            blank.validate(&job, 1000),
            Err(LedgerError::MalformedReceipt(_))
        ));
    }

    #[test]
    fn test_receipt_tagging() {
        let receipt = Receipt::Hold(hold("J1", 10));
        assert_eq!(receipt.kind(), "hold");
        let json = serde_json::to_value(&receipt).unwrap();
        assert_eq!(json["kind"], "hold");
        assert_eq!(json["job_id"], "J1");
    }
}
