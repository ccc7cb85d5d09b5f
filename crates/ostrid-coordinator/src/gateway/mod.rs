//! Ledger Gateway - custody of escrowed funds
//!
//! The coordinator consumes the ledger as four calls, each idempotent per
//! job id. Concrete backends (a chain client, a payment processor) live
//! outside this crate; [`InMemoryLedgerGateway`] is the reference backend
//! used by the standalone node and the tests.

pub mod memory;

use async_trait::async_trait;
use ostrid_common::{HoldReceipt, JobId, LedgerError, Receipt, RefundReceipt, ReleaseReceipt};

pub use memory::{InMemoryLedgerGateway, LedgerOp};

/// Trait for ledger backends
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    /// Reserve `amount` against the job
    async fn hold(&self, job_id: &JobId, amount: u64) -> Result<HoldReceipt, LedgerError>;

    /// Transfer the held funds to the executing agent
    async fn release(&self, job_id: &JobId) -> Result<ReleaseReceipt, LedgerError>;

    /// Return the held funds to the principal
    async fn refund(&self, job_id: &JobId) -> Result<RefundReceipt, LedgerError>;

    /// Most advanced receipt recorded for the job: the release or refund
    /// if the hold was settled, otherwise the hold, otherwise none.
    async fn query_receipt(&self, job_id: &JobId) -> Result<Option<Receipt>, LedgerError>;
}
