//! In-memory ledger gateway
//!
//! Keeps one escrow per job and answers repeated calls with the receipt
//! already recorded. Faults can be queued per operation, either failing
//! before anything is recorded or after the operation committed (the
//! "timed out but actually succeeded" case the coordinator must reconcile).

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use ostrid_common::{HoldReceipt, JobId, LedgerError, Receipt, RefundReceipt, ReleaseReceipt};
use parking_lot::Mutex;
use tracing::debug;

use super::LedgerGateway;

/// Gateway operation, for fault injection and call counting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LedgerOp {
    Hold,
    Release,
    Refund,
    Query,
}

struct Fault {
    error: LedgerError,
    commit: bool,
}

struct Escrow {
    hold: HoldReceipt,
    settlement: Option<Receipt>,
}

/// In-memory ledger backend
pub struct InMemoryLedgerGateway {
    escrows: DashMap<JobId, Escrow>,
    faults: Mutex<HashMap<LedgerOp, VecDeque<Fault>>>,
    calls: DashMap<LedgerOp, u64>,
    sequence: AtomicU64,
    latency: Option<Duration>,
}

impl Default for InMemoryLedgerGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLedgerGateway {
    pub fn new() -> Self {
        Self {
            escrows: DashMap::new(),
            faults: Mutex::new(HashMap::new()),
            calls: DashMap::new(),
            sequence: AtomicU64::new(0),
            latency: None,
        }
    }

    /// Delay every call, to widen race windows in tests
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Fail the next `op` without recording anything
    pub fn fail_next(&self, op: LedgerOp, error: LedgerError) {
        self.push_fault(op, error, false);
    }

    /// Record the next `op`, then report `error` anyway
    pub fn fail_after_commit(&self, op: LedgerOp, error: LedgerError) {
        self.push_fault(op, error, true);
    }

    /// Number of `op` calls that reached the gateway
    pub fn calls(&self, op: LedgerOp) -> u64 {
        self.calls.get(&op).map(|c| *c).unwrap_or(0)
    }

    /// Receipts recorded for a job: the hold and, if settled, the settlement
    pub fn escrow(&self, job_id: &JobId) -> Option<(HoldReceipt, Option<Receipt>)> {
        self.escrows
            .get(job_id)
            .map(|e| (e.hold.clone(), e.settlement.clone()))
    }

    fn push_fault(&self, op: LedgerOp, error: LedgerError, commit: bool) {
        self.faults
            .lock()
            .entry(op)
            .or_default()
            .push_back(Fault { error, commit });
    }

    fn take_fault(&self, op: LedgerOp) -> Option<Fault> {
        self.faults.lock().get_mut(&op).and_then(|q| q.pop_front())
    }

    async fn enter(&self, op: LedgerOp) {
        *self.calls.entry(op).or_insert(0) += 1;
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn next_digest(&self) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        format!("0x{seq:016x}")
    }

    fn settle(&self, job_id: &JobId, release: bool) -> Result<Receipt, LedgerError> {
        let mut escrow = self
            .escrows
            .get_mut(job_id)
            .ok_or_else(|| LedgerError::UnknownHold(job_id.clone()))?;

        match (&escrow.settlement, release) {
            (Some(existing @ Receipt::Release(_)), true)
            | (Some(existing @ Receipt::Refund(_)), false) => return Ok(existing.clone()),
            (Some(existing), _) => {
                return Err(LedgerError::AlreadySettled {
                    job_id: job_id.clone(),
                    settled_by: existing.kind().to_string(),
                })
            }
            (None, _) => {}
        }

        let amount = escrow.hold.amount;
        let tx_digest = self.next_digest();
        let recorded_at = Utc::now();
        let receipt = if release {
            Receipt::Release(ReleaseReceipt {
                job_id: job_id.clone(),
                amount,
                tx_digest,
                recorded_at,
            })
        } else {
            Receipt::Refund(RefundReceipt {
                job_id: job_id.clone(),
                amount,
                tx_digest,
                recorded_at,
            })
        };
        escrow.settlement = Some(receipt.clone());
        debug!(job_id = %job_id, kind = receipt.kind(), "Escrow settled");
        Ok(receipt)
    }

    /// Run `op` honoring any queued fault
    fn with_fault<T>(
        &self,
        op: LedgerOp,
        run: impl FnOnce() -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        match self.take_fault(op) {
            Some(Fault {
                error,
                commit: false,
            }) => Err(error),
            Some(Fault {
                error,
                commit: true,
            }) => {
                run()?;
                Err(error)
            }
            None => run(),
        }
    }
}

#[async_trait]
impl LedgerGateway for InMemoryLedgerGateway {
    async fn hold(&self, job_id: &JobId, amount: u64) -> Result<HoldReceipt, LedgerError> {
        self.enter(LedgerOp::Hold).await;
        self.with_fault(LedgerOp::Hold, || {
            match self.escrows.entry(job_id.clone()) {
                Entry::Occupied(existing) => {
                    let hold = &existing.get().hold;
                    if hold.amount != amount {
                        return Err(LedgerError::Rejected(format!(
                            "job {job_id} already holds {}, requested {amount}",
                            hold.amount
                        )));
                    }
                    Ok(hold.clone())
                }
                Entry::Vacant(slot) => {
                    let hold = HoldReceipt {
                        job_id: job_id.clone(),
                        amount,
                        tx_digest: self.next_digest(),
                        recorded_at: Utc::now(),
                    };
                    slot.insert(Escrow {
                        hold: hold.clone(),
                        settlement: None,
                    });
                    debug!(job_id = %job_id, amount, "Escrow hold recorded");
                    Ok(hold)
                }
            }
        })
    }

    async fn release(&self, job_id: &JobId) -> Result<ReleaseReceipt, LedgerError> {
        self.enter(LedgerOp::Release).await;
        self.with_fault(LedgerOp::Release, || match self.settle(job_id, true)? {
            Receipt::Release(r) => Ok(r),
            other => Err(LedgerError::MalformedReceipt(format!(
                "expected release, found {}",
                other.kind()
            ))),
        })
    }

    async fn refund(&self, job_id: &JobId) -> Result<RefundReceipt, LedgerError> {
        self.enter(LedgerOp::Refund).await;
        self.with_fault(LedgerOp::Refund, || match self.settle(job_id, false)? {
            Receipt::Refund(r) => Ok(r),
            other => Err(LedgerError::MalformedReceipt(format!(
                "expected refund, found {}",
                other.kind()
            ))),
        })
    }

    async fn query_receipt(&self, job_id: &JobId) -> Result<Option<Receipt>, LedgerError> {
        self.enter(LedgerOp::Query).await;
        self.with_fault(LedgerOp::Query, || {
            Ok(self.escrows.get(job_id).map(|e| match &e.settlement {
                Some(settlement) => settlement.clone(),
                None => Receipt::Hold(e.hold.clone()),
            }))
        })
    }
}
