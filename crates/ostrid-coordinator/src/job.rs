//! TaskJob record and its transition log

use chrono::{DateTime, Utc};
use ostrid_common::{
    Attestation, Bid, HoldReceipt, JobId, JobState, NegotiationMode, RefundReceipt,
    ReleaseReceipt, TaskIntent, TransitionEvent,
};
use serde::{Deserialize, Serialize};

/// The central lifecycle record.
///
/// Fields are only writable inside the crate, and only through
/// [`JobLedger`](crate::job_ledger::JobLedger), which checks every write
/// against the lifecycle table and the receipt invariants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskJob {
    pub(crate) id: JobId,
    pub(crate) intent: TaskIntent,
    pub(crate) mode: NegotiationMode,
    pub(crate) state: JobState,
    pub(crate) selected_bid: Option<Bid>,
    pub(crate) hold_receipt: Option<HoldReceipt>,
    pub(crate) release_receipt: Option<ReleaseReceipt>,
    pub(crate) refund_receipt: Option<RefundReceipt>,
    pub(crate) attestation: Option<Attestation>,
    pub(crate) negotiation_deadline: DateTime<Utc>,
    pub(crate) execution_deadline: Option<DateTime<Utc>>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) last_transition_at: DateTime<Utc>,
    pub(crate) failure_reason: Option<String>,
}

impl TaskJob {
    pub(crate) fn new(
        id: JobId,
        intent: TaskIntent,
        mode: NegotiationMode,
        negotiation_deadline: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            intent,
            mode,
            state: JobState::Created,
            selected_bid: None,
            hold_receipt: None,
            release_receipt: None,
            refund_receipt: None,
            attestation: None,
            negotiation_deadline,
            execution_deadline: None,
            created_at: now,
            last_transition_at: now,
            failure_reason: None,
        }
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn intent(&self) -> &TaskIntent {
        &self.intent
    }

    pub fn mode(&self) -> NegotiationMode {
        self.mode
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn selected_bid(&self) -> Option<&Bid> {
        self.selected_bid.as_ref()
    }

    pub fn hold_receipt(&self) -> Option<&HoldReceipt> {
        self.hold_receipt.as_ref()
    }

    pub fn release_receipt(&self) -> Option<&ReleaseReceipt> {
        self.release_receipt.as_ref()
    }

    pub fn refund_receipt(&self) -> Option<&RefundReceipt> {
        self.refund_receipt.as_ref()
    }

    pub fn attestation(&self) -> Option<&Attestation> {
        self.attestation.as_ref()
    }

    pub fn negotiation_deadline(&self) -> DateTime<Utc> {
        self.negotiation_deadline
    }

    pub fn execution_deadline(&self) -> Option<DateTime<Utc>> {
        self.execution_deadline
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_transition_at(&self) -> DateTime<Utc> {
        self.last_transition_at
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    /// Amount that was, or will be, held for this job
    pub fn escrow_amount(&self) -> u64 {
        self.hold_receipt
            .as_ref()
            .map(|r| r.amount)
            .unwrap_or(self.intent.escrow_amount)
    }

    /// Check the record-level invariants.
    ///
    /// Returns the first violation found.
    pub fn check_invariants(&self) -> Result<(), String> {
        let state = self.state;

        if state.is_pre_hold() && self.hold_receipt.is_some() {
            return Err(format!("hold receipt present in {state}"));
        }
        if state.requires_hold() && self.hold_receipt.is_none() {
            return Err(format!("hold receipt missing in {state}"));
        }

        match (&self.release_receipt, &self.refund_receipt) {
            (Some(_), Some(_)) => {
                return Err("both release and refund receipts present".into());
            }
            (Some(_), None) if state != JobState::Released => {
                return Err(format!("release receipt present in {state}"));
            }
            (None, Some(_)) if state != JobState::Refunded => {
                return Err(format!("refund receipt present in {state}"));
            }
            _ => {}
        }

        if matches!(state, JobState::Released) && self.release_receipt.is_none() {
            return Err("RELEASED without release receipt".into());
        }
        if matches!(state, JobState::Refunded) && self.refund_receipt.is_none() {
            return Err("REFUNDED without refund receipt".into());
        }

        let needs_bid = matches!(state, JobState::Matched) || state.requires_hold();
        if needs_bid && self.selected_bid.is_none() {
            return Err(format!("no selected bid in {state}"));
        }
        if matches!(state, JobState::Created | JobState::Negotiating) && self.selected_bid.is_some()
        {
            return Err(format!("selected bid present in {state}"));
        }

        if matches!(state, JobState::Attested | JobState::Released) && self.attestation.is_none() {
            return Err(format!("no attestation in {state}"));
        }

        Ok(())
    }
}

/// One entry of a job's append-only transition log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: JobState,
    pub to: JobState,
    pub event: TransitionEvent,
    pub timestamp: DateTime<Utc>,
}
