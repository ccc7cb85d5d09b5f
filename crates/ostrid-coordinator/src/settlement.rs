//! Settlement Coordinator - keeps custody state consistent with the job
//!
//! Drives hold, release and refund through the [`LedgerGateway`], gated by
//! the job's lifecycle state. Financial calls are never resubmitted blindly:
//! after any failure the gateway is asked for an existing receipt first, and
//! settlement always queries before submitting so a restart cannot double
//! spend a hold.
//!
//! The job lock is held across every gateway call, so a timeout refund and
//! an attestation-triggered release for the same job cannot interleave.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use ostrid_common::{
    Attestation, HoldReceipt, JobId, JobState, LedgerError, OstridError, Receipt, RefundReceipt,
    Result, SettlementReceipt, TransitionEvent,
};
use tracing::{debug, info, instrument, warn};

use crate::alert::{AlertSeverity, OperatorAlert, OperatorAlerts};
use crate::config::SettlementSettings;
use crate::gateway::LedgerGateway;
use crate::job::TaskJob;
use crate::job_ledger::{JobGuard, JobLedger};
use crate::metrics::CoordinatorMetrics;

/// Outcome of recording an attestation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttestationAck {
    /// EXECUTING job moved to ATTESTED
    Accepted,
    /// The same attestation was already recorded
    Duplicate,
    /// The job settled without this attestation (e.g. timeout refund)
    Ignored,
}

/// Which way held funds move
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Release,
    Refund,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Direction::Release => "release",
            Direction::Refund => "refund",
        }
    }
}

/// Settlement coordinator
pub struct SettlementCoordinator {
    ledger: Arc<JobLedger>,
    gateway: Arc<dyn LedgerGateway>,
    alerts: Arc<OperatorAlerts>,
    metrics: Arc<CoordinatorMetrics>,
    settings: SettlementSettings,
}

impl SettlementCoordinator {
    pub fn new(
        ledger: Arc<JobLedger>,
        gateway: Arc<dyn LedgerGateway>,
        alerts: Arc<OperatorAlerts>,
        metrics: Arc<CoordinatorMetrics>,
        settings: SettlementSettings,
    ) -> Self {
        Self {
            ledger,
            gateway,
            alerts,
            metrics,
            settings,
        }
    }

    /// Place the escrow hold for a MATCHED job.
    ///
    /// On success the job moves to ESCROWED and straight on to EXECUTING.
    /// A failed hold is not retried: unless the gateway shows the hold was
    /// recorded after all, the job moves to FAILED and the error is returned.
    /// When neither the hold nor the follow-up query settles whether funds
    /// moved, the job stays MATCHED for a later `place_hold` to resolve.
    #[instrument(skip_all, fields(job_id = %job_id))]
    pub async fn place_hold(&self, job_id: &JobId) -> Result<HoldReceipt> {
        let guard = self.ledger.lock(job_id).await?;
        let job = self.job(job_id)?;

        if job.state() != JobState::Matched || job.hold_receipt().is_some() {
            return Err(OstridError::IllegalTransition {
                job_id: job_id.clone(),
                from: job.state(),
                event: TransitionEvent::HoldPlaced,
            });
        }

        let amount = job.intent().escrow_amount;
        let submitted = self
            .gateway
            .hold(job_id, amount)
            .await
            .and_then(|r| r.validate(job_id, amount).map(|_| r));
        self.metrics.ledger_call("hold", submitted.is_ok());

        let receipt = match submitted {
            Ok(receipt) => receipt,
            Err(error) => match self.recover_hold(&job, &error).await? {
                Some(receipt) => receipt,
                None => {
                    let reason = format!("hold failed: {error}");
                    self.ledger.apply(&guard, TransitionEvent::HoldFailed, |j| {
                        j.failure_reason = Some(reason);
                    })?;
                    warn!(job_id = %job_id, error = %error, "Escrow hold failed");
                    return Err(error.into());
                }
            },
        };

        let held = receipt.clone();
        self.ledger
            .apply(&guard, TransitionEvent::HoldPlaced, move |j| {
                j.hold_receipt = Some(held);
            })?;

        let deadline = Utc::now() + self.settings.execution_timeout();
        self.ledger
            .apply(&guard, TransitionEvent::ExecutionStarted, |j| {
                j.execution_deadline = Some(deadline);
            })?;

        info!(
            job_id = %job_id,
            amount,
            tx = %receipt.tx_digest,
            "Escrow held, execution started"
        );
        Ok(receipt)
    }

    /// After a failed hold, check whether the gateway recorded it anyway
    async fn recover_hold(
        &self,
        job: &TaskJob,
        error: &LedgerError,
    ) -> Result<Option<HoldReceipt>> {
        let job_id = job.id();
        let amount = job.intent().escrow_amount;

        match self.gateway.query_receipt(job_id).await {
            Ok(Some(Receipt::Hold(receipt))) if receipt.validate(job_id, amount).is_ok() => {
                warn!(
                    job_id = %job_id,
                    error = %error,
                    "Hold reported failure but was recorded; adopting receipt"
                );
                Ok(Some(receipt))
            }
            Ok(Some(other)) => Err(self.ledger.halt(
                job_id,
                format!("unexpected {} receipt while placing hold", other.kind()),
            )),
            Ok(None) => Ok(None),
            // a rejected hold never committed
            Err(_) if !error.is_indeterminate() => Ok(None),
            Err(query_error) => {
                self.alerts.raise(
                    OperatorAlert::new(
                        AlertSeverity::Error,
                        "hold_outcome_unknown",
                        "hold outcome could not be confirmed; job stays MATCHED",
                    )
                    .for_job(job_id)
                    .with_detail("hold_error", error)
                    .with_detail("query_error", &query_error),
                );
                warn!(job_id = %job_id, error = %error, "Hold outcome unknown; left for recovery");
                Err(OstridError::Ledger(error.clone()))
            }
        }
    }

    /// Record the principal's attestation for an EXECUTING job.
    ///
    /// A bad signature leaves the job untouched so a corrected attestation
    /// can follow. Repeats after the job moved on are absorbed.
    #[instrument(skip_all, fields(job_id = %job_id))]
    pub async fn record_attestation(
        &self,
        job_id: &JobId,
        attestation: Attestation,
    ) -> Result<AttestationAck> {
        if attestation.job_id() != job_id {
            return Err(OstridError::InvalidSignature(format!(
                "attestation signed for job {}",
                attestation.job_id()
            )));
        }

        let guard = self.ledger.lock(job_id).await?;
        let job = self.job(job_id)?;

        match job.state() {
            JobState::Executing => {}
            JobState::Attested | JobState::Released | JobState::Refunded => {
                self.metrics.stale_events_total.inc();
                let ack = if job.attestation() == Some(&attestation) {
                    AttestationAck::Duplicate
                } else {
                    AttestationAck::Ignored
                };
                debug!(job_id = %job_id, state = %job.state(), ?ack, "Late attestation absorbed");
                return Ok(ack);
            }
            other => {
                return Err(OstridError::IllegalTransition {
                    job_id: job_id.clone(),
                    from: other,
                    event: TransitionEvent::AttestationAccepted,
                })
            }
        }

        attestation
            .verify(job.intent().expected_attester())
            .map_err(|e| OstridError::InvalidSignature(format!("attestation: {e}")))?;

        let satisfied = attestation.satisfied();
        self.ledger
            .apply(&guard, TransitionEvent::AttestationAccepted, move |j| {
                j.attestation = Some(attestation);
            })?;

        info!(job_id = %job_id, satisfied, "Attestation accepted");
        Ok(AttestationAck::Accepted)
    }

    /// Settle an ATTESTED job: release if satisfied, refund otherwise.
    ///
    /// On an already settled job the recorded receipt is returned without a
    /// ledger call.
    #[instrument(skip_all, fields(job_id = %job_id))]
    pub async fn settle(&self, job_id: &JobId) -> Result<SettlementReceipt> {
        let guard = self.ledger.lock(job_id).await?;
        let job = self.job(job_id)?;

        match (job.state(), job.release_receipt(), job.refund_receipt()) {
            (JobState::Released, Some(receipt), _) => {
                return Ok(SettlementReceipt::Released(receipt.clone()))
            }
            (JobState::Refunded, _, Some(receipt)) => {
                return Ok(SettlementReceipt::Refunded(receipt.clone()))
            }
            (JobState::Attested, _, _) => {}
            (other, _, _) => {
                return Err(OstridError::IllegalTransition {
                    job_id: job_id.clone(),
                    from: other,
                    event: TransitionEvent::FundsReleased,
                })
            }
        }

        let satisfied = job.attestation().map(|a| a.satisfied()).unwrap_or(false);
        let (direction, event) = if satisfied {
            (Direction::Release, TransitionEvent::FundsReleased)
        } else {
            (Direction::Refund, TransitionEvent::FundsRefunded)
        };

        self.move_funds(&guard, &job, direction, event, Some(TransitionEvent::SettlementFailed))
            .await
    }

    /// Refund an EXECUTING job whose deadline passed by `now`.
    ///
    /// Does nothing unless the deployment enabled timeout refunds. If the
    /// refund fails the job stays EXECUTING and the next sweep tries again.
    #[instrument(skip_all, fields(job_id = %job_id))]
    pub async fn expire_execution(
        &self,
        job_id: &JobId,
        now: DateTime<Utc>,
    ) -> Result<Option<RefundReceipt>> {
        if !self.settings.refund_on_execution_timeout {
            return Ok(None);
        }

        let guard = self.ledger.lock(job_id).await?;
        let job = self.job(job_id)?;

        let expired = job.state() == JobState::Executing
            && job.execution_deadline().map(|d| now >= d).unwrap_or(false);
        if !expired {
            return Ok(None);
        }

        warn!(job_id = %job_id, "Execution deadline passed without attestation; refunding");
        match self
            .move_funds(
                &guard,
                &job,
                Direction::Refund,
                TransitionEvent::ExecutionTimedOut,
                None,
            )
            .await?
        {
            SettlementReceipt::Refunded(receipt) => Ok(Some(receipt)),
            SettlementReceipt::Released(_) => Err(OstridError::Internal(
                "refund produced a release receipt".into(),
            )),
        }
    }

    /// Cancel an EXECUTING job through the refund path
    #[instrument(skip_all, fields(job_id = %job_id))]
    pub async fn cancel(&self, job_id: &JobId) -> Result<RefundReceipt> {
        let guard = self.ledger.lock(job_id).await?;
        let job = self.job(job_id)?;

        if job.state() != JobState::Executing {
            return Err(OstridError::IllegalTransition {
                job_id: job_id.clone(),
                from: job.state(),
                event: TransitionEvent::Cancelled,
            });
        }

        match self
            .move_funds(&guard, &job, Direction::Refund, TransitionEvent::Cancelled, None)
            .await?
        {
            SettlementReceipt::Refunded(receipt) => Ok(receipt),
            SettlementReceipt::Released(_) => Err(OstridError::Internal(
                "refund produced a release receipt".into(),
            )),
        }
    }

    /// Cancel a MATCHED job.
    ///
    /// The gateway is asked first: a hold it recorded without the job
    /// knowing is adopted and refunded, otherwise the job simply fails.
    /// If the gateway cannot answer the job stays MATCHED.
    #[instrument(skip_all, fields(job_id = %job_id))]
    pub async fn cancel_matched(&self, job_id: &JobId) -> Result<JobState> {
        let guard = self.ledger.lock(job_id).await?;
        let job = self.job(job_id)?;

        if job.state() != JobState::Matched {
            return Err(OstridError::IllegalTransition {
                job_id: job_id.clone(),
                from: job.state(),
                event: TransitionEvent::Cancelled,
            });
        }

        let found = self.gateway.query_receipt(job_id).await;
        self.metrics.ledger_call("query", found.is_ok());
        let amount = job.intent().escrow_amount;

        let hold = match found? {
            None => {
                let job = self.ledger.apply(&guard, TransitionEvent::Cancelled, |j| {
                    j.failure_reason = Some("cancelled by principal".into());
                })?;
                info!(job_id = %job_id, "Job cancelled before escrow");
                return Ok(job.state());
            }
            Some(Receipt::Hold(receipt)) if receipt.validate(job_id, amount).is_ok() => receipt,
            Some(other) => {
                return Err(self.ledger.halt(
                    job_id,
                    format!("unexpected {} receipt for a MATCHED job", other.kind()),
                ))
            }
        };

        warn!(job_id = %job_id, "Found unrecorded hold while cancelling; refunding");
        self.ledger.apply(&guard, TransitionEvent::HoldPlaced, move |j| {
            j.hold_receipt = Some(hold);
        })?;
        let job = self.ledger.apply(&guard, TransitionEvent::ExecutionStarted, |_| {})?;

        self.move_funds(&guard, &job, Direction::Refund, TransitionEvent::Cancelled, None)
            .await?;
        Ok(JobState::Refunded)
    }

    /// Release or refund held funds and record the outcome with `event`.
    ///
    /// The gateway is queried first and after every failed submission. A
    /// matching receipt is adopted; an opposite one halts the job. When all
    /// attempts fail the job moves with `on_failure` if one is given, and
    /// stays where it is otherwise.
    async fn move_funds(
        &self,
        guard: &JobGuard,
        job: &TaskJob,
        direction: Direction,
        event: TransitionEvent,
        on_failure: Option<TransitionEvent>,
    ) -> Result<SettlementReceipt> {
        let job_id = job.id();
        let amount = job.escrow_amount();

        let existing = self.gateway.query_receipt(job_id).await.map_err(|e| {
            self.metrics.ledger_call("query", false);
            warn!(job_id = %job_id, error = %e, "Receipt query failed; settlement deferred");
            OstridError::Ledger(e)
        })?;
        self.metrics.ledger_call("query", true);

        if let Some(receipt) = self.matching_receipt(job, direction, existing)? {
            info!(job_id = %job_id, kind = direction.as_str(), "Adopting existing settlement receipt");
            return self.commit(guard, job_id, event, receipt);
        }

        let mut attempt = 0;
        loop {
            let submitted = self.submit(job_id, amount, direction).await;
            self.metrics
                .ledger_call(direction.as_str(), submitted.is_ok());

            let error = match submitted {
                Ok(receipt) => return self.commit(guard, job_id, event, receipt),
                Err(error) => error,
            };
            warn!(job_id = %job_id, attempt, error = %error, "Settlement call failed");

            // the call may have landed despite the error
            if let Ok(found) = self.gateway.query_receipt(job_id).await {
                if let Some(receipt) = self.matching_receipt(job, direction, found)? {
                    info!(job_id = %job_id, "Settlement landed despite error; adopting receipt");
                    return self.commit(guard, job_id, event, receipt);
                }
            }

            if error.is_indeterminate() && attempt < self.settings.max_settlement_retries {
                attempt += 1;
                continue;
            }

            return Err(self.settlement_failed(guard, job, direction, on_failure, error));
        }
    }

    async fn submit(
        &self,
        job_id: &JobId,
        amount: u64,
        direction: Direction,
    ) -> std::result::Result<SettlementReceipt, LedgerError> {
        match direction {
            Direction::Release => {
                let receipt = self.gateway.release(job_id).await?;
                receipt.validate(job_id, amount)?;
                Ok(SettlementReceipt::Released(receipt))
            }
            Direction::Refund => {
                let receipt = self.gateway.refund(job_id).await?;
                receipt.validate(job_id, amount)?;
                Ok(SettlementReceipt::Refunded(receipt))
            }
        }
    }

    /// Interpret a queried receipt for a settlement in `direction`
    fn matching_receipt(
        &self,
        job: &TaskJob,
        direction: Direction,
        found: Option<Receipt>,
    ) -> Result<Option<SettlementReceipt>> {
        let job_id = job.id();
        let amount = job.escrow_amount();

        let (receipt, checked) = match (direction, found) {
            (_, None) | (_, Some(Receipt::Hold(_))) => return Ok(None),
            (Direction::Release, Some(Receipt::Release(r))) => {
                let checked = r.validate(job_id, amount);
                (SettlementReceipt::Released(r), checked)
            }
            (Direction::Refund, Some(Receipt::Refund(r))) => {
                let checked = r.validate(job_id, amount);
                (SettlementReceipt::Refunded(r), checked)
            }
            (_, Some(opposite)) => {
                let reason = format!(
                    "ledger shows {} but job {} expects {}",
                    opposite.kind(),
                    job.state(),
                    direction.as_str()
                );
                self.alerts.raise(
                    OperatorAlert::new(AlertSeverity::Critical, "ledger_divergence", reason.clone())
                        .for_job(job_id)
                        .with_detail("expected", direction.as_str())
                        .with_detail("found", opposite.kind()),
                );
                return Err(self.ledger.halt(job_id, reason));
            }
        };

        match checked {
            Ok(()) => Ok(Some(receipt)),
            Err(e) => Err(self
                .ledger
                .halt(job_id, format!("gateway receipt does not match job: {e}"))),
        }
    }

    fn commit(
        &self,
        guard: &JobGuard,
        job_id: &JobId,
        event: TransitionEvent,
        receipt: SettlementReceipt,
    ) -> Result<SettlementReceipt> {
        let recorded = receipt.clone();
        self.ledger.apply(guard, event, move |j| match recorded {
            SettlementReceipt::Released(r) => j.release_receipt = Some(r),
            SettlementReceipt::Refunded(r) => j.refund_receipt = Some(r),
        })?;

        info!(
            job_id = %job_id,
            outcome = if receipt.is_release() { "released" } else { "refunded" },
            "Escrow settled"
        );
        Ok(receipt)
    }

    fn settlement_failed(
        &self,
        guard: &JobGuard,
        job: &TaskJob,
        direction: Direction,
        on_failure: Option<TransitionEvent>,
        error: LedgerError,
    ) -> OstridError {
        let job_id = job.id();
        let message = format!("{} failed, funds remain held: {error}", direction.as_str());

        self.alerts.raise(
            OperatorAlert::new(AlertSeverity::Error, "settlement_failed", message.clone())
                .for_job(job_id)
                .with_detail("state", job.state())
                .with_detail("amount", job.escrow_amount()),
        );

        if let Some(event) = on_failure {
            if let Err(e) = self.ledger.apply(guard, event, |j| {
                j.failure_reason = Some(message);
            }) {
                return e;
            }
        }
        OstridError::Ledger(error)
    }

    fn job(&self, job_id: &JobId) -> Result<TaskJob> {
        self.ledger
            .get(job_id)
            .ok_or_else(|| OstridError::JobNotFound(job_id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::MemoryAlertSink;
    use crate::gateway::{InMemoryLedgerGateway, LedgerOp};
    use ed25519_dalek::SigningKey;
    use ostrid_common::crypto::did::did_for_signing_key;
    use ostrid_common::{
        AttestationStatement, Bid, BidTerms, NegotiationMode, TaskIntent, ValidationMode,
    };
    use rand::rngs::OsRng;
    use std::collections::BTreeMap;

    struct Harness {
        settlement: SettlementCoordinator,
        ledger: Arc<JobLedger>,
        gateway: Arc<InMemoryLedgerGateway>,
        alerts: Arc<MemoryAlertSink>,
        principal: SigningKey,
    }

    fn harness(settings: SettlementSettings) -> Harness {
        let metrics = Arc::new(CoordinatorMetrics::new().unwrap());
        let sink = Arc::new(MemoryAlertSink::new());
        let alerts = Arc::new(OperatorAlerts::new(metrics.clone()).with_sink(sink.clone()));
        let ledger = Arc::new(JobLedger::new(alerts.clone(), metrics.clone()));
        let gateway = Arc::new(InMemoryLedgerGateway::new());
        let settlement = SettlementCoordinator::new(
            ledger.clone(),
            gateway.clone(),
            alerts,
            metrics,
            settings,
        );
        Harness {
            settlement,
            ledger,
            gateway,
            alerts: sink,
            principal: SigningKey::generate(&mut OsRng),
        }
    }

    impl Harness {
        /// A job driven to MATCHED by hand
        async fn matched_job(&self) -> JobId {
            let intent = TaskIntent {
                task: "render".into(),
                principal_did: did_for_signing_key(&self.principal),
                utility_weights: BTreeMap::from([("quality".to_string(), 1.0)]),
                constraints: vec![],
                validation_mode: ValidationMode::ClientAttestation,
                escrow_amount: 1000,
            };
            let job_id = self.ledger.create(
                intent,
                NegotiationMode::Solver,
                Utc::now() + chrono::Duration::seconds(60),
            );

            let bidder = SigningKey::generate(&mut OsRng);
            let bid = Bid::sign(
                BidTerms {
                    job_id: job_id.clone(),
                    bidder_id: did_for_signing_key(&bidder),
                    price: 900,
                    quality: 0.9,
                    estimated_time_secs: 60,
                },
                &bidder,
            )
            .unwrap();

            let guard = self.ledger.lock(&job_id).await.unwrap();
            self.ledger
                .apply(&guard, TransitionEvent::IntentAccepted, |_| {})
                .unwrap();
            self.ledger
                .apply(&guard, TransitionEvent::WinnerSelected, |j| {
                    j.selected_bid = Some(bid)
                })
                .unwrap();
            job_id
        }

        async fn executing_job(&self) -> JobId {
            let job_id = self.matched_job().await;
            self.settlement.place_hold(&job_id).await.unwrap();
            job_id
        }

        fn attestation(&self, job_id: &JobId, satisfied: bool) -> Attestation {
            Attestation::sign(
                AttestationStatement {
                    job_id: job_id.clone(),
                    satisfied,
                    evidence: serde_json::json!({"output": "sha256:abc"}),
                },
                &self.principal,
            )
            .unwrap()
        }
    }

    #[tokio::test]
    async fn test_hold_moves_to_executing() {
        let h = harness(SettlementSettings::default());
        let job_id = h.matched_job().await;

        let receipt = h.settlement.place_hold(&job_id).await.unwrap();
        assert_eq!(receipt.amount, 1000);

        let job = h.ledger.get(&job_id).unwrap();
        assert_eq!(job.state(), JobState::Executing);
        assert!(job.execution_deadline().is_some());

        let events: Vec<_> = h.ledger.history(&job_id).iter().map(|r| r.event).collect();
        assert!(events.ends_with(&[
            TransitionEvent::HoldPlaced,
            TransitionEvent::ExecutionStarted
        ]));

        // a second hold is illegal
        assert!(matches!(
            h.settlement.place_hold(&job_id).await,
            Err(OstridError::IllegalTransition { .. })
        ));
        assert_eq!(h.gateway.calls(LedgerOp::Hold), 1);
    }

    #[tokio::test]
    async fn test_failed_hold_is_not_retried() {
        let h = harness(SettlementSettings::default());
        let job_id = h.matched_job().await;
        h.gateway
            .fail_next(LedgerOp::Hold, LedgerError::Rejected("insufficient funds".into()));

        let err = h.settlement.place_hold(&job_id).await.unwrap_err();
        assert!(matches!(err, OstridError::Ledger(LedgerError::Rejected(_))));

        let job = h.ledger.get(&job_id).unwrap();
        assert_eq!(job.state(), JobState::Failed);
        assert!(job.hold_receipt().is_none());
        assert_eq!(h.gateway.calls(LedgerOp::Hold), 1);
    }

    #[tokio::test]
    async fn test_hold_timeout_that_committed_is_adopted() {
        let h = harness(SettlementSettings::default());
        let job_id = h.matched_job().await;
        h.gateway
            .fail_after_commit(LedgerOp::Hold, LedgerError::Timeout("rpc".into()));

        h.settlement.place_hold(&job_id).await.unwrap();
        assert_eq!(h.ledger.state(&job_id), Some(JobState::Executing));
        assert_eq!(h.gateway.calls(LedgerOp::Hold), 1);
    }

    #[tokio::test]
    async fn test_unknown_hold_outcome_stays_matched() {
        let h = harness(SettlementSettings::default());
        let job_id = h.matched_job().await;
        h.gateway
            .fail_after_commit(LedgerOp::Hold, LedgerError::Timeout("rpc".into()));
        h.gateway
            .fail_next(LedgerOp::Query, LedgerError::Unavailable("node down".into()));

        let err = h.settlement.place_hold(&job_id).await.unwrap_err();
        assert!(matches!(err, OstridError::Ledger(LedgerError::Timeout(_))));
        assert_eq!(h.ledger.state(&job_id), Some(JobState::Matched));
        assert_eq!(h.alerts.count(AlertSeverity::Error), 1);

        // the retry is answered with the hold that already landed
        let receipt = h.settlement.place_hold(&job_id).await.unwrap();
        let (held, _) = h.gateway.escrow(&job_id).unwrap();
        assert_eq!(receipt, held);
        assert_eq!(h.ledger.state(&job_id), Some(JobState::Executing));
    }

    #[tokio::test]
    async fn test_cancel_matched_refunds_unrecorded_hold() {
        let h = harness(SettlementSettings::default());
        let job_id = h.matched_job().await;
        h.gateway
            .fail_after_commit(LedgerOp::Hold, LedgerError::Timeout("rpc".into()));
        h.gateway
            .fail_next(LedgerOp::Query, LedgerError::Unavailable("node down".into()));
        assert!(h.settlement.place_hold(&job_id).await.is_err());

        let state = h.settlement.cancel_matched(&job_id).await.unwrap();
        assert_eq!(state, JobState::Refunded);
        let job = h.ledger.get(&job_id).unwrap();
        assert!(job.hold_receipt().is_some());
        assert!(job.refund_receipt().is_some());
        assert_eq!(h.gateway.calls(LedgerOp::Refund), 1);
    }

    #[tokio::test]
    async fn test_cancel_matched_without_hold_fails_job() {
        let h = harness(SettlementSettings::default());
        let job_id = h.matched_job().await;

        let state = h.settlement.cancel_matched(&job_id).await.unwrap();
        assert_eq!(state, JobState::Failed);
        assert_eq!(h.gateway.calls(LedgerOp::Refund), 0);
    }

    #[tokio::test]
    async fn test_attestation_signature_checked() {
        let h = harness(SettlementSettings::default());
        let job_id = h.executing_job().await;

        let stranger = SigningKey::generate(&mut OsRng);
        let forged = Attestation::sign(
            AttestationStatement {
                job_id: job_id.clone(),
                satisfied: true,
                evidence: serde_json::Value::Null,
            },
            &stranger,
        )
        .unwrap();

        assert!(matches!(
            h.settlement.record_attestation(&job_id, forged).await,
            Err(OstridError::InvalidSignature(_))
        ));
        assert_eq!(h.ledger.state(&job_id), Some(JobState::Executing));

        // a corrected attestation still goes through
        let ack = h
            .settlement
            .record_attestation(&job_id, h.attestation(&job_id, true))
            .await
            .unwrap();
        assert_eq!(ack, AttestationAck::Accepted);
        assert_eq!(h.ledger.state(&job_id), Some(JobState::Attested));
    }

    #[tokio::test]
    async fn test_duplicate_attestation_is_noop() {
        let h = harness(SettlementSettings::default());
        let job_id = h.executing_job().await;
        let attestation = h.attestation(&job_id, true);

        h.settlement
            .record_attestation(&job_id, attestation.clone())
            .await
            .unwrap();
        assert_eq!(
            h.settlement
                .record_attestation(&job_id, attestation)
                .await
                .unwrap(),
            AttestationAck::Duplicate
        );
        assert_eq!(h.ledger.history(&job_id).len(), 5);
    }

    #[tokio::test]
    async fn test_attestation_before_execution_is_illegal() {
        let h = harness(SettlementSettings::default());
        let job_id = h.matched_job().await;
        assert!(matches!(
            h.settlement
                .record_attestation(&job_id, h.attestation(&job_id, true))
                .await,
            Err(OstridError::IllegalTransition {
                from: JobState::Matched,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_settle_release_then_idempotent() {
        let h = harness(SettlementSettings::default());
        let job_id = h.executing_job().await;
        h.settlement
            .record_attestation(&job_id, h.attestation(&job_id, true))
            .await
            .unwrap();

        let first = h.settlement.settle(&job_id).await.unwrap();
        assert!(first.is_release());
        let second = h.settlement.settle(&job_id).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(h.gateway.calls(LedgerOp::Release), 1);
        assert_eq!(h.ledger.state(&job_id), Some(JobState::Released));
    }

    #[tokio::test]
    async fn test_settle_refund_when_unsatisfied() {
        let h = harness(SettlementSettings::default());
        let job_id = h.executing_job().await;
        h.settlement
            .record_attestation(&job_id, h.attestation(&job_id, false))
            .await
            .unwrap();

        let receipt = h.settlement.settle(&job_id).await.unwrap();
        assert!(!receipt.is_release());
        let job = h.ledger.get(&job_id).unwrap();
        assert_eq!(job.state(), JobState::Refunded);
        assert!(job.release_receipt().is_none());
        assert_eq!(h.gateway.calls(LedgerOp::Release), 0);
    }

    #[tokio::test]
    async fn test_settle_adopts_prior_release() {
        let h = harness(SettlementSettings::default());
        let job_id = h.executing_job().await;
        h.settlement
            .record_attestation(&job_id, h.attestation(&job_id, true))
            .await
            .unwrap();

        // a release that completed before a crash
        h.gateway.release(&job_id).await.unwrap();

        h.settlement.settle(&job_id).await.unwrap();
        assert_eq!(h.gateway.calls(LedgerOp::Release), 1);
        assert_eq!(h.ledger.state(&job_id), Some(JobState::Released));
    }

    #[tokio::test]
    async fn test_opposite_receipt_halts_job() {
        let h = harness(SettlementSettings::default());
        let job_id = h.executing_job().await;
        h.settlement
            .record_attestation(&job_id, h.attestation(&job_id, true))
            .await
            .unwrap();

        h.gateway.refund(&job_id).await.unwrap();

        let err = h.settlement.settle(&job_id).await.unwrap_err();
        assert!(err.is_fatal());
        assert!(h.ledger.is_halted(&job_id));
        assert_eq!(h.ledger.state(&job_id), Some(JobState::Attested));
        assert!(h.alerts.count(AlertSeverity::Critical) >= 1);
        assert_eq!(h.gateway.calls(LedgerOp::Release), 0);
    }

    #[tokio::test]
    async fn test_failed_release_moves_to_failed() {
        let h = harness(SettlementSettings::default());
        let job_id = h.executing_job().await;
        h.settlement
            .record_attestation(&job_id, h.attestation(&job_id, true))
            .await
            .unwrap();
        h.gateway
            .fail_next(LedgerOp::Release, LedgerError::Unavailable("node down".into()));

        let err = h.settlement.settle(&job_id).await.unwrap_err();
        assert!(matches!(err, OstridError::Ledger(_)));

        let job = h.ledger.get(&job_id).unwrap();
        assert_eq!(job.state(), JobState::Failed);
        assert!(job.hold_receipt().is_some());
        assert_eq!(h.alerts.count(AlertSeverity::Error), 1);
        assert_eq!(h.gateway.calls(LedgerOp::Release), 1);
    }

    #[tokio::test]
    async fn test_indeterminate_release_retried_when_allowed() {
        let h = harness(SettlementSettings {
            max_settlement_retries: 1,
            ..SettlementSettings::default()
        });
        let job_id = h.executing_job().await;
        h.settlement
            .record_attestation(&job_id, h.attestation(&job_id, true))
            .await
            .unwrap();
        h.gateway
            .fail_next(LedgerOp::Release, LedgerError::Timeout("rpc".into()));

        h.settlement.settle(&job_id).await.unwrap();
        assert_eq!(h.gateway.calls(LedgerOp::Release), 2);
        assert_eq!(h.ledger.state(&job_id), Some(JobState::Released));
    }

    #[tokio::test]
    async fn test_query_failure_defers_settlement() {
        let h = harness(SettlementSettings::default());
        let job_id = h.executing_job().await;
        h.settlement
            .record_attestation(&job_id, h.attestation(&job_id, true))
            .await
            .unwrap();
        h.gateway
            .fail_next(LedgerOp::Query, LedgerError::Unavailable("node down".into()));

        assert!(h.settlement.settle(&job_id).await.is_err());
        assert_eq!(h.ledger.state(&job_id), Some(JobState::Attested));
        assert_eq!(h.gateway.calls(LedgerOp::Release), 0);

        h.settlement.settle(&job_id).await.unwrap();
        assert_eq!(h.ledger.state(&job_id), Some(JobState::Released));
    }

    #[tokio::test]
    async fn test_execution_timeout_respects_policy() {
        let later = Utc::now() + chrono::Duration::days(2);

        let off = harness(SettlementSettings::default());
        let job_id = off.executing_job().await;
        assert_eq!(off.settlement.expire_execution(&job_id, later).await.unwrap(), None);
        assert_eq!(off.ledger.state(&job_id), Some(JobState::Executing));

        let on = harness(SettlementSettings {
            refund_on_execution_timeout: true,
            ..SettlementSettings::default()
        });
        let job_id = on.executing_job().await;
        assert_eq!(
            on.settlement
                .expire_execution(&job_id, Utc::now())
                .await
                .unwrap(),
            None
        );
        let refund = on
            .settlement
            .expire_execution(&job_id, later)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(refund.amount, 1000);
        assert_eq!(on.ledger.state(&job_id), Some(JobState::Refunded));
        assert_eq!(on.gateway.calls(LedgerOp::Refund), 1);

        // a late attestation is absorbed
        assert_eq!(
            on.settlement
                .record_attestation(&job_id, on.attestation(&job_id, true))
                .await
                .unwrap(),
            AttestationAck::Ignored
        );
    }

    #[tokio::test]
    async fn test_failed_timeout_refund_stays_executing() {
        let h = harness(SettlementSettings {
            refund_on_execution_timeout: true,
            ..SettlementSettings::default()
        });
        let job_id = h.executing_job().await;
        h.gateway
            .fail_next(LedgerOp::Refund, LedgerError::Unavailable("node down".into()));

        let later = Utc::now() + chrono::Duration::days(2);
        assert!(h.settlement.expire_execution(&job_id, later).await.is_err());
        assert_eq!(h.ledger.state(&job_id), Some(JobState::Executing));

        assert!(h
            .settlement
            .expire_execution(&job_id, later)
            .await
            .unwrap()
            .is_some());
        assert_eq!(h.ledger.state(&job_id), Some(JobState::Refunded));
    }

    #[tokio::test]
    async fn test_cancel_during_execution_refunds() {
        let h = harness(SettlementSettings::default());
        let job_id = h.executing_job().await;

        let refund = h.settlement.cancel(&job_id).await.unwrap();
        assert_eq!(refund.amount, 1000);
        let last = h.ledger.history(&job_id).pop().unwrap();
        assert_eq!(last.event, TransitionEvent::Cancelled);
        assert_eq!(last.to, JobState::Refunded);
    }
}
