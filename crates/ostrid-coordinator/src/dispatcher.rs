//! Inbound envelope routing
//!
//! Envelopes arrive at least once and in any order. Stale and duplicate
//! events are absorbed here so redelivery never surfaces as an error.
//! Redelivered intents are matched by envelope digest to the job they
//! already raised.

use std::sync::Arc;

use dashmap::DashMap;
use ostrid_common::{
    Attestation, Bid, Envelope, EnvelopeKind, IntentPayload, JobId, MessagingError, Result,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::marketplace::TaskMarketplace;
use crate::negotiation::BidAck;
use crate::settlement::AttestationAck;

/// What happened to an inbound envelope
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    JobRaised(JobId),
    Bid(BidAck),
    Attestation(AttestationAck),
    /// Stale or duplicate event, dropped without effect
    Absorbed,
    /// Not an Ostrid envelope
    Ignored,
}

/// Routes inbound envelopes to the marketplace
pub struct InboundDispatcher {
    marketplace: Arc<TaskMarketplace>,
    /// Intent envelope digest -> job it raised
    raised: DashMap<[u8; 32], JobId>,
}

impl InboundDispatcher {
    pub fn new(marketplace: Arc<TaskMarketplace>) -> Self {
        Self {
            marketplace,
            raised: DashMap::new(),
        }
    }

    pub async fn dispatch(&self, envelope: Envelope) -> Result<DispatchOutcome> {
        if !envelope.has_ostrid_extension() {
            debug!(kind = ?envelope.kind, "Envelope without Ostrid extension ignored");
            return Ok(DispatchOutcome::Ignored);
        }

        let outcome = match envelope.kind {
            EnvelopeKind::IntentInitiate => {
                let digest = envelope.digest();
                if let Some(job_id) = self.raised.get(&digest).map(|id| id.value().clone()) {
                    debug!(job_id = %job_id, "Redelivered intent absorbed");
                    return Ok(DispatchOutcome::JobRaised(job_id));
                }

                let payload: IntentPayload = envelope.decode()?;
                self.marketplace
                    .raise_task_job(payload.intent, payload.mode)
                    .await
                    .map(|job_id| {
                        self.raised.insert(digest, job_id.clone());
                        DispatchOutcome::JobRaised(job_id)
                    })
            }
            EnvelopeKind::Bid | EnvelopeKind::Negotiate => {
                let bid: Bid = envelope.decode()?;
                let job_id = Self::job_id(&envelope, bid.job_id())?;
                self.marketplace
                    .submit_bid(&job_id, bid)
                    .await
                    .map(DispatchOutcome::Bid)
            }
            EnvelopeKind::Attest => {
                let attestation: Attestation = envelope.decode()?;
                let job_id = Self::job_id(&envelope, attestation.job_id())?;
                self.marketplace
                    .attest_completion(&job_id, attestation)
                    .await
                    .map(DispatchOutcome::Attestation)
            }
        };

        match outcome {
            Err(e) if e.is_benign() => {
                debug!(error = %e, "Inbound event absorbed");
                Ok(DispatchOutcome::Absorbed)
            }
            other => other,
        }
    }

    /// Envelope job id, which must agree with the signed payload
    fn job_id(envelope: &Envelope, signed: &JobId) -> Result<JobId> {
        match &envelope.job_id {
            Some(id) if id != signed => Err(MessagingError::Malformed(format!(
                "envelope job {id} does not match payload job {signed}"
            ))
            .into()),
            _ => Ok(signed.clone()),
        }
    }

    /// Dispatch envelopes until the channel closes
    pub async fn run(self, mut inbound: mpsc::Receiver<Envelope>) {
        info!("Inbound dispatcher started");
        while let Some(envelope) = inbound.recv().await {
            let kind = envelope.kind;
            match self.dispatch(envelope).await {
                Ok(outcome) => debug!(?kind, ?outcome, "Envelope dispatched"),
                Err(e) => warn!(?kind, error = %e, "Envelope rejected"),
            }
        }
        info!("Inbound channel closed");
    }
}
