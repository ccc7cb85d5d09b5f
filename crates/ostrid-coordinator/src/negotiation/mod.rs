//! Negotiation Engine - intent to selected bid
//!
//! Creates jobs for accepted intents, broadcasts them to eligible peers,
//! collects bids while the job is NEGOTIATING and picks the winner. Every
//! per-job step runs inside the job's critical section.

pub mod bids;
pub mod ranking;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use ostrid_common::{
    AwardNotice, Bid, Envelope, IntentPayload, JobId, JobState, MessagingError, NegotiationMode,
    OstridError, PeerAddress, Result, TaskIntent, TransitionEvent,
};
use tracing::{debug, info, instrument, warn};

use crate::config::NegotiationSettings;
use crate::directory::PeerDirectory;
use crate::job::TaskJob;
use crate::job_ledger::{JobGuard, JobLedger};
use crate::messaging::MessagingChannel;
use crate::metrics::CoordinatorMetrics;

pub use bids::{BidAck, BidBook, RecordedBid};
pub use ranking::{FirstValidBid, QualityPerPrice, RankingStrategy, UtilityWeighted};

/// Negotiation engine
pub struct NegotiationEngine {
    ledger: Arc<JobLedger>,
    channel: Arc<dyn MessagingChannel>,
    directory: Arc<PeerDirectory>,
    ranking: Arc<dyn RankingStrategy>,
    books: DashMap<JobId, BidBook>,
    settings: NegotiationSettings,
    solver_address: Option<PeerAddress>,
    metrics: Arc<CoordinatorMetrics>,
}

impl NegotiationEngine {
    pub fn new(
        ledger: Arc<JobLedger>,
        channel: Arc<dyn MessagingChannel>,
        directory: Arc<PeerDirectory>,
        settings: NegotiationSettings,
        solver_address: Option<PeerAddress>,
        metrics: Arc<CoordinatorMetrics>,
    ) -> Self {
        Self {
            ledger,
            channel,
            directory,
            ranking: Arc::new(QualityPerPrice),
            books: DashMap::new(),
            settings,
            solver_address,
            metrics,
        }
    }

    /// Replace the AUCTION ranking strategy
    pub fn with_ranking(mut self, ranking: Arc<dyn RankingStrategy>) -> Self {
        self.ranking = ranking;
        self
    }

    /// Create a job for `intent` and broadcast it.
    ///
    /// SOLVER jobs go to the configured solver, or the first eligible peer;
    /// AUCTION jobs go to every eligible peer. If no peer can be reached the
    /// job ends FAILED and the delivery error is returned.
    #[instrument(skip(self, intent))]
    pub async fn raise_task_job(&self, intent: TaskIntent, mode: NegotiationMode) -> Result<JobId> {
        intent.validate(&self.settings.required_utility_weights)?;
        let peers = self.recipients(&intent, mode)?;
        let escrow = intent.escrow_amount;

        let deadline = Utc::now() + self.settings.timeout();
        let job_id = self.ledger.create(intent.clone(), mode, deadline);
        let guard = self.ledger.lock(&job_id).await?;

        self.books.insert(
            job_id.clone(),
            BidBook::new(self.settings.max_bids_per_job),
        );
        self.ledger
            .apply(&guard, TransitionEvent::IntentAccepted, |_| {})?;

        let envelope = Envelope::intent_initiate(
            Some(job_id.clone()),
            &IntentPayload {
                intent,
                mode,
                bid_deadline: Some(deadline),
            },
        )?;

        let results = join_all(
            peers
                .iter()
                .map(|peer| self.channel.send(peer, envelope.clone())),
        )
        .await;

        let mut last_error = None;
        let mut delivered = 0;
        for (peer, result) in peers.iter().zip(results) {
            match result {
                Ok(_) => delivered += 1,
                Err(e) => {
                    warn!(job_id = %job_id, peer = %peer, error = %e, "Intent delivery failed");
                    last_error = Some(e);
                }
            }
        }

        if delivered == 0 {
            let error = last_error.unwrap_or(MessagingError::Closed);
            self.books.remove(&job_id);
            self.ledger
                .apply(&guard, TransitionEvent::DeliveryFailed, |job| {
                    job.failure_reason = Some(format!("intent undeliverable: {error}"));
                })?;
            return Err(error.into());
        }

        info!(
            job_id = %job_id,
            peers = peers.len(),
            delivered,
            escrow,
            "Intent broadcast"
        );
        Ok(job_id)
    }

    fn recipients(&self, intent: &TaskIntent, mode: NegotiationMode) -> Result<Vec<PeerAddress>> {
        let peers: Vec<PeerAddress> = match (mode, &self.solver_address) {
            (NegotiationMode::Solver, Some(solver)) => vec![solver.clone()],
            (NegotiationMode::Solver, None) => self
                .directory
                .eligible(intent)
                .into_iter()
                .take(1)
                .map(|p| p.address().clone())
                .collect(),
            (NegotiationMode::Auction, _) => self
                .directory
                .eligible(intent)
                .into_iter()
                .map(|p| p.address().clone())
                .collect(),
        };

        if peers.is_empty() {
            return Err(OstridError::NoPeersAvailable(format!(
                "no registered peer can take '{}'",
                intent.task
            )));
        }
        Ok(peers)
    }

    /// Record a bid for a NEGOTIATING job.
    ///
    /// Bids for unknown jobs, jobs past NEGOTIATING, or jobs whose deadline
    /// has passed are stale: nothing changes and `StaleBid` is returned.
    #[instrument(skip_all, fields(job_id = %job_id, bidder = %bid.bidder_id()))]
    pub async fn submit_bid(&self, job_id: &JobId, bid: Bid) -> Result<BidAck> {
        if bid.job_id() != job_id {
            return Err(OstridError::InvalidBid {
                job_id: job_id.clone(),
                reason: format!("bid references job {}", bid.job_id()),
            });
        }

        let _guard = match self.ledger.lock(job_id).await {
            Ok(guard) => guard,
            Err(OstridError::JobNotFound(_)) => return Err(self.stale(job_id, None)),
            Err(e) => return Err(e),
        };
        let job = self.job(job_id)?;

        if job.state() != JobState::Negotiating || Utc::now() >= job.negotiation_deadline() {
            return Err(self.stale(job_id, Some(job.state())));
        }

        bid.verify()
            .map_err(|e| OstridError::InvalidSignature(format!("bid: {e}")))?;
        bid.check_terms(job.intent())
            .map_err(|reason| OstridError::InvalidBid {
                job_id: job_id.clone(),
                reason,
            })?;

        let ack = self
            .books
            .entry(job_id.clone())
            .or_insert_with(|| BidBook::new(self.settings.max_bids_per_job))
            .insert(bid, Utc::now())
            .map_err(|full| OstridError::InvalidBid {
                job_id: job_id.clone(),
                reason: format!("bid book full ({} bidders)", full.capacity),
            })?;

        self.metrics
            .bids_total
            .with_label_values(&[ack.as_str()])
            .inc();
        debug!(job_id = %job_id, ack = ack.as_str(), "Bid recorded");
        Ok(ack)
    }

    fn stale(&self, job_id: &JobId, state: Option<JobState>) -> OstridError {
        self.metrics.stale_events_total.inc();
        debug!(job_id = %job_id, state = ?state, "Stale bid absorbed");
        OstridError::StaleBid {
            job_id: job_id.clone(),
            state,
        }
    }

    /// Pick the winning bid and move the job to MATCHED.
    ///
    /// With no bids the job stays NEGOTIATING. Past the deadline the job
    /// fails instead and `NegotiationTimeout` is returned.
    #[instrument(skip_all, fields(job_id = %job_id))]
    pub async fn select_winner(&self, job_id: &JobId) -> Result<Bid> {
        let guard = self.ledger.lock(job_id).await?;
        let job = self.job(job_id)?;

        if job.state() != JobState::Negotiating {
            return Err(OstridError::IllegalTransition {
                job_id: job_id.clone(),
                from: job.state(),
                event: TransitionEvent::WinnerSelected,
            });
        }

        if Utc::now() >= job.negotiation_deadline() {
            self.time_out(&guard, &job)?;
            return Err(OstridError::NegotiationTimeout(job_id.clone()));
        }

        let bids = self
            .books
            .get(job_id)
            .map(|b| b.entries())
            .unwrap_or_default();

        let winner = match job.mode() {
            NegotiationMode::Solver => FirstValidBid.select(job.intent(), &bids),
            NegotiationMode::Auction => self.ranking.select(job.intent(), &bids),
        }
        .map(|recorded| recorded.bid.clone())
        .ok_or_else(|| OstridError::NoBidsReceived(job_id.clone()))?;

        let selected = winner.clone();
        self.ledger
            .apply(&guard, TransitionEvent::WinnerSelected, move |job| {
                job.selected_bid = Some(selected);
            })?;
        self.books.remove(job_id);
        drop(guard);

        info!(
            job_id = %job_id,
            bidder = %winner.bidder_id(),
            price = winner.terms.price,
            bids = bids.len(),
            "Winner selected"
        );
        self.send_award(&winner).await;
        Ok(winner)
    }

    /// Tell the winner it was selected. Delivery problems are not fatal.
    async fn send_award(&self, winner: &Bid) {
        let Some(address) = self.directory.address_of(winner.bidder_id()) else {
            debug!(bidder = %winner.bidder_id(), "Winner has no registered address; award not sent");
            return;
        };

        let notice = AwardNotice {
            job_id: winner.job_id().clone(),
            bidder_id: winner.bidder_id().to_string(),
            price: winner.terms.price,
        };
        let sent = match Envelope::award(&notice) {
            Ok(envelope) => self.channel.send(&address, envelope).await.map(|_| ()),
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            warn!(job_id = %notice.job_id, peer = %address, error = %e, "Award delivery failed");
        }
    }

    /// Fail the job if its negotiation deadline has passed by `now`.
    ///
    /// Returns whether the job was expired.
    pub async fn expire_negotiation(&self, job_id: &JobId, now: DateTime<Utc>) -> Result<bool> {
        let guard = self.ledger.lock(job_id).await?;
        let job = self.job(job_id)?;

        if job.state() != JobState::Negotiating || now < job.negotiation_deadline() {
            return Ok(false);
        }
        self.time_out(&guard, &job)?;
        Ok(true)
    }

    fn time_out(&self, guard: &JobGuard, job: &TaskJob) -> Result<()> {
        let bids = self
            .books
            .remove(job.id())
            .map(|(_, book)| book.len())
            .unwrap_or(0);
        self.ledger
            .apply(guard, TransitionEvent::NegotiationTimedOut, |j| {
                j.failure_reason = Some(format!("negotiation deadline passed with {bids} bids"));
            })?;
        warn!(job_id = %job.id(), bids, "Negotiation timed out");
        Ok(())
    }

    /// Cancel a job that has no hold yet
    #[instrument(skip_all, fields(job_id = %job_id))]
    pub async fn cancel(&self, job_id: &JobId) -> Result<TaskJob> {
        let guard = self.ledger.lock(job_id).await?;
        let job = self.job(job_id)?;

        if !job.state().is_pre_hold() {
            return Err(OstridError::IllegalTransition {
                job_id: job_id.clone(),
                from: job.state(),
                event: TransitionEvent::Cancelled,
            });
        }

        self.books.remove(job_id);
        let job = self.ledger.apply(&guard, TransitionEvent::Cancelled, |j| {
            j.failure_reason = Some("cancelled by principal".into());
        })?;
        info!(job_id = %job_id, "Job cancelled before escrow");
        Ok(job)
    }

    /// Number of distinct bidders recorded for a job
    pub fn bid_count(&self, job_id: &JobId) -> usize {
        self.books.get(job_id).map(|b| b.len()).unwrap_or(0)
    }

    fn job(&self, job_id: &JobId) -> Result<TaskJob> {
        self.ledger
            .get(job_id)
            .ok_or_else(|| OstridError::JobNotFound(job_id.clone()))
    }
}
