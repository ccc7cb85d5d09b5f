//! TaskMarketplace - principal- and agent-facing entry point
//!
//! Wires the job ledger, negotiation engine and settlement coordinator to
//! one ledger gateway and one messaging channel, and exposes the calls
//! principals and remote agents make.

use std::sync::Arc;

use ostrid_common::{
    Attestation, Bid, CapabilityProfile, JobId, JobState, NegotiationMode, OstridError, Result,
    SettlementReceipt, TaskIntent, TransitionEvent,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::alert::{AlertSink, OperatorAlerts};
use crate::config::CoordinatorConfig;
use crate::directory::PeerDirectory;
use crate::dispatcher::InboundDispatcher;
use crate::gateway::LedgerGateway;
use crate::job::{TaskJob, TransitionRecord};
use crate::job_ledger::{JobLedger, LedgerSnapshot};
use crate::messaging::MessagingChannel;
use crate::metrics::CoordinatorMetrics;
use crate::monitor::TimeoutMonitor;
use crate::negotiation::{BidAck, NegotiationEngine, RankingStrategy};
use crate::settlement::{AttestationAck, SettlementCoordinator};

/// Inbound envelope buffer between the channel and the dispatcher
const INBOUND_BUFFER: usize = 1024;

/// Builder for [`TaskMarketplace`]
pub struct MarketplaceBuilder {
    config: CoordinatorConfig,
    gateway: Option<Arc<dyn LedgerGateway>>,
    channel: Option<Arc<dyn MessagingChannel>>,
    alert_sinks: Vec<Arc<dyn AlertSink>>,
    ranking: Option<Arc<dyn RankingStrategy>>,
    snapshot: Option<LedgerSnapshot>,
}

impl MarketplaceBuilder {
    pub fn gateway(mut self, gateway: Arc<dyn LedgerGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn channel(mut self, channel: Arc<dyn MessagingChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn alert_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.alert_sinks.push(sink);
        self
    }

    /// AUCTION ranking strategy; quality per price when unset
    pub fn ranking(mut self, ranking: Arc<dyn RankingStrategy>) -> Self {
        self.ranking = Some(ranking);
        self
    }

    /// Start from a previously exported ledger
    pub fn restore(mut self, snapshot: LedgerSnapshot) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    pub fn build(self) -> Result<TaskMarketplace> {
        self.config.validate()?;
        let gateway = self
            .gateway
            .ok_or_else(|| OstridError::Config("no ledger gateway configured".into()))?;
        let channel = self
            .channel
            .ok_or_else(|| OstridError::Config("no messaging channel configured".into()))?;

        let metrics = Arc::new(
            CoordinatorMetrics::new().map_err(|e| OstridError::Internal(e.to_string()))?,
        );
        let alerts = Arc::new(
            self.alert_sinks
                .into_iter()
                .fold(OperatorAlerts::new(metrics.clone()), |alerts, sink| {
                    alerts.with_sink(sink)
                }),
        );

        let ledger = Arc::new(match self.snapshot {
            Some(snapshot) => JobLedger::restore(snapshot, alerts.clone(), metrics.clone()),
            None => JobLedger::new(alerts.clone(), metrics.clone()),
        });
        let directory = Arc::new(PeerDirectory::new());

        let mut negotiation = NegotiationEngine::new(
            ledger.clone(),
            channel.clone(),
            directory.clone(),
            self.config.negotiation.clone(),
            self.config.messaging.solver_address.clone(),
            metrics.clone(),
        );
        if let Some(ranking) = self.ranking {
            negotiation = negotiation.with_ranking(ranking);
        }

        let settlement = SettlementCoordinator::new(
            ledger.clone(),
            gateway,
            alerts.clone(),
            metrics.clone(),
            self.config.settlement.clone(),
        );

        Ok(TaskMarketplace {
            config: self.config,
            ledger,
            negotiation: Arc::new(negotiation),
            settlement: Arc::new(settlement),
            directory,
            channel,
            metrics,
        })
    }
}

/// Task marketplace facade
pub struct TaskMarketplace {
    config: CoordinatorConfig,
    ledger: Arc<JobLedger>,
    negotiation: Arc<NegotiationEngine>,
    settlement: Arc<SettlementCoordinator>,
    directory: Arc<PeerDirectory>,
    channel: Arc<dyn MessagingChannel>,
    metrics: Arc<CoordinatorMetrics>,
}

impl TaskMarketplace {
    pub fn builder(config: CoordinatorConfig) -> MarketplaceBuilder {
        MarketplaceBuilder {
            config,
            gateway: None,
            channel: None,
            alert_sinks: Vec::new(),
            ranking: None,
            snapshot: None,
        }
    }

    // Principal-facing

    /// Publish an intent; returns the new job's id
    pub async fn raise_task_job(&self, intent: TaskIntent, mode: NegotiationMode) -> Result<JobId> {
        self.negotiation.raise_task_job(intent, mode).await
    }

    /// Pick the winning bid and place the escrow hold for it.
    ///
    /// Hold failures are returned to the caller. The job is FAILED by then,
    /// unless the hold's outcome is unknown: it then stays MATCHED until
    /// [`recover`](Self::recover) or [`cancel_job`](Self::cancel_job)
    /// settles it against the gateway.
    pub async fn select_winner(&self, job_id: &JobId) -> Result<Bid> {
        let winner = self.negotiation.select_winner(job_id).await?;
        self.settlement.place_hold(job_id).await?;
        Ok(winner)
    }

    /// Record the principal's attestation and settle the job
    pub async fn attest_completion(
        &self,
        job_id: &JobId,
        attestation: Attestation,
    ) -> Result<AttestationAck> {
        let ack = self.settlement.record_attestation(job_id, attestation).await?;

        // a repeat for a job still ATTESTED retries a deferred settlement
        if self.ledger.state(job_id) == Some(JobState::Attested) {
            self.settlement.settle(job_id).await?;
        }
        Ok(ack)
    }

    /// Settle an ATTESTED job, or return the receipt of a settled one
    pub async fn settle(&self, job_id: &JobId) -> Result<SettlementReceipt> {
        self.settlement.settle(job_id).await
    }

    /// Cancel a job.
    ///
    /// Before escrow the job simply fails; while executing the held funds
    /// are refunded first. A MATCHED job is checked against the gateway in
    /// case a hold landed unrecorded. Returns the job's new state.
    pub async fn cancel_job(&self, job_id: &JobId) -> Result<JobState> {
        let state = self
            .ledger
            .state(job_id)
            .ok_or_else(|| OstridError::JobNotFound(job_id.clone()))?;

        if state == JobState::Matched {
            return self.settlement.cancel_matched(job_id).await;
        }
        if state.is_pre_hold() {
            return Ok(self.negotiation.cancel(job_id).await?.state());
        }
        match state {
            JobState::Escrowed | JobState::Executing => {
                self.settlement.cancel(job_id).await?;
                Ok(JobState::Refunded)
            }
            other => Err(OstridError::IllegalTransition {
                job_id: job_id.clone(),
                from: other,
                event: TransitionEvent::Cancelled,
            }),
        }
    }

    pub fn get_job_status(&self, job_id: &JobId) -> Result<TaskJob> {
        self.ledger
            .get(job_id)
            .ok_or_else(|| OstridError::JobNotFound(job_id.clone()))
    }

    pub fn job_history(&self, job_id: &JobId) -> Result<Vec<TransitionRecord>> {
        if !self.ledger.contains(job_id) {
            return Err(OstridError::JobNotFound(job_id.clone()));
        }
        Ok(self.ledger.history(job_id))
    }

    /// Whether the job is frozen pending operator review
    pub fn is_halted(&self, job_id: &JobId) -> bool {
        self.ledger.is_halted(job_id)
    }

    // Agent-facing

    pub async fn submit_bid(&self, job_id: &JobId, bid: Bid) -> Result<BidAck> {
        self.negotiation.submit_bid(job_id, bid).await
    }

    pub fn register_capabilities(&self, profile: CapabilityProfile) -> Result<()> {
        self.directory.register(profile)
    }

    // Operations

    /// Resume work a restart interrupted: holds for MATCHED jobs and
    /// settlement for ATTESTED ones. Both query the gateway before
    /// submitting anything.
    ///
    /// Returns the number of jobs that moved forward.
    pub async fn recover(&self) -> usize {
        let mut resumed = 0;

        for job in self.ledger.jobs_in_state(JobState::Matched) {
            match self.settlement.place_hold(job.id()).await {
                Ok(_) => resumed += 1,
                Err(e) => warn!(job_id = %job.id(), error = %e, "Hold not resumed"),
            }
        }
        for job in self.ledger.jobs_in_state(JobState::Attested) {
            match self.settlement.settle(job.id()).await {
                Ok(_) => resumed += 1,
                Err(e) => warn!(job_id = %job.id(), error = %e, "Settlement not resumed"),
            }
        }

        info!(resumed, "Recovery pass complete");
        resumed
    }

    /// Subscribe to the messaging channel and route inbound envelopes
    pub async fn start_inbound(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        let (tx, rx) = mpsc::channel(INBOUND_BUFFER);
        self.channel.subscribe(tx).await?;

        let dispatcher = InboundDispatcher::new(self.clone());
        Ok(tokio::spawn(dispatcher.run(rx)))
    }

    pub fn timeout_monitor(&self) -> TimeoutMonitor {
        TimeoutMonitor::new(
            self.ledger.clone(),
            self.negotiation.clone(),
            self.settlement.clone(),
            self.config.monitor.sweep_interval(),
        )
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        self.ledger.snapshot()
    }

    pub fn metrics(&self) -> Arc<CoordinatorMetrics> {
        self.metrics.clone()
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn bid_count(&self, job_id: &JobId) -> usize {
        self.negotiation.bid_count(job_id)
    }
}
