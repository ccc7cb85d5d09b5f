//! Deadline sweeps
//!
//! Periodically fails negotiations whose deadline passed and refunds
//! executions that ran out of time (when the deployment enables it).

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ostrid_common::{JobId, JobState, OstridError};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::job_ledger::JobLedger;
use crate::negotiation::NegotiationEngine;
use crate::settlement::SettlementCoordinator;

/// Outcome of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub negotiations_expired: usize,
    pub executions_refunded: usize,
    pub errors: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Background timeout monitor
pub struct TimeoutMonitor {
    ledger: Arc<JobLedger>,
    negotiation: Arc<NegotiationEngine>,
    settlement: Arc<SettlementCoordinator>,
    interval: Duration,
    /// Whether the sweep loop is running
    running: Arc<RwLock<bool>>,
}

impl TimeoutMonitor {
    pub fn new(
        ledger: Arc<JobLedger>,
        negotiation: Arc<NegotiationEngine>,
        settlement: Arc<SettlementCoordinator>,
        interval: Duration,
    ) -> Self {
        Self {
            ledger,
            negotiation,
            settlement,
            interval,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Expire every job whose deadline passed by `now`
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        let overdue = self
            .ledger
            .jobs_in_state(JobState::Negotiating)
            .into_iter()
            .filter(|job| now >= job.negotiation_deadline());
        for job in overdue {
            match self.negotiation.expire_negotiation(job.id(), now).await {
                Ok(true) => report.negotiations_expired += 1,
                Ok(false) => {}
                Err(e) => report.errors += Self::note_error(job.id(), e),
            }
        }

        let overdue = self
            .ledger
            .jobs_in_state(JobState::Executing)
            .into_iter()
            .filter(|job| job.execution_deadline().is_some_and(|d| now >= d));
        for job in overdue {
            match self.settlement.expire_execution(job.id(), now).await {
                Ok(Some(_)) => report.executions_refunded += 1,
                Ok(None) => {}
                Err(e) => report.errors += Self::note_error(job.id(), e),
            }
        }

        report
    }

    fn note_error(job_id: &JobId, error: OstridError) -> usize {
        // halted jobs wait for an operator
        if matches!(error, OstridError::JobHalted(_)) {
            debug!(job_id = %job_id, "Skipping halted job");
            return 0;
        }
        warn!(job_id = %job_id, error = %error, "Timeout handling failed");
        1
    }

    /// Start the background sweep task
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let running = self.running.clone();
        *running.write() = true;

        info!(interval_ms = self.interval.as_millis() as u64, "Timeout monitor started");

        tokio::spawn(async move {
            while *running.read() {
                tokio::time::sleep(self.interval).await;

                let report = self.sweep(Utc::now()).await;
                if !report.is_empty() {
                    info!(
                        negotiations_expired = report.negotiations_expired,
                        executions_refunded = report.executions_refunded,
                        errors = report.errors,
                        "Timeout sweep"
                    );
                }
            }
            debug!("Timeout monitor stopped");
        })
    }

    /// Stop the sweep loop after its current pass
    pub fn stop(&self) {
        *self.running.write() = false;
    }

    pub fn is_running(&self) -> bool {
        *self.running.read()
    }
}
