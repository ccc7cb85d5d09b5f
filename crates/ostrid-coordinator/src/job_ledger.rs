//! Job Ledger - system of record for task-job lifecycle state
//!
//! Every job has its own async mutex. Holding a [`JobGuard`] is the
//! per-job critical section: bid submission, attestation, settlement and
//! timeout handling for one job are serialized through it, and it is held
//! across ledger gateway calls so two call sites never touch the same hold
//! concurrently. Different jobs never contend.
//!
//! [`JobLedger::apply`] is the only write path for `state`. It looks the
//! target up in the lifecycle table, checks the record invariants on the
//! candidate record, and only then commits. A write that would break an
//! invariant halts the job and raises a critical operator alert.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use ostrid_common::{
    JobId, JobState, NegotiationMode, OstridError, Result, TaskIntent, TransitionEvent,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{error, info};

use crate::alert::{AlertSeverity, OperatorAlert, OperatorAlerts};
use crate::job::{TaskJob, TransitionRecord};
use crate::metrics::CoordinatorMetrics;

/// Exclusive access to one job
pub struct JobGuard {
    job_id: JobId,
    _lock: OwnedMutexGuard<()>,
}

impl JobGuard {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }
}

/// Serializable export of the ledger
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub jobs: Vec<JobSnapshot>,
}

/// One job's record, transition log, and halt flag
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job: TaskJob,
    pub history: Vec<TransitionRecord>,
    pub halted: Option<String>,
}

/// In-memory job store
pub struct JobLedger {
    records: DashMap<JobId, TaskJob>,
    history: DashMap<JobId, Vec<TransitionRecord>>,
    locks: DashMap<JobId, Arc<Mutex<()>>>,
    halted: DashMap<JobId, String>,
    alerts: Arc<OperatorAlerts>,
    metrics: Arc<CoordinatorMetrics>,
}

impl JobLedger {
    pub fn new(alerts: Arc<OperatorAlerts>, metrics: Arc<CoordinatorMetrics>) -> Self {
        Self {
            records: DashMap::new(),
            history: DashMap::new(),
            locks: DashMap::new(),
            halted: DashMap::new(),
            alerts,
            metrics,
        }
    }

    /// Create a job in CREATED
    pub fn create(
        &self,
        intent: TaskIntent,
        mode: NegotiationMode,
        negotiation_deadline: DateTime<Utc>,
    ) -> JobId {
        let job_id = JobId::generate();
        let job = TaskJob::new(
            job_id.clone(),
            intent,
            mode,
            negotiation_deadline,
            Utc::now(),
        );

        self.locks
            .insert(job_id.clone(), Arc::new(Mutex::new(())));
        self.history.insert(job_id.clone(), Vec::new());
        self.records.insert(job_id.clone(), job);
        self.metrics
            .transitions_total
            .with_label_values(&[&JobState::Created.to_string()])
            .inc();

        info!(job_id = %job_id, mode = %mode, "Job created");
        job_id
    }

    /// Enter the job's critical section
    pub async fn lock(&self, job_id: &JobId) -> Result<JobGuard> {
        // clone the mutex out so no map shard is held across the await
        let lock = self
            .locks
            .get(job_id)
            .map(|l| l.value().clone())
            .ok_or_else(|| OstridError::JobNotFound(job_id.clone()))?;

        let guard = lock.lock_owned().await;

        if self.halted.contains_key(job_id) {
            return Err(OstridError::JobHalted(job_id.clone()));
        }

        Ok(JobGuard {
            job_id: job_id.clone(),
            _lock: guard,
        })
    }

    pub fn get(&self, job_id: &JobId) -> Option<TaskJob> {
        self.records.get(job_id).map(|r| r.value().clone())
    }

    pub fn state(&self, job_id: &JobId) -> Option<JobState> {
        self.records.get(job_id).map(|r| r.state)
    }

    pub fn contains(&self, job_id: &JobId) -> bool {
        self.records.contains_key(job_id)
    }

    pub fn is_halted(&self, job_id: &JobId) -> bool {
        self.halted.contains_key(job_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Apply `event` to the locked job.
    ///
    /// `mutate` may fill in receipts, the selected bid, and the like; it
    /// cannot choose the target state. Returns the committed record.
    pub fn apply<F>(&self, guard: &JobGuard, event: TransitionEvent, mutate: F) -> Result<TaskJob>
    where
        F: FnOnce(&mut TaskJob),
    {
        let job_id = guard.job_id();
        if self.halted.contains_key(job_id) {
            return Err(OstridError::JobHalted(job_id.clone()));
        }

        let mut entry = self
            .records
            .get_mut(job_id)
            .ok_or_else(|| OstridError::JobNotFound(job_id.clone()))?;

        let from = entry.state;
        let to = from
            .next(event)
            .ok_or_else(|| OstridError::IllegalTransition {
                job_id: job_id.clone(),
                from,
                event,
            })?;

        let mut candidate = entry.value().clone();
        mutate(&mut candidate);
        candidate.state = to;
        let now = Utc::now();
        candidate.last_transition_at = now;

        if let Err(reason) = candidate.check_invariants() {
            drop(entry);
            return Err(self.halt(job_id, format!("{event} from {from}: {reason}")));
        }

        *entry = candidate.clone();
        drop(entry);

        self.history
            .entry(job_id.clone())
            .or_default()
            .push(TransitionRecord {
                from,
                to,
                event,
                timestamp: now,
            });
        self.metrics
            .transitions_total
            .with_label_values(&[&to.to_string()])
            .inc();

        info!(job_id = %job_id, from = %from, to = %to, event = %event, "Job transitioned");
        Ok(candidate)
    }

    /// Stop all further writes to a job and page an operator
    pub(crate) fn halt(&self, job_id: &JobId, reason: String) -> OstridError {
        error!(job_id = %job_id, reason = %reason, "Halting job");
        self.halted.insert(job_id.clone(), reason.clone());
        self.alerts.raise(
            OperatorAlert::new(AlertSeverity::Critical, "job_halted", reason.clone())
                .for_job(job_id),
        );
        OstridError::InvariantViolation {
            job_id: job_id.clone(),
            reason,
        }
    }

    /// Transition log for a job, oldest first
    pub fn history(&self, job_id: &JobId) -> Vec<TransitionRecord> {
        self.history
            .get(job_id)
            .map(|h| h.value().clone())
            .unwrap_or_default()
    }

    pub fn jobs_in_state(&self, state: JobState) -> Vec<TaskJob> {
        self.records
            .iter()
            .filter(|r| r.state == state)
            .map(|r| r.value().clone())
            .collect()
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        let mut jobs: Vec<JobSnapshot> = self
            .records
            .iter()
            .map(|r| JobSnapshot {
                job: r.value().clone(),
                history: self.history(r.key()),
                halted: self.halted.get(r.key()).map(|h| h.value().clone()),
            })
            .collect();
        jobs.sort_by(|a, b| a.job.id.cmp(&b.job.id));
        LedgerSnapshot { jobs }
    }

    /// Rebuild a ledger from a snapshot.
    ///
    /// Records that fail their invariants are restored halted.
    pub fn restore(
        snapshot: LedgerSnapshot,
        alerts: Arc<OperatorAlerts>,
        metrics: Arc<CoordinatorMetrics>,
    ) -> Self {
        let ledger = Self::new(alerts, metrics);

        for JobSnapshot {
            job,
            history,
            halted,
        } in snapshot.jobs
        {
            let job_id = job.id.clone();
            let violation = job.check_invariants().err();

            ledger
                .locks
                .insert(job_id.clone(), Arc::new(Mutex::new(())));
            ledger.history.insert(job_id.clone(), history);
            ledger.records.insert(job_id.clone(), job);

            if let Some(reason) = halted {
                ledger.halted.insert(job_id, reason);
            } else if let Some(reason) = violation {
                ledger.halt(&job_id, format!("restored record inconsistent: {reason}"));
            }
        }

        info!(jobs = ledger.len(), "Job ledger restored");
        ledger
    }
}
