//! Operator alerts
//!
//! Raised when the coordinator cannot resolve a situation on its own:
//! - Invariant violations (job halted)
//! - Ledger divergence (gateway receipt contradicts the job record)
//! - Funds left held after a failed settlement
//! - Hold outcomes that could not be determined

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ostrid_common::JobId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::metrics::CoordinatorMetrics;

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AlertSeverity {
    /// Needs attention, nothing is stuck
    Warning,
    /// Funds or a job need manual follow-up
    Error,
    /// Correctness violation, processing for the job stopped
    Critical,
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertSeverity::Warning => write!(f, "WARN"),
            AlertSeverity::Error => write!(f, "ERROR"),
            AlertSeverity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Operator-visible alert
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorAlert {
    pub alert_id: String,
    pub raised_at: DateTime<Utc>,
    pub severity: AlertSeverity,
    /// Short machine-friendly name, e.g. "ledger_divergence"
    pub action: String,
    pub job_id: Option<JobId>,
    pub message: String,
    pub details: BTreeMap<String, String>,
}

impl OperatorAlert {
    pub fn new(severity: AlertSeverity, action: &str, message: impl Into<String>) -> Self {
        Self {
            alert_id: uuid::Uuid::now_v7().to_string(),
            raised_at: Utc::now(),
            severity,
            action: action.to_string(),
            job_id: None,
            message: message.into(),
            details: BTreeMap::new(),
        }
    }

    pub fn for_job(mut self, job_id: &JobId) -> Self {
        self.job_id = Some(job_id.clone());
        self
    }

    pub fn with_detail(mut self, key: &str, value: impl ToString) -> Self {
        self.details.insert(key.to_string(), value.to_string());
        self
    }
}

/// Alert destination
pub trait AlertSink: Send + Sync {
    fn raise(&self, alert: &OperatorAlert);
}

/// Writes alerts to the tracing log
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn raise(&self, alert: &OperatorAlert) {
        let job = alert
            .job_id
            .as_ref()
            .map(|j| j.to_string())
            .unwrap_or_else(|| "-".to_string());

        match alert.severity {
            AlertSeverity::Warning => warn!(
                alert_id = %alert.alert_id,
                job_id = %job,
                action = %alert.action,
                details = ?alert.details,
                "{}", alert.message
            ),
            AlertSeverity::Error | AlertSeverity::Critical => error!(
                alert_id = %alert.alert_id,
                severity = %alert.severity,
                job_id = %job,
                action = %alert.action,
                details = ?alert.details,
                "{}", alert.message
            ),
        }
    }
}

/// Keeps alerts in memory
#[derive(Default)]
pub struct MemoryAlertSink {
    alerts: RwLock<Vec<OperatorAlert>>,
}

impl MemoryAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<OperatorAlert> {
        self.alerts.read().clone()
    }

    pub fn count(&self, severity: AlertSeverity) -> usize {
        self.alerts
            .read()
            .iter()
            .filter(|a| a.severity == severity)
            .count()
    }

    pub fn for_job(&self, job_id: &JobId) -> Vec<OperatorAlert> {
        self.alerts
            .read()
            .iter()
            .filter(|a| a.job_id.as_ref() == Some(job_id))
            .cloned()
            .collect()
    }
}

impl AlertSink for MemoryAlertSink {
    fn raise(&self, alert: &OperatorAlert) {
        self.alerts.write().push(alert.clone());
    }
}

/// Fans alerts out to every configured sink
pub struct OperatorAlerts {
    sinks: Vec<Arc<dyn AlertSink>>,
    metrics: Arc<CoordinatorMetrics>,
}

impl OperatorAlerts {
    /// Alerts go to the tracing log plus any extra sinks added later
    pub fn new(metrics: Arc<CoordinatorMetrics>) -> Self {
        Self {
            sinks: vec![Arc::new(TracingAlertSink)],
            metrics,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn raise(&self, alert: OperatorAlert) {
        self.metrics
            .alerts_total
            .with_label_values(&[&alert.severity.to_string()])
            .inc();
        for sink in &self.sinks {
            sink.raise(&alert);
        }
    }
}
