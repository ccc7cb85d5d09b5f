//! Prometheus metrics for the coordinator

use prometheus::{IntCounter, IntCounterVec, Opts, Registry};

/// Coordinator counters
pub struct CoordinatorMetrics {
    /// Lifecycle transitions by target state
    pub transitions_total: IntCounterVec,
    /// Ledger gateway calls by operation and outcome
    pub ledger_calls_total: IntCounterVec,
    /// Bids by acknowledgement
    pub bids_total: IntCounterVec,
    /// Stale or duplicate inbound events absorbed
    pub stale_events_total: IntCounter,
    /// Operator alerts by severity
    pub alerts_total: IntCounterVec,
}

impl CoordinatorMetrics {
    pub fn new() -> prometheus::Result<Self> {
        Ok(Self {
            transitions_total: IntCounterVec::new(
                Opts::new(
                    "ostrid_job_transitions_total",
                    "Task-job lifecycle transitions",
                ),
                &["state"],
            )?,
            ledger_calls_total: IntCounterVec::new(
                Opts::new("ostrid_ledger_calls_total", "Ledger gateway calls"),
                &["operation", "outcome"],
            )?,
            bids_total: IntCounterVec::new(
                Opts::new("ostrid_bids_total", "Bids received"),
                &["ack"],
            )?,
            stale_events_total: IntCounter::new(
                "ostrid_stale_events_total",
                "Stale or duplicate inbound events absorbed",
            )?,
            alerts_total: IntCounterVec::new(
                Opts::new("ostrid_operator_alerts_total", "Operator alerts raised"),
                &["severity"],
            )?,
        })
    }

    /// Register all counters with `registry`
    pub fn register(&self, registry: &Registry) -> prometheus::Result<()> {
        registry.register(Box::new(self.transitions_total.clone()))?;
        registry.register(Box::new(self.ledger_calls_total.clone()))?;
        registry.register(Box::new(self.bids_total.clone()))?;
        registry.register(Box::new(self.stale_events_total.clone()))?;
        registry.register(Box::new(self.alerts_total.clone()))?;
        Ok(())
    }

    pub(crate) fn ledger_call(&self, operation: &str, ok: bool) {
        let outcome = if ok { "ok" } else { "error" };
        self.ledger_calls_total
            .with_label_values(&[operation, outcome])
            .inc();
    }
}
