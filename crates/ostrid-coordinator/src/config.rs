//! Coordinator configuration

use std::path::Path;
use std::time::Duration;

use ostrid_common::{OstridError, PeerAddress, Result};
use serde::{Deserialize, Serialize};

/// Upper bound on configured timeouts (about a century)
const MAX_TIMEOUT_SECS: u64 = 100 * 365 * 86_400;

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Negotiation phase settings
    pub negotiation: NegotiationSettings,
    /// Settlement phase settings
    pub settlement: SettlementSettings,
    /// Timeout monitor settings
    pub monitor: MonitorSettings,
    /// Messaging settings
    pub messaging: MessagingSettings,
    /// Default tracing filter when RUST_LOG is unset
    pub log_filter: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            negotiation: NegotiationSettings::default(),
            settlement: SettlementSettings::default(),
            monitor: MonitorSettings::default(),
            messaging: MessagingSettings::default(),
            log_filter: "info".to_string(),
        }
    }
}

impl CoordinatorConfig {
    /// Load configuration from `.env`, an optional file, and `OSTRID_` variables.
    ///
    /// Sections are separated by a double underscore, e.g.
    /// `OSTRID_SETTLEMENT__REFUND_ON_EXECUTION_TIMEOUT=true`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        // Try to load .env file
        let _ = dotenvy::dotenv();

        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("OSTRID")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let cfg: Self = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| OstridError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject settings the coordinator cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.negotiation.max_bids_per_job == 0 {
            return Err(OstridError::Config(
                "negotiation.max_bids_per_job must be positive".into(),
            ));
        }
        if self.monitor.sweep_interval_ms == 0 {
            return Err(OstridError::Config(
                "monitor.sweep_interval_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Negotiation phase settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationSettings {
    /// Seconds a job may stay NEGOTIATING before it fails
    pub timeout_secs: u64,
    /// Utility dimensions every intent must weight
    pub required_utility_weights: Vec<String>,
    /// Distinct bidders recorded per job
    pub max_bids_per_job: usize,
}

impl Default for NegotiationSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            required_utility_weights: Vec::new(),
            max_bids_per_job: 256,
        }
    }
}

impl NegotiationSettings {
    pub fn timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.timeout_secs.min(MAX_TIMEOUT_SECS) as i64)
    }
}

/// Settlement phase settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementSettings {
    /// Seconds a job may stay EXECUTING without an attestation
    pub execution_timeout_secs: u64,
    /// Refund the principal when the execution deadline passes
    pub refund_on_execution_timeout: bool,
    /// Resubmissions of a release or refund after an indeterminate failure
    pub max_settlement_retries: u32,
}

impl Default for SettlementSettings {
    fn default() -> Self {
        Self {
            execution_timeout_secs: 86_400,
            refund_on_execution_timeout: false,
            max_settlement_retries: 0,
        }
    }
}

impl SettlementSettings {
    pub fn execution_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.execution_timeout_secs.min(MAX_TIMEOUT_SECS) as i64)
    }
}

/// Timeout monitor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    pub sweep_interval_ms: u64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            sweep_interval_ms: 1000,
        }
    }
}

impl MonitorSettings {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

/// Messaging settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagingSettings {
    /// Fixed solver peer for SOLVER-mode jobs; the directory is used otherwise
    pub solver_address: Option<PeerAddress>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = CoordinatorConfig::default();
        assert_eq!(cfg.negotiation.timeout_secs, 300);
        assert_eq!(cfg.negotiation.max_bids_per_job, 256);
        assert_eq!(cfg.settlement.execution_timeout_secs, 86_400);
        assert!(!cfg.settlement.refund_on_execution_timeout);
        assert_eq!(cfg.settlement.max_settlement_retries, 0);
        assert_eq!(cfg.monitor.sweep_interval(), Duration::from_secs(1));
        assert!(cfg.messaging.solver_address.is_none());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("ostrid-{}.toml", uuid::Uuid::now_v7()));
        std::fs::write(
            &path,
            r#"
log_filter = "debug"

[settlement]
refund_on_execution_timeout = true
execution_timeout_secs = 60

[messaging]
solver_address = "a2a://solver"
"#,
        )
        .unwrap();

        let cfg = CoordinatorConfig::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(cfg.log_filter, "debug");
        assert!(cfg.settlement.refund_on_execution_timeout);
        assert_eq!(cfg.settlement.execution_timeout_secs, 60);
        // untouched sections keep their defaults
        assert_eq!(cfg.negotiation.timeout_secs, 300);
        assert_eq!(
            cfg.messaging.solver_address,
            Some(PeerAddress::from("a2a://solver"))
        );
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut cfg = CoordinatorConfig::default();
        cfg.monitor.sweep_interval_ms = 0;
        assert!(matches!(cfg.validate(), Err(OstridError::Config(_))));
    }
}
