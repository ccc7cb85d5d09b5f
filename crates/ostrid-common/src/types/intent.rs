//! TaskIntent - the principal's declared task request
//!
//! An intent carries the task description, the principal's utility weights,
//! the constraints bids must satisfy, how completion is validated, and the
//! escrow budget in the smallest currency unit.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::crypto::did::ParsedDid;
use crate::error::{OstridError, Result};

/// How a job is matched
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NegotiationMode {
    /// Direct match with a single solver
    #[default]
    Solver,
    /// Competitive bidding among many peers
    Auction,
}

impl std::fmt::Display for NegotiationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NegotiationMode::Solver => write!(f, "solver"),
            NegotiationMode::Auction => write!(f, "auction"),
        }
    }
}

/// Who judges completion, and therefore whose key signs the attestation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ValidationMode {
    /// The principal attests directly
    #[default]
    ClientAttestation,
    /// A named oracle attests on the principal's behalf
    Oracle { oracle_did: String },
    /// Evidence carries a proof; the principal signs the attestation
    ZkProof,
}

/// A named predicate every accepted bid must satisfy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Constraint {
    MaxPrice { amount: u64 },
    MinQuality { value: f64 },
    MaxDurationSecs { secs: u64 },
    /// Only peers advertising the skill are solicited
    RequiredSkill { skill: String },
    /// Carried to peers untouched; not checked locally
    Custom {
        name: String,
        value: serde_json::Value,
    },
}

/// Principal's task request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskIntent {
    /// Human-readable task description
    pub task: String,

    /// did:key of the principal raising the job
    pub principal_did: String,

    /// Named dimensions to numeric weight (e.g. "price", "quality", "time")
    pub utility_weights: BTreeMap<String, f64>,

    /// Predicates bids must satisfy
    #[serde(default)]
    pub constraints: Vec<Constraint>,

    /// Requested validation mode
    #[serde(default)]
    pub validation_mode: ValidationMode,

    /// Escrow budget in the smallest currency unit
    pub escrow_amount: u64,
}

impl TaskIntent {
    /// Check the intent before a job is created for it.
    ///
    /// `required_weights` lists utility dimensions the deployment insists on.
    pub fn validate(&self, required_weights: &[String]) -> Result<()> {
        if self.escrow_amount == 0 {
            return Err(OstridError::InvalidIntent(
                "escrow_amount must be positive".into(),
            ));
        }

        if self.task.trim().is_empty() {
            return Err(OstridError::InvalidIntent("task must not be empty".into()));
        }

        if self.utility_weights.is_empty() {
            return Err(OstridError::InvalidIntent(
                "utility_weights must not be empty".into(),
            ));
        }

        if let Some((name, weight)) = self
            .utility_weights
            .iter()
            .find(|(_, w)| !w.is_finite() || **w < 0.0)
        {
            return Err(OstridError::InvalidIntent(format!(
                "utility weight {name} must be finite and non-negative, got {weight}"
            )));
        }

        if let Some(missing) = required_weights
            .iter()
            .find(|dim| !self.utility_weights.contains_key(dim.as_str()))
        {
            return Err(OstridError::InvalidIntent(format!(
                "missing required utility weight: {missing}"
            )));
        }

        ParsedDid::parse(&self.principal_did)
            .map_err(|e| OstridError::InvalidIntent(format!("principal_did: {e}")))?;

        if let ValidationMode::Oracle { oracle_did } = &self.validation_mode {
            ParsedDid::parse(oracle_did)
                .map_err(|e| OstridError::InvalidIntent(format!("oracle_did: {e}")))?;
        }

        for constraint in &self.constraints {
            if let Constraint::MinQuality { value } = constraint {
                if !(0.0..=crate::MAX_QUALITY).contains(value) {
                    return Err(OstridError::InvalidIntent(format!(
                        "min_quality must be within 0..=1, got {value}"
                    )));
                }
            }
        }

        Ok(())
    }

    /// DID whose signature an attestation for this intent must carry
    pub fn expected_attester(&self) -> &str {
        match &self.validation_mode {
            ValidationMode::Oracle { oracle_did } => oracle_did,
            ValidationMode::ClientAttestation | ValidationMode::ZkProof => &self.principal_did,
        }
    }

    /// Skills a peer must advertise to be solicited
    pub fn required_skills(&self) -> impl Iterator<Item = &str> {
        self.constraints.iter().filter_map(|c| match c {
            Constraint::RequiredSkill { skill } => Some(skill.as_str()),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::did::did_for_signing_key;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    fn intent(escrow_amount: u64) -> TaskIntent {
        let key = SigningKey::generate(&mut OsRng);
        TaskIntent {
            task: "summarize quarterly report".into(),
            principal_did: did_for_signing_key(&key),
            utility_weights: BTreeMap::from([("quality".to_string(), 0.7), ("price".to_string(), 0.3)]),
            constraints: vec![],
            validation_mode: ValidationMode::ClientAttestation,
            escrow_amount,
        }
    }

    #[test]
    fn test_valid_intent() {
        assert!(intent(1000).validate(&[]).is_ok());
        assert!(intent(1000).validate(&["quality".to_string()]).is_ok());
    }

    #[test]
    fn test_mode_defaults() {
        assert_eq!(NegotiationMode::default(), NegotiationMode::Solver);
        assert_eq!(ValidationMode::default(), ValidationMode::ClientAttestation);
        let mode: NegotiationMode = serde_json::from_str("\"auction\"").unwrap();
        assert_eq!(mode, NegotiationMode::Auction);
    }

    #[test]
    fn test_zero_escrow_rejected() {
        let err = intent(0).validate(&[]).unwrap_err();
        assert!(matches!(err, OstridError::InvalidIntent(_)));
    }

    #[test]
    fn test_missing_weights_rejected() {
        let mut empty = intent(10);
        empty.utility_weights.clear();
        assert!(empty.validate(&[]).is_err());

        let err = intent(10).validate(&["time".to_string()]).unwrap_err();
        assert!(err.to_string().contains("time"));

        let mut negative = intent(10);
        negative.utility_weights.insert("time".into(), -1.0);
        assert!(negative.validate(&[]).is_err());
    }

    #[test]
    fn test_expected_attester() {
        let mut intent = intent(10);
        assert_eq!(intent.expected_attester(), intent.principal_did);

        let oracle = did_for_signing_key(&SigningKey::generate(&mut OsRng));
        intent.validation_mode = ValidationMode::Oracle {
            oracle_did: oracle.clone(),
        };
        assert!(intent.validate(&[]).is_ok());
        assert_eq!(intent.expected_attester(), oracle);
    }

    #[test]
    fn test_constraint_serde_shape() {
        let json = serde_json::to_value(Constraint::MaxPrice { amount: 500 }).unwrap();
        assert_eq!(json["kind"], "max_price");
        assert_eq!(json["amount"], 500);

        let mode: ValidationMode = serde_json::from_str(r#"{"mode":"zk_proof"}"#).unwrap();
        assert_eq!(mode, ValidationMode::ZkProof);
    }
}
