//! Peer directory
//!
//! Remote agents register signed capability profiles; intents are only sent
//! to peers whose profile advertises every skill the intent requires.

use dashmap::DashMap;
use ostrid_common::{CapabilityProfile, OstridError, PeerAddress, Result, TaskIntent};
use tracing::info;

/// Registered capability profiles keyed by agent DID
#[derive(Default)]
pub struct PeerDirectory {
    profiles: DashMap<String, CapabilityProfile>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace an agent's profile
    pub fn register(&self, profile: CapabilityProfile) -> Result<()> {
        profile
            .verify()
            .map_err(|e| OstridError::InvalidSignature(format!("capability profile: {e}")))?;

        info!(
            agent = %profile.agent_did(),
            address = %profile.address(),
            skills = ?profile.terms.skills,
            "Capability profile registered"
        );
        self.profiles
            .insert(profile.agent_did().to_string(), profile);
        Ok(())
    }

    pub fn get(&self, agent_did: &str) -> Option<CapabilityProfile> {
        self.profiles.get(agent_did).map(|p| p.value().clone())
    }

    pub fn address_of(&self, agent_did: &str) -> Option<PeerAddress> {
        self.profiles.get(agent_did).map(|p| p.address().clone())
    }

    /// Profiles able to take the intent, ordered by DID
    pub fn eligible(&self, intent: &TaskIntent) -> Vec<CapabilityProfile> {
        let required: Vec<&str> = intent.required_skills().collect();
        let mut eligible: Vec<CapabilityProfile> = self
            .profiles
            .iter()
            .filter(|p| required.iter().all(|skill| p.has_skill(skill)))
            .map(|p| p.value().clone())
            .collect();
        eligible.sort_by(|a, b| a.agent_did().cmp(b.agent_did()));
        eligible
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use ostrid_common::crypto::did::did_for_signing_key;
    use ostrid_common::{Constraint, ProfileTerms, ValidationMode};
    use rand::rngs::OsRng;
    use std::collections::BTreeMap;

    fn profile(name: &str, skills: &[&str]) -> CapabilityProfile {
        let key = SigningKey::generate(&mut OsRng);
        CapabilityProfile::sign(
            ProfileTerms {
                agent_did: did_for_signing_key(&key),
                address: PeerAddress::from(format!("a2a://{name}").as_str()),
                skills: skills.iter().map(|s| s.to_string()).collect(),
                capabilities: BTreeMap::new(),
                reputation: None,
            },
            &key,
        )
        .unwrap()
    }

    #[test]
    fn test_eligibility_by_skill() {
        let directory = PeerDirectory::new();
        directory.register(profile("a", &["ocr", "translation"])).unwrap();
        directory.register(profile("b", &["translation"])).unwrap();

        let mut intent = TaskIntent {
            task: "translate scanned letter".into(),
            principal_did: did_for_signing_key(&SigningKey::generate(&mut OsRng)),
            utility_weights: BTreeMap::from([("quality".to_string(), 1.0)]),
            constraints: vec![],
            validation_mode: ValidationMode::ClientAttestation,
            escrow_amount: 10,
        };
        assert_eq!(directory.eligible(&intent).len(), 2);

        intent.constraints.push(Constraint::RequiredSkill {
            skill: "ocr".into(),
        });
        let eligible = directory.eligible(&intent);
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].address(), &PeerAddress::from("a2a://a"));
    }

    #[test]
    fn test_forged_profile_rejected() {
        let directory = PeerDirectory::new();
        let mut forged = profile("a", &["ocr"]);
        forged.terms.skills.push("admin".into());

        assert!(matches!(
            directory.register(forged),
            Err(OstridError::InvalidSignature(_))
        ));
        assert!(directory.is_empty());
    }
}
