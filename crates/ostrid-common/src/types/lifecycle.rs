//! Task-job lifecycle
//!
//! The (state, event) table below is the contract both the negotiation and
//! the settlement side honor. Every write to a job's state names the event
//! that caused it, and the target state is looked up here; any pair missing
//! from the table is an illegal transition.
//!
//! ```text
//! CREATED      --intent accepted-->        NEGOTIATING
//! NEGOTIATING  --winner selected-->        MATCHED
//! NEGOTIATING  --timeout / undeliverable-> FAILED
//! MATCHED      --hold succeeds-->          ESCROWED
//! MATCHED      --hold fails-->             FAILED
//! ESCROWED     --(auto)-->                 EXECUTING
//! EXECUTING    --valid attestation-->      ATTESTED
//! EXECUTING    --execution timeout-->      REFUNDED
//! ATTESTED     --release ok-->             RELEASED
//! ATTESTED     --refund ok-->              REFUNDED
//! ATTESTED     --ledger op fails-->        FAILED
//! ```
//!
//! Cancellation moves CREATED, NEGOTIATING, and MATCHED jobs to FAILED. Once
//! funds are held it can only go through the refund path (EXECUTING to
//! REFUNDED).

use serde::{Deserialize, Serialize};

/// Lifecycle state of a task job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Created,
    Negotiating,
    Matched,
    Escrowed,
    Executing,
    Attested,
    Released,
    Refunded,
    Failed,
}

impl JobState {
    pub const ALL: [JobState; 9] = [
        JobState::Created,
        JobState::Negotiating,
        JobState::Matched,
        JobState::Escrowed,
        JobState::Executing,
        JobState::Attested,
        JobState::Released,
        JobState::Refunded,
        JobState::Failed,
    ];

    /// Target state for `event` applied in this state, if the pair is legal.
    pub fn next(self, event: TransitionEvent) -> Option<JobState> {
        use JobState::*;
        use TransitionEvent::*;
        match (self, event) {
            (Created, IntentAccepted) => Some(Negotiating),
            (Created, Cancelled) => Some(Failed),

            (Negotiating, WinnerSelected) => Some(Matched),
            (Negotiating, NegotiationTimedOut) => Some(Failed),
            (Negotiating, DeliveryFailed) => Some(Failed),
            (Negotiating, Cancelled) => Some(Failed),

            (Matched, HoldPlaced) => Some(Escrowed),
            (Matched, HoldFailed) => Some(Failed),
            (Matched, Cancelled) => Some(Failed),

            (Escrowed, ExecutionStarted) => Some(Executing),

            (Executing, AttestationAccepted) => Some(Attested),
            (Executing, ExecutionTimedOut) => Some(Refunded),
            (Executing, Cancelled) => Some(Refunded),

            (Attested, FundsReleased) => Some(Released),
            (Attested, FundsRefunded) => Some(Refunded),
            (Attested, SettlementFailed) => Some(Failed),

            _ => None,
        }
    }

    /// Whether some event leads from this state to `target`.
    pub fn can_transition_to(self, target: JobState) -> bool {
        TransitionEvent::ALL
            .iter()
            .any(|event| self.next(*event) == Some(target))
    }

    /// Terminal states are retained for audit and never left.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Released | JobState::Refunded | JobState::Failed
        )
    }

    /// States in which no hold may exist yet.
    pub fn is_pre_hold(self) -> bool {
        matches!(
            self,
            JobState::Created | JobState::Negotiating | JobState::Matched
        )
    }

    /// States in which a hold receipt must exist.
    pub fn requires_hold(self) -> bool {
        matches!(
            self,
            JobState::Escrowed
                | JobState::Executing
                | JobState::Attested
                | JobState::Released
                | JobState::Refunded
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JobState::Created => "CREATED",
            JobState::Negotiating => "NEGOTIATING",
            JobState::Matched => "MATCHED",
            JobState::Escrowed => "ESCROWED",
            JobState::Executing => "EXECUTING",
            JobState::Attested => "ATTESTED",
            JobState::Released => "RELEASED",
            JobState::Refunded => "REFUNDED",
            JobState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Event that triggers a lifecycle transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionEvent {
    IntentAccepted,
    WinnerSelected,
    NegotiationTimedOut,
    /// No peer could be reached with the intent
    DeliveryFailed,
    HoldPlaced,
    HoldFailed,
    ExecutionStarted,
    AttestationAccepted,
    ExecutionTimedOut,
    FundsReleased,
    FundsRefunded,
    SettlementFailed,
    Cancelled,
}

impl TransitionEvent {
    pub const ALL: [TransitionEvent; 13] = [
        TransitionEvent::IntentAccepted,
        TransitionEvent::WinnerSelected,
        TransitionEvent::NegotiationTimedOut,
        TransitionEvent::DeliveryFailed,
        TransitionEvent::HoldPlaced,
        TransitionEvent::HoldFailed,
        TransitionEvent::ExecutionStarted,
        TransitionEvent::AttestationAccepted,
        TransitionEvent::ExecutionTimedOut,
        TransitionEvent::FundsReleased,
        TransitionEvent::FundsRefunded,
        TransitionEvent::SettlementFailed,
        TransitionEvent::Cancelled,
    ];
}

impl std::fmt::Display for TransitionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TransitionEvent::IntentAccepted => "intent_accepted",
            TransitionEvent::WinnerSelected => "winner_selected",
            TransitionEvent::NegotiationTimedOut => "negotiation_timed_out",
            TransitionEvent::DeliveryFailed => "delivery_failed",
            TransitionEvent::HoldPlaced => "hold_placed",
            TransitionEvent::HoldFailed => "hold_failed",
            TransitionEvent::ExecutionStarted => "execution_started",
            TransitionEvent::AttestationAccepted => "attestation_accepted",
            TransitionEvent::ExecutionTimedOut => "execution_timed_out",
            TransitionEvent::FundsReleased => "funds_released",
            TransitionEvent::FundsRefunded => "funds_refunded",
            TransitionEvent::SettlementFailed => "settlement_failed",
            TransitionEvent::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let path = [
            (TransitionEvent::IntentAccepted, JobState::Negotiating),
            (TransitionEvent::WinnerSelected, JobState::Matched),
            (TransitionEvent::HoldPlaced, JobState::Escrowed),
            (TransitionEvent::ExecutionStarted, JobState::Executing),
            (TransitionEvent::AttestationAccepted, JobState::Attested),
            (TransitionEvent::FundsReleased, JobState::Released),
        ];

        let mut state = JobState::Created;
        for (event, expected) in path {
            state = state.next(event).unwrap();
            assert_eq!(state, expected);
        }
        assert!(state.is_terminal());
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        for state in [JobState::Released, JobState::Refunded, JobState::Failed] {
            for event in TransitionEvent::ALL {
                assert_eq!(state.next(event), None, "{state} + {event}");
            }
        }
    }

    #[test]
    fn test_cancellation_after_escrow_goes_through_refund() {
        assert_eq!(
            JobState::Executing.next(TransitionEvent::Cancelled),
            Some(JobState::Refunded)
        );
        assert_eq!(JobState::Attested.next(TransitionEvent::Cancelled), None);
        assert_eq!(
            JobState::Matched.next(TransitionEvent::Cancelled),
            Some(JobState::Failed)
        );
    }

    #[test]
    fn test_illegal_shortcuts() {
        assert!(!JobState::Negotiating.can_transition_to(JobState::Escrowed));
        assert!(!JobState::Matched.can_transition_to(JobState::Released));
        assert!(!JobState::Executing.can_transition_to(JobState::Released));
        assert!(!JobState::Created.can_transition_to(JobState::Matched));
        assert!(JobState::Attested.can_transition_to(JobState::Failed));
    }

    #[test]
    fn test_hold_partition() {
        for state in JobState::ALL {
            if state == JobState::Failed {
                assert!(!state.is_pre_hold() && !state.requires_hold());
            } else {
                assert_ne!(state.is_pre_hold(), state.requires_hold(), "{state}");
            }
        }
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(
            serde_json::to_string(&JobState::Negotiating).unwrap(),
            "\"NEGOTIATING\""
        );
        assert_eq!(
            serde_json::to_string(&TransitionEvent::HoldFailed).unwrap(),
            "\"hold_failed\""
        );
    }
}
