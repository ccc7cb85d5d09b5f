//! # Ostrid Coordinator
//!
//! Task-job lifecycle coordinator: turns a principal's intent into a
//! negotiated, escrowed, executed, attested and settled job.
//!
//! ## Components
//!
//! - **Job ledger**: per-job records, the lifecycle table, and invariant checks
//! - **Negotiation**: intent fan-out, bid intake, and winner selection
//! - **Settlement**: escrow hold, attestation, release and refund
//! - **Timeout monitor**: negotiation and execution deadlines
//! - **Dispatcher**: inbound envelopes from the messaging channel
//!
//! ## Architecture
//!
//! ```text
//!  principal ──► TaskMarketplace ◄── InboundDispatcher ◄── MessagingChannel
//!                  │         │
//!       NegotiationEngine   SettlementCoordinator ──► LedgerGateway
//!                  │         │
//!                  └─► JobLedger ◄── TimeoutMonitor
//! ```

pub mod alert;
pub mod config;
pub mod directory;
pub mod dispatcher;
pub mod gateway;
pub mod job;
pub mod job_ledger;
pub mod marketplace;
pub mod messaging;
pub mod metrics;
pub mod monitor;
pub mod negotiation;
pub mod settlement;

pub use alert::{AlertSeverity, AlertSink, MemoryAlertSink, OperatorAlert, OperatorAlerts};
pub use config::CoordinatorConfig;
pub use dispatcher::{DispatchOutcome, InboundDispatcher};
pub use gateway::{InMemoryLedgerGateway, LedgerGateway, LedgerOp};
pub use job::{TaskJob, TransitionRecord};
pub use job_ledger::{JobLedger, LedgerSnapshot};
pub use marketplace::{MarketplaceBuilder, TaskMarketplace};
pub use messaging::{LoopbackChannel, MessagingChannel};
pub use metrics::CoordinatorMetrics;
pub use monitor::{SweepReport, TimeoutMonitor};
pub use negotiation::{BidAck, FirstValidBid, QualityPerPrice, RankingStrategy, UtilityWeighted};
pub use settlement::{AttestationAck, SettlementCoordinator};
