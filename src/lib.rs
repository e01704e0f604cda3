//! Safe execution orchestration for autonomous financial agents.
//!
//! Worker agents execute irreversible, high-value actions behind an
//! admission-control gate, a quorum consensus protocol, a circuit breaker
//! and an append-only audit trail. The orchestrator sequences delegated
//! stage work and folds every outcome into a single execution report.

pub mod agent;
#[cfg(feature = "api")]
pub mod api;
pub mod attest;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod feed;
pub mod guard;
pub mod intent;
pub mod orchestrator;

pub use agent::registry::AgentRegistry;
pub use agent::{
    Agent, AgentKind, AgentSnapshot, AgentStatus, Task, TaskAction, TaskHandler, TaskResult,
};
pub use attest::{Attestation, Attestor, HmacAttestor};
pub use bootstrap::bootstrap;
pub use config::{AgentSettings, AppConfig};
pub use error::{MarshalError, Result};
pub use feed::{FixedFeed, MarketFeed};
pub use guard::{
    AuditEntry, AuditFilter, AuditResult, BreakerStatus, ConsensusOutcome, ConsensusProposal,
    ExecutionGuard, ExecutionLimits, GuardStatus, ValidationReport, ValidationRequest,
};
pub use intent::{IntentAction, IntentParams, RiskTolerance, TradeIntent};
pub use orchestrator::{
    ExecutionReport, Orchestrator, OrchestratorConfig, ReportStatus, StageOutcome,
};
