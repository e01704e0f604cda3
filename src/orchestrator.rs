//! Orchestrator: the lead role.
//!
//! Consumes a structured intent, asks the guard for admission, runs the
//! consensus round when demanded, delegates stage work to specialized
//! agents through the registry, requests an attestation over the computed
//! result, and folds everything into one execution report. The report is
//! always returned; no failure below this level escapes as an error.

use chrono::Duration;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agent::registry::AgentRegistry;
use crate::agent::{AgentKind, Task, TaskAction, TaskResult};
use crate::attest::Attestor;
use crate::error::{MarshalError, Result};
use crate::guard::{ConsensusOutcome, ExecutionGuard, ValidationRequest};
use crate::intent::TradeIntent;

/// Aggregate outcome of one orchestrated execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Success,
    Failed,
}

/// One delegated stage's outcome, kept even when a later stage fails
#[derive(Debug, Clone, Serialize)]
pub struct StageOutcome {
    pub agent_id: String,
    pub success: bool,
    pub data: Option<Value>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl From<&TaskResult> for StageOutcome {
    fn from(result: &TaskResult) -> Self {
        Self {
            agent_id: result.agent_id.clone(),
            success: result.success,
            data: result.data.clone(),
            error: result.error.clone(),
            duration_ms: result.duration_ms,
        }
    }
}

/// The auditable record of one end-to-end execution. Built up stage by
/// stage and frozen once returned to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub execution_id: Uuid,
    pub target: String,
    pub strategy: String,
    pub risk: Option<StageOutcome>,
    pub hedging: Option<StageOutcome>,
    pub settlement: Option<StageOutcome>,
    pub reporting: Option<StageOutcome>,
    pub consensus: Option<ConsensusOutcome>,
    pub attestations: Vec<String>,
    pub status: ReportStatus,
    pub total_duration_ms: u64,
    pub summary: Option<String>,
    pub errors: Vec<String>,
}

impl ExecutionReport {
    fn new(execution_id: Uuid, intent: &TradeIntent) -> Self {
        Self {
            execution_id,
            target: intent.target.clone(),
            strategy: intent.strategy.clone(),
            risk: None,
            hedging: None,
            settlement: None,
            reporting: None,
            consensus: None,
            attestations: Vec::new(),
            status: ReportStatus::Failed,
            total_duration_ms: 0,
            summary: None,
            errors: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ReportStatus::Success
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Deadline handed to each consensus proposal
    pub consensus_timeout_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            consensus_timeout_secs: 30,
        }
    }
}

/// Sequencing lead over guard, registry and attestor.
pub struct Orchestrator {
    registry: Arc<AgentRegistry>,
    guard: Arc<ExecutionGuard>,
    attestor: Arc<dyn Attestor>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<AgentRegistry>,
        guard: Arc<ExecutionGuard>,
        attestor: Arc<dyn Attestor>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            registry,
            guard,
            attestor,
            config,
        }
    }

    pub fn guard(&self) -> &Arc<ExecutionGuard> {
        &self.guard
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// Deterministic position estimate from the intent's own parameters.
    /// Zero for read-only intents; otherwise the requested amount scaled
    /// by risk appetite and leverage.
    fn estimate_position_size(intent: &TradeIntent) -> Decimal {
        if intent.read_only {
            return Decimal::ZERO;
        }
        let leverage = intent.params.leverage.unwrap_or(Decimal::ONE);
        intent.params.amount_usd * intent.params.risk_tolerance.sizing_factor() * leverage
    }

    /// Run one intent end to end. Never returns an error: every failure,
    /// from admission to attestation, comes back as a failed report with
    /// whatever partial results were produced.
    pub async fn execute(&self, intent: TradeIntent) -> ExecutionReport {
        let execution_id = Uuid::new_v4();
        let started = Instant::now();
        let mut report = ExecutionReport::new(execution_id, &intent);
        let estimate = Self::estimate_position_size(&intent);

        debug!(
            "Execution {} admitting: {} on {} (est ${})",
            execution_id, intent.action, intent.target, estimate
        );

        let mut request = ValidationRequest::new(
            execution_id,
            "orchestrator",
            intent.action.as_str(),
            estimate,
        )
        .read_only(intent.read_only);
        if let Some(leverage) = intent.params.leverage {
            request = request.with_leverage(leverage);
        }
        if let Some(slippage) = intent.params.max_slippage_pct {
            request = request.with_slippage(slippage);
        }

        let verdict = self.guard.validate_execution(request).await;
        if !verdict.is_valid {
            warn!(
                "Execution {} denied at admission: {}",
                execution_id,
                verdict.errors.join("; ")
            );
            report.errors = verdict.errors;
            report.total_duration_ms = started.elapsed().as_millis() as u64;
            return report;
        }

        self.guard
            .start_execution(
                execution_id,
                "orchestrator",
                intent.action.as_str(),
                json!({
                    "target": intent.target,
                    "strategy": intent.strategy,
                    "position_size_usd": estimate,
                }),
                intent.read_only,
            )
            .await;

        match self
            .run_stages(execution_id, &intent, &verdict, estimate, &mut report)
            .await
        {
            Ok(attestation_handle) => {
                self.guard
                    .complete_execution(execution_id, attestation_handle)
                    .await;
                self.guard.add_volume(estimate).await;
                report.status = ReportStatus::Success;
                info!(
                    "Execution {} completed in {}ms",
                    execution_id,
                    started.elapsed().as_millis()
                );
            }
            Err(e) => {
                let message = e.to_string();
                self.guard.fail_execution(execution_id, &message).await;
                warn!("Execution {} failed: {}", execution_id, message);
                report.errors.push(message);
                report.status = ReportStatus::Failed;
            }
        }

        report.total_duration_ms = started.elapsed().as_millis() as u64;
        report
    }

    /// Sequential stage machine: risk, consensus, hedging, settlement,
    /// attestation, reporting. Each stage's outcome lands on the report
    /// before the next stage may run; the first failure aborts the rest.
    async fn run_stages(
        &self,
        execution_id: Uuid,
        intent: &TradeIntent,
        verdict: &crate::guard::ValidationReport,
        estimate: Decimal,
        report: &mut ExecutionReport,
    ) -> Result<Option<String>> {
        let mut risk_data = Value::Null;

        if intent.requires(AgentKind::Risk) {
            let result = self
                .delegate(
                    AgentKind::Risk,
                    TaskAction::AssessRisk,
                    json!({
                        "symbol": intent.params.symbol,
                        "amount_usd": estimate,
                        "leverage": intent.params.leverage,
                    }),
                    execution_id,
                )
                .await?;
            report.risk = Some(StageOutcome::from(&result));
            match (result.success, result.data) {
                (true, Some(data)) => risk_data = data,
                // Downstream stages never run without the risk result
                // they were asked to depend on.
                _ => return Err(stage_failure(AgentKind::Risk, result.error)),
            }
        }

        if verdict.needs_consensus() {
            self.run_consensus(execution_id, intent, estimate, report)
                .await?;
        }

        if intent.requires(AgentKind::Hedging) {
            let result = self
                .delegate(
                    AgentKind::Hedging,
                    TaskAction::PlanHedge,
                    json!({
                        "symbol": intent.params.symbol,
                        "amount_usd": estimate,
                        "risk": risk_data,
                    }),
                    execution_id,
                )
                .await?;
            report.hedging = Some(StageOutcome::from(&result));
            if !result.success {
                return Err(stage_failure(AgentKind::Hedging, result.error));
            }
        }

        if intent.requires(AgentKind::Settlement) {
            let result = self
                .delegate(
                    AgentKind::Settlement,
                    TaskAction::ExecuteSettlement,
                    json!({
                        "target": intent.target,
                        "amount_usd": estimate,
                    }),
                    execution_id,
                )
                .await?;
            report.settlement = Some(StageOutcome::from(&result));
            if !result.success {
                return Err(stage_failure(AgentKind::Settlement, result.error));
            }
        }

        let mut attestation_handle = None;
        if verdict.attestation_required {
            debug!("Execution {} attesting", execution_id);
            let claim = json!({
                "execution_id": execution_id,
                "target": intent.target,
                "strategy": intent.strategy,
                "position_size_usd": estimate,
            });
            let attestation = self
                .attestor
                .attest(&claim, &risk_data)
                .await
                .map_err(|e| MarshalError::AttestationFailed(e.to_string()))?;
            if !attestation.verified {
                return Err(MarshalError::AttestationFailed(
                    "prover returned an unverified proof".to_string(),
                ));
            }
            report.attestations.push(attestation.handle.clone());
            attestation_handle = Some(attestation.handle);
        }

        if intent.requires(AgentKind::Reporting) {
            let mut stages = serde_json::Map::new();
            if let Some(stage) = &report.risk {
                stages.insert("risk".to_string(), json!({ "success": stage.success }));
            }
            if let Some(stage) = &report.hedging {
                stages.insert("hedging".to_string(), json!({ "success": stage.success }));
            }
            if let Some(stage) = &report.settlement {
                stages.insert("settlement".to_string(), json!({ "success": stage.success }));
            }

            let result = self
                .delegate(
                    AgentKind::Reporting,
                    TaskAction::CompileReport,
                    json!({
                        "execution_id": execution_id,
                        "strategy": intent.strategy,
                        "target": intent.target,
                        "stages": Value::Object(stages),
                    }),
                    execution_id,
                )
                .await?;
            report.reporting = Some(StageOutcome::from(&result));
            match (result.success, &result.data) {
                (true, Some(data)) => {
                    report.summary = data
                        .get("summary")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                }
                _ => return Err(stage_failure(AgentKind::Reporting, result.error)),
            }
        }

        Ok(attestation_handle)
    }

    /// Consensus round: every required agent votes from its own domain
    /// signal. A voter that errors simply casts no vote; quorum math
    /// decides what that silence means.
    async fn run_consensus(
        &self,
        execution_id: Uuid,
        intent: &TradeIntent,
        estimate: Decimal,
        report: &mut ExecutionReport,
    ) -> Result<()> {
        if intent.required_agents.is_empty() {
            // Consensus demanded, but the intent names nobody to ask. A
            // zero-participant quorum must never count as approval.
            return Err(MarshalError::ConsensusRejected(
                "no voting agents configured for this intent".to_string(),
            ));
        }

        let mut voters = Vec::with_capacity(intent.required_agents.len());
        for kind in &intent.required_agents {
            let agent = self
                .registry
                .agent_of_kind(*kind)
                .await
                .ok_or_else(|| MarshalError::AgentUnavailable(kind.to_string()))?;
            voters.push(agent);
        }
        let voter_ids: Vec<String> = voters.iter().map(|a| a.id().to_string()).collect();

        let proposal_text = format!(
            "{} ${} on {} for {}",
            intent.action, estimate, intent.params.symbol, intent.target
        );
        let proposal = self
            .guard
            .request_consensus(
                execution_id,
                proposal_text.clone(),
                voter_ids,
                Duration::seconds(self.config.consensus_timeout_secs as i64),
            )
            .await;
        debug!(
            "Execution {} consensus: {} of {} votes required",
            execution_id,
            proposal.required_votes,
            voters.len()
        );

        for agent in &voters {
            let task = Task::new(
                TaskAction::ConsensusVote,
                json!({
                    "proposal": proposal_text,
                    "position_size_usd": estimate,
                    "symbol": intent.params.symbol,
                }),
            )
            .for_execution(execution_id);

            let result = agent.execute_task(task).await;
            match (result.success, &result.data) {
                (true, Some(data)) => {
                    let approved = data
                        .get("approved")
                        .and_then(Value::as_bool)
                        .unwrap_or(false);
                    let reason = data
                        .get("reason")
                        .and_then(Value::as_str)
                        .unwrap_or("no reason given");
                    self.guard
                        .submit_vote(execution_id, agent.id(), approved, reason)
                        .await;
                }
                _ => warn!(
                    "Voter {} cast no vote: {}",
                    agent.id(),
                    result.error.as_deref().unwrap_or("unknown failure")
                ),
            }
        }

        let outcome = self.guard.check_consensus(execution_id).await?;
        report.consensus = Some(outcome.clone());
        if !outcome.reached || !outcome.approved {
            return Err(MarshalError::ConsensusRejected(outcome.details));
        }
        Ok(())
    }

    /// Fixed delegation sub-protocol: idle-preferring lookup, a fresh task
    /// carrying the execution id, and the uniform TaskResult back.
    async fn delegate(
        &self,
        kind: AgentKind,
        action: TaskAction,
        params: Value,
        execution_id: Uuid,
    ) -> Result<TaskResult> {
        let agent = self
            .registry
            .agent_of_kind(kind)
            .await
            .ok_or_else(|| MarshalError::AgentUnavailable(kind.to_string()))?;
        let task = Task::new(action, params).for_execution(execution_id);
        debug!("Delegating {} to agent {}", action, agent.id());
        Ok(agent.execute_task(task).await)
    }
}

fn stage_failure(kind: AgentKind, error: Option<String>) -> MarshalError {
    MarshalError::DelegationFailed {
        agent_kind: kind.to_string(),
        reason: error.unwrap_or_else(|| "stage returned no result".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::risk::RiskAnalyst;
    use crate::agent::Agent;
    use crate::attest::HmacAttestor;
    use crate::feed::FixedFeed;
    use crate::guard::ExecutionLimits;
    use crate::intent::{IntentAction, IntentParams, RiskTolerance, TradeIntent};
    use rust_decimal_macros::dec;

    fn feed() -> Arc<FixedFeed> {
        Arc::new(FixedFeed::new().with_quote("BTC-USD", dec!(45), dec!(64000)))
    }

    fn orchestrator_with(registry: AgentRegistry, limits: ExecutionLimits) -> Orchestrator {
        Orchestrator::new(
            Arc::new(registry),
            Arc::new(ExecutionGuard::new(limits)),
            Arc::new(HmacAttestor::new("test-secret")),
            OrchestratorConfig::default(),
        )
    }

    fn open_intent(amount: Decimal) -> TradeIntent {
        TradeIntent::new(
            IntentAction::OpenPosition,
            "portfolio-1",
            "yield-rotation",
            IntentParams {
                amount_usd: amount,
                symbol: "BTC-USD".to_string(),
                target_apy: Some(dec!(12)),
                risk_tolerance: RiskTolerance::Balanced,
                leverage: None,
                max_slippage_pct: None,
            },
        )
    }

    #[test]
    fn estimate_is_zero_for_read_only() {
        let intent = TradeIntent::analysis("portfolio-1", "BTC-USD");
        assert_eq!(Orchestrator::estimate_position_size(&intent), Decimal::ZERO);
    }

    #[test]
    fn estimate_scales_with_appetite_and_leverage() {
        let mut intent = open_intent(dec!(100_000));
        assert_eq!(
            Orchestrator::estimate_position_size(&intent),
            dec!(100_000)
        );

        intent.params.risk_tolerance = RiskTolerance::Aggressive;
        intent.params.leverage = Some(dec!(2));
        assert_eq!(
            Orchestrator::estimate_position_size(&intent),
            dec!(300_000)
        );
    }

    #[tokio::test]
    async fn admission_failure_returns_report_without_touching_agents() {
        let registry = AgentRegistry::new();
        let risk = Arc::new(Agent::new("risk-1", Box::new(RiskAnalyst::new(feed(), 70))));
        registry.register(risk.clone()).await;

        let orchestrator = orchestrator_with(
            registry,
            ExecutionLimits {
                cooldown_secs: 0,
                ..Default::default()
            },
        );

        let intent = open_intent(dec!(12_000_000)).with_agents([AgentKind::Risk]);
        let report = orchestrator.execute(intent).await;

        assert!(!report.is_success());
        assert!(report.errors.iter().any(|e| e.contains("position size")));
        assert!(report.risk.is_none());
        assert!(risk.history().await.is_empty());
        // Nothing was started, so nothing is in flight or audited.
        let status = orchestrator.guard().status().await;
        assert_eq!(status.in_flight, 0);
        assert_eq!(status.audit_entries, 0);
    }

    #[tokio::test]
    async fn missing_agent_fails_the_execution_not_the_caller() {
        let orchestrator = orchestrator_with(
            AgentRegistry::new(),
            ExecutionLimits {
                cooldown_secs: 0,
                require_consensus: false,
                ..Default::default()
            },
        );

        let intent = open_intent(dec!(50_000)).with_agents([AgentKind::Risk]);
        let report = orchestrator.execute(intent).await;

        assert!(!report.is_success());
        assert!(report
            .errors
            .iter()
            .any(|e| e.contains("No agent registered")));
        // The failure was recorded against the guard.
        assert_eq!(
            orchestrator.guard().status().await.breaker.consecutive_failures,
            1
        );
    }

    #[tokio::test]
    async fn consensus_rejection_aborts_before_downstream_stages() {
        let registry = AgentRegistry::new();
        // A risk analyst that votes everything down.
        registry
            .register(Arc::new(Agent::new(
                "risk-1",
                Box::new(RiskAnalyst::new(feed(), 0)),
            )))
            .await;

        let orchestrator = orchestrator_with(
            registry,
            ExecutionLimits {
                cooldown_secs: 0,
                consensus_quorum: 1.0,
                ..Default::default()
            },
        );

        let intent = open_intent(dec!(500_000)).with_agents([AgentKind::Risk]);
        let report = orchestrator.execute(intent).await;

        assert!(!report.is_success());
        let consensus = report.consensus.expect("consensus outcome recorded");
        assert!(consensus.reached);
        assert!(!consensus.approved);
        assert!(report.hedging.is_none());
    }
}
