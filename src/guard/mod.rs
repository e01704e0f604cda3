//! Execution Guard: admission control, consensus, circuit breaker, audit.
//!
//! Every state-changing execution passes through this gate before any side
//! effect occurs. All mutable guard state lives under one lock: admission
//! is an atomic read-modify-write, so two concurrent validations can never
//! both claim the last concurrency slot or a stale volume figure.

pub mod audit;
pub mod breaker;
pub mod consensus;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{MarshalError, Result};

pub use audit::{AuditEntry, AuditFilter, AuditResult};
pub use breaker::BreakerStatus;
pub use consensus::{ConsensusOutcome, ConsensusProposal, Vote};

use breaker::Breaker;
use audit::AuditLog;

/// Approval tag signalling the orchestrator to run a consensus round
pub const APPROVAL_MULTI_AGENT_CONSENSUS: &str = "multi_agent_consensus";
/// Approval tag attached to positions above half the hard cap
pub const APPROVAL_LARGE_POSITION_REVIEW: &str = "large_position_review";

/// Position size above which consensus is demanded (when globally enabled)
pub const CONSENSUS_POSITION_THRESHOLD_USD: i64 = 100_000;
/// Position size above which an attestation must accompany completion
pub const ATTESTATION_POSITION_THRESHOLD_USD: i64 = 250_000;
/// Consecutive failed executions that trip the breaker
pub const FAILURE_TRIP_THRESHOLD: u32 = 3;

/// Hard limits enforced at admission. Immutable per guard instance;
/// replaced wholesale through `update_limits`, never merged field by field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionLimits {
    pub max_position_size_usd: Decimal,
    pub max_daily_volume_usd: Decimal,
    /// Maximum acceptable slippage, in percent
    pub max_slippage_pct: Decimal,
    pub max_leverage: Decimal,
    /// Globally require consensus for large positions
    pub require_consensus: bool,
    /// Fraction of participants whose vote is required
    pub consensus_quorum: f64,
    /// Cooldown between state-changing executions, and the breaker's
    /// recovery window
    pub cooldown_secs: u64,
    pub max_concurrent_executions: usize,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            max_position_size_usd: Decimal::from(10_000_000),
            max_daily_volume_usd: Decimal::from(50_000_000),
            max_slippage_pct: Decimal::from(2),
            max_leverage: Decimal::from(3),
            require_consensus: true,
            consensus_quorum: 0.67,
            cooldown_secs: 30,
            max_concurrent_executions: 4,
        }
    }
}

/// One proposed execution, as seen by admission control
#[derive(Debug, Clone)]
pub struct ValidationRequest {
    pub execution_id: Uuid,
    pub agent_id: String,
    pub action: String,
    pub position_size_usd: Decimal,
    pub leverage: Option<Decimal>,
    pub expected_slippage_pct: Option<Decimal>,
    /// Explicit caller-decided marker; read-only zero-size requests skip
    /// the inter-execution cooldown
    pub read_only: bool,
}

impl ValidationRequest {
    pub fn new(
        execution_id: Uuid,
        agent_id: impl Into<String>,
        action: impl Into<String>,
        position_size_usd: Decimal,
    ) -> Self {
        Self {
            execution_id,
            agent_id: agent_id.into(),
            action: action.into(),
            position_size_usd,
            leverage: None,
            expected_slippage_pct: None,
            read_only: false,
        }
    }

    pub fn with_leverage(mut self, leverage: Decimal) -> Self {
        self.leverage = Some(leverage);
        self
    }

    pub fn with_slippage(mut self, slippage_pct: Decimal) -> Self {
        self.expected_slippage_pct = Some(slippage_pct);
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }
}

/// Admission verdict. `is_valid` holds iff `errors` is empty;
/// `attestation_required` is independent of validity.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub risk_score: u32,
    pub required_approvals: Vec<String>,
    pub attestation_required: bool,
}

impl ValidationReport {
    pub fn needs_consensus(&self) -> bool {
        self.required_approvals
            .iter()
            .any(|tag| tag == APPROVAL_MULTI_AGENT_CONSENSUS)
    }
}

/// Read-only projection of guard state
#[derive(Debug, Clone, Serialize)]
pub struct GuardStatus {
    pub breaker: BreakerStatus,
    pub in_flight: usize,
    pub daily_volume_usd: Decimal,
    pub daily_volume_date: Option<NaiveDate>,
    pub open_proposals: usize,
    pub audit_entries: usize,
    pub limits: ExecutionLimits,
}

struct GuardState {
    limits: ExecutionLimits,
    breaker: Breaker,
    last_execution_at: Option<DateTime<Utc>>,
    in_flight: HashSet<Uuid>,
    daily_date: Option<NaiveDate>,
    daily_volume_usd: Decimal,
    proposals: HashMap<Uuid, ConsensusProposal>,
    audit: AuditLog,
}

impl GuardState {
    /// Lazy daily rollover: the counter resets the first time a new
    /// calendar date is observed.
    fn roll_daily(&mut self, today: NaiveDate) {
        if self.daily_date != Some(today) {
            if self.daily_date.is_some() {
                debug!(
                    "Daily volume rollover to {} (was ${})",
                    today, self.daily_volume_usd
                );
            }
            self.daily_date = Some(today);
            self.daily_volume_usd = Decimal::ZERO;
        }
    }
}

/// The admission-control and safety core. One instance per process,
/// constructed and injected by the composition root.
pub struct ExecutionGuard {
    state: RwLock<GuardState>,
}

impl ExecutionGuard {
    pub fn new(limits: ExecutionLimits) -> Self {
        Self {
            state: RwLock::new(GuardState {
                limits,
                breaker: Breaker::new(FAILURE_TRIP_THRESHOLD),
                last_execution_at: None,
                in_flight: HashSet::new(),
                daily_date: None,
                daily_volume_usd: Decimal::ZERO,
                proposals: HashMap::new(),
                audit: AuditLog::default(),
            }),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ExecutionLimits::default())
    }

    /// Validate a proposed execution. Checks run in a fixed order; each
    /// appends a hard error or a soft warning. The only side effects are
    /// the lazy breaker reset and the lazy daily rollover.
    pub async fn validate_execution(&self, req: ValidationRequest) -> ValidationReport {
        let now = Utc::now();
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut required_approvals = Vec::new();
        let mut risk_score = 0u32;

        let mut st = self.state.write().await;

        // 1. Circuit breaker, with lazy cooldown recovery
        if let Some(remaining) = st
            .breaker
            .cooldown_remaining(now, st.limits.cooldown_secs)
        {
            if remaining > 0 {
                errors.push(format!(
                    "circuit breaker open ({}): {}s until cooldown elapses",
                    st.breaker.reason(),
                    remaining
                ));
            } else {
                info!("Breaker cooldown elapsed, resetting before admission");
                st.breaker.reset();
            }
        }

        // 2. Cooldown between state-changing executions. Read-only
        // zero-size requests are exempt.
        let exempt_from_cooldown = req.read_only && req.position_size_usd.is_zero();
        if !exempt_from_cooldown {
            if let Some(last) = st.last_execution_at {
                let elapsed = now.signed_duration_since(last).num_seconds().max(0) as u64;
                if elapsed < st.limits.cooldown_secs {
                    errors.push(format!(
                        "cooldown active: {}s remaining",
                        st.limits.cooldown_secs - elapsed
                    ));
                }
            }
        }

        // 3. Concurrency
        if st.in_flight.len() >= st.limits.max_concurrent_executions {
            errors.push(format!(
                "concurrent execution limit reached ({}/{})",
                st.in_flight.len(),
                st.limits.max_concurrent_executions
            ));
        }

        // 4. Position size
        if req.position_size_usd > st.limits.max_position_size_usd {
            errors.push(format!(
                "position size ${} exceeds limit ${}",
                req.position_size_usd, st.limits.max_position_size_usd
            ));
            risk_score += 40;
        } else if req.position_size_usd > st.limits.max_position_size_usd / Decimal::from(2) {
            warnings.push(format!(
                "position size ${} above half the ${} cap",
                req.position_size_usd, st.limits.max_position_size_usd
            ));
            required_approvals.push(APPROVAL_LARGE_POSITION_REVIEW.to_string());
            risk_score += 20;
        }

        // 5. Daily volume, with lazy date rollover
        st.roll_daily(now.date_naive());
        let projected = st.daily_volume_usd + req.position_size_usd;
        if projected > st.limits.max_daily_volume_usd {
            errors.push(format!(
                "daily volume ${} + ${} exceeds limit ${}",
                st.daily_volume_usd, req.position_size_usd, st.limits.max_daily_volume_usd
            ));
            risk_score += 20;
        } else if projected > st.limits.max_daily_volume_usd * Decimal::new(8, 1) {
            warnings.push(format!(
                "projected daily volume ${} above 80% of limit ${}",
                projected, st.limits.max_daily_volume_usd
            ));
            risk_score += 10;
        }

        // 6. Leverage
        if let Some(leverage) = req.leverage {
            if leverage > st.limits.max_leverage {
                errors.push(format!(
                    "leverage {}x exceeds limit {}x",
                    leverage, st.limits.max_leverage
                ));
                risk_score += 15;
            }
        }

        // 7. Slippage
        if let Some(slippage) = req.expected_slippage_pct {
            if slippage > st.limits.max_slippage_pct {
                errors.push(format!(
                    "expected slippage {}% exceeds limit {}%",
                    slippage, st.limits.max_slippage_pct
                ));
                risk_score += 10;
            }
        }

        // 8. Consensus requirement. Informational: signals the
        // orchestrator, never invalidates by itself.
        if st.limits.require_consensus
            && req.position_size_usd > Decimal::from(CONSENSUS_POSITION_THRESHOLD_USD)
        {
            required_approvals.push(APPROVAL_MULTI_AGENT_CONSENSUS.to_string());
            risk_score += 10;
        }

        let attestation_required =
            req.position_size_usd > Decimal::from(ATTESTATION_POSITION_THRESHOLD_USD);
        let is_valid = errors.is_empty();

        if !is_valid {
            warn!(
                "Admission denied for {} ({}): {}",
                req.execution_id,
                req.action,
                errors.join("; ")
            );
        } else {
            debug!(
                "Admission granted for {} ({}), risk score {}",
                req.execution_id, req.action, risk_score
            );
        }

        ValidationReport {
            is_valid,
            errors,
            warnings,
            risk_score,
            required_approvals,
            attestation_required,
        }
    }

    // ==================== Consensus ====================

    /// Create and store a proposal for an execution. Required votes are
    /// derived from the configured quorum fraction.
    pub async fn request_consensus(
        &self,
        execution_id: Uuid,
        proposal: impl Into<String>,
        required_agent_ids: Vec<String>,
        timeout: Duration,
    ) -> ConsensusProposal {
        let mut st = self.state.write().await;
        let quorum = st.limits.consensus_quorum;
        let proposal =
            ConsensusProposal::new(execution_id, proposal, required_agent_ids, quorum, timeout, Utc::now());
        info!(
            "Consensus requested for {}: {} votes required of {} participants",
            execution_id,
            proposal.required_votes,
            proposal.participants.len()
        );
        st.proposals.insert(execution_id, proposal.clone());
        proposal
    }

    /// Record one voter's position. False when no proposal exists or the
    /// deadline has passed.
    pub async fn submit_vote(
        &self,
        execution_id: Uuid,
        voter_id: &str,
        approved: bool,
        reason: &str,
    ) -> bool {
        let mut st = self.state.write().await;
        match st.proposals.get_mut(&execution_id) {
            Some(proposal) => proposal.submit_vote(voter_id, approved, reason, Utc::now()),
            None => false,
        }
    }

    /// Evaluate a proposal. A proposal that never reached quorum before
    /// its deadline simply reports `reached: false`; it is never retried.
    pub async fn check_consensus(&self, execution_id: Uuid) -> Result<ConsensusOutcome> {
        let st = self.state.read().await;
        st.proposals
            .get(&execution_id)
            .map(|p| p.outcome())
            .ok_or(MarshalError::ProposalNotFound(execution_id))
    }

    // ==================== Execution lifecycle ====================

    /// Mark an execution in-flight and open its audit entry. Read-only
    /// actions do not advance the cooldown timer.
    pub async fn start_execution(
        &self,
        execution_id: Uuid,
        agent_id: &str,
        action: &str,
        params: Value,
        read_only: bool,
    ) {
        let now = Utc::now();
        let mut st = self.state.write().await;
        st.in_flight.insert(execution_id);
        if !read_only {
            st.last_execution_at = Some(now);
        }
        st.audit
            .append_pending(execution_id, agent_id, action, params, now);
        debug!(
            "Execution {} started ({} in flight)",
            execution_id,
            st.in_flight.len()
        );
    }

    /// Terminal success: drop from in-flight, write the audit result with
    /// the optional attestation handle, reset the failure streak. The
    /// settled proposal's approving voters sign the audit entry.
    pub async fn complete_execution(&self, execution_id: Uuid, attestation: Option<String>) {
        let mut st = self.state.write().await;
        st.in_flight.remove(&execution_id);
        let mut signatures: Vec<String> = st
            .proposals
            .remove(&execution_id)
            .map(|p| {
                p.votes
                    .iter()
                    .filter(|(_, vote)| vote.approved)
                    .map(|(voter, _)| voter.clone())
                    .collect()
            })
            .unwrap_or_default();
        signatures.sort();
        if st
            .audit
            .finalize(execution_id, AuditResult::Success, attestation, None, signatures)
        {
            st.breaker.record_success();
            info!("Execution {} completed", execution_id);
        }
    }

    /// Terminal failure: drop from in-flight, write the audit result, and
    /// advance the failure streak; the breaker trips at the threshold.
    pub async fn fail_execution(&self, execution_id: Uuid, error_text: &str) {
        let now = Utc::now();
        let mut st = self.state.write().await;
        st.in_flight.remove(&execution_id);
        st.proposals.remove(&execution_id);
        if st.audit.finalize(
            execution_id,
            AuditResult::Failed,
            None,
            Some(error_text.to_string()),
            Vec::new(),
        ) {
            if st.breaker.record_failure(error_text, now) {
                error!(
                    "Breaker tripped by execution {} after {} consecutive failures",
                    execution_id, FAILURE_TRIP_THRESHOLD
                );
            }
        }
    }

    /// Unconditionally trip the breaker and annotate every still-pending
    /// audit entry. Running tasks are not preempted; only new admissions
    /// are blocked.
    pub async fn emergency_stop(&self, reason: &str) {
        let now = Utc::now();
        let mut st = self.state.write().await;
        st.breaker.trip(format!("emergency stop: {}", reason), now);
        let annotated = st
            .audit
            .annotate_pending(&format!("interrupted by emergency stop: {}", reason));
        error!(
            "EMERGENCY STOP: {} ({} pending executions annotated)",
            reason, annotated
        );
    }

    /// Explicit breaker reset (operator action).
    pub async fn reset_breaker(&self) {
        self.state.write().await.breaker.reset();
    }

    // ==================== Counters ====================

    /// Add executed volume to the rolling daily counter.
    pub async fn add_volume(&self, amount_usd: Decimal) {
        let mut st = self.state.write().await;
        st.roll_daily(Utc::now().date_naive());
        st.daily_volume_usd += amount_usd;
        debug!("Daily volume now ${}", st.daily_volume_usd);
    }

    // ==================== Projections ====================

    pub async fn audit_logs(&self, filter: &AuditFilter) -> Vec<AuditEntry> {
        self.state.read().await.audit.query(filter)
    }

    /// Current guard status. Performs the lazy daily rollover so the
    /// reported volume is accurate for the current date; no other state
    /// is touched.
    pub async fn status(&self) -> GuardStatus {
        let mut st = self.state.write().await;
        st.roll_daily(Utc::now().date_naive());
        GuardStatus {
            breaker: st.breaker.status(),
            in_flight: st.in_flight.len(),
            daily_volume_usd: st.daily_volume_usd,
            daily_volume_date: st.daily_date,
            open_proposals: st.proposals.len(),
            audit_entries: st.audit.len(),
            limits: st.limits.clone(),
        }
    }

    /// Replace the whole limits struct. Admin surface only.
    pub async fn update_limits(&self, limits: ExecutionLimits) {
        let mut st = self.state.write().await;
        info!("Execution limits replaced: {:?}", limits);
        st.limits = limits;
    }
}

impl Default for ExecutionGuard {
    fn default() -> Self {
        Self::with_defaults()
    }
}
