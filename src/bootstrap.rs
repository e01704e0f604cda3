//! Composition root helpers.
//!
//! One guard, one registry and one agent per kind, wired the way a
//! deployment would do it. Tests and embedders that need a different
//! topology construct the pieces directly.

use std::sync::Arc;

use crate::agent::hedging::HedgePlanner;
use crate::agent::registry::AgentRegistry;
use crate::agent::reporting::ReportScribe;
use crate::agent::risk::RiskAnalyst;
use crate::agent::settlement::SettlementDesk;
use crate::agent::Agent;
use crate::attest::Attestor;
use crate::config::AppConfig;
use crate::error::Result;
use crate::feed::MarketFeed;
use crate::guard::ExecutionGuard;
use crate::orchestrator::Orchestrator;

/// Assemble a ready-to-run orchestrator: a guard with the configured
/// limits and an initialized agent of each kind.
pub async fn bootstrap(
    config: AppConfig,
    feed: Arc<dyn MarketFeed>,
    attestor: Arc<dyn Attestor>,
) -> Result<Orchestrator> {
    let agents: Vec<Arc<Agent>> = vec![
        Arc::new(
            Agent::new(
                "risk-1",
                Box::new(RiskAnalyst::new(
                    feed.clone(),
                    config.agents.risk_max_vote_score,
                )),
            )
            .with_history_limit(config.agents.history_limit),
        ),
        Arc::new(
            Agent::new(
                "hedging-1",
                Box::new(HedgePlanner::new(
                    feed.clone(),
                    config.agents.hedging_max_vote_volatility_pct,
                )),
            )
            .with_history_limit(config.agents.history_limit),
        ),
        Arc::new(
            Agent::new(
                "settlement-1",
                Box::new(SettlementDesk::new(
                    config.agents.settlement_max_single_transfer_usd,
                )),
            )
            .with_history_limit(config.agents.history_limit),
        ),
        Arc::new(
            Agent::new("reporting-1", Box::new(ReportScribe::new()))
                .with_history_limit(config.agents.history_limit),
        ),
    ];

    let registry = Arc::new(AgentRegistry::new());
    for agent in agents {
        agent.initialize().await?;
        registry.register(agent).await;
    }

    let guard = Arc::new(ExecutionGuard::new(config.limits.clone()));
    Ok(Orchestrator::new(
        registry,
        guard,
        attestor,
        config.orchestrator.clone(),
    ))
}
