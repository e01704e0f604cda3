use config::{Config, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;

use crate::error::Result;
use crate::guard::ExecutionLimits;
use crate::orchestrator::OrchestratorConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Hard limits enforced by the execution guard
    pub limits: ExecutionLimits,
    pub orchestrator: OrchestratorConfig,
    pub agents: AgentSettings,
}

/// Tunables for the stock agent set
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    /// Retained lifecycle history entries per agent
    pub history_limit: usize,
    /// Highest risk score the risk analyst approves in consensus
    pub risk_max_vote_score: u32,
    /// Highest volatility (%) the hedge planner approves in consensus
    pub hedging_max_vote_volatility_pct: Decimal,
    /// Largest single transfer the settlement desk accepts
    pub settlement_max_single_transfer_usd: Decimal,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            history_limit: 128,
            risk_max_vote_score: 70,
            hedging_max_vote_volatility_pct: Decimal::from(85),
            settlement_max_single_transfer_usd: Decimal::from(2_000_000),
        }
    }
}

impl AppConfig {
    /// Load configuration layered from an optional file and
    /// `MARSHAL_`-prefixed environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        builder = match path {
            Some(path) => builder.add_source(File::from(path).required(false)),
            None => builder.add_source(File::with_name("marshal").required(false)),
        };
        let settings = builder
            .add_source(Environment::with_prefix("MARSHAL").separator("__"))
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}
