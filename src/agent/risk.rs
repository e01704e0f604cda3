//! Risk assessment agent.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

use crate::error::{Result, TaskError};
use crate::feed::MarketFeed;

use super::{decimal_field, str_field, AgentKind, Task, TaskAction, TaskHandler};

/// Scores proposed executions from live volatility plus the intent's own
/// risk parameters. A feed failure fails the task; no reading is ever
/// substituted with a default.
pub struct RiskAnalyst {
    feed: Arc<dyn MarketFeed>,
    /// Highest score this analyst will approve in a consensus vote
    max_vote_score: u32,
}

impl RiskAnalyst {
    pub fn new(feed: Arc<dyn MarketFeed>, max_vote_score: u32) -> Self {
        Self {
            feed,
            max_vote_score,
        }
    }

    /// Composite score on a 0-100 scale: volatility carries most of the
    /// weight, then size, then leverage.
    fn score(volatility_pct: Decimal, position_size_usd: Decimal, leverage: Decimal) -> u32 {
        let vol_points = volatility_pct.min(dec!(100)) * dec!(0.6);
        let size_points = (position_size_usd / dec!(1_000_000) * dec!(3)).min(dec!(30));
        let leverage_points = ((leverage - Decimal::ONE) * dec!(5))
            .max(Decimal::ZERO)
            .min(dec!(10));
        (vol_points + size_points + leverage_points)
            .round()
            .to_u32()
            .unwrap_or(100)
            .min(100)
    }

    fn level(score: u32) -> &'static str {
        match score {
            0..=34 => "low",
            35..=64 => "medium",
            _ => "high",
        }
    }

    async fn assess(&self, task: &Task) -> Result<Value> {
        let symbol = str_field(&task.params, "symbol")?;
        let position_size_usd = decimal_field(&task.params, "amount_usd")?;
        let leverage = decimal_field(&task.params, "leverage").unwrap_or(Decimal::ONE);

        let volatility_pct = self.feed.volatility(symbol).await?;
        let score = Self::score(volatility_pct, position_size_usd, leverage);

        debug!(
            "Risk assessment for {}: vol {}%, size ${}, score {}",
            symbol, volatility_pct, position_size_usd, score
        );

        Ok(json!({
            "risk_score": score,
            "risk_level": Self::level(score),
            "volatility_pct": volatility_pct,
            "position_size_usd": position_size_usd,
            "symbol": symbol,
        }))
    }

    async fn vote(&self, task: &Task) -> Result<Value> {
        let symbol = str_field(&task.params, "symbol")?;
        let position_size_usd = decimal_field(&task.params, "position_size_usd")?;

        let volatility_pct = self.feed.volatility(symbol).await?;
        let score = Self::score(volatility_pct, position_size_usd, Decimal::ONE);
        let approved = score <= self.max_vote_score;

        let reason = if approved {
            format!("risk score {} within tolerance {}", score, self.max_vote_score)
        } else {
            format!("risk score {} exceeds tolerance {}", score, self.max_vote_score)
        };

        Ok(json!({ "approved": approved, "reason": reason }))
    }
}

#[async_trait::async_trait]
impl TaskHandler for RiskAnalyst {
    fn kind(&self) -> AgentKind {
        AgentKind::Risk
    }

    fn capabilities(&self) -> Vec<String> {
        vec!["risk_assessment".to_string(), "consensus_vote".to_string()]
    }

    async fn handle(&self, task: &Task) -> Result<Value> {
        match task.action {
            TaskAction::AssessRisk => self.assess(task).await,
            TaskAction::ConsensusVote => self.vote(task).await,
            other => Err(TaskError::UnsupportedAction {
                action: other.to_string(),
            }
            .into()),
        }
    }
}
