//! Hedging agent.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

use crate::error::{Result, TaskError};
use crate::feed::MarketFeed;

use super::{decimal_field, str_field, AgentKind, Task, TaskAction, TaskHandler};

/// Plans offsetting positions. The hedge ratio scales with observed
/// volatility; the plan fails when the feed cannot supply a reading.
pub struct HedgePlanner {
    feed: Arc<dyn MarketFeed>,
    /// Highest volatility this planner will approve in a consensus vote
    max_vote_volatility_pct: Decimal,
}

impl HedgePlanner {
    pub fn new(feed: Arc<dyn MarketFeed>, max_vote_volatility_pct: Decimal) -> Self {
        Self {
            feed,
            max_vote_volatility_pct,
        }
    }

    fn hedge_ratio(volatility_pct: Decimal) -> Decimal {
        // One point of volatility buys one percent of hedge, floored so a
        // calm market still carries a token hedge.
        (volatility_pct / dec!(100)).max(dec!(0.10)).min(dec!(0.90))
    }

    async fn plan(&self, task: &Task) -> Result<Value> {
        let symbol = str_field(&task.params, "symbol")?;
        let amount_usd = decimal_field(&task.params, "amount_usd")?;

        let volatility_pct = self.feed.volatility(symbol).await?;
        let mid_price = self.feed.mid_price(symbol).await?;
        let ratio = Self::hedge_ratio(volatility_pct);
        let notional_usd = amount_usd * ratio;

        debug!(
            "Hedge plan for {}: ratio {} on ${} at mid {}",
            symbol, ratio, amount_usd, mid_price
        );

        Ok(json!({
            "instrument": format!("{}-PERP", symbol),
            "hedge_ratio": ratio,
            "notional_usd": notional_usd,
            "reference_price": mid_price,
        }))
    }

    async fn vote(&self, task: &Task) -> Result<Value> {
        let symbol = str_field(&task.params, "symbol")?;
        let volatility_pct = self.feed.volatility(symbol).await?;
        let approved = volatility_pct <= self.max_vote_volatility_pct;

        let reason = if approved {
            format!(
                "volatility {}% within hedgeable bound {}%",
                volatility_pct, self.max_vote_volatility_pct
            )
        } else {
            format!(
                "volatility {}% above hedgeable bound {}%",
                volatility_pct, self.max_vote_volatility_pct
            )
        };

        Ok(json!({ "approved": approved, "reason": reason }))
    }
}

#[async_trait::async_trait]
impl TaskHandler for HedgePlanner {
    fn kind(&self) -> AgentKind {
        AgentKind::Hedging
    }

    fn capabilities(&self) -> Vec<String> {
        vec!["hedge_planning".to_string(), "consensus_vote".to_string()]
    }

    async fn handle(&self, task: &Task) -> Result<Value> {
        match task.action {
            TaskAction::PlanHedge => self.plan(task).await,
            TaskAction::ConsensusVote => self.vote(task).await,
            other => Err(TaskError::UnsupportedAction {
                action: other.to_string(),
            }
            .into()),
        }
    }
}
