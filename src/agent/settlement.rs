//! Settlement agent.

use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use crate::error::{Result, TaskError};

use super::{decimal_field, str_field, AgentKind, Task, TaskAction, TaskHandler};

/// Produces transfer instructions for the settlement transport. The desk
/// refuses single transfers above its configured limit; splitting is the
/// caller's decision, not something the desk invents.
pub struct SettlementDesk {
    max_single_transfer_usd: Decimal,
}

impl SettlementDesk {
    pub fn new(max_single_transfer_usd: Decimal) -> Self {
        Self {
            max_single_transfer_usd,
        }
    }

    fn settle(&self, task: &Task) -> Result<Value> {
        let target = str_field(&task.params, "target")?;
        let amount_usd = decimal_field(&task.params, "amount_usd")?;

        if amount_usd > self.max_single_transfer_usd {
            return Err(TaskError::Handler(format!(
                "transfer ${} exceeds desk limit ${}",
                amount_usd, self.max_single_transfer_usd
            ))
            .into());
        }

        let transfer_ref = Uuid::new_v4();
        debug!(
            "Settlement instruction {} for {}: ${}",
            transfer_ref, target, amount_usd
        );

        Ok(json!({
            "transfer_ref": transfer_ref,
            "target": target,
            "amount_usd": amount_usd,
            "route": "custodial",
            "scheduled_at": Utc::now(),
        }))
    }

    fn vote(&self, task: &Task) -> Result<Value> {
        let position_size_usd = decimal_field(&task.params, "position_size_usd")?;
        let approved = position_size_usd <= self.max_single_transfer_usd;

        let reason = if approved {
            format!(
                "size ${} settleable in one transfer (limit ${})",
                position_size_usd, self.max_single_transfer_usd
            )
        } else {
            format!(
                "size ${} exceeds single-transfer limit ${}",
                position_size_usd, self.max_single_transfer_usd
            )
        };

        Ok(json!({ "approved": approved, "reason": reason }))
    }
}

#[async_trait::async_trait]
impl TaskHandler for SettlementDesk {
    fn kind(&self) -> AgentKind {
        AgentKind::Settlement
    }

    fn capabilities(&self) -> Vec<String> {
        vec!["settlement".to_string(), "consensus_vote".to_string()]
    }

    async fn handle(&self, task: &Task) -> Result<Value> {
        match task.action {
            TaskAction::ExecuteSettlement => self.settle(task),
            TaskAction::ConsensusVote => self.vote(task),
            other => Err(TaskError::UnsupportedAction {
                action: other.to_string(),
            }
            .into()),
        }
    }
}
