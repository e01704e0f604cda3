//! Reporting agent.

use serde_json::{json, Value};

use crate::error::{Result, TaskError};

use super::{str_field, AgentKind, Task, TaskAction, TaskHandler};

/// Renders the human-readable summary of a finished execution from the
/// stage outcomes the orchestrator hands it.
#[derive(Debug, Default)]
pub struct ReportScribe;

impl ReportScribe {
    pub fn new() -> Self {
        Self
    }

    fn compile(&self, task: &Task) -> Result<Value> {
        let strategy = str_field(&task.params, "strategy")?;
        let target = str_field(&task.params, "target")?;
        let stages = task
            .params
            .get("stages")
            .and_then(Value::as_object)
            .ok_or_else(|| TaskError::MissingParameter {
                name: "stages".to_string(),
            })?;

        let mut lines: Vec<String> = Vec::with_capacity(stages.len());
        for (stage, outcome) in stages {
            let ok = outcome
                .get("success")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            lines.push(format!("{}: {}", stage, if ok { "ok" } else { "failed" }));
        }
        lines.sort();

        let summary = format!(
            "Strategy '{}' on {}: {}",
            strategy,
            target,
            lines.join(", ")
        );

        Ok(json!({ "summary": summary, "stage_count": stages.len() }))
    }

    fn vote(&self, task: &Task) -> Result<Value> {
        // The scribe has no market signal; it approves when it has enough
        // context to later document the execution.
        let proposal_present = task
            .params
            .get("proposal")
            .and_then(Value::as_str)
            .map(|p| !p.trim().is_empty())
            .unwrap_or(false);

        let (approved, reason) = if proposal_present {
            (true, "proposal is documented and reportable".to_string())
        } else {
            (false, "proposal text missing, nothing to document".to_string())
        };

        Ok(json!({ "approved": approved, "reason": reason }))
    }
}

#[async_trait::async_trait]
impl TaskHandler for ReportScribe {
    fn kind(&self) -> AgentKind {
        AgentKind::Reporting
    }

    fn capabilities(&self) -> Vec<String> {
        vec!["reporting".to_string(), "consensus_vote".to_string()]
    }

    async fn handle(&self, task: &Task) -> Result<Value> {
        match task.action {
            TaskAction::CompileReport => self.compile(task),
            TaskAction::ConsensusVote => self.vote(task),
            other => Err(TaskError::UnsupportedAction {
                action: other.to_string(),
            }
            .into()),
        }
    }
}
