//! Worker agent base contract.
//!
//! Every specialized agent (risk, hedging, settlement, reporting) shares one
//! lifecycle: a status state machine, a FIFO task queue, bounded execution
//! history, and broadcast lifecycle events. The work itself comes from a
//! `TaskHandler`; the lifecycle never differs between kinds.

pub mod hedging;
pub mod registry;
pub mod reporting;
pub mod risk;
pub mod settlement;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::str::FromStr;
use std::time::Instant;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Result, TaskError};

/// Default cap on retained history entries per agent
pub const DEFAULT_HISTORY_LIMIT: usize = 128;

/// Capability type of an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Risk,
    Hedging,
    Settlement,
    Reporting,
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentKind::Risk => write!(f, "risk"),
            AgentKind::Hedging => write!(f, "hedging"),
            AgentKind::Settlement => write!(f, "settlement"),
            AgentKind::Reporting => write!(f, "reporting"),
        }
    }
}

impl FromStr for AgentKind {
    type Err = &'static str;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "risk" => Ok(AgentKind::Risk),
            "hedging" => Ok(AgentKind::Hedging),
            "settlement" => Ok(AgentKind::Settlement),
            "reporting" => Ok(AgentKind::Reporting),
            _ => Err("invalid agent kind; expected risk|hedging|settlement|reporting"),
        }
    }
}

/// Agent status state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Initializing,
    Busy,
    Error,
}

impl AgentStatus {
    /// Whether a new task may start. `Busy` is exclusive: one task in
    /// flight per agent, never two.
    pub fn can_accept(&self) -> bool {
        !matches!(self, AgentStatus::Busy)
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Idle => write!(f, "idle"),
            AgentStatus::Initializing => write!(f, "initializing"),
            AgentStatus::Busy => write!(f, "busy"),
            AgentStatus::Error => write!(f, "error"),
        }
    }
}

/// Task action discriminator, the per-agent-type contract surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskAction {
    AssessRisk,
    PlanHedge,
    ExecuteSettlement,
    CompileReport,
    ConsensusVote,
}

impl TaskAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskAction::AssessRisk => "assess_risk",
            TaskAction::PlanHedge => "plan_hedge",
            TaskAction::ExecuteSettlement => "execute_settlement",
            TaskAction::CompileReport => "compile_report",
            TaskAction::ConsensusVote => "consensus_vote",
        }
    }
}

impl std::fmt::Display for TaskAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Immutable unit of work handed to an agent.
///
/// Tasks carry their inputs only; outcomes come back as a separate
/// `TaskResult`, so a payload reused across submissions is never aliased.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub action: TaskAction,
    /// Higher = more urgent. Admission is FIFO; priority is advisory
    /// metadata for observers.
    pub priority: i32,
    /// Execution this task belongs to, for audit traceability
    pub execution_id: Option<Uuid>,
    pub params: Value,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn new(action: TaskAction, params: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            action,
            priority: 0,
            execution_id: None,
            params,
            created_at: Utc::now(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn for_execution(mut self, execution_id: Uuid) -> Self {
        self.execution_id = Some(execution_id);
        self
    }
}

/// Outcome of one task execution.
///
/// Exactly one of `data`/`error` is present, enforced by the constructors.
/// Delegation never raises: a handler failure becomes a failed result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: Uuid,
    pub agent_id: String,
    pub success: bool,
    pub data: Option<Value>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl TaskResult {
    pub fn completed(task: &Task, agent_id: impl Into<String>, data: Value, duration_ms: u64) -> Self {
        Self {
            task_id: task.id,
            agent_id: agent_id.into(),
            success: true,
            data: Some(data),
            error: None,
            duration_ms,
        }
    }

    pub fn failed(
        task: &Task,
        agent_id: impl Into<String>,
        error: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            task_id: task.id,
            agent_id: agent_id.into(),
            success: false,
            data: None,
            error: Some(error.into()),
            duration_ms,
        }
    }
}

/// Lifecycle events broadcast to observers (registry, monitoring)
#[derive(Debug, Clone)]
pub enum AgentEvent {
    Initialized {
        agent_id: String,
    },
    InitFailed {
        agent_id: String,
        error: String,
    },
    TaskStarted {
        agent_id: String,
        task_id: Uuid,
        action: TaskAction,
    },
    TaskCompleted {
        agent_id: String,
        task_id: Uuid,
        duration_ms: u64,
    },
    TaskFailed {
        agent_id: String,
        task_id: Uuid,
        error: String,
        duration_ms: u64,
    },
    ShutdownCompleted {
        agent_id: String,
    },
}

impl AgentEvent {
    fn label(&self) -> &'static str {
        match self {
            AgentEvent::Initialized { .. } => "initialized",
            AgentEvent::InitFailed { .. } => "init_failed",
            AgentEvent::TaskStarted { .. } => "task_started",
            AgentEvent::TaskCompleted { .. } => "task_completed",
            AgentEvent::TaskFailed { .. } => "task_failed",
            AgentEvent::ShutdownCompleted { .. } => "shutdown",
        }
    }
}

/// One retained history record
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub at: DateTime<Utc>,
    pub event: AgentEvent,
}

/// Point-in-time view of an agent
#[derive(Debug, Clone, Serialize)]
pub struct AgentSnapshot {
    pub id: String,
    pub kind: AgentKind,
    pub status: AgentStatus,
    pub queue_depth: usize,
    pub current_action: Option<TaskAction>,
    pub history_len: usize,
    pub capabilities: Vec<String>,
}

/// The work half of an agent. Implementations supply domain behavior;
/// the surrounding `Agent` owns status, queueing, history and events.
#[async_trait::async_trait]
pub trait TaskHandler: Send + Sync {
    fn kind(&self) -> AgentKind;

    fn capabilities(&self) -> Vec<String>;

    /// Perform one task. Errors are folded into a failed `TaskResult` by
    /// the owning agent, never surfaced to the delegating caller.
    async fn handle(&self, task: &Task) -> Result<Value>;

    /// Called once from `initialize`
    async fn warm_up(&self) -> Result<()> {
        Ok(())
    }

    /// Called once from `shutdown`; failures are logged and swallowed
    async fn tear_down(&self) -> Result<()> {
        Ok(())
    }
}

/// A worker agent: uniform lifecycle around a pluggable `TaskHandler`.
pub struct Agent {
    id: String,
    handler: Box<dyn TaskHandler>,
    status: RwLock<AgentStatus>,
    queue: Mutex<VecDeque<Task>>,
    history: Mutex<VecDeque<HistoryEntry>>,
    history_limit: usize,
    current_action: RwLock<Option<TaskAction>>,
    events: broadcast::Sender<AgentEvent>,
}

impl Agent {
    pub fn new(id: impl Into<String>, handler: Box<dyn TaskHandler>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            id: id.into(),
            handler,
            status: RwLock::new(AgentStatus::Idle),
            queue: Mutex::new(VecDeque::new()),
            history: Mutex::new(VecDeque::new()),
            history_limit: DEFAULT_HISTORY_LIMIT,
            current_action: RwLock::new(None),
            events,
        }
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> AgentKind {
        self.handler.kind()
    }

    pub fn capabilities(&self) -> Vec<String> {
        self.handler.capabilities()
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.events.subscribe()
    }

    pub async fn status(&self) -> AgentStatus {
        *self.status.read().await
    }

    /// Initialize the agent: Idle -> Initializing -> Idle, or -> Error when
    /// the handler's warm-up fails.
    pub async fn initialize(&self) -> Result<()> {
        *self.status.write().await = AgentStatus::Initializing;

        match self.handler.warm_up().await {
            Ok(()) => {
                *self.status.write().await = AgentStatus::Idle;
                self.record(AgentEvent::Initialized {
                    agent_id: self.id.clone(),
                })
                .await;
                info!("Agent {} initialized", self.id);
                Ok(())
            }
            Err(e) => {
                *self.status.write().await = AgentStatus::Error;
                self.record(AgentEvent::InitFailed {
                    agent_id: self.id.clone(),
                    error: e.to_string(),
                })
                .await;
                warn!("Agent {} failed to initialize: {}", self.id, e);
                Err(e)
            }
        }
    }

    /// Execute a task. Always returns a `TaskResult`; handler failures are
    /// caught and turned into a failed result carrying this agent's id and
    /// the elapsed time. Refuses to start while another task is in flight.
    pub async fn execute_task(&self, task: Task) -> TaskResult {
        {
            let mut status = self.status.write().await;
            if !status.can_accept() {
                debug!("Agent {} busy, refusing task {}", self.id, task.id);
                return TaskResult::failed(
                    &task,
                    &self.id,
                    TaskError::AgentBusy {
                        agent_id: self.id.clone(),
                    }
                    .to_string(),
                    0,
                );
            }
            *status = AgentStatus::Busy;
        }
        *self.current_action.write().await = Some(task.action);

        self.record(AgentEvent::TaskStarted {
            agent_id: self.id.clone(),
            task_id: task.id,
            action: task.action,
        })
        .await;

        let started = Instant::now();
        let outcome = self.handler.handle(&task).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        *self.current_action.write().await = None;

        match outcome {
            Ok(data) => {
                *self.status.write().await = AgentStatus::Idle;
                self.record(AgentEvent::TaskCompleted {
                    agent_id: self.id.clone(),
                    task_id: task.id,
                    duration_ms,
                })
                .await;
                debug!(
                    "Agent {} completed {} in {}ms",
                    self.id, task.action, duration_ms
                );
                TaskResult::completed(&task, &self.id, data, duration_ms)
            }
            Err(e) => {
                *self.status.write().await = AgentStatus::Error;
                self.record(AgentEvent::TaskFailed {
                    agent_id: self.id.clone(),
                    task_id: task.id,
                    error: e.to_string(),
                    duration_ms,
                })
                .await;
                warn!("Agent {} failed {}: {}", self.id, task.action, e);
                TaskResult::failed(&task, &self.id, e.to_string(), duration_ms)
            }
        }
    }

    /// FIFO admission to this agent's queue
    pub async fn enqueue_task(&self, task: Task) {
        let mut queue = self.queue.lock().await;
        debug!(
            "Agent {} queued task {} ({}), depth {}",
            self.id,
            task.id,
            task.action,
            queue.len() + 1
        );
        queue.push_back(task);
    }

    /// Run the next queued task, if any. No-op when the agent is not idle
    /// or the queue is empty; never blocks waiting for either.
    pub async fn process_next_task(&self) -> Option<TaskResult> {
        if self.status().await != AgentStatus::Idle {
            return None;
        }
        let task = self.queue.lock().await.pop_front()?;
        Some(self.execute_task(task).await)
    }

    /// Point-in-time snapshot
    pub async fn snapshot(&self) -> AgentSnapshot {
        AgentSnapshot {
            id: self.id.clone(),
            kind: self.kind(),
            status: self.status().await,
            queue_depth: self.queue.lock().await.len(),
            current_action: *self.current_action.read().await,
            history_len: self.history.lock().await.len(),
            capabilities: self.capabilities(),
        }
    }

    /// Recent lifecycle history, oldest first
    pub async fn history(&self) -> Vec<HistoryEntry> {
        self.history.lock().await.iter().cloned().collect()
    }

    /// Idempotent shutdown: tear down the handler, drop queued tasks, and
    /// settle back to Idle. Does not interrupt a task already in flight.
    pub async fn shutdown(&self) {
        if let Err(e) = self.handler.tear_down().await {
            warn!("Agent {} tear-down failed: {}", self.id, e);
        }

        let dropped = {
            let mut queue = self.queue.lock().await;
            let n = queue.len();
            queue.clear();
            n
        };
        if dropped > 0 {
            debug!("Agent {} dropped {} queued tasks on shutdown", self.id, dropped);
        }

        *self.status.write().await = AgentStatus::Idle;
        self.record(AgentEvent::ShutdownCompleted {
            agent_id: self.id.clone(),
        })
        .await;
        info!("Agent {} shut down", self.id);
    }

    async fn record(&self, event: AgentEvent) {
        debug!("Agent {} lifecycle event: {}", self.id, event.label());
        {
            let mut history = self.history.lock().await;
            history.push_back(HistoryEntry {
                at: Utc::now(),
                event: event.clone(),
            });
            while history.len() > self.history_limit {
                history.pop_front();
            }
        }
        // Nobody listening is fine
        let _ = self.events.send(event);
    }
}

// ---- shared parameter helpers for handlers ----

pub(crate) fn decimal_field(params: &Value, name: &str) -> Result<Decimal> {
    match params.get(name) {
        Some(Value::String(s)) => Decimal::from_str(s).map_err(|e| {
            TaskError::Handler(format!("parameter {} is not a decimal: {}", name, e)).into()
        }),
        Some(Value::Number(n)) => Decimal::from_str(&n.to_string()).map_err(|e| {
            TaskError::Handler(format!("parameter {} is not a decimal: {}", name, e)).into()
        }),
        _ => Err(TaskError::MissingParameter {
            name: name.to_string(),
        }
        .into()),
    }
}

pub(crate) fn str_field<'a>(params: &'a Value, name: &str) -> Result<&'a str> {
    params
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| {
            TaskError::MissingParameter {
                name: name.to_string(),
            }
            .into()
        })
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::time::Duration;

    /// Handler with scripted behavior for lifecycle tests
    pub struct ScriptedHandler {
        pub kind: AgentKind,
        pub delay: Duration,
        pub fail_with: Option<String>,
    }

    impl ScriptedHandler {
        pub fn instant() -> Self {
            Self {
                kind: AgentKind::Risk,
                delay: Duration::from_millis(0),
                fail_with: None,
            }
        }

        pub fn slow(delay: Duration) -> Self {
            Self {
                kind: AgentKind::Risk,
                delay,
                fail_with: None,
            }
        }

        pub fn failing(error: &str) -> Self {
            Self {
                kind: AgentKind::Risk,
                delay: Duration::from_millis(0),
                fail_with: Some(error.to_string()),
            }
        }
    }

    #[async_trait::async_trait]
    impl TaskHandler for ScriptedHandler {
        fn kind(&self) -> AgentKind {
            self.kind
        }

        fn capabilities(&self) -> Vec<String> {
            vec!["scripted".to_string()]
        }

        async fn handle(&self, task: &Task) -> Result<Value> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match &self.fail_with {
                Some(err) => Err(TaskError::Handler(err.clone()).into()),
                None => Ok(serde_json::json!({ "echo": task.action.as_str() })),
            }
        }
    }
}
