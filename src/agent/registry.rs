//! Agent registry: identity- and capability-indexed lookup over live agents.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::{Agent, AgentKind, AgentSnapshot, AgentStatus};

#[derive(Default)]
struct RegistryInner {
    by_id: HashMap<String, Arc<Agent>>,
    by_kind: HashMap<AgentKind, Vec<String>>,
}

/// Lookup table over live agents. Both indexes mutate under one lock so
/// they can never disagree.
#[derive(Default)]
pub struct AgentRegistry {
    inner: RwLock<RegistryInner>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent under its id and kind. Re-registering an id
    /// replaces the previous instance.
    pub async fn register(&self, agent: Arc<Agent>) {
        let id = agent.id().to_string();
        let kind = agent.kind();

        let mut inner = self.inner.write().await;
        if let Some(previous) = inner.by_id.insert(id.clone(), agent) {
            warn!("Replacing registered agent {}", previous.id());
            if let Some(ids) = inner.by_kind.get_mut(&previous.kind()) {
                ids.retain(|existing| existing != &id);
            }
        }
        inner.by_kind.entry(kind).or_default().push(id.clone());
        info!("Registered agent {} ({})", id, kind);
    }

    /// Remove an agent from both indexes.
    pub async fn unregister(&self, agent_id: &str) -> Option<Arc<Agent>> {
        let mut inner = self.inner.write().await;
        let agent = inner.by_id.remove(agent_id)?;
        if let Some(ids) = inner.by_kind.get_mut(&agent.kind()) {
            ids.retain(|id| id != agent_id);
        }
        info!("Unregistered agent {}", agent_id);
        Some(agent)
    }

    pub async fn agent_by_id(&self, agent_id: &str) -> Option<Arc<Agent>> {
        self.inner.read().await.by_id.get(agent_id).cloned()
    }

    /// First idle agent of the kind, else any agent of the kind. Returns
    /// None only when no agent of the kind is registered at all; a fully
    /// busy pool is the caller's problem to wait on.
    pub async fn agent_of_kind(&self, kind: AgentKind) -> Option<Arc<Agent>> {
        let candidates: Vec<Arc<Agent>> = {
            let inner = self.inner.read().await;
            inner
                .by_kind
                .get(&kind)
                .into_iter()
                .flatten()
                .filter_map(|id| inner.by_id.get(id).cloned())
                .collect()
        };

        for agent in &candidates {
            if agent.status().await == AgentStatus::Idle {
                return Some(agent.clone());
            }
        }
        if !candidates.is_empty() {
            debug!("No idle {} agent, falling back to a busy one", kind);
        }
        candidates.into_iter().next()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.by_id.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.by_id.is_empty()
    }

    /// Snapshots of every registered agent, for monitoring.
    pub async fn snapshots(&self) -> Vec<AgentSnapshot> {
        let agents: Vec<Arc<Agent>> = self.inner.read().await.by_id.values().cloned().collect();
        let mut snapshots = Vec::with_capacity(agents.len());
        for agent in agents {
            snapshots.push(agent.snapshot().await);
        }
        snapshots
    }

    /// Shut down every registered agent, tolerating individual failures,
    /// then clear both indexes. The indexes are only cleared after every
    /// shutdown has resolved.
    pub async fn shutdown_all(&self) {
        let agents: Vec<Arc<Agent>> = self.inner.read().await.by_id.values().cloned().collect();

        for agent in &agents {
            agent.shutdown().await;
        }

        let mut inner = self.inner.write().await;
        inner.by_id.clear();
        inner.by_kind.clear();
        info!("Registry cleared after shutting down {} agents", agents.len());
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::ScriptedHandler;
    use super::super::{Task, TaskAction};
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn scripted_agent(id: &str) -> Arc<Agent> {
        Arc::new(Agent::new(id, Box::new(ScriptedHandler::instant())))
    }

    #[tokio::test]
    async fn register_and_lookup() {
        let registry = AgentRegistry::new();
        registry.register(scripted_agent("risk-1")).await;

        assert_eq!(registry.len().await, 1);
        assert!(registry.agent_by_id("risk-1").await.is_some());
        assert!(registry.agent_of_kind(AgentKind::Risk).await.is_some());
        assert!(registry.agent_of_kind(AgentKind::Hedging).await.is_none());
    }

    #[tokio::test]
    async fn unregister_removes_both_indexes() {
        let registry = AgentRegistry::new();
        registry.register(scripted_agent("risk-1")).await;
        registry.unregister("risk-1").await;

        assert!(registry.is_empty().await);
        assert!(registry.agent_of_kind(AgentKind::Risk).await.is_none());
    }

    #[tokio::test]
    async fn prefers_idle_agent_falls_back_to_busy() {
        let registry = AgentRegistry::new();
        let busy = Arc::new(Agent::new(
            "risk-busy",
            Box::new(ScriptedHandler::slow(Duration::from_millis(200))),
        ));
        let idle = scripted_agent("risk-idle");
        registry.register(busy.clone()).await;
        registry.register(idle.clone()).await;

        let runner = {
            let busy = busy.clone();
            tokio::spawn(
                async move { busy.execute_task(Task::new(TaskAction::AssessRisk, json!({}))).await },
            )
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let picked = registry.agent_of_kind(AgentKind::Risk).await.unwrap();
        assert_eq!(picked.id(), "risk-idle");
        runner.await.unwrap();

        // With only the busy agent left, lookup still succeeds.
        registry.unregister("risk-idle").await;
        assert!(registry.agent_of_kind(AgentKind::Risk).await.is_some());
    }

    #[tokio::test]
    async fn shutdown_all_clears_after_resolving() {
        let registry = AgentRegistry::new();
        registry.register(scripted_agent("risk-1")).await;
        registry.register(scripted_agent("risk-2")).await;

        registry.shutdown_all().await;
        assert!(registry.is_empty().await);
        assert!(registry.agent_of_kind(AgentKind::Risk).await.is_none());
    }
}
