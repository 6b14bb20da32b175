use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use swq_core::{now_ms, Agent, AgentHealth, AgentStatus, StoreResult, TaskId};
use swq_storage::Store;

pub const DEFAULT_HEARTBEAT_TIMEOUT_MS: i64 = 30_000;

/// Liveness and status tracking for worker agents. Heartbeats are advisory
/// telemetry: nothing here takes automatic action when an agent goes stale.
/// An external supervisor decides what staleness means and may call
/// `sweep_offline` explicitly.
pub struct AgentRegistry {
    store: Arc<dyn Store>,
    heartbeat_timeout_ms: i64,
}

impl AgentRegistry {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            heartbeat_timeout_ms: DEFAULT_HEARTBEAT_TIMEOUT_MS,
        }
    }

    pub fn with_heartbeat_timeout_ms(mut self, timeout_ms: i64) -> Self {
        self.heartbeat_timeout_ms = timeout_ms;
        self
    }

    /// Idempotent upsert. Re-registration resets status/heartbeat and
    /// preserves the agent's completion counters.
    pub fn register(
        &self,
        agent_id: &str,
        agent_type: &str,
        capabilities: Value,
        metadata: Value,
    ) -> StoreResult<()> {
        self.store
            .upsert_agent(agent_id, agent_type, capabilities, metadata)?;
        info!(agent_id, agent_type, "agent registered");
        Ok(())
    }

    /// Refresh liveness only. Unknown agents are a silent no-op; the caller
    /// also registers at startup.
    pub fn heartbeat(&self, agent_id: &str) -> StoreResult<()> {
        self.store.heartbeat(agent_id)
    }

    /// Derived read: stale once the last heartbeat is older than the
    /// configured timeout. Never mutates.
    pub fn health(&self, agent_id: &str) -> StoreResult<AgentHealth> {
        let agent = self.store.get_agent(agent_id)?;
        if now_ms() - agent.last_heartbeat_ms > self.heartbeat_timeout_ms {
            Ok(AgentHealth::Stale)
        } else {
            Ok(AgentHealth::Healthy)
        }
    }

    pub fn set_status(
        &self,
        agent_id: &str,
        status: AgentStatus,
        current_task: Option<&TaskId>,
    ) -> StoreResult<()> {
        self.store.set_agent_status(agent_id, status, current_task)
    }

    pub fn get(&self, agent_id: &str) -> StoreResult<Agent> {
        self.store.get_agent(agent_id)
    }

    pub fn list(&self) -> StoreResult<Vec<Agent>> {
        self.store.list_agents()
    }

    /// Operator-invoked sweep: mark agents whose heartbeat exceeded the
    /// timeout as offline. Their in_progress tasks stay in_progress.
    pub fn sweep_offline(&self) -> StoreResult<u64> {
        let flipped = self.store.mark_stale_offline(self.heartbeat_timeout_ms)?;
        if flipped > 0 {
            info!(flipped, "stale agents marked offline");
        }
        Ok(flipped)
    }
}
