use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ids::*, model::*};

pub const DEFAULT_PRIORITY: i32 = 5;
pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub task_type: String,
    pub payload: Value,
    pub status: TaskStatus,
    /// Higher is more urgent.
    pub priority: i32,
    /// Advisory label, not an ownership lock; eligibility is re-checked at
    /// claim time.
    pub assigned_to: Option<String>,
    pub result: Option<Value>,
    /// Set only on terminal failure; per-attempt messages live in history.
    pub error: Option<String>,
    pub retries: u32,
    pub max_retries: u32,
    pub created_ms: i64,
    pub started_ms: Option<i64>,
    pub completed_ms: Option<i64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub from: String,
    /// `None` means broadcast.
    pub to: Option<String>,
    pub topic: String,
    pub payload: Value,
    pub consumed: bool,
    pub created_ms: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub agent_type: String,
    pub capabilities: Value,
    pub status: AgentStatus,
    pub current_task: Option<TaskId>,
    pub last_heartbeat_ms: i64,
    pub started_ms: i64,
    pub total_completed: u64,
    pub total_failed: u64,
    pub metadata: Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub task_id: TaskId,
    pub agent_id: String,
    pub action: HistoryAction,
    pub ts_ms: i64,
    pub details: Value,
}

/// Outcome of `fail_task`: whether the task re-entered the queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FailOutcome {
    pub retrying: bool,
    pub retries: u32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: u64,
    pub in_progress: u64,
    pub complete: u64,
    pub failed: u64,
    pub unconsumed_messages: u64,
    pub agents: Vec<AgentStats>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentStats {
    pub agent_id: String,
    pub status: AgentStatus,
    pub total_completed: u64,
    pub total_failed: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub tasks_removed: u64,
    pub messages_removed: u64,
}
