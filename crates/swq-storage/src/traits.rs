use serde_json::Value;
use swq_core::{
    Agent, AgentStatus, CleanupReport, FailOutcome, HistoryEntry, Message, MessageId, QueueStats,
    StoreResult, Task, TaskId, TaskStatus,
};

/// Single source of truth for tasks, messages, agents and history.
///
/// Every method is one atomic unit with respect to every other: no two
/// concurrent callers may observe or cause an inconsistent intermediate
/// state. In particular `claim_next`, `complete_task` and `fail_task` must
/// each run as a single transaction so that under N concurrent claims
/// against M eligible tasks each task goes to at most one caller.
pub trait Store: Send + Sync {
    // --- tasks ---

    /// Persist a new pending task. `assigned_to` is an advisory hint, not an
    /// ownership lock. `max_retries` resolves from the `default_max_retries`
    /// config key when the deployment has one.
    fn create_task(
        &self,
        task_type: &str,
        payload: Value,
        assigned_to: Option<&str>,
        priority: i32,
    ) -> StoreResult<Task>;

    /// Claim the best eligible pending task for `agent_id`, flipping it to
    /// in_progress and recording a `started` history entry. Returns `None`
    /// when nothing is eligible (including a lost race, which is a normal
    /// outcome, not an error).
    fn claim_next(&self, agent_id: &str) -> StoreResult<Option<Task>>;

    /// Terminate an in_progress task successfully. Atomically stores the
    /// result, stamps completion, records history, bumps the owning agent's
    /// `total_completed` and returns it to idle.
    fn complete_task(&self, task_id: &TaskId, result: Value) -> StoreResult<()>;

    /// Record a failed attempt on an in_progress task. While retries remain
    /// the task re-enters the queue as pending with `assigned_to` cleared
    /// (a retry is up for grabs by any poller) and its original priority and
    /// creation time; otherwise it fails terminally. Either way the owning
    /// agent's `total_failed` is bumped and it returns to idle.
    fn fail_task(&self, task_id: &TaskId, error: &str) -> StoreResult<FailOutcome>;

    fn get_task(&self, task_id: &TaskId) -> StoreResult<Task>;

    /// Unfiltered: newest-first by creation. Filtered to pending: claim
    /// order (priority desc, then age). Other filters: newest-first.
    fn list_tasks(&self, status: Option<TaskStatus>) -> StoreResult<Vec<Task>>;

    /// Append-only audit trail for a task, in insertion order.
    fn task_history(&self, task_id: &TaskId) -> StoreResult<Vec<HistoryEntry>>;

    // --- messages ---

    /// `to = None` is a broadcast. Returns the monotonic message id.
    fn send_message(
        &self,
        from: &str,
        to: Option<&str>,
        topic: &str,
        payload: Value,
    ) -> StoreResult<MessageId>;

    /// Atomically select and mark consumed every unconsumed message visible
    /// to `agent_id` (direct or broadcast, optionally topic-filtered),
    /// returned in creation order. Destructive read: a broadcast consumed
    /// here is gone for every other recipient.
    fn receive_messages(&self, agent_id: &str, topic: Option<&str>) -> StoreResult<Vec<Message>>;

    /// Unconsumed messages currently visible to `agent_id`; never consumes.
    fn unread_count(&self, agent_id: &str) -> StoreResult<u64>;

    // --- agents ---

    /// Idempotent upsert: (re)registration resets status to idle, the
    /// heartbeat and `started_ms` to now, and preserves completion counters.
    fn upsert_agent(
        &self,
        agent_id: &str,
        agent_type: &str,
        capabilities: Value,
        metadata: Value,
    ) -> StoreResult<()>;

    /// Refresh `last_heartbeat_ms` only. Silent no-op on an unknown agent.
    fn heartbeat(&self, agent_id: &str) -> StoreResult<()>;

    /// Explicit status override. Rejects combinations that break the
    /// busy-iff-current-task invariant with `InvalidState`.
    fn set_agent_status(
        &self,
        agent_id: &str,
        status: AgentStatus,
        current_task: Option<&TaskId>,
    ) -> StoreResult<()>;

    fn get_agent(&self, agent_id: &str) -> StoreResult<Agent>;

    fn list_agents(&self) -> StoreResult<Vec<Agent>>;

    /// Flip agents whose heartbeat is older than `timeout_ms` to offline,
    /// clearing `current_task`. Their in_progress tasks are left untouched;
    /// reassignment is the caller's decision. Returns how many flipped.
    /// The core never invokes this on its own.
    fn mark_stale_offline(&self, timeout_ms: i64) -> StoreResult<u64>;

    // --- maintenance / config ---

    fn stats(&self) -> StoreResult<QueueStats>;

    /// Delete terminal tasks older than the cutoff (by completion time,
    /// history cascades) and consumed messages older than the cutoff (by
    /// creation time). Pending and in_progress tasks are never deleted,
    /// regardless of age.
    fn cleanup(&self, retention_days: u32) -> StoreResult<CleanupReport>;

    fn set_config(&self, key: &str, value: &str) -> StoreResult<()>;
    fn get_config(&self, key: &str) -> StoreResult<Option<String>>;
}
