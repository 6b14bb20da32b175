use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use swq_core::{
    CleanupReport, FailOutcome, HistoryEntry, QueueStats, StoreResult, Task, TaskId, TaskStatus,
    DEFAULT_PRIORITY,
};
use swq_storage::Store;

/// Priority-ordered claim/complete/fail protocol over the store. This is
/// the submission, poll, completion and query boundary that submitters and
/// worker loops talk to; the store underneath owns atomicity.
pub struct TaskQueue {
    store: Arc<dyn Store>,
}

impl TaskQueue {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Enqueue a new task. `priority` defaults to 5, higher is more urgent.
    /// `assigned_to` is an advisory routing hint, not a lock.
    pub fn submit(
        &self,
        task_type: &str,
        payload: Value,
        assigned_to: Option<&str>,
        priority: Option<i32>,
    ) -> StoreResult<Task> {
        let task = self.store.create_task(
            task_type,
            payload,
            assigned_to,
            priority.unwrap_or(DEFAULT_PRIORITY),
        )?;
        info!(task_id = %task.id, task_type, priority = task.priority, "task submitted");
        Ok(task)
    }

    /// Pull the best eligible task for this agent, or `None` when the queue
    /// has nothing for it. Pull model: callers poll again after their
    /// configured interval.
    pub fn claim_next(&self, agent_id: &str) -> StoreResult<Option<Task>> {
        self.store.claim_next(agent_id)
    }

    pub fn complete(&self, task_id: &TaskId, result: Value) -> StoreResult<()> {
        self.store.complete_task(task_id, result)?;
        info!(task_id = %task_id, "task completed");
        Ok(())
    }

    /// Report a failed attempt. The work item failing is data, not an
    /// error; an `Err` here means the queue operation itself was invalid.
    pub fn fail(&self, task_id: &TaskId, error: &str) -> StoreResult<FailOutcome> {
        let outcome = self.store.fail_task(task_id, error)?;
        info!(
            task_id = %task_id,
            retries = outcome.retries,
            retrying = outcome.retrying,
            "task failed"
        );
        Ok(outcome)
    }

    pub fn get(&self, task_id: &TaskId) -> StoreResult<Task> {
        self.store.get_task(task_id)
    }

    pub fn list(&self, status: Option<TaskStatus>) -> StoreResult<Vec<Task>> {
        self.store.list_tasks(status)
    }

    pub fn history(&self, task_id: &TaskId) -> StoreResult<Vec<HistoryEntry>> {
        self.store.task_history(task_id)
    }

    pub fn stats(&self) -> StoreResult<QueueStats> {
        self.store.stats()
    }

    pub fn cleanup(&self, retention_days: u32) -> StoreResult<CleanupReport> {
        self.store.cleanup(retention_days)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use swq_core::StoreError;
    use swq_storage::MemoryStore;

    use super::*;

    fn queue() -> TaskQueue {
        TaskQueue::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn submit_applies_default_priority() {
        let q = queue();
        let t = q.submit("build", json!({"target": "x"}), None, None).unwrap();
        assert_eq!(t.priority, 5);
        let t = q.submit("build", json!({}), None, Some(9)).unwrap();
        assert_eq!(t.priority, 9);
    }

    #[test]
    fn submit_claim_complete_round_trip() {
        let q = queue();
        let t = q.submit("echo", json!({"say": "hi"}), None, None).unwrap();
        let claimed = q.claim_next("a1").unwrap().unwrap();
        assert_eq!(claimed.id, t.id);
        assert_eq!(claimed.payload, json!({"say": "hi"}));
        q.complete(&t.id, json!({"said": "hi"})).unwrap();
        assert_eq!(q.get(&t.id).unwrap().status, TaskStatus::Complete);
    }

    #[test]
    fn invalid_payload_is_rejected_at_submit() {
        let q = queue();
        assert!(matches!(
            q.submit("t", json!([1, 2]), None, None).unwrap_err(),
            StoreError::InvalidPayload(_)
        ));
    }

    #[test]
    fn stats_reflect_lifecycle() {
        let q = queue();
        let t = q.submit("t", json!({}), None, None).unwrap();
        q.submit("t", json!({}), None, None).unwrap();
        q.claim_next("a1").unwrap().unwrap();
        q.complete(&t.id, json!({})).unwrap();
        let stats = q.stats().unwrap();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.complete, 1);
    }
}
