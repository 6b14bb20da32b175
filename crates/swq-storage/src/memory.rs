use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::{json, Value};
use swq_core::{
    claim_order, eligible_for, ensure_document, listing_order, now_ms, Agent, AgentStatus,
    CleanupReport, FailOutcome, HistoryAction, HistoryEntry, Message, MessageId, QueueStats,
    StoreError, StoreResult, Task, TaskId, TaskStatus, AgentStats, DEFAULT_MAX_RETRIES,
    MS_PER_DAY,
};

use crate::traits::Store;

/// In-memory store for tests. Not durable; the single mutex makes every
/// operation trivially atomic, which is exactly the contract the sqlite
/// store provides with transactions.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    tasks: HashMap<String, Task>,
    messages: Vec<Message>,
    agents: HashMap<String, Agent>,
    history: Vec<HistoryEntry>,
    config: HashMap<String, String>,
    next_message_id: MessageId,
    next_history_id: i64,
}

impl Inner {
    fn push_history(&mut self, task_id: &TaskId, agent_id: &str, action: HistoryAction, details: Value) {
        self.next_history_id += 1;
        self.history.push(HistoryEntry {
            id: self.next_history_id,
            task_id: task_id.clone(),
            agent_id: agent_id.to_string(),
            action,
            ts_ms: now_ms(),
            details,
        });
    }

    /// Return the owning agent to idle and bump the right counter.
    fn settle_agent(&mut self, agent_id: Option<&str>, completed: bool) {
        let Some(id) = agent_id else { return };
        if let Some(a) = self.agents.get_mut(id) {
            if completed {
                a.total_completed += 1;
            } else {
                a.total_failed += 1;
            }
            a.status = AgentStatus::Idle;
            a.current_task = None;
        }
    }

    fn default_max_retries(&self) -> u32 {
        self.config
            .get("default_max_retries")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_RETRIES)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn create_task(
        &self,
        task_type: &str,
        payload: Value,
        assigned_to: Option<&str>,
        priority: i32,
    ) -> StoreResult<Task> {
        ensure_document(&payload)?;
        let mut inner = self.inner.lock().unwrap();
        let task = Task {
            id: TaskId::new(),
            task_type: task_type.to_string(),
            payload,
            status: TaskStatus::Pending,
            priority,
            assigned_to: assigned_to.map(str::to_string),
            result: None,
            error: None,
            retries: 0,
            max_retries: inner.default_max_retries(),
            created_ms: now_ms(),
            started_ms: None,
            completed_ms: None,
        };
        if let Some(agent) = assigned_to {
            inner.push_history(&task.id, agent, HistoryAction::Assigned, json!({}));
        }
        inner.tasks.insert(task.id.0.clone(), task.clone());
        Ok(task)
    }

    fn claim_next(&self, agent_id: &str) -> StoreResult<Option<Task>> {
        let mut inner = self.inner.lock().unwrap();
        let best = inner
            .tasks
            .values()
            .filter(|t| eligible_for(t, agent_id))
            .min_by(|a, b| claim_order(a, b))
            .map(|t| t.id.clone());
        let Some(task_id) = best else {
            return Ok(None);
        };

        let now = now_ms();
        let claimed = {
            let t = inner.tasks.get_mut(&task_id.0).unwrap();
            t.status = TaskStatus::InProgress;
            t.assigned_to = Some(agent_id.to_string());
            t.started_ms.get_or_insert(now);
            t.clone()
        };
        inner.push_history(&task_id, agent_id, HistoryAction::Started, json!({}));
        if let Some(a) = inner.agents.get_mut(agent_id) {
            a.status = AgentStatus::Busy;
            a.current_task = Some(task_id);
        }
        Ok(Some(claimed))
    }

    fn complete_task(&self, task_id: &TaskId, result: Value) -> StoreResult<()> {
        ensure_document(&result)?;
        let mut inner = self.inner.lock().unwrap();
        let agent = {
            let t = inner
                .tasks
                .get_mut(&task_id.0)
                .ok_or_else(|| StoreError::not_found("task", task_id.as_str()))?;
            if t.status != TaskStatus::InProgress {
                return Err(StoreError::InvalidState {
                    id: task_id.0.clone(),
                    expected: "in_progress",
                    found: t.status.as_str().to_string(),
                });
            }
            t.status = TaskStatus::Complete;
            t.result = Some(result);
            t.completed_ms = Some(now_ms());
            t.assigned_to.clone()
        };
        inner.push_history(
            task_id,
            agent.as_deref().unwrap_or(""),
            HistoryAction::Completed,
            json!({}),
        );
        inner.settle_agent(agent.as_deref(), true);
        Ok(())
    }

    fn fail_task(&self, task_id: &TaskId, error: &str) -> StoreResult<FailOutcome> {
        let mut inner = self.inner.lock().unwrap();
        let (agent, outcome) = {
            let t = inner
                .tasks
                .get_mut(&task_id.0)
                .ok_or_else(|| StoreError::not_found("task", task_id.as_str()))?;
            if t.status != TaskStatus::InProgress {
                return Err(StoreError::InvalidState {
                    id: task_id.0.clone(),
                    expected: "in_progress",
                    found: t.status.as_str().to_string(),
                });
            }
            let agent = t.assigned_to.clone();
            t.retries += 1;
            let retrying = t.retries < t.max_retries;
            if retrying {
                t.status = TaskStatus::Pending;
                t.assigned_to = None;
            } else {
                t.status = TaskStatus::Failed;
                t.error = Some(error.to_string());
                t.completed_ms = Some(now_ms());
            }
            (
                agent,
                FailOutcome {
                    retrying,
                    retries: t.retries,
                },
            )
        };
        let agent_str = agent.as_deref().unwrap_or("").to_string();
        inner.push_history(
            task_id,
            &agent_str,
            HistoryAction::Failed,
            json!({ "error": error }),
        );
        if outcome.retrying {
            inner.push_history(
                task_id,
                &agent_str,
                HistoryAction::Retried,
                json!({ "retries": outcome.retries }),
            );
        }
        inner.settle_agent(agent.as_deref(), false);
        Ok(outcome)
    }

    fn get_task(&self, task_id: &TaskId) -> StoreResult<Task> {
        let inner = self.inner.lock().unwrap();
        inner
            .tasks
            .get(&task_id.0)
            .cloned()
            .ok_or_else(|| StoreError::not_found("task", task_id.as_str()))
    }

    fn list_tasks(&self, status: Option<TaskStatus>) -> StoreResult<Vec<Task>> {
        let inner = self.inner.lock().unwrap();
        let mut tasks: Vec<Task> = inner
            .tasks
            .values()
            .filter(|t| status.map_or(true, |s| t.status == s))
            .cloned()
            .collect();
        match status {
            Some(TaskStatus::Pending) => tasks.sort_by(claim_order),
            _ => tasks.sort_by(listing_order),
        }
        Ok(tasks)
    }

    fn task_history(&self, task_id: &TaskId) -> StoreResult<Vec<HistoryEntry>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .history
            .iter()
            .filter(|h| &h.task_id == task_id)
            .cloned()
            .collect())
    }

    fn send_message(
        &self,
        from: &str,
        to: Option<&str>,
        topic: &str,
        payload: Value,
    ) -> StoreResult<MessageId> {
        ensure_document(&payload)?;
        let mut inner = self.inner.lock().unwrap();
        inner.next_message_id += 1;
        let id = inner.next_message_id;
        inner.messages.push(Message {
            id,
            from: from.to_string(),
            to: to.map(str::to_string),
            topic: topic.to_string(),
            payload,
            consumed: false,
            created_ms: now_ms(),
        });
        Ok(id)
    }

    fn receive_messages(&self, agent_id: &str, topic: Option<&str>) -> StoreResult<Vec<Message>> {
        let mut inner = self.inner.lock().unwrap();
        let mut received = vec![];
        for m in inner.messages.iter_mut() {
            let addressed = m.to.as_deref().map_or(true, |to| to == agent_id);
            let topical = topic.map_or(true, |t| m.topic == t);
            if !m.consumed && addressed && topical {
                m.consumed = true;
                received.push(m.clone());
            }
        }
        received.sort_by(|a, b| a.created_ms.cmp(&b.created_ms).then(a.id.cmp(&b.id)));
        Ok(received)
    }

    fn unread_count(&self, agent_id: &str) -> StoreResult<u64> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .messages
            .iter()
            .filter(|m| !m.consumed && m.to.as_deref().map_or(true, |to| to == agent_id))
            .count() as u64)
    }

    fn upsert_agent(
        &self,
        agent_id: &str,
        agent_type: &str,
        capabilities: Value,
        metadata: Value,
    ) -> StoreResult<()> {
        ensure_document(&capabilities)?;
        ensure_document(&metadata)?;
        let mut inner = self.inner.lock().unwrap();
        let now = now_ms();
        let (total_completed, total_failed) = inner
            .agents
            .get(agent_id)
            .map(|a| (a.total_completed, a.total_failed))
            .unwrap_or((0, 0));
        inner.agents.insert(
            agent_id.to_string(),
            Agent {
                id: agent_id.to_string(),
                agent_type: agent_type.to_string(),
                capabilities,
                status: AgentStatus::Idle,
                current_task: None,
                last_heartbeat_ms: now,
                started_ms: now,
                total_completed,
                total_failed,
                metadata,
            },
        );
        Ok(())
    }

    fn heartbeat(&self, agent_id: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(a) = inner.agents.get_mut(agent_id) {
            a.last_heartbeat_ms = now_ms();
        }
        Ok(())
    }

    fn set_agent_status(
        &self,
        agent_id: &str,
        status: AgentStatus,
        current_task: Option<&TaskId>,
    ) -> StoreResult<()> {
        if (status == AgentStatus::Busy) != current_task.is_some() {
            return Err(StoreError::InvalidState {
                id: agent_id.to_string(),
                expected: "busy iff current_task set",
                found: format!("{} with current_task={:?}", status.as_str(), current_task),
            });
        }
        let mut inner = self.inner.lock().unwrap();
        let a = inner
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| StoreError::not_found("agent", agent_id))?;
        a.status = status;
        a.current_task = current_task.cloned();
        Ok(())
    }

    fn get_agent(&self, agent_id: &str) -> StoreResult<Agent> {
        let inner = self.inner.lock().unwrap();
        inner
            .agents
            .get(agent_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("agent", agent_id))
    }

    fn list_agents(&self) -> StoreResult<Vec<Agent>> {
        let inner = self.inner.lock().unwrap();
        let mut agents: Vec<Agent> = inner.agents.values().cloned().collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(agents)
    }

    fn mark_stale_offline(&self, timeout_ms: i64) -> StoreResult<u64> {
        let mut inner = self.inner.lock().unwrap();
        let cutoff = now_ms() - timeout_ms;
        let mut flipped = 0;
        for a in inner.agents.values_mut() {
            if a.status != AgentStatus::Offline && a.last_heartbeat_ms < cutoff {
                a.status = AgentStatus::Offline;
                a.current_task = None;
                flipped += 1;
            }
        }
        Ok(flipped)
    }

    fn stats(&self) -> StoreResult<QueueStats> {
        let inner = self.inner.lock().unwrap();
        let mut stats = QueueStats::default();
        for t in inner.tasks.values() {
            match t.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::InProgress => stats.in_progress += 1,
                TaskStatus::Complete => stats.complete += 1,
                TaskStatus::Failed => stats.failed += 1,
            }
        }
        stats.unconsumed_messages = inner.messages.iter().filter(|m| !m.consumed).count() as u64;
        let mut agents: Vec<AgentStats> = inner
            .agents
            .values()
            .map(|a| AgentStats {
                agent_id: a.id.clone(),
                status: a.status,
                total_completed: a.total_completed,
                total_failed: a.total_failed,
            })
            .collect();
        agents.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        stats.agents = agents;
        Ok(stats)
    }

    fn cleanup(&self, retention_days: u32) -> StoreResult<CleanupReport> {
        let mut inner = self.inner.lock().unwrap();
        let cutoff = now_ms() - i64::from(retention_days) * MS_PER_DAY;
        let doomed: Vec<String> = inner
            .tasks
            .values()
            .filter(|t| t.status.is_terminal() && t.completed_ms.is_some_and(|c| c < cutoff))
            .map(|t| t.id.0.clone())
            .collect();
        for id in &doomed {
            inner.tasks.remove(id);
        }
        inner.history.retain(|h| !doomed.contains(&h.task_id.0));
        let before = inner.messages.len();
        inner
            .messages
            .retain(|m| !(m.consumed && m.created_ms < cutoff));
        Ok(CleanupReport {
            tasks_removed: doomed.len() as u64,
            messages_removed: (before - inner.messages.len()) as u64,
        })
    }

    fn set_config(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.config.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get_config(&self, key: &str) -> StoreResult<Option<String>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.config.get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use swq_core::StoreError;

    use super::*;

    fn submit(store: &MemoryStore, priority: i32) -> Task {
        store
            .create_task("test", json!({"n": priority}), None, priority)
            .unwrap()
    }

    #[test]
    fn create_rejects_non_object_payloads() {
        let store = MemoryStore::new();
        let err = store.create_task("t", json!("scalar"), None, 5).unwrap_err();
        assert!(matches!(err, StoreError::InvalidPayload(_)));
    }

    #[test]
    fn claim_follows_priority_then_fifo() {
        let store = MemoryStore::new();
        submit(&store, 3);
        submit(&store, 9);
        submit(&store, 5);
        let order: Vec<i32> = (0..3)
            .map(|_| store.claim_next("a1").unwrap().unwrap().priority)
            .collect();
        assert_eq!(order, vec![9, 5, 3]);
        assert!(store.claim_next("a1").unwrap().is_none());
    }

    #[test]
    fn fifo_within_equal_priority() {
        let store = MemoryStore::new();
        let t1 = submit(&store, 5);
        let t2 = submit(&store, 5);
        assert_eq!(store.claim_next("a1").unwrap().unwrap().id, t1.id);
        assert_eq!(store.claim_next("a1").unwrap().unwrap().id, t2.id);
    }

    #[test]
    fn assignment_hint_gates_eligibility() {
        let store = MemoryStore::new();
        store
            .create_task("t", json!({}), Some("a2"), 5)
            .unwrap();
        assert!(store.claim_next("a1").unwrap().is_none());
        assert!(store.claim_next("a2").unwrap().is_some());
    }

    #[test]
    fn complete_sets_result_and_agent_counters() {
        let store = MemoryStore::new();
        store
            .upsert_agent("a1", "worker", json!({}), json!({}))
            .unwrap();
        let t = submit(&store, 5);
        let claimed = store.claim_next("a1").unwrap().unwrap();
        assert_eq!(claimed.id, t.id);
        assert_eq!(store.get_agent("a1").unwrap().status, AgentStatus::Busy);

        store.complete_task(&t.id, json!({"out": 1})).unwrap();
        let done = store.get_task(&t.id).unwrap();
        assert_eq!(done.status, TaskStatus::Complete);
        assert_eq!(done.result, Some(json!({"out": 1})));
        assert!(done.completed_ms.is_some());

        let agent = store.get_agent("a1").unwrap();
        assert_eq!(agent.status, AgentStatus::Idle);
        assert_eq!(agent.current_task, None);
        assert_eq!(agent.total_completed, 1);
    }

    #[test]
    fn retry_re_enters_queue_with_original_ordering() {
        let store = MemoryStore::new();
        let t = submit(&store, 9);
        submit(&store, 5);
        store.claim_next("a1").unwrap().unwrap();
        let out = store.fail_task(&t.id, "boom").unwrap();
        assert!(out.retrying);
        assert_eq!(out.retries, 1);

        let back = store.get_task(&t.id).unwrap();
        assert_eq!(back.status, TaskStatus::Pending);
        assert_eq!(back.assigned_to, None);
        assert_eq!(back.error, None);
        assert_eq!(back.created_ms, t.created_ms);

        // A different agent can claim the retry, and it still outranks the
        // newer priority-5 task.
        let reclaimed = store.claim_next("a2").unwrap().unwrap();
        assert_eq!(reclaimed.id, t.id);
    }

    #[test]
    fn retry_exhaustion_is_terminal() {
        let store = MemoryStore::new();
        let t = submit(&store, 5);
        for attempt in 1..=3u32 {
            store.claim_next("a1").unwrap().unwrap();
            let out = store.fail_task(&t.id, "boom").unwrap();
            assert_eq!(out.retries, attempt);
            assert_eq!(out.retrying, attempt < 3);
        }
        let dead = store.get_task(&t.id).unwrap();
        assert_eq!(dead.status, TaskStatus::Failed);
        assert_eq!(dead.retries, 3);
        assert_eq!(dead.error.as_deref(), Some("boom"));
        assert!(dead.completed_ms.is_some());

        let err = store.fail_task(&t.id, "again").unwrap_err();
        assert!(matches!(err, StoreError::InvalidState { .. }));
    }

    #[test]
    fn terminal_calls_on_wrong_state_mutate_nothing() {
        let store = MemoryStore::new();
        store
            .upsert_agent("a1", "worker", json!({}), json!({}))
            .unwrap();
        let t = submit(&store, 5);

        assert!(matches!(
            store.complete_task(&t.id, json!({})).unwrap_err(),
            StoreError::InvalidState { .. }
        ));
        assert!(matches!(
            store.fail_task(&t.id, "nope").unwrap_err(),
            StoreError::InvalidState { .. }
        ));

        let untouched = store.get_task(&t.id).unwrap();
        assert_eq!(untouched.status, TaskStatus::Pending);
        assert_eq!(untouched.retries, 0);
        let agent = store.get_agent("a1").unwrap();
        assert_eq!(agent.total_completed, 0);
        assert_eq!(agent.total_failed, 0);
    }

    #[test]
    fn unknown_task_is_not_found() {
        let store = MemoryStore::new();
        let ghost = TaskId::from_str("missing");
        assert!(matches!(
            store.get_task(&ghost).unwrap_err(),
            StoreError::NotFound { .. }
        ));
        assert!(matches!(
            store.complete_task(&ghost, json!({})).unwrap_err(),
            StoreError::NotFound { .. }
        ));
    }

    #[test]
    fn broadcast_is_consumed_by_first_reader() {
        let store = MemoryStore::new();
        let payload = json!({"note": "all hands"});
        store
            .send_message("a1", None, "general", payload.clone())
            .unwrap();

        let got = store.receive_messages("a2", None).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].payload, payload);

        // Destructive read: gone for every other recipient.
        assert!(store.receive_messages("a3", None).unwrap().is_empty());
        assert!(store.receive_messages("a2", None).unwrap().is_empty());
    }

    #[test]
    fn receive_filters_by_recipient_and_topic() {
        let store = MemoryStore::new();
        store.send_message("a1", Some("a2"), "x", json!({"m": 1})).unwrap();
        store.send_message("a1", Some("a3"), "x", json!({"m": 2})).unwrap();
        store.send_message("a1", Some("a2"), "y", json!({"m": 3})).unwrap();

        let x_only = store.receive_messages("a2", Some("x")).unwrap();
        assert_eq!(x_only.len(), 1);
        assert_eq!(x_only[0].payload, json!({"m": 1}));

        // The topic-filtered read left the other message consumable.
        let rest = store.receive_messages("a2", None).unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].topic, "y");
    }

    #[test]
    fn per_recipient_fifo() {
        let store = MemoryStore::new();
        for i in 0..4 {
            store
                .send_message("a1", Some("a2"), "seq", json!({"i": i}))
                .unwrap();
        }
        let got = store.receive_messages("a2", None).unwrap();
        let order: Vec<i64> = got.iter().map(|m| m.payload["i"].as_i64().unwrap()).collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
    }

    #[test]
    fn unread_count_sees_direct_and_broadcast() {
        let store = MemoryStore::new();
        store.send_message("a1", Some("a2"), "x", json!({})).unwrap();
        store.send_message("a1", None, "x", json!({})).unwrap();
        store.send_message("a1", Some("a3"), "x", json!({})).unwrap();
        assert_eq!(store.unread_count("a2").unwrap(), 2);
    }

    #[test]
    fn reregistration_preserves_counters() {
        let store = MemoryStore::new();
        store
            .upsert_agent("a1", "worker", json!({}), json!({}))
            .unwrap();
        let t = submit(&store, 5);
        store.claim_next("a1").unwrap().unwrap();
        store.complete_task(&t.id, json!({})).unwrap();

        store
            .upsert_agent("a1", "worker-v2", json!({"lang": "rust"}), json!({}))
            .unwrap();
        let a = store.get_agent("a1").unwrap();
        assert_eq!(a.agent_type, "worker-v2");
        assert_eq!(a.status, AgentStatus::Idle);
        assert_eq!(a.total_completed, 1);
    }

    #[test]
    fn heartbeat_unknown_agent_is_noop() {
        let store = MemoryStore::new();
        store.heartbeat("ghost").unwrap();
        assert!(store.list_agents().unwrap().is_empty());
    }

    #[test]
    fn set_status_enforces_busy_invariant() {
        let store = MemoryStore::new();
        store
            .upsert_agent("a1", "worker", json!({}), json!({}))
            .unwrap();
        let err = store
            .set_agent_status("a1", AgentStatus::Busy, None)
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidState { .. }));

        let tid = TaskId::from_str("t1");
        let err = store
            .set_agent_status("a1", AgentStatus::Idle, Some(&tid))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidState { .. }));

        store
            .set_agent_status("a1", AgentStatus::Busy, Some(&tid))
            .unwrap();
        assert_eq!(store.get_agent("a1").unwrap().status, AgentStatus::Busy);
    }

    #[test]
    fn mark_stale_offline_flips_only_stale_agents() {
        let store = MemoryStore::new();
        store
            .upsert_agent("fresh", "worker", json!({}), json!({}))
            .unwrap();
        store
            .upsert_agent("stale", "worker", json!({}), json!({}))
            .unwrap();
        {
            let mut inner = store.inner.lock().unwrap();
            inner.agents.get_mut("stale").unwrap().last_heartbeat_ms = now_ms() - 120_000;
        }
        assert_eq!(store.mark_stale_offline(30_000).unwrap(), 1);
        assert_eq!(store.get_agent("stale").unwrap().status, AgentStatus::Offline);
        assert_eq!(store.get_agent("fresh").unwrap().status, AgentStatus::Idle);
    }

    #[test]
    fn cleanup_removes_only_old_terminal_rows() {
        let store = MemoryStore::new();
        let old_done = submit(&store, 5);
        store.claim_next("a1").unwrap().unwrap();
        store.complete_task(&old_done.id, json!({})).unwrap();

        // Low priority keeps this one unclaimed below.
        let old_pending = submit(&store, 1);
        let fresh_done = submit(&store, 5);
        store.claim_next("a1").unwrap().unwrap();
        store.complete_task(&fresh_done.id, json!({})).unwrap();

        store.send_message("a1", Some("a2"), "t", json!({})).unwrap();
        store.receive_messages("a2", None).unwrap();

        // Age the first task and the consumed message past the cutoff.
        {
            let mut inner = store.inner.lock().unwrap();
            let eight_days = 8 * MS_PER_DAY;
            inner.tasks.get_mut(&old_done.id.0).unwrap().completed_ms =
                Some(now_ms() - eight_days);
            let t = inner.tasks.get_mut(&old_pending.id.0).unwrap();
            t.created_ms -= eight_days;
            inner.messages[0].created_ms -= eight_days;
        }

        let report = store.cleanup(7).unwrap();
        assert_eq!(report.tasks_removed, 1);
        assert_eq!(report.messages_removed, 1);
        assert!(store.get_task(&old_done.id).is_err());
        // Old but pending survives regardless of age.
        assert!(store.get_task(&old_pending.id).is_ok());
        assert!(store.get_task(&fresh_done.id).is_ok());
        // History for the removed task is gone with it.
        assert!(store.task_history(&old_done.id).unwrap().is_empty());
    }

    #[test]
    fn config_default_max_retries_applies_to_new_tasks() {
        let store = MemoryStore::new();
        store.set_config("default_max_retries", "5").unwrap();
        let t = submit(&store, 5);
        assert_eq!(t.max_retries, 5);
    }

    #[test]
    fn history_records_full_lifecycle() {
        let store = MemoryStore::new();
        let t = store
            .create_task("t", json!({}), Some("a1"), 5)
            .unwrap();
        store.claim_next("a1").unwrap().unwrap();
        store.fail_task(&t.id, "first").unwrap();
        store.claim_next("a1").unwrap().unwrap();
        store.complete_task(&t.id, json!({})).unwrap();

        let actions: Vec<HistoryAction> = store
            .task_history(&t.id)
            .unwrap()
            .iter()
            .map(|h| h.action)
            .collect();
        assert_eq!(
            actions,
            vec![
                HistoryAction::Assigned,
                HistoryAction::Started,
                HistoryAction::Failed,
                HistoryAction::Retried,
                HistoryAction::Started,
                HistoryAction::Completed,
            ]
        );
    }
}
