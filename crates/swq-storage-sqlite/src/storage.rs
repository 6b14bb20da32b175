use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde_json::{json, Value};
use tracing::debug;

use swq_core::{
    ensure_document, now_ms, Agent, AgentStats, AgentStatus, CleanupReport, FailOutcome,
    HistoryAction, HistoryEntry, Message, MessageId, QueueStats, StoreError, StoreResult, Task,
    TaskId, TaskStatus, DEFAULT_MAX_RETRIES, MS_PER_DAY,
};
use swq_storage::Store;

/// Durable store on a single sqlite file. The connection mutex serializes
/// in-process callers; WAL mode, a busy timeout and immediate transactions
/// keep concurrent worker processes on the same file race-free.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

fn db_err(e: rusqlite::Error) -> StoreError {
    StoreError::unavailable(e)
}

const TASK_COLUMNS: &str = "id, task_type, payload, status, priority, assigned_to, result, error, \
     retries, max_retries, created_ms, started_ms, completed_ms";

fn task_from_row(r: &Row) -> rusqlite::Result<Task> {
    let payload: String = r.get(2)?;
    let status: String = r.get(3)?;
    let result: Option<String> = r.get(6)?;
    Ok(Task {
        id: TaskId::from_str(r.get::<_, String>(0)?),
        task_type: r.get(1)?,
        payload: serde_json::from_str(&payload).unwrap_or_default(),
        status: TaskStatus::parse(&status).unwrap_or(TaskStatus::Pending),
        priority: r.get(4)?,
        assigned_to: r.get(5)?,
        result: result.map(|s| serde_json::from_str(&s).unwrap_or_default()),
        error: r.get(7)?,
        retries: r.get::<_, i64>(8)? as u32,
        max_retries: r.get::<_, i64>(9)? as u32,
        created_ms: r.get(10)?,
        started_ms: r.get(11)?,
        completed_ms: r.get(12)?,
    })
}

fn message_from_row(r: &Row) -> rusqlite::Result<Message> {
    let payload: String = r.get(4)?;
    Ok(Message {
        id: r.get(0)?,
        from: r.get(1)?,
        to: r.get(2)?,
        topic: r.get(3)?,
        payload: serde_json::from_str(&payload).unwrap_or_default(),
        consumed: r.get::<_, i64>(5)? != 0,
        created_ms: r.get(6)?,
    })
}

fn agent_from_row(r: &Row) -> rusqlite::Result<Agent> {
    let capabilities: String = r.get(2)?;
    let status: String = r.get(3)?;
    let current_task: Option<String> = r.get(4)?;
    let metadata: String = r.get(9)?;
    Ok(Agent {
        id: r.get(0)?,
        agent_type: r.get(1)?,
        capabilities: serde_json::from_str(&capabilities).unwrap_or_default(),
        status: AgentStatus::parse(&status).unwrap_or(AgentStatus::Offline),
        current_task: current_task.map(TaskId::from_str),
        last_heartbeat_ms: r.get(5)?,
        started_ms: r.get(6)?,
        total_completed: r.get::<_, i64>(7)? as u64,
        total_failed: r.get::<_, i64>(8)? as u64,
        metadata: serde_json::from_str(&metadata).unwrap_or_default(),
    })
}

impl SqliteStore {
    pub fn open(db_path: &Path) -> StoreResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(db_path).map_err(db_err)?;
        conn.busy_timeout(Duration::from_secs(5)).map_err(db_err)?;
        // journal_mode returns the resulting mode as a row.
        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))
            .map_err(db_err)?;
        conn.execute_batch("PRAGMA foreign_keys=ON;").map_err(db_err)?;
        let init_sql = include_str!("../migrations/0001_init.sql");
        conn.execute_batch(init_sql).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn get_task_tx(tx: &rusqlite::Transaction, task_id: &TaskId) -> StoreResult<Task> {
        tx.query_row(
            &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id=?1"),
            params![task_id.0],
            task_from_row,
        )
        .optional()
        .map_err(db_err)?
        .ok_or_else(|| StoreError::not_found("task", task_id.as_str()))
    }

    fn push_history(
        tx: &rusqlite::Transaction,
        task_id: &TaskId,
        agent_id: &str,
        action: HistoryAction,
        details: &Value,
    ) -> StoreResult<()> {
        tx.execute(
            "INSERT INTO history(task_id, agent_id, action, ts_ms, details) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                task_id.0,
                agent_id,
                action.as_str(),
                now_ms(),
                details.to_string()
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    /// Return the owning agent to idle, bumping the completed or failed
    /// counter. Unregistered agents are skipped silently.
    fn settle_agent(
        tx: &rusqlite::Transaction,
        agent_id: Option<&str>,
        completed: bool,
    ) -> StoreResult<()> {
        let Some(id) = agent_id else { return Ok(()) };
        let counter = if completed { "total_completed" } else { "total_failed" };
        tx.execute(
            &format!(
                "UPDATE agents SET {counter} = {counter} + 1, status='idle', current_task=NULL WHERE id=?1"
            ),
            params![id],
        )
        .map_err(db_err)?;
        Ok(())
    }
}

impl Store for SqliteStore {
    fn create_task(
        &self,
        task_type: &str,
        payload: Value,
        assigned_to: Option<&str>,
        priority: i32,
    ) -> StoreResult<Task> {
        ensure_document(&payload)?;
        let mut conn = self.conn.lock().unwrap();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db_err)?;

        let max_retries: u32 = tx
            .query_row(
                "SELECT value FROM config WHERE key='default_max_retries'",
                [],
                |r| r.get::<_, String>(0),
            )
            .optional()
            .map_err(db_err)?
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_RETRIES);

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
            max_retries,
            created_ms: now_ms(),
            started_ms: None,
            completed_ms: None,
        };
        tx.execute(
            "INSERT INTO tasks(id, task_type, payload, status, priority, assigned_to, retries, max_retries, created_ms)
             VALUES (?1, ?2, ?3, 'pending', ?4, ?5, 0, ?6, ?7)",
            params![
                task.id.0,
                task.task_type,
                task.payload.to_string(),
                task.priority,
                task.assigned_to,
                task.max_retries as i64,
                task.created_ms
            ],
        )
        .map_err(db_err)?;
        if let Some(agent) = assigned_to {
            Self::push_history(&tx, &task.id, agent, HistoryAction::Assigned, &json!({}))?;
        }
        tx.commit().map_err(db_err)?;
        debug!(task_id = %task.id, task_type, priority, "task created");
        Ok(task)
    }

    fn claim_next(&self, agent_id: &str) -> StoreResult<Option<Task>> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db_err)?;

        let candidate: Option<String> = tx
            .query_row(
                "SELECT id FROM tasks
                 WHERE status='pending' AND (assigned_to IS NULL OR assigned_to=?1)
                 ORDER BY priority DESC, created_ms ASC, id ASC
                 LIMIT 1",
                params![agent_id],
                |r| r.get(0),
            )
            .optional()
            .map_err(db_err)?;
        let Some(id) = candidate else {
            return Ok(None);
        };
        let task_id = TaskId::from_str(id);

        // The status re-check makes this a compare-and-swap; a lost race is
        // the normal empty outcome, not an error.
        let flipped = tx
            .execute(
                "UPDATE tasks SET status='in_progress', assigned_to=?1, started_ms=COALESCE(started_ms, ?2)
                 WHERE id=?3 AND status='pending'",
                params![agent_id, now_ms(), task_id.0],
            )
            .map_err(db_err)?;
        if flipped == 0 {
            return Ok(None);
        }

        Self::push_history(&tx, &task_id, agent_id, HistoryAction::Started, &json!({}))?;
        tx.execute(
            "UPDATE agents SET status='busy', current_task=?1 WHERE id=?2",
            params![task_id.0, agent_id],
        )
        .map_err(db_err)?;
        let task = Self::get_task_tx(&tx, &task_id)?;
        tx.commit().map_err(db_err)?;
        debug!(task_id = %task.id, agent_id, "task claimed");
        Ok(Some(task))
    }

    fn complete_task(&self, task_id: &TaskId, result: Value) -> StoreResult<()> {
        ensure_document(&result)?;
        let mut conn = self.conn.lock().unwrap();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db_err)?;

        let task = Self::get_task_tx(&tx, task_id)?;
        if task.status != TaskStatus::InProgress {
            return Err(StoreError::InvalidState {
                id: task_id.0.clone(),
                expected: "in_progress",
                found: task.status.as_str().to_string(),
            });
        }
        tx.execute(
            "UPDATE tasks SET status='complete', result=?1, completed_ms=?2 WHERE id=?3",
            params![result.to_string(), now_ms(), task_id.0],
        )
        .map_err(db_err)?;
        let agent = task.assigned_to.as_deref();
        Self::push_history(&tx, task_id, agent.unwrap_or(""), HistoryAction::Completed, &json!({}))?;
        Self::settle_agent(&tx, agent, true)?;
        tx.commit().map_err(db_err)?;
        debug!(task_id = %task_id, "task complete");
        Ok(())
    }

    fn fail_task(&self, task_id: &TaskId, error: &str) -> StoreResult<FailOutcome> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db_err)?;

        let task = Self::get_task_tx(&tx, task_id)?;
        if task.status != TaskStatus::InProgress {
            return Err(StoreError::InvalidState {
                id: task_id.0.clone(),
                expected: "in_progress",
                found: task.status.as_str().to_string(),
            });
        }
        let retries = task.retries + 1;
        let retrying = retries < task.max_retries;
        if retrying {
            tx.execute(
                "UPDATE tasks SET status='pending', assigned_to=NULL, retries=?1 WHERE id=?2",
                params![retries as i64, task_id.0],
            )
            .map_err(db_err)?;
        } else {
            tx.execute(
                "UPDATE tasks SET status='failed', retries=?1, error=?2, completed_ms=?3 WHERE id=?4",
                params![retries as i64, error, now_ms(), task_id.0],
            )
            .map_err(db_err)?;
        }
        let agent = task.assigned_to.as_deref();
        Self::push_history(
            &tx,
            task_id,
            agent.unwrap_or(""),
            HistoryAction::Failed,
            &json!({ "error": error }),
        )?;
        if retrying {
            Self::push_history(
                &tx,
                task_id,
                agent.unwrap_or(""),
                HistoryAction::Retried,
                &json!({ "retries": retries }),
            )?;
        }
        Self::settle_agent(&tx, agent, false)?;
        tx.commit().map_err(db_err)?;
        debug!(task_id = %task_id, retries, retrying, "task attempt failed");
        Ok(FailOutcome { retrying, retries })
    }

    fn get_task(&self, task_id: &TaskId) -> StoreResult<Task> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id=?1"),
            params![task_id.0],
            task_from_row,
        )
        .optional()
        .map_err(db_err)?
        .ok_or_else(|| StoreError::not_found("task", task_id.as_str()))
    }

    fn list_tasks(&self, status: Option<TaskStatus>) -> StoreResult<Vec<Task>> {
        let conn = self.conn.lock().unwrap();
        // Pending lists in claim order; everything else newest-first.
        let sql = match status {
            None => format!("SELECT {TASK_COLUMNS} FROM tasks ORDER BY created_ms DESC, id DESC"),
            Some(TaskStatus::Pending) => format!(
                "SELECT {TASK_COLUMNS} FROM tasks WHERE status=?1
                 ORDER BY priority DESC, created_ms ASC, id ASC"
            ),
            Some(_) => format!(
                "SELECT {TASK_COLUMNS} FROM tasks WHERE status=?1 ORDER BY created_ms DESC, id DESC"
            ),
        };
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = match status {
            None => stmt.query_map([], task_from_row),
            Some(s) => stmt.query_map(params![s.as_str()], task_from_row),
        }
        .map_err(db_err)?;
        let mut tasks = vec![];
        for row in rows {
            tasks.push(row.map_err(db_err)?);
        }
        Ok(tasks)
    }

    fn task_history(&self, task_id: &TaskId) -> StoreResult<Vec<HistoryEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT id, task_id, agent_id, action, ts_ms, details FROM history
                 WHERE task_id=?1 ORDER BY id ASC",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![task_id.0], |r| {
                let action: String = r.get(3)?;
                let details: String = r.get(5)?;
                Ok(HistoryEntry {
                    id: r.get(0)?,
                    task_id: TaskId::from_str(r.get::<_, String>(1)?),
                    agent_id: r.get(2)?,
                    action: HistoryAction::parse(&action).unwrap_or(HistoryAction::Started),
                    ts_ms: r.get(4)?,
                    details: serde_json::from_str(&details).unwrap_or_default(),
                })
            })
            .map_err(db_err)?;
        let mut entries = vec![];
        for row in rows {
            entries.push(row.map_err(db_err)?);
        }
        Ok(entries)
    }

    fn send_message(
        &self,
        from: &str,
        to: Option<&str>,
        topic: &str,
        payload: Value,
    ) -> StoreResult<MessageId> {
        ensure_document(&payload)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO messages(sender, recipient, topic, payload, consumed, created_ms)
             VALUES (?1, ?2, ?3, ?4, 0, ?5)",
            params![from, to, topic, payload.to_string(), now_ms()],
        )
        .map_err(db_err)?;
        Ok(conn.last_insert_rowid())
    }

    fn receive_messages(&self, agent_id: &str, topic: Option<&str>) -> StoreResult<Vec<Message>> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db_err)?;

        let mut messages = vec![];
        {
            let (sql, has_topic) = match topic {
                Some(_) => (
                    "SELECT id, sender, recipient, topic, payload, consumed, created_ms
                     FROM messages
                     WHERE consumed=0 AND (recipient=?1 OR recipient IS NULL) AND topic=?2
                     ORDER BY created_ms ASC, id ASC",
                    true,
                ),
                None => (
                    "SELECT id, sender, recipient, topic, payload, consumed, created_ms
                     FROM messages
                     WHERE consumed=0 AND (recipient=?1 OR recipient IS NULL)
                     ORDER BY created_ms ASC, id ASC",
                    false,
                ),
            };
            let mut stmt = tx.prepare(sql).map_err(db_err)?;
            let rows = if has_topic {
                stmt.query_map(params![agent_id, topic.unwrap()], message_from_row)
            } else {
                stmt.query_map(params![agent_id], message_from_row)
            }
            .map_err(db_err)?;
            for row in rows {
                let mut m = row.map_err(db_err)?;
                m.consumed = true;
                messages.push(m);
            }
        }
        for m in &messages {
            tx.execute("UPDATE messages SET consumed=1 WHERE id=?1", params![m.id])
                .map_err(db_err)?;
        }
        tx.commit().map_err(db_err)?;
        Ok(messages)
    }

    fn unread_count(&self, agent_id: &str) -> StoreResult<u64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(1) FROM unread_messages WHERE recipient=?1 OR recipient IS NULL",
                params![agent_id],
                |r| r.get(0),
            )
            .map_err(db_err)?;
        Ok(count as u64)
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
        let conn = self.conn.lock().unwrap();
        let now = now_ms();
        conn.execute(
            "INSERT INTO agents(id, agent_type, capabilities, status, current_task, last_heartbeat_ms, started_ms, metadata)
             VALUES (?1, ?2, ?3, 'idle', NULL, ?4, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
               agent_type=excluded.agent_type,
               capabilities=excluded.capabilities,
               status='idle',
               current_task=NULL,
               last_heartbeat_ms=excluded.last_heartbeat_ms,
               started_ms=excluded.started_ms,
               metadata=excluded.metadata",
            params![agent_id, agent_type, capabilities.to_string(), now, metadata.to_string()],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn heartbeat(&self, agent_id: &str) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        // Zero rows affected is fine: registration at startup is the
        // caller's responsibility.
        conn.execute(
            "UPDATE agents SET last_heartbeat_ms=?1 WHERE id=?2",
            params![now_ms(), agent_id],
        )
        .map_err(db_err)?;
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
        let conn = self.conn.lock().unwrap();
        let changed = conn
            .execute(
                "UPDATE agents SET status=?1, current_task=?2 WHERE id=?3",
                params![status.as_str(), current_task.map(|t| t.0.clone()), agent_id],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(StoreError::not_found("agent", agent_id));
        }
        Ok(())
    }

    fn get_agent(&self, agent_id: &str) -> StoreResult<Agent> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, agent_type, capabilities, status, current_task, last_heartbeat_ms, started_ms, total_completed, total_failed, metadata
             FROM agents WHERE id=?1",
            params![agent_id],
            agent_from_row,
        )
        .optional()
        .map_err(db_err)?
        .ok_or_else(|| StoreError::not_found("agent", agent_id))
    }

    fn list_agents(&self) -> StoreResult<Vec<Agent>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT id, agent_type, capabilities, status, current_task, last_heartbeat_ms, started_ms, total_completed, total_failed, metadata
                 FROM agents ORDER BY id ASC",
            )
            .map_err(db_err)?;
        let rows = stmt.query_map([], agent_from_row).map_err(db_err)?;
        let mut agents = vec![];
        for row in rows {
            agents.push(row.map_err(db_err)?);
        }
        Ok(agents)
    }

    fn mark_stale_offline(&self, timeout_ms: i64) -> StoreResult<u64> {
        let conn = self.conn.lock().unwrap();
        let flipped = conn
            .execute(
                "UPDATE agents SET status='offline', current_task=NULL
                 WHERE status != 'offline' AND last_heartbeat_ms < ?1",
                params![now_ms() - timeout_ms],
            )
            .map_err(db_err)?;
        Ok(flipped as u64)
    }

    fn stats(&self) -> StoreResult<QueueStats> {
        let conn = self.conn.lock().unwrap();
        let mut stats = QueueStats::default();
        {
            let mut stmt = conn
                .prepare("SELECT status, COUNT(1) FROM tasks GROUP BY status")
                .map_err(db_err)?;
            let rows = stmt
                .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))
                .map_err(db_err)?;
            for row in rows {
                let (status, count) = row.map_err(db_err)?;
                let count = count as u64;
                match TaskStatus::parse(&status) {
                    Some(TaskStatus::Pending) => stats.pending = count,
                    Some(TaskStatus::InProgress) => stats.in_progress = count,
                    Some(TaskStatus::Complete) => stats.complete = count,
                    Some(TaskStatus::Failed) => stats.failed = count,
                    None => {}
                }
            }
        }
        stats.unconsumed_messages = conn
            .query_row("SELECT COUNT(1) FROM unread_messages", [], |r| {
                r.get::<_, i64>(0)
            })
            .map_err(db_err)? as u64;
        {
            let mut stmt = conn
                .prepare(
                    "SELECT id, status, total_completed, total_failed FROM agent_stats ORDER BY id ASC",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map([], |r| {
                    let status: String = r.get(1)?;
                    Ok(AgentStats {
                        agent_id: r.get(0)?,
                        status: AgentStatus::parse(&status).unwrap_or(AgentStatus::Offline),
                        total_completed: r.get::<_, i64>(2)? as u64,
                        total_failed: r.get::<_, i64>(3)? as u64,
                    })
                })
                .map_err(db_err)?;
            for row in rows {
                stats.agents.push(row.map_err(db_err)?);
            }
        }
        Ok(stats)
    }

    fn cleanup(&self, retention_days: u32) -> StoreResult<CleanupReport> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db_err)?;
        let cutoff = now_ms() - i64::from(retention_days) * MS_PER_DAY;
        // History rows cascade with their task.
        let tasks_removed = tx
            .execute(
                "DELETE FROM tasks
                 WHERE status IN ('complete', 'failed') AND completed_ms IS NOT NULL AND completed_ms < ?1",
                params![cutoff],
            )
            .map_err(db_err)?;
        let messages_removed = tx
            .execute(
                "DELETE FROM messages WHERE consumed=1 AND created_ms < ?1",
                params![cutoff],
            )
            .map_err(db_err)?;
        tx.commit().map_err(db_err)?;
        debug!(tasks_removed, messages_removed, retention_days, "cleanup done");
        Ok(CleanupReport {
            tasks_removed: tasks_removed as u64,
            messages_removed: messages_removed as u64,
        })
    }

    fn set_config(&self, key: &str, value: &str) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO config(key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value=excluded.value",
            params![key, value],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn get_config(&self, key: &str) -> StoreResult<Option<String>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT value FROM config WHERE key=?1",
            params![key],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)
    }
}
