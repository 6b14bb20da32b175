use std::cmp::Ordering;

use serde_json::Value;

use crate::{StoreError, StoreResult, Task, TaskStatus};

/// A task is claimable by `agent_id` while pending and either unassigned or
/// pre-assigned to that agent (the assignment is advisory, see `Task`).
pub fn eligible_for(task: &Task, agent_id: &str) -> bool {
    task.status == TaskStatus::Pending
        && task
            .assigned_to
            .as_deref()
            .map_or(true, |a| a == agent_id)
}

/// Total claim order: priority descending, then creation time ascending,
/// then id. Retried tasks keep their original priority and creation time,
/// so a failing urgent task is retried ahead of newer low-priority work.
pub fn claim_order(a: &Task, b: &Task) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then(a.created_ms.cmp(&b.created_ms))
        .then(a.id.cmp(&b.id))
}

/// Newest-first listing order for unfiltered task views.
pub fn listing_order(a: &Task, b: &Task) -> Ordering {
    b.created_ms.cmp(&a.created_ms).then(b.id.cmp(&a.id))
}

/// Opaque documents must be well-formed structured documents: JSON objects.
/// Member shape is never inspected at this boundary.
pub fn ensure_document(value: &Value) -> StoreResult<()> {
    if value.is_object() {
        Ok(())
    } else {
        Err(StoreError::InvalidPayload(format!(
            "expected a JSON object, got {}",
            json_kind(value)
        )))
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::TaskId;

    fn task(priority: i32, created_ms: i64) -> Task {
        Task {
            id: TaskId::new(),
            task_type: "test".into(),
            payload: json!({}),
            status: TaskStatus::Pending,
            priority,
            assigned_to: None,
            result: None,
            error: None,
            retries: 0,
            max_retries: 3,
            created_ms,
            started_ms: None,
            completed_ms: None,
        }
    }

    #[test]
    fn higher_priority_claims_first() {
        let mut tasks = vec![task(3, 0), task(9, 1), task(5, 2)];
        tasks.sort_by(claim_order);
        let prios: Vec<i32> = tasks.iter().map(|t| t.priority).collect();
        assert_eq!(prios, vec![9, 5, 3]);
    }

    #[test]
    fn fifo_within_priority_band() {
        let t1 = task(5, 100);
        let t2 = task(5, 200);
        assert_eq!(claim_order(&t1, &t2), Ordering::Less);
    }

    #[test]
    fn id_breaks_exact_ties() {
        let t1 = task(5, 100);
        let t2 = task(5, 100);
        // t1's id was generated first.
        assert_eq!(claim_order(&t1, &t2), Ordering::Less);
    }

    #[test]
    fn eligibility_respects_advisory_assignment() {
        let mut t = task(5, 0);
        assert!(eligible_for(&t, "a1"));
        t.assigned_to = Some("a2".into());
        assert!(!eligible_for(&t, "a1"));
        assert!(eligible_for(&t, "a2"));
        t.status = TaskStatus::InProgress;
        assert!(!eligible_for(&t, "a2"));
    }

    #[test]
    fn documents_must_be_objects() {
        assert!(ensure_document(&json!({"k": 1})).is_ok());
        for bad in [json!(null), json!(42), json!("s"), json!([1, 2])] {
            assert!(matches!(
                ensure_document(&bad),
                Err(StoreError::InvalidPayload(_))
            ));
        }
    }
}
