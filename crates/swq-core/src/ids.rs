use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use ulid::{Generator, Ulid};

static GENERATOR: Mutex<Option<Generator>> = Mutex::new(None);

fn next_ulid() -> Ulid {
    let mut slot = GENERATOR.lock().unwrap();
    let gen = slot.get_or_insert_with(Generator::new);
    // Monotonic within the same millisecond; the random-overflow case is
    // vanishingly rare and a fresh ulid is still unique.
    gen.generate().unwrap_or_else(|_| Ulid::new())
}

/// Task identifier. ULIDs sort lexicographically in creation order, which
/// makes the id itself the final tie-break of the claim order.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new() -> Self {
        Self(next_ulid().to_string())
    }

    pub fn from_str(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Message identifier: the store's monotonic sequence (sqlite rowid, or a
/// counter for the in-memory store).
pub type MessageId = i64;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_ids_are_unique() {
        assert_ne!(TaskId::new(), TaskId::new());
    }

    #[test]
    fn task_ids_sort_in_creation_order() {
        let ids: Vec<TaskId> = (0..64).map(|_| TaskId::new()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }
}
