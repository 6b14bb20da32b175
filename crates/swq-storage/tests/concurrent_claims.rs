use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use serde_json::json;
use swq_storage::{MemoryStore, Store};

/// N concurrent claimers against M < N eligible tasks: every task is claimed
/// by exactly one caller and the surplus callers get none.
#[test]
fn concurrent_claims_never_double_assign() {
    let store = Arc::new(MemoryStore::new());
    let eligible = 6;
    let claimers = 10;

    for i in 0..eligible {
        store.create_task("t", json!({ "i": i }), None, 5).unwrap();
    }

    let handles: Vec<_> = (0..claimers)
        .map(|i| {
            let store = Arc::clone(&store);
            thread::spawn(move || store.claim_next(&format!("agent-{i}")).unwrap())
        })
        .collect();

    let claimed: Vec<_> = handles
        .into_iter()
        .filter_map(|h| h.join().unwrap())
        .collect();

    assert_eq!(claimed.len(), eligible);
    let distinct: HashSet<&str> = claimed.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(distinct.len(), eligible);
}

/// M >= N: every claimer walks away with a distinct task.
#[test]
fn enough_tasks_means_every_claimer_wins() {
    let store = Arc::new(MemoryStore::new());
    for i in 0..8 {
        store.create_task("t", json!({ "i": i }), None, 5).unwrap();
    }

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = Arc::clone(&store);
            thread::spawn(move || store.claim_next(&format!("agent-{i}")).unwrap())
        })
        .collect();

    let claimed: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .collect();

    assert!(claimed.iter().all(|c| c.is_some()));
    let distinct: HashSet<String> = claimed
        .into_iter()
        .map(|t| t.unwrap().id.0)
        .collect();
    assert_eq!(distinct.len(), 8);
}
