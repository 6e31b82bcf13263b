// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn agent_id_display_and_str_access() {
    let id = AgentId::new("builder-7");
    assert_eq!(id.as_str(), "builder-7");
    assert_eq!(id.to_string(), "builder-7");
    assert!(id == "builder-7");
}

#[test]
fn ids_of_different_entities_are_distinct_types() {
    let agent = AgentId::new("x");
    let task = TaskId::new("x");
    // Same underlying string, different identities
    assert_eq!(agent.as_str(), task.as_str());
    assert_eq!(agent, AgentId::from("x"));
    assert_ne!(task, TaskId::from("y"));
}

#[test]
fn id_serde_is_a_bare_string() {
    let id = EnvelopeId::new("e-42");
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, "\"e-42\"");

    let back: EnvelopeId = serde_json::from_str(&json).unwrap();
    assert_eq!(back, id);
}

#[test]
fn id_borrows_as_str_for_map_lookups() {
    use std::collections::HashMap;
    let mut by_alert: HashMap<AlertId, u32> = HashMap::new();
    by_alert.insert(AlertId::new("a-1"), 7);
    assert_eq!(by_alert.get("a-1"), Some(&7));
}

#[test]
fn uuid_gen_is_unique() {
    let idgen = UuidIdGen;
    let a = idgen.next();
    let b = idgen.next();
    assert_ne!(a, b);
    assert_eq!(a.len(), 36);
}

#[test]
fn sequential_gen_counts_up() {
    let idgen = SequentialIdGen::new("task");
    assert_eq!(idgen.next(), "task-1");
    assert_eq!(idgen.next(), "task-2");

    // Clones share the counter
    let clone = idgen.clone();
    assert_eq!(clone.next(), "task-3");
    assert_eq!(idgen.next(), "task-4");
}
