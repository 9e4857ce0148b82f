//! Integration tests for the mirror file and import reconciliation.

mod common;

use common::TestEnv;
use std::fs;
use taskmem::mirror;
use taskmem::{STORE_DIR, Status, Store, StoreConfig, TaskUpdate};
use tempfile::TempDir;

/// Replace line `n` (0-based) of mirror text with garbage.
fn corrupt_line(text: &str, n: usize) -> String {
    text.lines()
        .enumerate()
        .map(|(i, line)| if i == n { "{\"id\": \"broken\", \"title\": ".to_string() } else { line.to_string() })
        .collect::<Vec<_>>()
        .join("\n")
        + "\n"
}

/// A second checkout whose store starts from `mirror`.
fn clone_from(mirror: &str) -> (TempDir, Store) {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join(STORE_DIR);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("tasks.jsonl"), mirror).unwrap();
    let store = Store::init(temp.path()).unwrap();
    (temp, store)
}

// =============================================================================
// Mirror Regeneration Tests
// =============================================================================

#[test]
fn test_mirror_tracks_every_mutation() {
    let mut env = TestEnv::new();
    assert_eq!(env.mirror_text(), "");

    let a = env.create_task("Task alpha");
    let b = env.create_task("Task bravo");
    env.add_blocking_dep(&a, &b);
    env.update(&a, TaskUpdate::new().status(Status::Doing));

    let text = env.mirror_text();
    assert_eq!(text, env.store.export_text().unwrap());
    assert_eq!(text.lines().count(), 2);

    let mut ids = vec![a.id.clone(), b.id.clone()];
    ids.sort();
    let lines: Vec<&str> = text.lines().collect();
    assert!(lines[0].contains(&format!("\"id\":\"{}\"", ids[0])));
    assert!(lines[1].contains(&format!("\"id\":\"{}\"", ids[1])));
    assert!(text.contains("\"status\":\"doing\""));
    assert!(text.contains("\"status\":\"blocked\""));
}

#[test]
fn test_regeneration_without_changes_is_byte_identical() {
    let mut env = TestEnv::new();
    env.create_task_with_feature("Stable output", "sync");
    env.create_task_with_desc("Second stable task", "details");

    let before = env.mirror_text();
    env.store.export(None).unwrap();
    assert_eq!(env.mirror_text(), before);
}

#[test]
fn test_export_to_destination() {
    let mut env = TestEnv::new();
    env.create_task("Exported task");

    let dest = env.root().join("backup.jsonl");
    let stats = env.store.export(Some(&dest)).unwrap();
    assert_eq!(stats.lines, 1);
    assert_eq!(stats.bytes, fs::read(&dest).unwrap().len());
    assert_eq!(fs::read_to_string(&dest).unwrap(), env.mirror_text());
}

#[test]
fn test_auto_export_disabled_by_config_file() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join(STORE_DIR);
    fs::create_dir_all(&dir).unwrap();
    StoreConfig::new().auto_export(false).save(&dir).unwrap();

    let mut store = Store::init(temp.path()).unwrap();
    assert!(!store.config().auto_export);
    store.create("Not mirrored yet", None, None).unwrap();
    assert_eq!(fs::read_to_string(store.mirror_path()).unwrap(), "");

    store.export(None).unwrap();
    assert_eq!(fs::read_to_string(store.mirror_path()).unwrap().lines().count(), 1);
}

// =============================================================================
// Corrupted Line Tests
// =============================================================================

#[test]
fn test_import_with_corrupted_line_into_fresh_store() {
    let mut env = TestEnv::new();
    for title in ["Task number one", "Task number two", "Task number three"] {
        env.create_task(title);
    }
    let copy = corrupt_line(&env.mirror_text(), 1);

    let mut other = TestEnv::new();
    let summary = other.store.import(&copy, false).unwrap();
    assert_eq!(summary.new, 2);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.diagnostics.len(), 1);
    assert_eq!(summary.diagnostics[0].line, 2);
    assert_eq!(other.total_count(), 2);
}

#[test]
fn test_import_with_corrupted_line_preserves_prior_state() {
    let mut env = TestEnv::new();
    for title in ["Task number one", "Task number two", "Task number three"] {
        env.create_task(title);
    }
    let original = env.mirror_text();
    let copy = corrupt_line(&original, 0);

    let summary = env.store.import(&copy, false).unwrap();
    assert_eq!(summary.unchanged, 2);
    assert_eq!(summary.skipped, 1);
    assert_eq!(env.total_count(), 3);
    assert_eq!(env.mirror_text(), original);
}

// =============================================================================
// Clone and Merge Tests
// =============================================================================

#[test]
fn test_fresh_clone_hydrates_from_mirror() {
    let mut env = TestEnv::new();
    let a = env.create_task("Blocker task");
    let b = env.create_task("Blocked task");
    env.add_blocking_dep(&a, &b);

    let (_temp, clone) = clone_from(&env.mirror_text());
    let b_clone = clone.get(&b.id).unwrap();
    assert_eq!(b_clone.blocked_by, vec![a.id.clone()]);
    assert_eq!(b_clone.status, Status::Blocked);
    assert_eq!(b_clone.updated, env.get(&b).updated);
}

#[test]
fn test_independent_edits_merge() {
    let mut env = TestEnv::new();
    let a = env.create_task("Edited on main");
    let b = env.create_task("Edited on clone");

    let (_temp, mut clone) = clone_from(&env.mirror_text());

    env.update(&a, TaskUpdate::new().title("Edited on main, v2"));
    clone.update(&b.id, &TaskUpdate::new().title("Edited on clone, v2")).unwrap();

    let summary = clone.import(&env.mirror_text(), false).unwrap();
    assert_eq!(summary.updated, 1);
    assert_eq!(summary.unchanged, 1);

    assert_eq!(clone.get(&a.id).unwrap().title, "Edited on main, v2");
    assert_eq!(clone.get(&b.id).unwrap().title, "Edited on clone, v2");
}

#[test]
fn test_newer_remote_edge_removal_applies_to_both_sides() {
    let mut env = TestEnv::new();
    let a = env.create_task("Blocker task");
    let b = env.create_task("Blocked task");
    env.add_blocking_dep(&a, &b);

    let (_temp, mut clone) = clone_from(&env.mirror_text());

    env.remove_blocking_dep(&a, &b);
    clone.import(&env.mirror_text(), false).unwrap();

    assert!(clone.get(&a.id).unwrap().blocks.is_empty());
    let b_clone = clone.get(&b.id).unwrap();
    assert!(b_clone.blocked_by.is_empty());
    assert_eq!(b_clone.status, Status::Todo);
}

#[test]
fn test_local_newer_task_gaining_remote_blocker_is_touched() {
    let mut env = TestEnv::new();
    let local = env.create_task("Edited on clone");

    let (_temp, mut clone) = clone_from(&env.mirror_text());
    let edited = clone.update(&local.id, &TaskUpdate::new().title("Edited on clone, v2")).unwrap();

    // Main adds a blocker; its copy of the task stays older than the clone's
    let blocker = env.create_task("Remote blocker");
    env.add_blocking_dep(&blocker, &local);
    let mut remote = mirror::parse(&env.mirror_text()).tasks;
    for task in remote.iter_mut().filter(|t| t.id == local.id) {
        task.updated = task.created;
    }

    let summary = clone.import(&mirror::export(&remote).unwrap(), false).unwrap();
    assert_eq!(summary.new, 1);
    assert_eq!(summary.unchanged, 1);

    let now = clone.get(&local.id).unwrap();
    assert_eq!(now.title, "Edited on clone, v2");
    assert_eq!(now.blocked_by, vec![blocker.id.clone()]);
    assert_eq!(now.status, Status::Blocked);
    assert!(now.updated > edited.updated);
}

#[test]
fn test_import_is_idempotent() {
    let mut env = TestEnv::new();
    let a = env.create_task("Blocker task");
    let b = env.create_task("Blocked task");
    env.add_blocking_dep(&a, &b);
    let text = env.mirror_text();

    let summary = env.store.import(&text, false).unwrap();
    assert_eq!(summary.applied(), 0);
    assert_eq!(summary.unchanged, 2);
    assert_eq!(env.mirror_text(), text);
}

#[test]
fn test_import_edge_to_unknown_task_dropped_with_diagnostic() {
    let mut env = TestEnv::new();
    let line = r#"{"id":"tm-remote0001","title":"From elsewhere","status":"blocked","created":"2026-01-01T00:00:00Z","updated":"2026-01-01T00:00:00Z","blocked_by":["tm-gone000000"]}"#;

    let summary = env.store.import(line, false).unwrap();
    assert_eq!(summary.new, 1);
    assert_eq!(summary.edges_dropped, 1);
    assert!(summary.diagnostics[0].reason.contains("tm-gone000000"));

    let task = env.store.get("tm-remote0001").unwrap();
    assert!(task.blocked_by.is_empty());
    assert_eq!(task.status, Status::Todo);
}

#[test]
fn test_replace_import_discards_local_tasks() {
    let mut env = TestEnv::new();
    let kept = env.create_task("Exported task");
    let text = env.mirror_text();
    let local_only = env.create_task("Local only task");

    let summary = env.store.import(&text, true).unwrap();
    assert_eq!(summary.new, 1);
    assert_eq!(env.total_count(), 1);
    assert!(env.store.get(&kept.id).is_ok());
    assert!(env.store.get(&local_only.id).is_err());
    assert_eq!(env.mirror_text(), text);
}

#[test]
fn test_import_file_from_disk() {
    let mut env = TestEnv::new();
    env.create_task("Task on disk");
    let path = env.root().join("incoming.jsonl");
    fs::write(&path, env.mirror_text()).unwrap();

    let other = TempDir::new().unwrap();
    let mut store = Store::init(other.path()).unwrap();
    let summary = store.import_file(&path, false).unwrap();
    assert_eq!(summary.new, 1);
}
