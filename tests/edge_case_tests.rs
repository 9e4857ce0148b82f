//! Edge case tests for boundaries, unicode and cascades.

mod common;

use common::{TestEnv, error_kind};
use taskmem::{Filter, ID_PREFIX, MetaValue, Metadata, Status, StoreBuilderExt, TaskUpdate};

// =============================================================================
// Empty Store Tests
// =============================================================================

#[test]
fn test_empty_store_ready() {
    let env = TestEnv::new();
    assert_eq!(env.ready_count(), 0);
}

#[test]
fn test_empty_store_blocked() {
    let env = TestEnv::new();
    assert!(env.store.blocked().unwrap().is_empty());
}

#[test]
fn test_empty_store_list() {
    let env = TestEnv::new();
    assert_eq!(env.total_count(), 0);
}

#[test]
fn test_empty_store_list_by_status() {
    let env = TestEnv::new();
    for status in Status::ALL {
        assert_eq!(env.count_by_status(status), 0);
    }
}

#[test]
fn test_empty_store_stats() {
    let env = TestEnv::new();
    let stats = env.store.stats().unwrap();
    assert_eq!(stats.total, 0);
    assert_eq!(stats.edges, 0);
}

// =============================================================================
// Unicode Tests
// =============================================================================

#[test]
fn test_unicode_title_emoji() {
    let mut env = TestEnv::new();
    let task = env.create_task("Fix 🐛 in parser");
    assert_eq!(env.get(&task).title, "Fix 🐛 in parser");
}

#[test]
fn test_unicode_title_counts_characters_not_bytes() {
    let mut env = TestEnv::new();

    // Five CJK characters are fifteen bytes but a valid five-character title
    let task = env.create_task("修复登录页");
    assert_eq!(task.title.chars().count(), 5);

    // 200 multi-byte characters are accepted
    let long = "é".repeat(200);
    let task = env.create_task(&long);
    assert_eq!(env.get(&task).title, long);
}

#[test]
fn test_unicode_title_arabic() {
    let mut env = TestEnv::new();
    let task = env.create_task("إصلاح الخطأ");
    assert_eq!(env.get(&task).title, "إصلاح الخطأ");
}

#[test]
fn test_unicode_description_and_metadata() {
    let mut env = TestEnv::new();
    let mut metadata = Metadata::new();
    metadata.insert("feature", "国际化");
    let task = env
        .store
        .create("Localize strings", Some("Übersetzung für 日本語"), Some(metadata))
        .unwrap();

    let stored = env.get(&task);
    assert_eq!(stored.description.as_deref(), Some("Übersetzung für 日本語"));
    assert_eq!(stored.feature(), Some("国际化"));
    assert_eq!(env.store.list(&Filter::new().feature("国际化")).unwrap().len(), 1);
}

// =============================================================================
// Title Length Tests
// =============================================================================

#[test]
fn test_title_length_min_valid() {
    let mut env = TestEnv::new();
    assert_eq!(env.create_task("abcde").title, "abcde");
}

#[test]
fn test_title_length_just_under_min() {
    let mut env = TestEnv::new();
    assert_eq!(error_kind(env.store.create("abcd", None, None)), "InvalidField");
}

#[test]
fn test_title_length_max_valid() {
    let mut env = TestEnv::new();
    let title = "a".repeat(200);
    assert_eq!(env.create_task(&title).title.len(), 200);
}

#[test]
fn test_title_length_just_over_max() {
    let mut env = TestEnv::new();
    let title = "a".repeat(201);
    assert_eq!(error_kind(env.store.create(&title, None, None)), "InvalidField");
}

// =============================================================================
// Description Tests
// =============================================================================

#[test]
fn test_description_at_limit() {
    let mut env = TestEnv::new();
    let description = "d".repeat(10_000);
    let task = env.create_task_with_desc("Long description", &description);
    assert_eq!(env.get(&task).description.unwrap().len(), 10_000);
}

#[test]
fn test_description_empty_string_is_absent() {
    let mut env = TestEnv::new();
    let task = env.create_task_with_desc("Empty description", "");
    assert!(task.description.is_none());
}

#[test]
fn test_description_with_newlines() {
    let mut env = TestEnv::new();
    let task = env.create_task_with_desc("Multi-line description", "line one\nline two\n\nline four");
    assert_eq!(env.get(&task).description.as_deref(), Some("line one\nline two\n\nline four"));
}

#[test]
fn test_description_removal() {
    let mut env = TestEnv::new();
    let task = env.create_task_with_desc("Has a description", "Initial");
    let updated = env.update(&task, TaskUpdate::new().description(""));
    assert!(updated.description.is_none());
    assert!(env.get(&task).description.is_none());
}

// =============================================================================
// Metadata Tests
// =============================================================================

#[test]
fn test_metadata_at_size_limit_accepted() {
    let mut env = TestEnv::new();
    // {"k":"..."} adds eight bytes of framing
    let mut metadata = Metadata::new();
    metadata.insert("k", "v".repeat(5 * 1024 - 8));
    assert_eq!(metadata.serialized_len(), 5 * 1024);

    let task = env.store.create("Fits exactly", None, Some(metadata)).unwrap();
    assert_eq!(env.get(&task).metadata.serialized_len(), 5 * 1024);
}

#[test]
fn test_metadata_one_byte_over_rejected() {
    let mut env = TestEnv::new();
    let mut metadata = Metadata::new();
    metadata.insert("k", "v".repeat(5 * 1024 - 7));
    assert_eq!(error_kind(env.store.create("One byte over", None, Some(metadata))), "LimitExceeded");
}

#[test]
fn test_metadata_primitives_preserved() {
    let mut env = TestEnv::new();
    let task = env
        .store
        .build("Typed metadata")
        .meta("estimate", 3i64)
        .meta("urgent", true)
        .meta("tags", vec!["a".to_string(), "b".to_string()])
        .create()
        .unwrap();

    let stored = env.get(&task);
    assert_eq!(stored.metadata.get("urgent"), Some(&MetaValue::Bool(true)));
    assert_eq!(stored.metadata.get("estimate"), Some(&MetaValue::from(3i64)));
    assert_eq!(stored.metadata.len(), 3);
}

#[test]
fn test_metadata_replaced_by_update() {
    let mut env = TestEnv::new();
    let task = env.create_task_with_feature("Labelled task", "auth");

    let mut replacement = Metadata::new();
    replacement.insert("feature", "billing");
    env.update(&task, TaskUpdate::new().metadata(replacement));

    assert!(env.store.list(&Filter::new().feature("auth")).unwrap().is_empty());
    assert_eq!(env.store.list(&Filter::new().feature("billing")).unwrap().len(), 1);
}

// =============================================================================
// ID Tests
// =============================================================================

#[test]
fn test_id_format() {
    let mut env = TestEnv::new();
    let task = env.create_task("Check the id");
    assert!(task.id.starts_with(ID_PREFIX));
    assert_eq!(task.id.len(), ID_PREFIX.len() + 10);
    assert!(task.id[ID_PREFIX.len()..].chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn test_unique_ids_for_same_title() {
    let mut env = TestEnv::new();
    let a = env.create_task("Same title twice");
    let b = env.create_task("Same title twice");
    assert_ne!(a.id, b.id);
}

// =============================================================================
// Delete Cascade Tests
// =============================================================================

#[test]
fn test_forced_delete_strips_edges_from_all_peers() {
    let mut env = TestEnv::new();
    let upstream = env.create_task("Upstream task");
    let middle = env.create_task("Middle task");
    let downstream1 = env.create_task("Downstream one");
    let downstream2 = env.create_task("Downstream two");
    env.add_blocking_dep(&upstream, &middle);
    env.add_blocking_dep(&middle, &downstream1);
    env.add_blocking_dep(&middle, &downstream2);

    let result = env.store.delete(&middle.id, true).unwrap();
    assert_eq!(result.dependents_updated, 3);

    assert!(env.get(&upstream).blocks.is_empty());
    for task in [&downstream1, &downstream2] {
        let now = env.get(task);
        assert!(now.blocked_by.is_empty());
        assert_eq!(now.status, Status::Todo);
        assert!(now.updated > task.updated);
    }
    assert_eq!(env.store.stats().unwrap().edges, 0);
    assert!(!env.mirror_text().contains(&middle.id));
}

#[test]
fn test_delete_without_edges_needs_no_force() {
    let mut env = TestEnv::new();
    let task = env.create_task("Standalone task");
    let result = env.store.delete(&task.id, false).unwrap();
    assert_eq!(result.dependents_updated, 0);
    assert_eq!(env.total_count(), 0);
}

// =============================================================================
// List Ordering Tests
// =============================================================================

#[test]
fn test_list_most_recently_updated_first() {
    let mut env = TestEnv::new();
    let older = env.create_task("Touched later");
    env.create_task("Left alone");
    env.create_task("Also left alone");

    let edited = env.update(&older, TaskUpdate::new().description("bump"));

    let tasks = env.store.list(&Filter::new()).unwrap();
    assert_eq!(tasks.len(), 3);
    for pair in tasks.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        assert!(a.updated > b.updated || (a.updated == b.updated && a.id < b.id));
    }
    assert!(tasks.iter().all(|t| t.updated <= edited.updated));
}

#[test]
fn test_list_multiple_statuses() {
    let mut env = TestEnv::new();
    let a = env.create_task("Todo task");
    let b = env.create_task("Doing task");
    let c = env.create_task("Done task");
    env.store.set_status(&b.id, Status::Doing).unwrap();
    env.complete_task(&c);

    let tasks = env
        .store
        .list(&Filter::new().statuses([Status::Todo, Status::Done]))
        .unwrap();
    let mut ids: Vec<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
    ids.sort();
    let mut expected = vec![a.id.as_str(), c.id.as_str()];
    expected.sort();
    assert_eq!(ids, expected);
}
