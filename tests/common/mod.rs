//! Shared test infrastructure for taskmem integration tests.
//!
//! Provides TestEnv helper for consistent test setup/teardown.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use taskmem::{Filter, Metadata, Status, Store, StoreError, Task, TaskUpdate};
use tempfile::TempDir;

/// Test environment with automatic cleanup.
pub struct TestEnv {
    pub temp_dir: TempDir,
    pub store: Store,
}

impl TestEnv {
    /// Create a new test environment with an initialized store.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = Store::init(temp_dir.path()).expect("Failed to init store");
        Self { temp_dir, store }
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn mirror_path(&self) -> PathBuf {
        self.store.mirror_path()
    }

    /// Create a task with no description or metadata.
    pub fn create_task(&mut self, title: &str) -> Task {
        self.store.create(title, None, None).expect("Failed to create task")
    }

    /// Create a task with description.
    pub fn create_task_with_desc(&mut self, title: &str, description: &str) -> Task {
        self.store
            .create(title, Some(description), None)
            .expect("Failed to create task")
    }

    /// Create a task labelled with a feature.
    pub fn create_task_with_feature(&mut self, title: &str, feature: &str) -> Task {
        let mut metadata = Metadata::new();
        metadata.insert("feature", feature);
        self.store
            .create(title, None, Some(metadata))
            .expect("Failed to create task")
    }

    /// `blocker` blocks `blocked`.
    pub fn add_blocking_dep(&mut self, blocker: &Task, blocked: &Task) {
        self.store
            .add_edge(&blocker.id, &blocked.id)
            .expect("Failed to add edge")
    }

    pub fn remove_blocking_dep(&mut self, blocker: &Task, blocked: &Task) {
        self.store
            .remove_edge(&blocker.id, &blocked.id)
            .expect("Failed to remove edge")
    }

    /// Mark a task done.
    pub fn complete_task(&mut self, task: &Task) -> Task {
        self.store.complete(&task.id).expect("Failed to complete task")
    }

    pub fn update(&mut self, task: &Task, changes: TaskUpdate) -> Task {
        self.store.update(&task.id, &changes).expect("Failed to update task")
    }

    /// Fetch the current state of a task.
    pub fn get(&self, task: &Task) -> Task {
        self.store.get(&task.id).expect("Failed to get task")
    }

    /// Assert that a task is in the ready list.
    pub fn assert_ready(&self, task: &Task) {
        let ready = self.store.ready().expect("Failed to get ready tasks");
        assert!(
            ready.tasks.iter().any(|t| t.id == task.id),
            "Expected task {} to be ready, but it wasn't. Ready tasks: {:?}",
            task.id,
            ready.tasks.iter().map(|t| &t.id).collect::<Vec<_>>()
        );
    }

    /// Assert that a task is NOT in the ready list.
    pub fn assert_not_ready(&self, task: &Task) {
        let ready = self.store.ready().expect("Failed to get ready tasks");
        assert!(
            !ready.tasks.iter().any(|t| t.id == task.id),
            "Expected task {} to NOT be ready, but it was",
            task.id
        );
    }

    /// Assert that a task is in the blocked list.
    pub fn assert_blocked(&self, task: &Task) {
        let blocked = self.store.blocked().expect("Failed to get blocked tasks");
        assert!(
            blocked.iter().any(|t| t.id == task.id),
            "Expected task {} to be blocked, but it wasn't",
            task.id
        );
    }

    /// Get ready tasks count.
    pub fn ready_count(&self) -> usize {
        self.store.ready().expect("Failed to get ready tasks").tasks.len()
    }

    /// Get all tasks count.
    pub fn total_count(&self) -> usize {
        self.store.list(&Filter::new()).expect("Failed to list tasks").len()
    }

    /// Get tasks by status.
    pub fn count_by_status(&self, status: Status) -> usize {
        self.store
            .list(&Filter::new().status(status))
            .expect("Failed to list tasks")
            .len()
    }

    /// Read the mirror file as written on disk.
    pub fn mirror_text(&self) -> String {
        std::fs::read_to_string(self.mirror_path()).expect("Failed to read mirror")
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// Stable kind name of a failed operation.
pub fn error_kind<T: std::fmt::Debug>(result: eyre::Result<T>) -> &'static str {
    match result {
        Ok(value) => panic!("expected an error, got {:?}", value),
        Err(report) => taskmem::error::store_error(&report)
            .map(StoreError::kind)
            .unwrap_or_else(|| panic!("expected a StoreError, got: {:#}", report)),
    }
}
