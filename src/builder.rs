//! Builder pattern API for creating tasks.

use crate::store::Store;
use crate::types::{MetaValue, Metadata, Task};
use eyre::{Context, Result};

/// Builder for creating tasks with a fluent API.
///
/// # Example
///
/// ```ignore
/// let task = store.build("Implement login flow")
///     .description("OAuth against the staging provider")
///     .meta("feature", "auth")
///     .blocked_by(&schema_task.id)
///     .create()?;
/// ```
pub struct TaskBuilder<'a> {
    store: &'a mut Store,
    title: String,
    description: Option<String>,
    metadata: Metadata,
    blocked_by: Vec<String>,
}

impl<'a> TaskBuilder<'a> {
    /// Create a new builder with the given title.
    pub fn new(store: &'a mut Store, title: impl Into<String>) -> Self {
        Self {
            store,
            title: title.into(),
            description: None,
            metadata: Metadata::new(),
            blocked_by: Vec::new(),
        }
    }

    /// Set the description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set one metadata key.
    pub fn meta(mut self, key: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        self.metadata.insert(key, value);
        self
    }

    /// Make an existing task block the new one.
    pub fn blocked_by(mut self, id: impl Into<String>) -> Self {
        self.blocked_by.push(id.into());
        self
    }

    /// Create the task and its blocking edges in one transaction.
    pub fn create(self) -> Result<Task> {
        let metadata = (!self.metadata.is_empty()).then_some(self.metadata);
        self.store
            .create_blocked(&self.title, self.description.as_deref(), metadata, &self.blocked_by)
            .context("Failed to create task")
    }
}

/// Extension trait to add builder method to Store.
pub trait StoreBuilderExt {
    /// Start building a new task with the given title.
    fn build(&mut self, title: impl Into<String>) -> TaskBuilder<'_>;
}

impl StoreBuilderExt for Store {
    fn build(&mut self, title: impl Into<String>) -> TaskBuilder<'_> {
        TaskBuilder::new(self, title)
    }
}
