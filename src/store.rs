//! High-level store API.
//!
//! Every mutation runs in one SQLite transaction and, when `auto_export` is
//! on, is followed by a full regeneration of the mirror file.

use chrono::Utc;
use eyre::{Context, Result};
use rusqlite::{Connection, Transaction};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::graph::{self, check_edge_count};
use crate::mirror::{self, MirrorStats};
use crate::query::Filter;
use crate::reconcile::{self, ImportSummary, MergeMode};
use crate::storage::{self, DB_FILE, SqlGraph, Storage};
use crate::types::{
    Metadata, Status, Task, new_task, next_updated, validate_description, validate_metadata, validate_title,
};

/// Storage directory name.
pub const STORE_DIR: &str = ".taskmem";

/// Written to the store directory on init; the database is never committed.
const GITIGNORE: &str = "taskmem.db*\n.*.tmp\n";

/// Field-level changes for [`Store::update`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    pub title: Option<String>,
    /// An empty string clears the description
    pub description: Option<String>,
    pub status: Option<Status>,
    pub metadata: Option<Metadata>,
    pub add_blocks: Vec<String>,
    pub remove_blocks: Vec<String>,
    pub add_blocked_by: Vec<String>,
    pub remove_blocked_by: Vec<String>,
}

impl TaskUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// This task blocks `id`.
    pub fn add_blocks(mut self, id: impl Into<String>) -> Self {
        self.add_blocks.push(id.into());
        self
    }

    pub fn remove_blocks(mut self, id: impl Into<String>) -> Self {
        self.remove_blocks.push(id.into());
        self
    }

    /// `id` blocks this task.
    pub fn add_blocked_by(mut self, id: impl Into<String>) -> Self {
        self.add_blocked_by.push(id.into());
        self
    }

    pub fn remove_blocked_by(mut self, id: impl Into<String>) -> Self {
        self.remove_blocked_by.push(id.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    fn has_edge_changes(&self) -> bool {
        !(self.add_blocks.is_empty()
            && self.remove_blocks.is_empty()
            && self.add_blocked_by.is_empty()
            && self.remove_blocked_by.is_empty())
    }
}

/// Result of a delete.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeleteResult {
    pub deleted_id: String,
    /// Tasks that lost an edge to the deleted one
    pub dependents_updated: usize,
}

/// Ready work, oldest first.
#[derive(Debug, Clone, Serialize)]
pub struct ReadyWork {
    pub tasks: Vec<Task>,
    pub suggested_next: Option<String>,
}

/// Aggregate counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreStats {
    pub total: usize,
    pub todo: usize,
    pub doing: usize,
    pub done: usize,
    pub blocked: usize,
    pub ready: usize,
    pub edges: usize,
}

/// The task store for one project.
pub struct Store {
    root: PathBuf,
    config: StoreConfig,
    storage: Storage,
}

impl Store {
    /// Initialize a store in the given project directory.
    ///
    /// Idempotent. On a fresh clone (mirror committed, no database) the
    /// database is hydrated from the mirror.
    pub fn init(root: &Path) -> Result<Self> {
        let dir = root.join(STORE_DIR);
        fs::create_dir_all(&dir).context("Failed to create .taskmem directory")?;
        let config = StoreConfig::load(&dir)?;
        Self::init_with_config(root, config)
    }

    /// Initialize with an explicit configuration.
    pub fn init_with_config(root: &Path, config: StoreConfig) -> Result<Self> {
        let dir = root.join(STORE_DIR);
        fs::create_dir_all(&dir).context("Failed to create .taskmem directory")?;

        let gitignore = dir.join(".gitignore");
        if !gitignore.exists() {
            fs::write(&gitignore, GITIGNORE).context("Failed to write .taskmem/.gitignore")?;
        }

        let storage = Storage::create(&dir.join(DB_FILE), &config)?;
        let mut store = Self {
            root: root.to_path_buf(),
            config,
            storage,
        };

        let mirror_text = mirror::read_mirror(&store.mirror_path())?;
        let empty = store.storage.read("init", |db| Ok(storage::load_all(db)?.is_empty()))?;
        if empty && !mirror_text.trim().is_empty() {
            log::info!("Hydrating new database from {}", store.mirror_path().display());
            let parsed = mirror::parse(&mirror_text);
            reconcile::reconcile(&mut store.storage, parsed, MergeMode::Merge)?;
        }
        store.sync_mirror()?;

        Ok(store)
    }

    /// Open an existing store.
    pub fn open(root: &Path) -> Result<Self> {
        let dir = root.join(STORE_DIR);
        if !dir.exists() {
            return Err(StoreError::NotInitialized(root.to_path_buf()).into());
        }
        let config = StoreConfig::load(&dir)?;
        Self::open_with_config(root, config)
    }

    /// Open with an explicit configuration.
    pub fn open_with_config(root: &Path, config: StoreConfig) -> Result<Self> {
        let dir = root.join(STORE_DIR);
        // A committed mirror without a database is a fresh clone awaiting `init`
        if !dir.join(DB_FILE).exists() {
            return Err(StoreError::NotInitialized(root.to_path_buf()).into());
        }
        let storage = Storage::open(&dir.join(DB_FILE), &config)?;
        Ok(Self {
            root: root.to_path_buf(),
            config,
            storage,
        })
    }

    /// Recreate the database from the mirror file.
    ///
    /// The old database (and its WAL files) are moved aside, never deleted.
    pub fn rebuild(root: &Path) -> Result<(Self, ImportSummary)> {
        let dir = root.join(STORE_DIR);
        if !dir.exists() {
            return Err(StoreError::NotInitialized(root.to_path_buf()).into());
        }
        let config = StoreConfig::load(&dir)?;
        let text = mirror::read_mirror(&dir.join(&config.mirror_file))?;

        let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
        for suffix in ["", "-wal", "-shm"] {
            let path = dir.join(format!("{}{}", DB_FILE, suffix));
            if path.exists() {
                let aside = dir.join(format!("{}{}.corrupt-{}", DB_FILE, suffix, stamp));
                fs::rename(&path, &aside).with_context(|| format!("Failed to move {} aside", path.display()))?;
                log::warn!("Moved {} to {}", path.display(), aside.display());
            }
        }

        let storage = Storage::create(&dir.join(DB_FILE), &config)?;
        let mut store = Self {
            root: root.to_path_buf(),
            config,
            storage,
        };
        let summary = store.import(&text, true)?;
        log::info!("Rebuilt database with {} tasks", summary.applied());
        Ok((store, summary))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Path of the mirror file.
    pub fn mirror_path(&self) -> PathBuf {
        self.root.join(STORE_DIR).join(&self.config.mirror_file)
    }

    /// Run one transaction, then regenerate the mirror.
    fn mutate<T>(&mut self, op: &str, f: impl FnMut(&Transaction) -> Result<T>) -> Result<T> {
        let out = self.storage.write(op, f)?;
        log::debug!("{} committed", op);
        if self.config.auto_export {
            self.sync_mirror()
                .with_context(|| format!("{} committed but the mirror could not be written", op))?;
        }
        Ok(out)
    }

    /// Regenerate the mirror from committed state.
    ///
    /// Runs under the write lock so a concurrent writer's regeneration cannot
    /// interleave with ours and leave an older snapshot on disk.
    fn sync_mirror(&mut self) -> Result<MirrorStats> {
        let path = self.mirror_path();
        self.storage.write("export", |tx| {
            let tasks = storage::load_all(tx)?;
            let text = mirror::export(&tasks)?;
            mirror::write_mirror(&path, &text)
        })
    }

    /// Create a new task.
    pub fn create(&mut self, title: &str, description: Option<&str>, metadata: Option<Metadata>) -> Result<Task> {
        self.create_blocked(title, description, metadata, &[])
    }

    /// Create a task together with the tasks that block it.
    ///
    /// The row and its edges commit in one transaction; a rejected blocker
    /// leaves the store untouched.
    pub fn create_blocked(
        &mut self,
        title: &str,
        description: Option<&str>,
        metadata: Option<Metadata>,
        blocked_by: &[String],
    ) -> Result<Task> {
        let task = new_task(title, description, metadata).map_err(StoreError::from)?;

        let task = self.mutate("create", |tx| {
            storage::insert_task(tx, &task)?;
            if blocked_by.is_empty() {
                return Ok(task.clone());
            }

            for blocker in blocked_by {
                if link(tx, blocker, &task.id)? {
                    touch(tx, blocker)?;
                }
            }

            // Fresh record: status follows the edges, `updated` stays at `created`
            let mut stored = storage::require_task(tx, &task.id)?;
            stored.status = stored.status.derive(!stored.blocked_by.is_empty());
            storage::save_task(tx, &stored)?;
            Ok(stored)
        })?;

        log::info!("Created {} ({} blockers)", task.id, task.blocked_by.len());
        Ok(task)
    }

    /// Get a task by ID.
    pub fn get(&self, id: &str) -> Result<Task> {
        self.storage.read("get", |db| storage::require_task(db, id))
    }

    /// List tasks matching a filter.
    pub fn list(&self, filter: &Filter) -> Result<Vec<Task>> {
        self.storage.read("list", |db| storage::query_tasks(db, filter))
    }

    /// Apply field and edge changes to a task in one transaction.
    pub fn update(&mut self, id: &str, changes: &TaskUpdate) -> Result<Task> {
        if changes.is_empty() {
            return Err(StoreError::invalid("update", "no changes requested").into());
        }

        // Shape checks before touching the store
        let title = changes
            .title
            .as_deref()
            .map(validate_title)
            .transpose()
            .map_err(StoreError::from)?;
        if let Some(desc) = &changes.description {
            validate_description(desc).map_err(StoreError::from)?;
        }
        if let Some(metadata) = &changes.metadata {
            validate_metadata(metadata).map_err(StoreError::from)?;
        }

        let task = self.mutate("update", |tx| {
            let existing = storage::require_task(tx, id)?;

            let mut peers = Vec::new();
            if changes.has_edge_changes() {
                for other in &changes.remove_blocks {
                    if unlink(tx, id, other)? {
                        peers.push(other.clone());
                    }
                }
                for other in &changes.remove_blocked_by {
                    if unlink(tx, other, id)? {
                        peers.push(other.clone());
                    }
                }
                for other in &changes.add_blocks {
                    if link(tx, id, other)? {
                        peers.push(other.clone());
                    }
                }
                for other in &changes.add_blocked_by {
                    if link(tx, other, id)? {
                        peers.push(other.clone());
                    }
                }
            }

            let mut task = storage::require_task(tx, id)?;
            let has_blockers = !task.blocked_by.is_empty();

            // Transitions are judged from the status the edges now imply
            let current = existing.status.derive(has_blockers);
            let requested = match changes.status {
                Some(target) if !current.can_transition_to(&target) => {
                    return Err(StoreError::InvalidTransition {
                        from: current,
                        to: target,
                    }
                    .into());
                }
                Some(target) => target,
                None => current,
            };

            if let Some(title) = &title {
                task.title = title.clone();
            }
            if let Some(desc) = &changes.description {
                task.description = Some(desc.clone()).filter(|d| !d.is_empty());
            }
            if let Some(metadata) = &changes.metadata {
                task.metadata = metadata.clone();
            }
            task.status = requested.derive(has_blockers);
            task.updated = next_updated(existing.updated);
            storage::save_task(tx, &task)?;

            peers.sort();
            peers.dedup();
            for peer in &peers {
                touch(tx, peer)?;
            }

            Ok(task)
        })?;

        log::info!("Updated {} (status {})", task.id, task.status);
        Ok(task)
    }

    /// Change a task's status.
    pub fn set_status(&mut self, id: &str, status: Status) -> Result<Task> {
        self.update(id, &TaskUpdate::new().status(status))
    }

    /// Mark a task done.
    pub fn complete(&mut self, id: &str) -> Result<Task> {
        self.set_status(id, Status::Done)
    }

    /// Add an edge: `from` blocks `to`.
    pub fn add_edge(&mut self, from_id: &str, to_id: &str) -> Result<()> {
        self.mutate("add_edge", |tx| {
            if link(tx, from_id, to_id)? {
                touch(tx, from_id)?;
                touch(tx, to_id)?;
            }
            Ok(())
        })
    }

    /// Remove an edge. Removing an absent edge between existing tasks is a no-op.
    pub fn remove_edge(&mut self, from_id: &str, to_id: &str) -> Result<()> {
        self.mutate("remove_edge", |tx| {
            if unlink(tx, from_id, to_id)? {
                touch(tx, from_id)?;
                touch(tx, to_id)?;
            }
            Ok(())
        })
    }

    /// Delete a task. With edges present, `force` is required; the edges are
    /// then stripped from every peer in the same transaction.
    pub fn delete(&mut self, id: &str, force: bool) -> Result<DeleteResult> {
        let result = self.mutate("delete", |tx| {
            let task = storage::require_task(tx, id)?;
            let count = task.blocks.len() + task.blocked_by.len();
            if count > 0 && !force {
                return Err(StoreError::HasDependents {
                    id: id.to_string(),
                    count,
                }
                .into());
            }

            let peers = storage::delete_edges_touching(tx, id)?;
            storage::delete_task_row(tx, id)?;
            for peer in &peers {
                touch(tx, peer)?;
            }

            Ok(DeleteResult {
                deleted_id: id.to_string(),
                dependents_updated: peers.len(),
            })
        })?;

        log::info!("Deleted {} ({} dependents updated)", id, result.dependents_updated);
        Ok(result)
    }

    /// Tasks ready to work on, oldest first, plus the suggested next one.
    pub fn ready(&self) -> Result<ReadyWork> {
        let tasks = self.list(&Filter::ready())?;
        let suggested_next = tasks.first().map(|t| t.id.clone());
        Ok(ReadyWork { tasks, suggested_next })
    }

    /// Tasks currently blocked.
    pub fn blocked(&self) -> Result<Vec<Task>> {
        self.list(&Filter::new().status(Status::Blocked))
    }

    /// Aggregate counts.
    pub fn stats(&self) -> Result<StoreStats> {
        let ready = self.list(&Filter::ready())?.len();
        self.storage.read("stats", |db| {
            let counts = storage::count_by_status(db)?;
            let get = |s: Status| counts.get(&s).copied().unwrap_or(0);
            Ok(StoreStats {
                total: counts.values().sum(),
                todo: get(Status::Todo),
                doing: get(Status::Doing),
                done: get(Status::Done),
                blocked: get(Status::Blocked),
                ready,
                edges: storage::count_edges(db)?,
            })
        })
    }

    /// Merge mirror text into the store.
    pub fn import(&mut self, text: &str, replace: bool) -> Result<ImportSummary> {
        let parsed = mirror::parse(text);
        let mode = if replace { MergeMode::Replace } else { MergeMode::Merge };
        let summary = reconcile::reconcile(&mut self.storage, parsed, mode)?;
        if self.config.auto_export {
            self.sync_mirror().context("Import committed but the mirror could not be written")?;
        }
        Ok(summary)
    }

    /// Import from a mirror file on disk.
    pub fn import_file(&mut self, path: &Path, replace: bool) -> Result<ImportSummary> {
        let text = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
        self.import(&text, replace)
    }

    /// Serialize the whole store in mirror format.
    pub fn export_text(&self) -> Result<String> {
        let tasks = self.storage.read("export", |db| storage::load_all(db))?;
        mirror::export(&tasks)
    }

    /// Write the mirror, or a copy of it to `destination`.
    pub fn export(&mut self, destination: Option<&Path>) -> Result<MirrorStats> {
        match destination {
            None => self.sync_mirror(),
            Some(path) => {
                let text = self.export_text()?;
                mirror::write_mirror(path, &text)
            }
        }
    }
}

fn ensure_exists(conn: &Connection, id: &str) -> Result<()> {
    if !storage::task_exists(conn, id)? {
        return Err(StoreError::NotFound(id.to_string()).into());
    }
    Ok(())
}

/// Insert `from -> to` after validation; false if it already existed.
fn link(conn: &Connection, from_id: &str, to_id: &str) -> Result<bool> {
    if from_id == to_id {
        return Err(StoreError::SelfReference(from_id.to_string()).into());
    }
    ensure_exists(conn, from_id)?;
    ensure_exists(conn, to_id)?;

    if storage::edge_exists(conn, from_id, to_id)? {
        return Ok(false);
    }

    graph::check_edge(&SqlGraph(conn), from_id, to_id)?;
    check_edge_count("blocks", from_id, storage::blocks_of(conn, from_id)?.len())?;
    check_edge_count("blocked_by", to_id, storage::blocked_by_of(conn, to_id)?.len())?;

    storage::insert_edge(conn, from_id, to_id)
}

/// Delete `from -> to`; false if it was absent.
fn unlink(conn: &Connection, from_id: &str, to_id: &str) -> Result<bool> {
    if from_id == to_id {
        return Err(StoreError::SelfReference(from_id.to_string()).into());
    }
    ensure_exists(conn, from_id)?;
    ensure_exists(conn, to_id)?;
    storage::delete_edge(conn, from_id, to_id)
}

/// Re-derive status and bump `updated` after a task's edges changed.
fn touch(conn: &Connection, id: &str) -> Result<()> {
    let mut task = storage::require_task(conn, id)?;
    task.status = task.status.derive(!task.blocked_by.is_empty());
    task.updated = next_updated(task.updated);
    storage::save_task(conn, &task)
}
