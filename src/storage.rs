//! Storage layer: the SQLite database holding the canonical task rows.
//!
//! Edges live in their own table keyed by `(from_id, to_id)`, so a task's
//! `blocks` and its peer's `blocked_by` are the same row and cannot disagree.

use chrono::{DateTime, SecondsFormat, Utc};
use eyre::{Context, Result};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Transaction, TransactionBehavior, params, params_from_iter};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::graph::BlocksGraph;
use crate::query::Filter;
use crate::types::{Metadata, Status, Task};

/// SQLite database file name within the store directory.
pub const DB_FILE: &str = "taskmem.db";

/// Bumped whenever the table layout changes.
const SCHEMA_VERSION: &str = "1";

const TASK_COLUMNS: &str = "t.id, t.title, t.description, t.status, t.metadata, t.created_at, t.updated_at";

/// Storage handle for the task database.
pub struct Storage {
    path: PathBuf,
    db: Connection,
    config: StoreConfig,
}

impl Storage {
    /// Create (or open) the database at `path` and apply the schema.
    pub fn create(path: &Path, config: &StoreConfig) -> Result<Self> {
        Self::connect(path, config)
    }

    /// Open an existing database, verifying its integrity.
    ///
    /// A missing file is an uninitialized store (a fresh clone), not damage.
    pub fn open(path: &Path, config: &StoreConfig) -> Result<Self> {
        if !path.exists() {
            let dir = path.parent().unwrap_or(path);
            return Err(StoreError::NotInitialized(dir.to_path_buf()).into());
        }
        Self::connect(path, config)
    }

    fn connect(path: &Path, config: &StoreConfig) -> Result<Self> {
        let db = Connection::open(path)
            .map_err(|e| storage_error(e, path))
            .context("Failed to open SQLite database")?;
        db.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;

        let storage = Self {
            path: path.to_path_buf(),
            db,
            config: config.clone(),
        };

        storage.check_integrity()?;
        storage.retry("init_schema", || storage.init_schema())?;
        storage.check_schema_version()?;

        Ok(storage)
    }

    fn check_integrity(&self) -> Result<()> {
        let verdict: String = self.retry("quick_check", || {
            self.db
                .query_row("PRAGMA quick_check", [], |row| row.get(0))
                .map_err(|e| storage_error(e, &self.path))
        })?;

        if verdict != "ok" {
            log::warn!("Integrity check failed for {}: {}", self.path.display(), verdict);
            return Err(StoreError::StorageCorrupt {
                path: self.path.clone(),
                detail: verdict,
            }
            .into());
        }
        Ok(())
    }

    /// Initialize SQLite schema.
    fn init_schema(&self) -> Result<()> {
        self.db
            .pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| storage_error(e, &self.path))?;
        let _mode: String = self
            .db
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .map_err(|e| storage_error(e, &self.path))?;

        self.db
            .execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS tasks (
                    id TEXT PRIMARY KEY,
                    title TEXT NOT NULL CHECK (length(title) BETWEEN 5 AND 200),
                    description TEXT,
                    status TEXT NOT NULL CHECK (status IN ('todo', 'doing', 'done', 'blocked')),
                    metadata TEXT NOT NULL DEFAULT '{}',
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL CHECK (updated_at >= created_at)
                );
                CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
                CREATE INDEX IF NOT EXISTS idx_tasks_updated ON tasks(updated_at);
                CREATE INDEX IF NOT EXISTS idx_tasks_created ON tasks(created_at);

                CREATE TABLE IF NOT EXISTS edges (
                    from_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                    to_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                    PRIMARY KEY (from_id, to_id),
                    CHECK (from_id <> to_id)
                );
                CREATE INDEX IF NOT EXISTS idx_edges_to ON edges(to_id);

                CREATE TABLE IF NOT EXISTS meta (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );
                INSERT OR IGNORE INTO meta (key, value) VALUES ('schema_version', '1');
            "#,
            )
            .map_err(|e| storage_error(e, &self.path))
            .context("Failed to initialize schema")?;

        Ok(())
    }

    fn check_schema_version(&self) -> Result<()> {
        let version: Option<String> = self
            .db
            .query_row("SELECT value FROM meta WHERE key = 'schema_version'", [], |row| row.get(0))
            .optional()?;

        match version.as_deref() {
            Some(SCHEMA_VERSION) => Ok(()),
            other => Err(StoreError::StorageCorrupt {
                path: self.path.clone(),
                detail: format!("unsupported schema version {:?}", other),
            }
            .into()),
        }
    }

    /// Run `f` inside an immediate transaction, retrying while the database
    /// is locked by another writer. `f` must not have side effects outside
    /// the transaction that would be wrong to repeat.
    pub fn write<T>(&mut self, op: &str, mut f: impl FnMut(&Transaction) -> Result<T>) -> Result<T> {
        let db = &mut self.db;
        with_retry(&self.config, op, || {
            let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let out = f(&tx)?;
            tx.commit()?;
            Ok(out)
        })
    }

    /// Run a read-only closure with the same lock retry policy.
    pub fn read<T>(&self, op: &str, mut f: impl FnMut(&Connection) -> Result<T>) -> Result<T> {
        self.retry(op, || f(&self.db))
    }

    fn retry<T>(&self, op: &str, f: impl FnMut() -> Result<T>) -> Result<T> {
        with_retry(&self.config, op, f)
    }
}

/// Bounded retry with linearly increasing delays for lock contention.
fn with_retry<T>(config: &StoreConfig, op: &str, mut f: impl FnMut() -> Result<T>) -> Result<T> {
    let attempts = config.lock_retries + 1;
    for attempt in 1..=attempts {
        match f() {
            Ok(value) => return Ok(value),
            Err(e) if is_locked(&e) => {
                if attempt == attempts {
                    break;
                }
                let delay = config.retry_delay(attempt);
                log::warn!(
                    "{}: database locked (attempt {}/{}), retrying in {:?}",
                    op,
                    attempt,
                    attempts,
                    delay
                );
                std::thread::sleep(delay);
            }
            Err(e) => return Err(e),
        }
    }
    Err(StoreError::StorageLocked { attempts }.into())
}

/// Whether a report was caused by SQLite lock contention.
fn is_locked(report: &eyre::Report) -> bool {
    report.chain().any(|e| {
        matches!(
            e.downcast_ref::<rusqlite::Error>(),
            Some(rusqlite::Error::SqliteFailure(err, _))
                if matches!(err.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
        )
    })
}

/// Translate corruption codes into [`StoreError::StorageCorrupt`].
fn storage_error(err: rusqlite::Error, path: &Path) -> eyre::Report {
    match &err {
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(e.code, ErrorCode::NotADatabase | ErrorCode::DatabaseCorrupt) =>
        {
            log::warn!("Database {} is unreadable: {}", path.display(), err);
            StoreError::StorageCorrupt {
                path: path.to_path_buf(),
                detail: err.to_string(),
            }
            .into()
        }
        _ => err.into(),
    }
}

fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_ts(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}

/// Convert a database row to a Task (edges left empty).
fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<Task> {
    let status_str: String = row.get(3)?;
    let status = status_str
        .parse::<Status>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e)))?;

    let metadata_str: String = row.get(4)?;
    let metadata = Metadata::parse(&metadata_str)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e)))?;

    let created_str: String = row.get(5)?;
    let updated_str: String = row.get(6)?;

    Ok(Task {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        status,
        created: parse_ts(5, &created_str)?,
        updated: parse_ts(6, &updated_str)?,
        blocks: vec![],
        blocked_by: vec![],
        metadata,
    })
}

/// Check if a task row exists.
pub fn task_exists(conn: &Connection, id: &str) -> Result<bool> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM tasks WHERE id = ?", params![id], |row| row.get(0))?;
    Ok(count > 0)
}

/// Insert a task row. Edges are written separately.
pub fn insert_task(conn: &Connection, task: &Task) -> Result<()> {
    if task_exists(conn, &task.id)? {
        return Err(StoreError::AlreadyExists(task.id.clone()).into());
    }

    conn.execute(
        r#"
        INSERT INTO tasks (id, title, description, status, metadata, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            task.id,
            task.title,
            task.description,
            task.status.as_str(),
            task.metadata.to_json_string(),
            format_ts(&task.created),
            format_ts(&task.updated),
        ],
    )?;

    Ok(())
}

/// Overwrite a task row's fields. Edges are untouched.
pub fn save_task(conn: &Connection, task: &Task) -> Result<()> {
    let changed = conn.execute(
        r#"
        UPDATE tasks
        SET title = ?, description = ?, status = ?, metadata = ?, created_at = ?, updated_at = ?
        WHERE id = ?
        "#,
        params![
            task.title,
            task.description,
            task.status.as_str(),
            task.metadata.to_json_string(),
            format_ts(&task.created),
            format_ts(&task.updated),
            task.id,
        ],
    )?;

    if changed == 0 {
        return Err(StoreError::NotFound(task.id.clone()).into());
    }
    Ok(())
}

/// Get a task by ID, with its edges.
pub fn load_task(conn: &Connection, id: &str) -> Result<Option<Task>> {
    let sql = format!("SELECT {} FROM tasks t WHERE t.id = ?", TASK_COLUMNS);
    let task = conn.query_row(&sql, params![id], row_to_task).optional()?;

    match task {
        Some(mut task) => {
            task.blocks = blocks_of(conn, id)?;
            task.blocked_by = blocked_by_of(conn, id)?;
            Ok(Some(task))
        }
        None => Ok(None),
    }
}

/// Get a task by ID or fail with NotFound.
pub fn require_task(conn: &Connection, id: &str) -> Result<Task> {
    load_task(conn, id)?.ok_or_else(|| StoreError::NotFound(id.to_string()).into())
}

/// Ids the given task blocks, sorted.
pub fn blocks_of(conn: &Connection, id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare_cached("SELECT to_id FROM edges WHERE from_id = ? ORDER BY to_id")?;
    let ids = stmt
        .query_map(params![id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(ids)
}

/// Ids blocking the given task, sorted.
pub fn blocked_by_of(conn: &Connection, id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare_cached("SELECT from_id FROM edges WHERE to_id = ? ORDER BY from_id")?;
    let ids = stmt
        .query_map(params![id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(ids)
}

/// Check if an edge exists.
pub fn edge_exists(conn: &Connection, from_id: &str, to_id: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM edges WHERE from_id = ? AND to_id = ?",
        params![from_id, to_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Insert an edge; false if it was already present.
pub fn insert_edge(conn: &Connection, from_id: &str, to_id: &str) -> Result<bool> {
    let changed = conn.execute(
        "INSERT INTO edges (from_id, to_id) VALUES (?, ?) ON CONFLICT(from_id, to_id) DO NOTHING",
        params![from_id, to_id],
    )?;
    Ok(changed > 0)
}

/// Delete an edge; false if it was absent.
pub fn delete_edge(conn: &Connection, from_id: &str, to_id: &str) -> Result<bool> {
    let changed = conn.execute(
        "DELETE FROM edges WHERE from_id = ? AND to_id = ?",
        params![from_id, to_id],
    )?;
    Ok(changed > 0)
}

/// Delete every edge touching `id`, returning the peers that lost one.
pub fn delete_edges_touching(conn: &Connection, id: &str) -> Result<Vec<String>> {
    let mut peers = blocks_of(conn, id)?;
    peers.extend(blocked_by_of(conn, id)?);
    peers.sort();
    peers.dedup();

    conn.execute("DELETE FROM edges WHERE from_id = ? OR to_id = ?", params![id, id])?;
    Ok(peers)
}

/// Delete a task row; false if it was absent.
pub fn delete_task_row(conn: &Connection, id: &str) -> Result<bool> {
    let changed = conn.execute("DELETE FROM tasks WHERE id = ?", params![id])?;
    Ok(changed > 0)
}

/// Remove every task and edge.
pub fn clear_all(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        DELETE FROM edges;
        DELETE FROM tasks;
    "#,
    )
    .context("Failed to clear tables")?;
    Ok(())
}

/// All edges as `(blocks, blocked_by)` adjacency maps with sorted lists.
fn edge_maps(conn: &Connection) -> Result<(HashMap<String, Vec<String>>, HashMap<String, Vec<String>>)> {
    let mut blocks: HashMap<String, Vec<String>> = HashMap::new();
    let mut blocked_by: HashMap<String, Vec<String>> = HashMap::new();

    let mut stmt = conn.prepare("SELECT from_id, to_id FROM edges ORDER BY from_id, to_id")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
    for row in rows {
        let (from, to) = row?;
        blocks.entry(from.clone()).or_default().push(to.clone());
        blocked_by.entry(to).or_default().push(from);
    }

    Ok((blocks, blocked_by))
}

/// Tasks matching a filter, with edges, in the filter's order.
pub fn query_tasks(conn: &Connection, filter: &Filter) -> Result<Vec<Task>> {
    let (tail, values) = filter.to_sql();
    let sql = format!("SELECT {} FROM tasks t{}", TASK_COLUMNS, tail);

    let mut stmt = conn.prepare(&sql)?;
    let mut tasks = stmt
        .query_map(params_from_iter(values), row_to_task)?
        .collect::<rusqlite::Result<Vec<Task>>>()
        .context("Failed to read task rows")?;

    let (mut blocks, mut blocked_by) = edge_maps(conn)?;
    for task in &mut tasks {
        task.blocks = blocks.remove(&task.id).unwrap_or_default();
        task.blocked_by = blocked_by.remove(&task.id).unwrap_or_default();
    }

    Ok(tasks)
}

/// Every task, sorted by id.
pub fn load_all(conn: &Connection) -> Result<Vec<Task>> {
    let mut tasks = query_tasks(conn, &Filter::new())?;
    tasks.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(tasks)
}

/// Task counts per status.
pub fn count_by_status(conn: &Connection) -> Result<HashMap<Status, usize>> {
    let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM tasks GROUP BY status")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;

    let mut counts = HashMap::new();
    for row in rows {
        let (status, count) = row?;
        let status = status.parse::<Status>().map_err(|e| eyre::eyre!(e))?;
        counts.insert(status, count as usize);
    }
    Ok(counts)
}

/// Total number of edges.
pub fn count_edges(conn: &Connection) -> Result<usize> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM edges", [], |row| row.get(0))?;
    Ok(count as usize)
}

/// The `blocks` adjacency as seen through a live connection or transaction.
pub struct SqlGraph<'c>(pub &'c Connection);

impl BlocksGraph for SqlGraph<'_> {
    fn blocks_of(&self, id: &str) -> Result<Vec<String>> {
        blocks_of(self.0, id)
    }
}
