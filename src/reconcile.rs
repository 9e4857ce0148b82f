//! Reconciliation of an imported record set into the store.
//!
//! Timestamp wins: an incoming record replaces the stored one only when its
//! `updated` is strictly newer; ties keep the local copy. A winning record's
//! edge sets replace every edge touching it, so both endpoints change in the
//! same transaction.
//!
//! Rows are merged first and edges second, each record in its own
//! transaction, so an interrupted import leaves a consistent store. A task
//! whose edges or status end up different from both its local and incoming
//! versions is an edit, and gets a fresh `updated` last.

use eyre::{Context, Result};
use std::collections::HashMap;
use rusqlite::Connection;
use serde::Serialize;

use crate::graph::find_cycle;
use crate::mirror::{Diagnostic, ParseOutcome};
use crate::storage::{self, SqlGraph, Storage};
use crate::types::{MAX_EDGES, Status, Task, next_updated};

/// The part of a record that edge reconciliation can change.
#[derive(Debug, PartialEq, Eq)]
struct LinkState {
    blocks: Vec<String>,
    blocked_by: Vec<String>,
    status: Status,
}

impl LinkState {
    fn of(task: &Task) -> Self {
        let mut blocks = task.blocks.clone();
        let mut blocked_by = task.blocked_by.clone();
        blocks.sort();
        blocked_by.sort();
        Self {
            blocks,
            blocked_by,
            status: task.status,
        }
    }
}

/// How incoming records meet the existing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// Timestamp-wins merge with the current content.
    Merge,
    /// Clear the store first; the incoming set becomes the content.
    Replace,
}

/// Per-record outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    New,
    Updated,
    Unchanged,
}

/// Summary of an import.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportSummary {
    pub new: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Lines rejected by the codec
    pub skipped: usize,
    /// Edges dropped because a peer was missing or a cycle would form
    pub edges_dropped: usize,
    pub diagnostics: Vec<Diagnostic>,
}

impl ImportSummary {
    /// Records that reached the store as new or updated.
    pub fn applied(&self) -> usize {
        self.new + self.updated
    }
}

/// Merge parsed records into storage.
pub fn reconcile(store: &mut Storage, parsed: ParseOutcome, mode: MergeMode) -> Result<ImportSummary> {
    let mut summary = ImportSummary {
        skipped: parsed.diagnostics.len(),
        diagnostics: parsed.diagnostics,
        ..Default::default()
    };

    if mode == MergeMode::Replace {
        store
            .write("import_clear", |tx| storage::clear_all(tx))
            .context("Failed to clear store for replace import")?;
        log::info!("Cleared store for replace import");
    }

    let mut incoming = parsed.tasks;
    incoming.sort_by(|a, b| a.id.cmp(&b.id));

    // What each task looks like before any edge moves
    let mut expected: HashMap<String, LinkState> = store
        .read("import_snapshot", |db| storage::load_all(db))?
        .iter()
        .map(|t| (t.id.clone(), LinkState::of(t)))
        .collect();

    // Phase 1: rows
    let mut winners = Vec::new();
    for task in incoming {
        let outcome = store
            .write("import_row", |tx| merge_row(tx, &task))
            .with_context(|| format!("Failed to import task {}", task.id))?;
        match outcome {
            Outcome::New => summary.new += 1,
            Outcome::Updated => summary.updated += 1,
            Outcome::Unchanged => {
                summary.unchanged += 1;
                continue;
            }
        }
        expected.insert(task.id.clone(), LinkState::of(&task));
        winners.push(task);
    }

    // Phase 2: edges of every winner, now that all rows exist
    for task in &winners {
        let dropped = store
            .write("import_edges", |tx| apply_edges(tx, task))
            .with_context(|| format!("Failed to import edges of {}", task.id))?;
        summary.edges_dropped += dropped.len();
        summary.diagnostics.extend(dropped);
    }

    // Phase 3: bump tasks the edge pass changed beyond either version
    if !winners.is_empty() {
        let changed: Vec<String> = store
            .read("import_verify", |db| storage::load_all(db))?
            .iter()
            .filter(|t| expected.get(&t.id).is_some_and(|want| *want != LinkState::of(t)))
            .map(|t| t.id.clone())
            .collect();
        for id in &changed {
            store
                .write("import_touch", |tx| bump_updated(tx, id))
                .with_context(|| format!("Failed to touch {}", id))?;
        }
        if !changed.is_empty() {
            log::debug!("Import changed links of {} task(s)", changed.len());
        }
    }

    log::info!(
        "Import: {} new, {} updated, {} unchanged, {} skipped, {} edges dropped",
        summary.new,
        summary.updated,
        summary.unchanged,
        summary.skipped,
        summary.edges_dropped
    );

    Ok(summary)
}

/// Insert or replace a task row according to timestamp precedence.
fn merge_row(conn: &Connection, task: &Task) -> Result<Outcome> {
    match storage::load_task(conn, &task.id)? {
        None => {
            storage::insert_task(conn, task)?;
            Ok(Outcome::New)
        }
        Some(existing) if task.updated > existing.updated => {
            // created is immutable; the local value stands
            let merged = Task {
                created: existing.created,
                ..task.clone()
            };
            storage::save_task(conn, &merged)?;
            Ok(Outcome::Updated)
        }
        Some(_) => Ok(Outcome::Unchanged),
    }
}

/// Make the stored edges touching `task` equal its incoming edge sets.
///
/// Timestamps are left alone here; phase 3 decides which records were edited.
fn apply_edges(conn: &Connection, task: &Task) -> Result<Vec<Diagnostic>> {
    let mut dropped = Vec::new();
    let mut peers = storage::delete_edges_touching(conn, &task.id)?;

    let wanted = task
        .blocks
        .iter()
        .map(|to| (task.id.as_str(), to.as_str()))
        .chain(task.blocked_by.iter().map(|from| (from.as_str(), task.id.as_str())));

    for (from, to) in wanted {
        let peer = if from == task.id { to } else { from };

        if !storage::task_exists(conn, peer)? {
            dropped.push(edge_diagnostic(task, from, to, format!("{} does not exist", peer)));
            continue;
        }
        if let Some(path) = find_cycle(&SqlGraph(conn), from, to)? {
            dropped.push(edge_diagnostic(
                task,
                from,
                to,
                format!("would create a cycle: {}", path.join(" -> ")),
            ));
            continue;
        }
        if storage::blocks_of(conn, from)?.len() >= MAX_EDGES
            || storage::blocked_by_of(conn, to)?.len() >= MAX_EDGES
        {
            dropped.push(edge_diagnostic(task, from, to, format!("edge limit of {} reached", MAX_EDGES)));
            continue;
        }

        storage::insert_edge(conn, from, to)?;
        peers.push(peer.to_string());
    }

    peers.push(task.id.clone());
    peers.sort();
    peers.dedup();
    for id in peers {
        rederive_status(conn, &id)?;
    }

    Ok(dropped)
}

fn edge_diagnostic(task: &Task, from: &str, to: &str, reason: String) -> Diagnostic {
    log::warn!("Dropping imported edge {} -> {}: {}", from, to, reason);
    Diagnostic {
        line: 0,
        id: Some(task.id.clone()),
        reason: format!("edge {} blocks {} dropped: {}", from, to, reason),
    }
}

/// Bring a stored status in line with its stored blockers.
fn rederive_status(conn: &Connection, id: &str) -> Result<()> {
    if let Some(mut task) = storage::load_task(conn, id)? {
        let derived = task.status.derive(!task.blocked_by.is_empty());
        if derived != task.status {
            task.status = derived;
            storage::save_task(conn, &task)?;
        }
    }
    Ok(())
}

fn bump_updated(conn: &Connection, id: &str) -> Result<()> {
    if let Some(mut task) = storage::load_task(conn, id)? {
        task.updated = next_updated(task.updated);
        storage::save_task(conn, &task)?;
    }
    Ok(())
}
