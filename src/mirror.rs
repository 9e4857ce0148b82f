//! Line-export codec: the JSONL mirror committed to version control.
//!
//! One task per line, lines sorted by id, keys in declaration order. Every
//! line stands alone, so edits to different tasks merge cleanly in git and a
//! damaged line costs only that one task on import.

use eyre::{Context, Result};
use serde::Serialize;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::SubsecRound;

use crate::types::Task;

/// A mirror line that was skipped during parsing or import.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    /// 1-based line number, 0 when not tied to a line
    pub line: usize,

    /// Task id, when it could be read
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Why the line or edge was dropped
    pub reason: String,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.id, self.line) {
            (Some(id), 0) => write!(f, "{}: {}", id, self.reason),
            (Some(id), line) => write!(f, "line {} ({}): {}", line, id, self.reason),
            (None, line) => write!(f, "line {}: {}", line, self.reason),
        }
    }
}

/// Result of parsing mirror text.
#[derive(Debug, Default)]
pub struct ParseOutcome {
    /// Valid records in file order
    pub tasks: Vec<Task>,

    /// One entry per skipped line
    pub diagnostics: Vec<Diagnostic>,
}

/// What an export wrote.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MirrorStats {
    pub path: PathBuf,
    pub lines: usize,
    pub bytes: usize,
}

/// Serialize every task as one line, sorted by id.
pub fn export(tasks: &[Task]) -> Result<String> {
    let mut sorted: Vec<&Task> = tasks.iter().collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));

    let mut out = String::new();
    for task in sorted {
        let mut task = task.clone();
        task.blocks.sort();
        task.blocked_by.sort();
        let json = serde_json::to_string(&task).with_context(|| format!("Failed to serialize task {}", task.id))?;
        out.push_str(&json);
        out.push('\n');
    }
    Ok(out)
}

/// Parse mirror text line by line, skipping and recording bad lines.
pub fn parse(text: &str) -> ParseOutcome {
    let mut outcome = ParseOutcome::default();
    let mut seen = HashSet::new();

    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;
        if line.trim().is_empty() {
            continue;
        }

        match parse_line(line) {
            Ok(task) => {
                if !seen.insert(task.id.clone()) {
                    log::warn!("Skipping duplicate id {} at line {}", task.id, line_no);
                    outcome.diagnostics.push(Diagnostic {
                        line: line_no,
                        id: Some(task.id),
                        reason: "duplicate id; an earlier line already defines this task".to_string(),
                    });
                    continue;
                }
                outcome.tasks.push(task);
            }
            Err((id, reason)) => {
                log::warn!("Skipping invalid mirror line {}: {}", line_no, reason);
                outcome.diagnostics.push(Diagnostic {
                    line: line_no,
                    id,
                    reason,
                });
            }
        }
    }

    outcome
}

/// Parse and validate a single line. On failure returns the id (if it could
/// be read) and a reason.
fn parse_line(line: &str) -> std::result::Result<Task, (Option<String>, String)> {
    let value: serde_json::Value =
        serde_json::from_str(line).map_err(|e| (None, format!("invalid JSON: {}", e)))?;

    let id = value.get("id").and_then(|v| v.as_str()).map(String::from);

    let mut task: Task =
        serde_json::from_value(value).map_err(|e| (id.clone(), format!("invalid record: {}", e)))?;

    // Normalize what a hand edit may have loosened
    task.title = task.title.trim().to_string();
    if task.description.as_deref() == Some("") {
        task.description = None;
    }
    task.created = task.created.trunc_subsecs(0);
    task.updated = task.updated.trunc_subsecs(0);

    task.validate().map_err(|e| (id.clone(), e.to_string()))?;

    task.blocks.sort();
    task.blocked_by.sort();
    Ok(task)
}

/// Read a mirror file; a missing file reads as empty.
pub fn read_mirror(path: &Path) -> Result<String> {
    if !path.exists() {
        return Ok(String::new());
    }
    fs::read_to_string(path).with_context(|| format!("Failed to read mirror {}", path.display()))
}

/// Replace the mirror file atomically (temp file + rename).
pub fn write_mirror(path: &Path, text: &str) -> Result<MirrorStats> {
    let file_name = path
        .file_name()
        .ok_or_else(|| eyre::eyre!("mirror path has no file name: {}", path.display()))?;
    let tmp_path = path.with_file_name(format!(".{}.tmp", file_name.to_string_lossy()));

    {
        let mut file = File::create(&tmp_path).with_context(|| format!("Failed to create {}", tmp_path.display()))?;
        file.write_all(text.as_bytes())
            .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
        file.sync_all().context("Failed to sync mirror")?;
    }
    fs::rename(&tmp_path, path).with_context(|| format!("Failed to replace {}", path.display()))?;

    let stats = MirrorStats {
        path: path.to_path_buf(),
        lines: text.lines().count(),
        bytes: text.len(),
    };
    log::debug!("Wrote mirror {} ({} lines, {} bytes)", path.display(), stats.lines, stats.bytes);
    Ok(stats)
}
