//! List filters and the SQL they compile to.

use rusqlite::types::Value;
use serde::Serialize;

use crate::types::Status;

/// Recognized list options.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Filter {
    /// Keep only these statuses (empty = any).
    pub statuses: Vec<Status>,

    /// Keep only tasks whose `feature` metadata matches.
    pub feature: Option<String>,

    /// Keep only ready work, oldest first.
    pub ready_only: bool,
}

impl Filter {
    /// Create an empty filter matching every task.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ready work: todo/doing with no blockers.
    pub fn ready() -> Self {
        Self::new().ready_only(true)
    }

    /// Filter by status (may be repeated).
    pub fn status(mut self, status: Status) -> Self {
        if !self.statuses.contains(&status) {
            self.statuses.push(status);
        }
        self
    }

    /// Filter by several statuses.
    pub fn statuses(mut self, statuses: impl IntoIterator<Item = Status>) -> Self {
        for status in statuses {
            self = self.status(status);
        }
        self
    }

    /// Filter by feature label.
    pub fn feature(mut self, feature: impl Into<String>) -> Self {
        self.feature = Some(feature.into());
        self
    }

    /// Restrict to ready work.
    pub fn ready_only(mut self, ready_only: bool) -> Self {
        self.ready_only = ready_only;
        self
    }

    /// Build the WHERE/ORDER BY tail of a `SELECT ... FROM tasks t` query.
    pub(crate) fn to_sql(&self) -> (String, Vec<Value>) {
        let mut clauses = Vec::new();
        let mut params = Vec::new();

        if !self.statuses.is_empty() {
            let placeholders = vec!["?"; self.statuses.len()].join(", ");
            clauses.push(format!("t.status IN ({})", placeholders));
            params.extend(self.statuses.iter().map(|s| Value::Text(s.as_str().to_string())));
        }

        if let Some(feature) = &self.feature {
            // json_each yields one row for a scalar and one per element for an array
            clauses.push(
                "EXISTS (SELECT 1 FROM json_each(t.metadata, '$.feature') f WHERE f.value = ?)".to_string(),
            );
            params.push(Value::Text(feature.clone()));
        }

        if self.ready_only {
            clauses.push("t.status IN ('todo', 'doing')".to_string());
            clauses.push("NOT EXISTS (SELECT 1 FROM edges e WHERE e.to_id = t.id)".to_string());
        }

        let mut sql = String::new();
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        if self.ready_only {
            sql.push_str(" ORDER BY t.created_at ASC, t.id ASC");
        } else {
            sql.push_str(" ORDER BY t.updated_at DESC, t.id ASC");
        }

        (sql, params)
    }
}
