//! Core data types for the task memory store.

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::id::{generate_id, is_valid_id};

/// Minimum title length in characters, after trimming.
pub const TITLE_MIN_CHARS: usize = 5;

/// Maximum title length in characters, after trimming.
pub const TITLE_MAX_CHARS: usize = 200;

/// Maximum description length in characters.
pub const DESCRIPTION_MAX_CHARS: usize = 10_000;

/// Maximum serialized metadata size in bytes.
pub const METADATA_MAX_BYTES: usize = 5 * 1024;

/// Maximum number of entries in `blocks` or `blocked_by`.
pub const MAX_EDGES: usize = 100;

/// The sole entity: a unit of trackable work.
///
/// Field order is the serialization order of a mirror line; do not reorder
/// without accepting a full-file diff in every project using the mirror.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    /// Unique identifier: "tm-" + 10 hex chars
    pub id: String,

    /// Short summary, 5-200 chars, single line
    pub title: String,

    /// Optional long-form detail (markdown)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Current state
    pub status: Status,

    /// When created, second precision
    pub created: DateTime<Utc>,

    /// Last modification, second precision
    pub updated: DateTime<Utc>,

    /// Tasks this one blocks, sorted by id
    #[serde(default)]
    pub blocks: Vec<String>,

    /// Tasks blocking this one, sorted by id
    #[serde(default)]
    pub blocked_by: Vec<String>,

    /// Free-form tags, estimates, feature labels
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

/// Task status states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Todo,
    Doing,
    Done,
    Blocked,
}

impl Status {
    pub const ALL: [Status; 4] = [Status::Todo, Status::Doing, Status::Done, Status::Blocked];

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Todo => "todo",
            Status::Doing => "doing",
            Status::Done => "done",
            Status::Blocked => "blocked",
        }
    }

    /// Check if a user may move a task from this status to `target`.
    ///
    /// `blocked` is never a valid target: it is derived from `blocked_by`.
    pub fn can_transition_to(&self, target: &Status) -> bool {
        use Status::*;
        match (self, target) {
            (Todo, Doing) | (Doing, Todo) => true,
            (Todo, Done) | (Doing, Done) => true,
            // Reopen
            (Done, Todo) => true,
            (_, Blocked) => false,
            (a, b) => a == b,
        }
    }

    /// Apply the blocked-derivation rule to a requested status.
    pub fn derive(self, has_blockers: bool) -> Status {
        match (self, has_blockers) {
            (Status::Done, _) => Status::Done,
            (_, true) => Status::Blocked,
            (Status::Blocked, false) => Status::Todo,
            (status, false) => status,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "todo" => Ok(Status::Todo),
            "doing" => Ok(Status::Doing),
            "done" => Ok(Status::Done),
            "blocked" => Ok(Status::Blocked),
            other => Err(ValidationError::UnknownStatus(other.to_string())),
        }
    }
}

/// A single metadata value. Nested objects and nulls are not representable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
    List(Vec<String>),
}

impl From<&str> for MetaValue {
    fn from(value: &str) -> Self {
        MetaValue::Text(value.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(value: String) -> Self {
        MetaValue::Text(value)
    }
}

impl From<bool> for MetaValue {
    fn from(value: bool) -> Self {
        MetaValue::Bool(value)
    }
}

impl From<i64> for MetaValue {
    fn from(value: i64) -> Self {
        MetaValue::Number(value.into())
    }
}

impl From<Vec<String>> for MetaValue {
    fn from(value: Vec<String>) -> Self {
        MetaValue::List(value)
    }
}

/// Flat key/value bag attached to a task. Keys serialize in sorted order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, MetaValue>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from an arbitrary JSON value, rejecting anything but an object of
    /// primitives and string arrays.
    pub fn from_json(value: serde_json::Value) -> Result<Self, ValidationError> {
        if !value.is_object() {
            return Err(ValidationError::MetadataShape(
                "metadata must be a JSON object".to_string(),
            ));
        }
        serde_json::from_value(value).map_err(|_| {
            ValidationError::MetadataShape(
                "values must be strings, numbers, booleans or arrays of strings".to_string(),
            )
        })
    }

    /// Parse a JSON object from text.
    pub fn parse(text: &str) -> Result<Self, ValidationError> {
        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| ValidationError::MetadataShape(format!("invalid JSON: {}", e)))?;
        Self::from_json(value)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<MetaValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&MetaValue> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MetaValue)> {
        self.0.iter()
    }

    /// Size of the canonical serialized form in bytes.
    pub fn serialized_len(&self) -> usize {
        serde_json::to_string(&self.0).map(|s| s.len()).unwrap_or(usize::MAX)
    }

    /// Canonical JSON text, as stored in the database.
    pub fn to_json_string(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_else(|_| "{}".to_string())
    }

    /// The `feature` label, when present as text.
    pub fn feature(&self) -> Option<&str> {
        match self.0.get("feature") {
            Some(MetaValue::Text(s)) => Some(s),
            _ => None,
        }
    }
}

/// Validation errors for task fields.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    TitleLength(usize),
    TitleLineBreak,
    TitleControlChars,
    DescriptionTooLong(usize),
    MetadataTooLarge(usize),
    MetadataShape(String),
    UnknownStatus(String),
    InvalidId(String),
    InvalidTimestamp,
    TooManyEdges { field: &'static str, count: usize },
    SelfEdge(String),
    DuplicateEdge { field: &'static str, id: String },
}

impl ValidationError {
    /// Name of the offending field.
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::TitleLength(_)
            | ValidationError::TitleLineBreak
            | ValidationError::TitleControlChars => "title",
            ValidationError::DescriptionTooLong(_) => "description",
            ValidationError::MetadataTooLarge(_) | ValidationError::MetadataShape(_) => "metadata",
            ValidationError::UnknownStatus(_) => "status",
            ValidationError::InvalidId(_) => "id",
            ValidationError::InvalidTimestamp => "updated",
            ValidationError::TooManyEdges { field, .. } | ValidationError::DuplicateEdge { field, .. } => *field,
            ValidationError::SelfEdge(_) => "blocks",
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::TitleLength(len) => write!(
                f,
                "title must be {}-{} characters after trimming (got {})",
                TITLE_MIN_CHARS, TITLE_MAX_CHARS, len
            ),
            ValidationError::TitleLineBreak => write!(f, "title must not contain line breaks"),
            ValidationError::TitleControlChars => write!(f, "title contains control characters"),
            ValidationError::DescriptionTooLong(len) => write!(
                f,
                "description exceeds {} characters (got {})",
                DESCRIPTION_MAX_CHARS, len
            ),
            ValidationError::MetadataTooLarge(bytes) => write!(
                f,
                "metadata serializes to {} bytes, limit is {}",
                bytes, METADATA_MAX_BYTES
            ),
            ValidationError::MetadataShape(reason) => write!(f, "malformed metadata: {}", reason),
            ValidationError::UnknownStatus(s) => {
                write!(f, "unknown status '{}': expected todo, doing, done or blocked", s)
            }
            ValidationError::InvalidId(id) => write!(
                f,
                "invalid id '{}': must be 1-64 characters of letters, digits, '-' or '_'",
                id
            ),
            ValidationError::InvalidTimestamp => write!(f, "updated cannot be before created"),
            ValidationError::TooManyEdges { field, count } => {
                write!(f, "{} has {} entries, limit is {}", field, count, MAX_EDGES)
            }
            ValidationError::SelfEdge(id) => write!(f, "task {} references itself", id),
            ValidationError::DuplicateEdge { field, id } => {
                write!(f, "{} lists {} more than once", field, id)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validate a title and return its trimmed form.
pub fn validate_title(title: &str) -> Result<String, ValidationError> {
    let trimmed = title.trim();
    if trimmed.contains(['\n', '\r']) {
        return Err(ValidationError::TitleLineBreak);
    }
    if trimmed.chars().any(|c| c.is_control()) {
        return Err(ValidationError::TitleControlChars);
    }
    let len = trimmed.chars().count();
    if !(TITLE_MIN_CHARS..=TITLE_MAX_CHARS).contains(&len) {
        return Err(ValidationError::TitleLength(len));
    }
    Ok(trimmed.to_string())
}

pub fn validate_description(description: &str) -> Result<(), ValidationError> {
    let len = description.chars().count();
    if len > DESCRIPTION_MAX_CHARS {
        return Err(ValidationError::DescriptionTooLong(len));
    }
    Ok(())
}

pub fn validate_metadata(metadata: &Metadata) -> Result<(), ValidationError> {
    let bytes = metadata.serialized_len();
    if bytes > METADATA_MAX_BYTES {
        return Err(ValidationError::MetadataTooLarge(bytes));
    }
    Ok(())
}

/// Current time truncated to the stored precision.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

/// Next `updated` value after `previous`: never equal, never earlier.
pub fn next_updated(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = now();
    let floor = previous.trunc_subsecs(0) + Duration::seconds(1);
    now.max(floor)
}

/// Build a fresh task: generated id, `todo`, no edges, `created == updated`.
pub fn new_task(
    title: &str,
    description: Option<&str>,
    metadata: Option<Metadata>,
) -> Result<Task, ValidationError> {
    let title = validate_title(title)?;
    let description = description.filter(|d| !d.is_empty());
    if let Some(desc) = description {
        validate_description(desc)?;
    }
    let metadata = metadata.unwrap_or_default();
    validate_metadata(&metadata)?;

    let created = now();
    Ok(Task {
        id: generate_id(&title, created),
        title,
        description: description.map(String::from),
        status: Status::Todo,
        created,
        updated: created,
        blocks: Vec::new(),
        blocked_by: Vec::new(),
        metadata,
    })
}

impl Task {
    /// Validate every field of a complete record, as read from a mirror line.
    ///
    /// Cross-record rules (referenced ids exist, acyclicity) are checked when
    /// edges are applied, not here.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !is_valid_id(&self.id) {
            return Err(ValidationError::InvalidId(self.id.clone()));
        }
        validate_title(&self.title)?;
        if let Some(desc) = &self.description {
            validate_description(desc)?;
        }
        validate_metadata(&self.metadata)?;

        if self.updated < self.created {
            return Err(ValidationError::InvalidTimestamp);
        }

        for (field, ids) in [("blocks", &self.blocks), ("blocked_by", &self.blocked_by)] {
            if ids.len() > MAX_EDGES {
                return Err(ValidationError::TooManyEdges {
                    field,
                    count: ids.len(),
                });
            }
            let mut seen = std::collections::HashSet::new();
            for id in ids {
                if id == &self.id {
                    return Err(ValidationError::SelfEdge(id.clone()));
                }
                if !is_valid_id(id) {
                    return Err(ValidationError::InvalidId(id.clone()));
                }
                if !seen.insert(id) {
                    return Err(ValidationError::DuplicateEdge { field, id: id.clone() });
                }
            }
        }

        Ok(())
    }

    /// Whether this task appears in ready work.
    pub fn is_ready(&self) -> bool {
        matches!(self.status, Status::Todo | Status::Doing) && self.blocked_by.is_empty()
    }

    /// The `feature` metadata label, if any.
    pub fn feature(&self) -> Option<&str> {
        self.metadata.feature()
    }
}
