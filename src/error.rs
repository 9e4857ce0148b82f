//! Error taxonomy for store operations.
//!
//! Operations return `eyre::Result`; domain failures travel inside the report
//! as a [`StoreError`] so callers can branch on them with `downcast_ref`.

use std::path::PathBuf;
use thiserror::Error;

use crate::types::{Status, ValidationError};

/// Exit codes for the `tm` binary.
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const USER_ERROR: i32 = 2;
    pub const INTERNAL_ERROR: i32 = 3;
}

/// Who has to act on an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad input or a request that violates a rule.
    User,
    /// Storage or environment failure.
    Internal,
}

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid {field}: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("task not found: {0}")]
    NotFound(String),

    #[error("task already exists: {0}")]
    AlreadyExists(String),

    #[error("task {0} cannot block itself")]
    SelfReference(String),

    #[error("dependency would create a cycle: {}", .path.join(" -> "))]
    CircularDependency { path: Vec<String> },

    #[error("{what} exceeds the limit of {limit}")]
    LimitExceeded { what: String, limit: usize },

    #[error("cannot move task from {from} to {to}")]
    InvalidTransition { from: Status, to: Status },

    #[error("task {id} has {count} dependency link(s)")]
    HasDependents { id: String, count: usize },

    #[error("database is locked by another writer (gave up after {attempts} attempts)")]
    StorageLocked { attempts: u32 },

    #[error("database at {} failed integrity checks: {detail}", .path.display())]
    StorageCorrupt { path: PathBuf, detail: String },

    #[error("no task store found in {}", .0.display())]
    NotInitialized(PathBuf),
}

impl StoreError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        StoreError::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            StoreError::StorageLocked { .. } | StoreError::StorageCorrupt { .. } => ErrorClass::Internal,
            _ => ErrorClass::User,
        }
    }

    /// Stable machine-readable name.
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::InvalidField { .. } => "InvalidField",
            StoreError::NotFound(_) => "NotFound",
            StoreError::AlreadyExists(_) => "AlreadyExists",
            StoreError::SelfReference(_) => "SelfReference",
            StoreError::CircularDependency { .. } => "CircularDependency",
            StoreError::LimitExceeded { .. } => "LimitExceeded",
            StoreError::InvalidTransition { .. } => "InvalidField",
            StoreError::HasDependents { .. } => "HasDependents",
            StoreError::StorageLocked { .. } => "StorageLocked",
            StoreError::StorageCorrupt { .. } => "StorageCorrupt",
            StoreError::NotInitialized(_) => "NotInitialized",
        }
    }

    /// The recovery action for the user, when there is one.
    pub fn hint(&self) -> Option<String> {
        match self {
            StoreError::NotFound(_) => Some("check the id with `tm list`".to_string()),
            StoreError::CircularDependency { path } => path.get(0..2).map(|pair| {
                format!(
                    "remove one of the existing edges in the cycle first, e.g. `tm update {} --remove-blocks {}`",
                    pair[1],
                    path.get(2).map(String::as_str).unwrap_or(&pair[0])
                )
            }),
            StoreError::InvalidTransition { from: Status::Blocked, .. } => {
                Some("remove the blocking edges first; blocked is cleared automatically".to_string())
            }
            StoreError::InvalidTransition { to: Status::Blocked, .. } => {
                Some("blocked is derived from blocked_by; add a blocking edge instead".to_string())
            }
            StoreError::HasDependents { id, .. } => {
                Some(format!("re-run with `tm delete {} --force` to remove the links too", id))
            }
            StoreError::StorageLocked { .. } => {
                Some("another tm process is writing; retry the command in a moment".to_string())
            }
            StoreError::StorageCorrupt { .. } => Some(
                "run `tm rebuild` to recreate the database from the mirror file, or restore the \
                 mirror from version control first and then rebuild"
                    .to_string(),
            ),
            StoreError::NotInitialized(_) => {
                Some("run `tm init` first; an existing mirror file is imported automatically".to_string())
            }
            _ => None,
        }
    }
}

impl From<ValidationError> for StoreError {
    fn from(err: ValidationError) -> Self {
        match &err {
            ValidationError::MetadataTooLarge(bytes) => StoreError::LimitExceeded {
                what: format!("metadata ({} bytes)", bytes),
                limit: crate::types::METADATA_MAX_BYTES,
            },
            ValidationError::TooManyEdges { field, count } => StoreError::LimitExceeded {
                what: format!("{} ({} entries)", field, count),
                limit: crate::types::MAX_EDGES,
            },
            _ => StoreError::invalid(err.field(), err.to_string()),
        }
    }
}

/// Find the [`StoreError`] carried by a report, if any.
pub fn store_error(report: &eyre::Report) -> Option<&StoreError> {
    report.chain().find_map(|e| e.downcast_ref::<StoreError>())
}

/// Classify a report; anything without a [`StoreError`] is internal.
pub fn classify(report: &eyre::Report) -> ErrorClass {
    store_error(report).map(StoreError::class).unwrap_or(ErrorClass::Internal)
}

/// Process exit code for a failed operation.
pub fn exit_code(report: &eyre::Report) -> i32 {
    match classify(report) {
        ErrorClass::User => exit_codes::USER_ERROR,
        ErrorClass::Internal => exit_codes::INTERNAL_ERROR,
    }
}
