//! taskmem: a local task memory with dependency tracking.
//!
//! Tasks live in a SQLite database under `.taskmem/`, with a line-per-task
//! JSONL mirror next to it that is meant to be committed. Other clones merge
//! the mirror back with timestamp-wins reconciliation.
//!
//! # Example
//!
//! ```no_run
//! use taskmem::{Filter, Status, Store, TaskUpdate};
//! use std::path::Path;
//!
//! // Initialize a new store
//! let mut store = Store::init(Path::new(".")).unwrap();
//!
//! // Create tasks
//! let schema = store.create("Design the schema", None, None).unwrap();
//! let api = store.create("Implement the API", Some("REST, v1"), None).unwrap();
//!
//! // The schema blocks the API
//! store.add_edge(&schema.id, &api.id).unwrap();
//! assert_eq!(store.get(&api.id).unwrap().status, Status::Blocked);
//!
//! // Only the schema is ready
//! let ready = store.ready().unwrap();
//! assert_eq!(ready.suggested_next, Some(schema.id.clone()));
//!
//! // Unblock the API, then finish the schema
//! store
//!     .update(&api.id, &TaskUpdate::new().remove_blocked_by(&schema.id))
//!     .unwrap();
//! store.complete(&schema.id).unwrap();
//!
//! let todo = store.list(&Filter::new().status(Status::Todo)).unwrap();
//! assert_eq!(todo.len(), 1);
//! ```

mod graph;
mod id;
mod reconcile;
mod storage;

pub mod builder;
pub mod config;
pub mod error;
pub mod mirror;
pub mod output;
pub mod query;
pub mod store;
pub mod types;

// Re-export public API
pub use builder::{StoreBuilderExt, TaskBuilder};
pub use config::StoreConfig;
pub use error::{ErrorClass, StoreError, exit_codes};
pub use id::{ID_PREFIX, is_valid_id};
pub use mirror::{Diagnostic, MirrorStats};
pub use query::Filter;
pub use reconcile::ImportSummary;
pub use store::{DeleteResult, ReadyWork, STORE_DIR, Store, StoreStats, TaskUpdate};
pub use types::{MetaValue, Metadata, Status, Task, ValidationError};
