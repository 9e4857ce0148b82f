//! CLI argument parsing for taskmem.

use clap::{Args, Parser, Subcommand};
use eyre::Result;
use std::path::PathBuf;

use taskmem::{Metadata, Status, StoreError};

#[derive(Parser)]
#[command(
    name = "tm",
    about = "A local task memory with dependency tracking and a git-friendly mirror",
    version = env!("GIT_DESCRIBE"),
    after_help = "Logs are written to: ~/.local/share/taskmem/logs/taskmem.log"
)]
pub struct Cli {
    /// Project directory containing .taskmem (default: current directory)
    #[arg(short = 'd', long, global = true)]
    pub dir: Option<PathBuf>,

    /// Print a JSON envelope instead of text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Initialize a task store in the project directory
    Init,

    /// Create a new task
    Create {
        /// Task title (5-200 characters)
        title: String,

        /// Description
        #[arg(short = 'D', long)]
        description: Option<String>,

        #[command(flatten)]
        meta: MetaArgs,

        /// Tasks that block the new one (comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        blocked_by: Vec<String>,
    },

    /// List tasks
    List {
        /// Filter by status (repeatable: todo, doing, done, blocked)
        #[arg(short, long)]
        status: Vec<Status>,

        /// Filter by the `feature` metadata label
        #[arg(short, long)]
        feature: Option<String>,

        /// Only tasks ready to work on
        #[arg(short, long)]
        ready: bool,
    },

    /// Show one task
    Show {
        /// Task ID
        id: String,
    },

    /// Update fields and edges of a task
    Update(UpdateArgs),

    /// Start working on a task (status doing)
    Start {
        /// Task ID
        id: String,
    },

    /// Mark a task done
    Complete {
        /// Task ID
        id: String,
    },

    /// Reopen a task (status todo)
    Reopen {
        /// Task ID
        id: String,
    },

    /// Add a blocking dependency
    Block {
        /// Task that is blocked
        blocked_id: String,

        /// Task that is blocking (must be completed first)
        blocker_id: String,
    },

    /// Remove a blocking dependency
    Unblock {
        /// Task that is blocked
        blocked_id: String,

        /// Task that was blocking
        blocker_id: String,
    },

    /// Delete a task
    Delete {
        /// Task ID
        id: String,

        /// Also remove its dependency links
        #[arg(short, long)]
        force: bool,
    },

    /// Show tasks that are ready to work on
    Ready,

    /// Show blocked tasks and what blocks them
    Blocked,

    /// Show counts per status
    Stats,

    /// Import a mirror file (stdin when no file is given)
    Import {
        /// JSONL file to read
        file: Option<PathBuf>,

        /// Clear the store first instead of merging
        #[arg(long)]
        replace: bool,
    },

    /// Regenerate the mirror file
    Export {
        /// Write to this path instead of the store's mirror
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print the mirror to stdout instead of writing a file
        #[arg(long, conflicts_with = "output")]
        stdout: bool,
    },

    /// Recreate the database from the mirror file
    Rebuild,
}

impl Command {
    /// Name reported in the JSON envelope.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Init => "init",
            Command::Create { .. } => "create",
            Command::List { .. } => "list",
            Command::Show { .. } => "show",
            Command::Update(_) => "update",
            Command::Start { .. } => "start",
            Command::Complete { .. } => "complete",
            Command::Reopen { .. } => "reopen",
            Command::Block { .. } => "block",
            Command::Unblock { .. } => "unblock",
            Command::Delete { .. } => "delete",
            Command::Ready => "ready",
            Command::Blocked => "blocked",
            Command::Stats => "stats",
            Command::Import { .. } => "import",
            Command::Export { .. } => "export",
            Command::Rebuild => "rebuild",
        }
    }
}

#[derive(Args)]
pub struct UpdateArgs {
    /// Task ID
    pub id: String,

    /// New title
    #[arg(short, long)]
    pub title: Option<String>,

    /// New description (empty string clears it)
    #[arg(short = 'D', long)]
    pub description: Option<String>,

    /// New status (todo, doing, done)
    #[arg(short, long)]
    pub status: Option<Status>,

    /// Replace the whole metadata map with this JSON object
    #[arg(long)]
    pub metadata: Option<String>,

    /// This task blocks these tasks (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub add_blocks: Vec<String>,

    /// This task no longer blocks these tasks
    #[arg(long, value_delimiter = ',')]
    pub remove_blocks: Vec<String>,

    /// These tasks block this one
    #[arg(long, value_delimiter = ',')]
    pub add_blocked_by: Vec<String>,

    /// These tasks no longer block this one
    #[arg(long, value_delimiter = ',')]
    pub remove_blocked_by: Vec<String>,
}

#[derive(Args)]
pub struct MetaArgs {
    /// Metadata entry as key=value (repeatable); JSON values are parsed
    #[arg(short = 'm', long = "meta", value_name = "KEY=VALUE")]
    pub entries: Vec<String>,

    /// Metadata as a JSON object
    #[arg(long, conflicts_with = "entries")]
    pub metadata: Option<String>,
}

impl MetaArgs {
    /// Build the metadata map, or None when no flag was given.
    pub fn to_metadata(&self) -> Result<Option<Metadata>> {
        if let Some(json) = &self.metadata {
            return Ok(Some(Metadata::parse(json).map_err(StoreError::from)?));
        }
        if self.entries.is_empty() {
            return Ok(None);
        }
        Ok(Some(parse_meta_entries(&self.entries)?))
    }
}

/// Parse `key=value` pairs. Values that read as JSON numbers, booleans or
/// string arrays keep that type; anything else is text.
pub fn parse_meta_entries(entries: &[String]) -> Result<Metadata> {
    let mut map = serde_json::Map::new();
    for entry in entries {
        let (key, raw) = entry
            .split_once('=')
            .ok_or_else(|| StoreError::invalid("metadata", format!("expected KEY=VALUE, got {:?}", entry)))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(StoreError::invalid("metadata", format!("empty key in {:?}", entry)).into());
        }

        let value = match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(v @ (serde_json::Value::Number(_) | serde_json::Value::Bool(_) | serde_json::Value::Array(_))) => v,
            _ => serde_json::Value::String(raw.to_string()),
        };
        map.insert(key.to_string(), value);
    }
    Ok(Metadata::from_json(serde_json::Value::Object(map)).map_err(StoreError::from)?)
}
