//! taskmem CLI - a local task memory with dependency tracking.

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use serde::Serialize;
use std::fs;
use std::io::Read;
use std::path::PathBuf;
use taskmem::output::{self, HumanOutput};
use taskmem::{Filter, ImportSummary, STORE_DIR, Status, Store, StoreBuilderExt, Task, TaskUpdate, error, exit_codes};

mod cli;

use cli::{Cli, Command, UpdateArgs};

fn setup_logging() -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("taskmem")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("taskmem.log");

    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

fn get_root_dir(cli: &Cli) -> PathBuf {
    cli.dir
        .clone()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}

fn format_status(status: &Status) -> ColoredString {
    match status {
        Status::Todo => "todo".green(),
        Status::Doing => "doing".yellow(),
        Status::Blocked => "blocked".red(),
        Status::Done => "done".blue(),
    }
}

fn print_task_line(task: &Task) {
    let feature = task.feature().map(|f| format!(" [{}]", f)).unwrap_or_default();
    println!(
        "{:>7} {} {}{}",
        format_status(&task.status),
        task.id.cyan(),
        task.title,
        feature.dimmed()
    );
}

fn print_task(task: &Task) {
    println!("{}: {}", "ID".bold(), task.id.cyan());
    println!("{}: {}", "Title".bold(), task.title);
    println!("{}: {}", "Status".bold(), format_status(&task.status));
    if let Some(desc) = &task.description {
        println!("{}: {}", "Description".bold(), desc);
    }
    if !task.blocked_by.is_empty() {
        println!("{}: {}", "Blocked by".bold(), task.blocked_by.join(", "));
    }
    if !task.blocks.is_empty() {
        println!("{}: {}", "Blocks".bold(), task.blocks.join(", "));
    }
    if !task.metadata.is_empty() {
        println!("{}: {}", "Metadata".bold(), task.metadata.to_json_string());
    }
    println!("{}: {}", "Created".bold(), task.created);
    println!("{}: {}", "Updated".bold(), task.updated);
}

/// JSON envelope, or the text printer when `--json` is off.
fn emit<T: Serialize>(json: bool, command: &str, data: &T, print: impl FnOnce()) -> Result<()> {
    if json {
        return output::emit_success(json, command, data, None);
    }
    print();
    Ok(())
}

fn import_report(header: &str, summary: &ImportSummary) -> HumanOutput {
    let mut out = HumanOutput::new(format!("{} {}", "✓".green(), header));
    out.push_summary("new", summary.new);
    out.push_summary("updated", summary.updated);
    out.push_summary("unchanged", summary.unchanged);
    out.push_summary("skipped", summary.skipped);
    out.push_summary("edges dropped", summary.edges_dropped);
    for diagnostic in &summary.diagnostics {
        out.push_warning(diagnostic.to_string());
    }
    out
}

/// `export --stdout` under `--json`: the mirror text inside the envelope.
fn mirror_payload(text: &str) -> serde_json::Value {
    serde_json::json!({
        "lines": text.lines().count(),
        "bytes": text.len(),
        "text": text,
    })
}

fn to_update(args: &UpdateArgs) -> Result<TaskUpdate> {
    let metadata = args
        .metadata
        .as_deref()
        .map(taskmem::Metadata::parse)
        .transpose()
        .map_err(taskmem::StoreError::from)?;

    Ok(TaskUpdate {
        title: args.title.clone(),
        description: args.description.clone(),
        status: args.status,
        metadata,
        add_blocks: args.add_blocks.clone(),
        remove_blocks: args.remove_blocks.clone(),
        add_blocked_by: args.add_blocked_by.clone(),
        remove_blocked_by: args.remove_blocked_by.clone(),
    })
}

fn run(cli: &Cli) -> Result<()> {
    let root = get_root_dir(cli);
    let json = cli.json;
    let name = cli.command.name();

    match &cli.command {
        Command::Init => {
            let store = Store::init(&root).context("Failed to initialize task store")?;
            let data = serde_json::json!({
                "root": root,
                "store_dir": root.join(STORE_DIR),
                "mirror": store.mirror_path(),
            });
            emit(json, name, &data, || {
                println!("{} Initialized task store in {}", "✓".green(), root.join(STORE_DIR).display());
            })?;
        }

        Command::Create {
            title,
            description,
            meta,
            blocked_by,
        } => {
            let mut store = Store::open(&root)?;
            let mut builder = store.build(title.as_str());
            if let Some(desc) = description {
                builder = builder.description(desc.as_str());
            }
            if let Some(metadata) = meta.to_metadata()? {
                for (key, value) in metadata.iter() {
                    builder = builder.meta(key.as_str(), value.clone());
                }
            }
            for id in blocked_by {
                builder = builder.blocked_by(id.as_str());
            }
            let task = builder.create()?;

            emit(json, name, &task, || {
                println!("{} Created: {} {}", "✓".green(), task.id.cyan(), task.title);
            })?;
        }

        Command::List { status, feature, ready } => {
            let store = Store::open(&root)?;
            let mut filter = Filter::new().statuses(status.iter().copied()).ready_only(*ready);
            if let Some(feature) = feature {
                filter = filter.feature(feature.as_str());
            }
            let tasks = store.list(&filter)?;

            emit(json, name, &tasks, || {
                if tasks.is_empty() {
                    println!("{}", "No tasks found".dimmed());
                }
                for task in &tasks {
                    print_task_line(task);
                }
            })?;
        }

        Command::Show { id } => {
            let store = Store::open(&root)?;
            let task = store.get(id)?;
            emit(json, name, &task, || print_task(&task))?;
        }

        Command::Update(args) => {
            let mut store = Store::open(&root)?;
            let task = store.update(&args.id, &to_update(args)?)?;
            emit(json, name, &task, || {
                println!(
                    "{} Updated: {} {} ({})",
                    "✓".green(),
                    task.id.cyan(),
                    task.title,
                    format_status(&task.status)
                );
            })?;
        }

        Command::Start { id } | Command::Complete { id } | Command::Reopen { id } => {
            let (target, verb) = match &cli.command {
                Command::Start { .. } => (Status::Doing, "Started"),
                Command::Complete { .. } => (Status::Done, "Completed"),
                _ => (Status::Todo, "Reopened"),
            };
            let mut store = Store::open(&root)?;
            let task = store.set_status(id, target)?;
            emit(json, name, &task, || {
                println!("{} {}: {} {}", "→".blue(), verb, task.id.cyan(), task.title);
            })?;
        }

        Command::Block { blocked_id, blocker_id } => {
            let mut store = Store::open(&root)?;
            store
                .add_edge(blocker_id, blocked_id)
                .context("Failed to add blocking edge")?;
            let task = store.get(blocked_id)?;

            emit(json, name, &task, || {
                println!(
                    "{} {} is now blocked by {}",
                    "✓".green(),
                    blocked_id.cyan(),
                    blocker_id.cyan()
                );
            })?;
        }

        Command::Unblock { blocked_id, blocker_id } => {
            let mut store = Store::open(&root)?;
            store
                .remove_edge(blocker_id, blocked_id)
                .context("Failed to remove blocking edge")?;
            let task = store.get(blocked_id)?;

            emit(json, name, &task, || {
                println!(
                    "{} {} is no longer blocked by {} ({})",
                    "✓".green(),
                    blocked_id.cyan(),
                    blocker_id.cyan(),
                    format_status(&task.status)
                );
            })?;
        }

        Command::Delete { id, force } => {
            let mut store = Store::open(&root)?;
            let result = store.delete(id, *force)?;
            emit(json, name, &result, || {
                println!(
                    "{} Deleted: {} ({} linked task(s) updated)",
                    "✓".green(),
                    result.deleted_id.cyan(),
                    result.dependents_updated
                );
            })?;
        }

        Command::Ready => {
            let store = Store::open(&root)?;
            let ready = store.ready()?;

            emit(json, name, &ready, || {
                if ready.tasks.is_empty() {
                    println!("{}", "No ready tasks".dimmed());
                    return;
                }
                println!("{} {} task(s) ready to work on:", "→".blue(), ready.tasks.len());
                for task in &ready.tasks {
                    println!("  {} {}", task.id.cyan(), task.title);
                }
                if let Some(next) = &ready.suggested_next {
                    println!("{} {}", "Suggested next:".bold(), next.cyan());
                }
            })?;
        }

        Command::Blocked => {
            let store = Store::open(&root)?;
            let tasks = store.blocked()?;

            emit(json, name, &tasks, || {
                if tasks.is_empty() {
                    println!("{}", "No blocked tasks".dimmed());
                    return;
                }
                println!("{} {} task(s) blocked:", "⊘".red(), tasks.len());
                for task in &tasks {
                    let blockers = format!("<- {}", task.blocked_by.join(", "));
                    println!("  {} {} {}", task.id.cyan(), task.title, blockers.dimmed());
                }
            })?;
        }

        Command::Stats => {
            let store = Store::open(&root)?;
            let stats = store.stats()?;

            let mut human = HumanOutput::new(format!("{} tasks", stats.total));
            human.push_summary("todo", stats.todo);
            human.push_summary("doing", stats.doing);
            human.push_summary("blocked", stats.blocked);
            human.push_summary("done", stats.done);
            human.push_summary("ready", stats.ready);
            human.push_summary("edges", stats.edges);
            output::emit_success(json, name, &stats, Some(&human))?;
        }

        Command::Import { file, replace } => {
            let mut store = Store::open(&root)?;
            let summary = match file {
                Some(path) => store.import_file(path, *replace)?,
                None => {
                    let mut text = String::new();
                    std::io::stdin()
                        .read_to_string(&mut text)
                        .context("Failed to read stdin")?;
                    store.import(&text, *replace)?
                }
            };
            let human = import_report("Imported", &summary);
            output::emit_success(json, name, &summary, Some(&human))?;
        }

        Command::Export { output: dest, stdout } => {
            let mut store = Store::open(&root)?;
            if *stdout {
                let text = store.export_text()?;
                if json {
                    output::emit_success(json, name, &mirror_payload(&text), None)?;
                } else {
                    print!("{}", text);
                }
                return Ok(());
            }
            let stats = store.export(dest.as_deref())?;
            let mut human = HumanOutput::new(format!("{} Exported to {}", "✓".green(), stats.path.display()));
            human.push_summary("tasks", stats.lines);
            human.push_summary("bytes", stats.bytes);
            output::emit_success(json, name, &stats, Some(&human))?;
        }

        Command::Rebuild => {
            let (_store, summary) = Store::rebuild(&root)?;
            let human = import_report("Rebuilt database from mirror", &summary);
            output::emit_success(json, name, &summary, Some(&human))?;
        }
    }

    Ok(())
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = setup_logging() {
        eprintln!("{} {:#}", "Warning:".yellow(), e);
    }

    if cli.json {
        colored::control::set_override(false);
    }

    if let Err(e) = run(&cli) {
        log::error!("{} failed: {:#}", cli.command.name(), e);
        if let Err(render) = output::emit_error(cli.json, cli.command.name(), &e) {
            eprintln!("{} {:#}", "Error:".red().bold(), render);
        }
        std::process::exit(error::exit_code(&e));
    }

    std::process::exit(exit_codes::SUCCESS);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mirror_payload_carries_text_and_counts() {
        let text = "{\"id\":\"tm-a\"}\n{\"id\":\"tm-b\"}\n";
        let payload = mirror_payload(text);
        assert_eq!(payload["lines"], 2);
        assert_eq!(payload["bytes"], text.len());
        assert_eq!(payload["text"], text);
    }

    #[test]
    fn test_mirror_payload_empty_store() {
        let payload = mirror_payload("");
        assert_eq!(payload["lines"], 0);
        assert_eq!(payload["text"], "");
    }
}
