//! Output for the `tm` binary: the `--json` envelope and plain-text reports.

use eyre::Result;
use serde::Serialize;

use crate::error::{self, StoreError};

/// Render a successful command.
///
/// With `json`, prints `{"ok": true, "command", "data"}` on stdout. Otherwise
/// prints the human text, if any.
pub fn emit_success<T: Serialize>(json: bool, command: &str, data: &T, human: Option<&HumanOutput>) -> Result<()> {
    if json {
        #[derive(Serialize)]
        struct Envelope<'a, T: Serialize> {
            ok: bool,
            command: &'a str,
            data: &'a T,
        }

        let payload = Envelope {
            ok: true,
            command,
            data,
        };
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    if let Some(human) = human {
        println!("{}", human.render());
    }
    Ok(())
}

/// Render a failed command. JSON goes to stdout so scripts can parse it;
/// the plain-text form goes to stderr.
pub fn emit_error(json: bool, command: &str, err: &eyre::Report) -> Result<()> {
    let typed = error::store_error(err);
    // Anything without a typed error is an environment failure
    let kind = typed.map(StoreError::kind).unwrap_or("Internal");
    let hint = typed.and_then(|e| e.hint());

    if json {
        #[derive(Serialize)]
        struct ErrorBody<'a> {
            kind: &'a str,
            message: String,
            #[serde(skip_serializing_if = "Option::is_none")]
            hint: Option<String>,
        }

        #[derive(Serialize)]
        struct Envelope<'a> {
            ok: bool,
            command: &'a str,
            error: ErrorBody<'a>,
        }

        let payload = Envelope {
            ok: false,
            command,
            error: ErrorBody {
                kind,
                message: format!("{:#}", err),
                hint,
            },
        };
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    eprintln!("error: {:#}", err);
    if let Some(hint) = hint {
        eprintln!("hint: {}", hint);
    }
    Ok(())
}

/// A plain-text report: header line, key/value summary, optional sections.
#[derive(Debug, Clone, Default)]
pub struct HumanOutput {
    header: String,
    summary: Vec<(String, String)>,
    details: Vec<String>,
    warnings: Vec<String>,
}

impl HumanOutput {
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            ..Default::default()
        }
    }

    pub fn push_summary(&mut self, key: impl Into<String>, value: impl ToString) {
        self.summary.push((key.into(), value.to_string()));
    }

    pub fn push_detail(&mut self, value: impl Into<String>) {
        self.details.push(value.into());
    }

    pub fn push_warning(&mut self, value: impl Into<String>) {
        self.warnings.push(value.into());
    }

    pub fn render(&self) -> String {
        let mut lines = vec![self.header.clone()];

        if !self.summary.is_empty() {
            lines.push(String::new());
            let width = self.summary.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
            for (key, value) in &self.summary {
                lines.push(format!("  {:width$}  {}", key, value, width = width));
            }
        }
        push_section(&mut lines, "Details", &self.details);
        push_section(&mut lines, "Warnings", &self.warnings);

        lines.join("\n")
    }
}

fn push_section(lines: &mut Vec<String>, title: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }

    lines.push(String::new());
    lines.push(format!("{}:", title));
    for item in items {
        lines.push(format!("  - {}", item));
    }
}
