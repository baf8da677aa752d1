//! Command output: a versioned JSON envelope for scripts and agents, or a
//! sectioned text report for people.
//!
//! Every JSON response, success or failure, is one object carrying
//! `schema_version`, `command` and `status`. Successes add `data`, failures
//! add `error`. Warnings and suggested next steps ride along in both.

use std::fmt;

use serde::Serialize;

use crate::error::{Error, JsonError, Result};

pub const SCHEMA_VERSION: &str = "quicktodo.v1";

/// Global flags that consume the following argument
const VALUE_FLAGS: [&str; 3] = ["--config-dir", "--project", "--agent-id"];

#[derive(Debug, Clone, Copy)]
pub struct OutputOptions {
    pub json: bool,
    pub quiet: bool,
}

/// Text report: a header line, then optional `Summary`, `Details`,
/// `Warnings` and `Next steps` sections.
#[derive(Debug, Clone, Default)]
pub struct HumanOutput {
    header: String,
    summary: Vec<(String, String)>,
    details: Vec<String>,
    warnings: Vec<String>,
    next_steps: Vec<String>,
}

impl HumanOutput {
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            ..Self::default()
        }
    }

    pub fn push_summary(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.summary.push((key.into(), value.into()));
    }

    pub fn push_detail(&mut self, value: impl Into<String>) {
        self.details.push(value.into());
    }

    pub fn push_warning(&mut self, value: impl Into<String>) {
        self.warnings.push(value.into());
    }

    pub fn push_next_step(&mut self, value: impl Into<String>) {
        self.next_steps.push(value.into());
    }
}

impl fmt::Display for HumanOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.header)?;

        if !self.summary.is_empty() {
            f.write_str("\n\nSummary:")?;
            for (key, value) in &self.summary {
                match value.as_str() {
                    "" => write!(f, "\n- {key}")?,
                    value => write!(f, "\n- {key}: {value}")?,
                }
            }
        }

        let sections = [
            ("Details", &self.details),
            ("Warnings", &self.warnings),
            ("Next steps", &self.next_steps),
        ];
        for (title, items) in sections {
            if items.is_empty() {
                continue;
            }
            write!(f, "\n\n{title}:")?;
            for item in items {
                write!(f, "\n- {item}")?;
            }
        }
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum Outcome<'a, T: Serialize> {
    Success { data: &'a T },
    Error { error: JsonError },
}

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    schema_version: &'static str,
    command: &'a str,
    #[serde(flatten)]
    outcome: Outcome<'a, T>,
    #[serde(skip_serializing_if = "is_empty")]
    warnings: &'a [String],
    #[serde(skip_serializing_if = "is_empty")]
    next_steps: &'a [String],
}

fn is_empty(items: &&[String]) -> bool {
    items.is_empty()
}

impl<T: Serialize> Envelope<'_, T> {
    fn print(&self) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(self)?);
        Ok(())
    }
}

pub fn emit_success<T: Serialize>(
    options: OutputOptions,
    command: &str,
    data: &T,
    human: Option<&HumanOutput>,
) -> Result<()> {
    if options.json {
        let (warnings, next_steps) = human
            .map(|human| (human.warnings.as_slice(), human.next_steps.as_slice()))
            .unwrap_or_default();
        return Envelope {
            schema_version: SCHEMA_VERSION,
            command,
            outcome: Outcome::Success { data },
            warnings,
            next_steps,
        }
        .print();
    }

    match human {
        Some(human) if !options.quiet => println!("{human}"),
        _ => {}
    }
    Ok(())
}

/// Report a failed command. JSON goes to stdout like any other response;
/// text goes to stderr with the first suggested step as a hint.
pub fn emit_error(command: &str, err: &Error, json: bool) -> Result<()> {
    let next_steps = error_next_steps(err);
    if json {
        return Envelope::<()> {
            schema_version: SCHEMA_VERSION,
            command,
            outcome: Outcome::Error {
                error: JsonError::from(err),
            },
            warnings: &[],
            next_steps: &next_steps,
        }
        .print();
    }

    eprintln!("error: {err}");
    if let Some(hint) = next_steps.first() {
        eprintln!("hint: {hint}");
    }
    Ok(())
}

fn error_next_steps(err: &Error) -> Vec<String> {
    match err {
        Error::NotARegisteredProject(_) => vec!["quicktodo init".to_string()],
        Error::ProjectNotFound(_) => vec!["quicktodo projects".to_string()],
        Error::TaskNotFound(_) => vec!["quicktodo list-tasks".to_string()],
        Error::LockTimeout { project, .. } => vec![
            "retry once the other command finishes".to_string(),
            format!("quicktodo locks force-unlock {project}"),
        ],
        Error::InvalidConfig(_) => vec!["fix config.json then retry".to_string()],
        _ => Vec::new(),
    }
}

/// Command name for error envelopes, read from the raw arguments
/// (`locks` and `sync` report their subcommand too)
pub fn infer_command_name_from_args() -> String {
    infer_command_name(std::env::args().skip(1))
}

fn infer_command_name(args: impl IntoIterator<Item = String>) -> String {
    let mut positional = {
        let mut args = args.into_iter();
        std::iter::from_fn(move || loop {
            let arg = args.next()?;
            if VALUE_FLAGS.contains(&arg.as_str()) {
                args.next();
            } else if !arg.starts_with('-') {
                return Some(arg);
            }
        })
    };

    match positional.next() {
        None => "quicktodo".to_string(),
        Some(command) if command == "locks" || command == "sync" => match positional.next() {
            Some(sub) => format!("{command} {sub}"),
            None => command,
        },
        Some(command) => command,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn command_name_skips_global_flags() {
        assert_eq!(infer_command_name(args(&[])), "quicktodo");
        assert_eq!(
            infer_command_name(args(&["--json", "--config-dir", "/tmp/x", "list-tasks"])),
            "list-tasks"
        );
        assert_eq!(
            infer_command_name(args(&["--agent-id", "bot", "claim", "3"])),
            "claim"
        );
        assert_eq!(
            infer_command_name(args(&["locks", "--json", "force-unlock", "demo"])),
            "locks force-unlock"
        );
        assert_eq!(infer_command_name(args(&["sync", "enable"])), "sync enable");
    }

    #[test]
    fn human_output_sections() {
        let mut human = HumanOutput::new("Project: demo");
        human.push_summary("Tasks", "3");
        human.push_warning("task 2 has a stale claim");
        human.push_next_step("quicktodo list-tasks");

        let text = human.to_string();
        assert!(text.starts_with("Project: demo"));
        assert!(text.contains("Summary:\n- Tasks: 3"));
        assert!(text.contains("Warnings:\n- task 2 has a stale claim"));
        assert!(text.contains("Next steps:\n- quicktodo list-tasks"));
        assert!(!text.contains("Details:"));
    }

    #[test]
    fn envelope_shapes() {
        let data = serde_json::json!({ "total": 0 });
        let success = Envelope {
            schema_version: SCHEMA_VERSION,
            command: "list-tasks",
            outcome: Outcome::Success { data: &data },
            warnings: &[],
            next_steps: &[],
        };
        let value = serde_json::to_value(&success).unwrap();
        assert_eq!(value["status"], "success");
        assert_eq!(value["data"]["total"], 0);
        assert!(value.get("warnings").is_none());

        let steps = error_next_steps(&Error::TaskNotFound(9));
        let failure = Envelope::<()> {
            schema_version: SCHEMA_VERSION,
            command: "show-task",
            outcome: Outcome::Error {
                error: JsonError::from(&Error::TaskNotFound(9)),
            },
            warnings: &[],
            next_steps: &steps,
        };
        let value = serde_json::to_value(&failure).unwrap();
        assert_eq!(value["status"], "error");
        assert_eq!(value["error"]["kind"], "not_found");
        assert_eq!(value["error"]["code"], 2);
        assert_eq!(value["error"]["details"]["task_id"], 9);
        assert_eq!(value["next_steps"][0], "quicktodo list-tasks");
    }
}
