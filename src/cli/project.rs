//! Project command implementations.

use std::path::PathBuf;

use chrono::Utc;
use serde::Serialize;

use super::CommonOptions;
use crate::error::Result;
use crate::output::{emit_success, HumanOutput};
use crate::registry::RegistryEntry;
use crate::store::ProjectSummary;

pub struct InitOptions {
    pub name: Option<String>,
    pub description: Option<String>,
    pub dir: Option<PathBuf>,
    pub common: CommonOptions,
}

pub struct RemoveOptions {
    pub name: String,
    pub delete_data: bool,
    pub common: CommonOptions,
}

#[derive(Serialize)]
struct InitReport {
    name: String,
    path: PathBuf,
    store: PathBuf,
    version: u64,
}

#[derive(Serialize)]
struct StatusReport {
    #[serde(flatten)]
    summary: ProjectSummary,
    version: u64,
    backups: usize,
    stale_claims: Vec<u64>,
}

#[derive(Serialize)]
struct ProjectListReport {
    total: usize,
    projects: Vec<RegistryEntry>,
}

#[derive(Serialize)]
struct RemoveReport {
    name: String,
    path: PathBuf,
    deleted_data: bool,
}

#[derive(Serialize)]
struct CleanupReport {
    removed: Vec<String>,
}

pub fn run_init(options: InitOptions) -> Result<()> {
    let session = options.common.open_session()?;
    let dir = match options.dir {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };

    let store = session.init_project(
        options.name.as_deref(),
        &dir,
        options.description.as_deref(),
    )?;
    let name = store.project.name.clone();
    let report = InitReport {
        name: name.clone(),
        path: store.project.path.clone(),
        store: session.storage().store_file(&name),
        version: store.version(),
    };

    let mut human = HumanOutput::new(format!("Project initialized: {name}"));
    human.push_summary("Path", report.path.display().to_string());
    human.push_summary("Store", report.store.display().to_string());
    if !store.project.description.is_empty() {
        human.push_summary("Description", store.project.description.clone());
    }
    human.push_next_step("quicktodo create-task \"<title>\"");

    emit_success(options.common.output(), "init", &report, Some(&human))
}

pub fn run_status(common: CommonOptions) -> Result<()> {
    let session = common.open_session()?;
    let entry = common.current_project(&session)?;
    let store = session.read_store(&entry.name)?;

    let now = Utc::now();
    let window = session.config().stale_window();
    let stale_claims: Vec<u64> = store
        .tasks()
        .iter()
        .filter(|task| task.is_claim_stale_after(window, now))
        .map(|task| task.id)
        .collect();

    let report = StatusReport {
        summary: store.summary(),
        version: store.version(),
        backups: session.storage().list_backups(&entry.name)?.len(),
        stale_claims,
    };

    let summary = &report.summary;
    let mut human = HumanOutput::new(format!("Project: {}", summary.project.name));
    human.push_summary("Path", summary.project.path.display().to_string());
    human.push_summary("Tasks", summary.task_count.to_string());
    human.push_summary("Pending", summary.pending_tasks.to_string());
    human.push_summary("In progress", summary.in_progress_tasks.to_string());
    human.push_summary("Done", summary.completed_tasks.to_string());
    human.push_summary("Backups", report.backups.to_string());
    for (priority, count) in &summary.priority_counts {
        human.push_detail(format!("{priority} priority: {count}"));
    }
    if let Some(updated) = summary.last_task_update {
        human.push_detail(format!("last task update: {}", updated.to_rfc3339()));
    }
    for id in &report.stale_claims {
        human.push_warning(format!("task {id} has a stale claim"));
    }
    if summary.task_count == 0 {
        human.push_next_step("quicktodo create-task \"<title>\"");
    }

    emit_success(common.output(), "status", &report, Some(&human))
}

pub fn run_list(common: CommonOptions) -> Result<()> {
    let session = common.open_session()?;
    let registry = session.load_registry()?;
    let projects: Vec<RegistryEntry> = registry.list().into_iter().cloned().collect();
    let report = ProjectListReport {
        total: projects.len(),
        projects,
    };

    let mut human = HumanOutput::new(format!("Projects ({})", report.total));
    for entry in &report.projects {
        human.push_detail(format!(
            "{}  {}  (last accessed {})",
            entry.name,
            entry.path.display(),
            entry.last_accessed.format("%Y-%m-%d %H:%M")
        ));
    }
    if report.total == 0 {
        human.push_next_step("quicktodo init");
    }

    emit_success(common.output(), "projects", &report, Some(&human))
}

pub fn run_remove(options: RemoveOptions) -> Result<()> {
    let session = options.common.open_session()?;
    let entry = session.remove_project(&options.name, options.delete_data)?;
    let report = RemoveReport {
        name: entry.name.clone(),
        path: entry.path.clone(),
        deleted_data: options.delete_data,
    };

    let mut human = HumanOutput::new(format!("Project removed: {}", entry.name));
    human.push_summary("Path", entry.path.display().to_string());
    if !options.delete_data {
        human.push_detail("task data kept; re-run with --delete-data to remove it");
    }

    emit_success(options.common.output(), "remove-project", &report, Some(&human))
}

pub fn run_cleanup(common: CommonOptions) -> Result<()> {
    let session = common.open_session()?;
    let removed = session.cleanup_registry()?;

    let mut human = HumanOutput::new(format!("Removed {} stale project(s)", removed.len()));
    for name in &removed {
        human.push_detail(name.clone());
    }
    let report = CleanupReport { removed };

    emit_success(common.output(), "cleanup", &report, Some(&human))
}

const CONTEXT: &str = r#"# quicktodo usage for agents

## Core commands
quicktodo init                                  # register this directory (once)
quicktodo create-task "Title" --priority high   # create a task
quicktodo list-tasks --json                     # list tasks
quicktodo set-task-status <id> <status>         # change status
quicktodo mark-completed <id>                   # mark done
quicktodo edit-task <id> --title "New title"    # edit a task
quicktodo claim <id> --agent-id <you>           # advertise that you are working on it
quicktodo unclaim <id> --agent-id <you>         # release your claim
quicktodo sync enable                           # mirror tasks into ai_todos.json

## Values
status:   pending | in_progress | done
priority: low | medium | high

## Exit codes
0 success | 2 bad input or not found | 3 project busy, retry | 4 operation failed

## Common errors
"No project registered for"   run `quicktodo init` first
"Task not found"              check the id with `quicktodo list-tasks`
"Timed out waiting for lock"  another command is saving; retry
"#;

#[derive(Serialize)]
struct ContextReport {
    instructions: &'static str,
}

pub fn run_context(common: CommonOptions) -> Result<()> {
    if common.json {
        let report = ContextReport {
            instructions: CONTEXT,
        };
        return emit_success(common.output(), "context", &report, None);
    }
    print!("{CONTEXT}");
    Ok(())
}
