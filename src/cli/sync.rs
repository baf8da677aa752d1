//! TODO mirror commands.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::CommonOptions;
use crate::error::Result;
use crate::output::{emit_success, HumanOutput};
use crate::sync::{TodoItem, TodoStatus, TodoSync};

pub struct EnableOptions {
    pub file: Option<PathBuf>,
    pub common: CommonOptions,
}

#[derive(Serialize)]
struct SyncStateReport {
    enabled: bool,
    todo_file: PathBuf,
}

#[derive(Serialize)]
struct SyncStatusReport {
    enabled: bool,
    todo_file: PathBuf,
    last_sync: Option<DateTime<Utc>>,
    total: usize,
    projects: BTreeMap<String, usize>,
    todos: Vec<TodoItem>,
}

#[derive(Serialize)]
struct FullSyncReport {
    project: String,
    synced: usize,
    total: usize,
}

fn state_report(sync: &TodoSync) -> SyncStateReport {
    SyncStateReport {
        enabled: sync.is_enabled(),
        todo_file: sync.todo_file().to_path_buf(),
    }
}

pub fn run_enable(options: EnableOptions) -> Result<()> {
    let session = options.common.open_session()?;
    let mut sync = session.todo_sync()?;
    sync.enable(options.file)?;

    let report = state_report(&sync);
    let mut human = HumanOutput::new("TODO sync enabled");
    human.push_summary("File", report.todo_file.display().to_string());
    human.push_detail("task changes are now mirrored to the TODO file");
    human.push_next_step("quicktodo sync full");

    emit_success(options.common.output(), "sync enable", &report, Some(&human))
}

pub fn run_disable(common: CommonOptions) -> Result<()> {
    let session = common.open_session()?;
    let mut sync = session.todo_sync()?;
    sync.disable()?;

    let report = state_report(&sync);
    let human = HumanOutput::new("TODO sync disabled");
    emit_success(common.output(), "sync disable", &report, Some(&human))
}

pub fn run_status(common: CommonOptions) -> Result<()> {
    let session = common.open_session()?;
    let sync = session.todo_sync()?;
    let todos = sync.items()?;

    let mut projects: BTreeMap<String, usize> = BTreeMap::new();
    for item in &todos {
        *projects.entry(item.project.clone()).or_default() += 1;
    }
    let report = SyncStatusReport {
        enabled: sync.is_enabled(),
        todo_file: sync.todo_file().to_path_buf(),
        last_sync: sync.config().last_sync,
        total: todos.len(),
        projects,
        todos,
    };

    let state = if report.enabled { "enabled" } else { "disabled" };
    let mut human = HumanOutput::new(format!("TODO sync {state}"));
    human.push_summary("File", report.todo_file.display().to_string());
    human.push_summary("Items", report.total.to_string());
    if let Some(at) = report.last_sync {
        human.push_summary("Last full sync", at.format("%Y-%m-%d %H:%M").to_string());
    }
    for item in &report.todos {
        let mark = match item.status {
            TodoStatus::Pending => "[ ]",
            TodoStatus::InProgress => "[~]",
            TodoStatus::Completed => "[x]",
        };
        human.push_detail(format!("{} {mark} {} ({})", item.project, item.content, item.priority));
        if item.claim_stale {
            human.push_warning(format!("{} has a stale claim", item.id));
        }
    }
    if !report.enabled {
        human.push_next_step("quicktodo sync enable");
    } else if report.total == 0 {
        human.push_next_step("quicktodo sync full");
    }

    emit_success(common.output(), "sync status", &report, Some(&human))
}

pub fn run_full(common: CommonOptions) -> Result<()> {
    let session = common.open_session()?;
    let entry = common.current_project(&session)?;
    let synced = session.full_sync(&entry.name)?;
    let total = session.todo_sync()?.items()?.len();

    let report = FullSyncReport {
        project: entry.name,
        synced,
        total,
    };
    let mut human = HumanOutput::new(format!(
        "Synchronized {synced} task(s) from {}",
        report.project
    ));
    human.push_summary("Items in TODO file", total.to_string());

    emit_success(common.output(), "sync full", &report, Some(&human))
}
