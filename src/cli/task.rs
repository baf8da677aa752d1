//! Task command implementations.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::CommonOptions;
use crate::error::Result;
use crate::ops::Session;
use crate::output::{emit_success, HumanOutput};
use crate::task::{Priority, Task, TaskFilter, TaskPatch, TaskStatus};

pub struct CreateOptions {
    pub title: String,
    pub description: String,
    pub priority: Option<String>,
    pub assign: Option<String>,
    pub common: CommonOptions,
}

pub struct ListOptions {
    pub status: Option<String>,
    pub priority: Option<String>,
    pub assigned_to: Option<String>,
    pub locked_by: Option<String>,
    pub common: CommonOptions,
}

pub struct ShowOptions {
    pub id: u64,
    pub common: CommonOptions,
}

pub struct StatusOptions {
    pub id: u64,
    pub status: String,
    pub common: CommonOptions,
}

pub struct EditOptions {
    pub id: u64,
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<String>,
    pub assign: Option<String>,
    pub unassign: bool,
    pub common: CommonOptions,
}

pub struct DeleteOptions {
    pub id: u64,
    pub common: CommonOptions,
}

pub struct SearchOptions {
    pub query: String,
    pub common: CommonOptions,
}

pub struct ClaimOptions {
    pub id: u64,
    pub force: bool,
    pub release: bool,
    pub common: CommonOptions,
}

#[derive(Serialize)]
struct TaskReport {
    project: String,
    task: Task,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    claim_stale: bool,
}

#[derive(Serialize)]
struct TaskListReport {
    project: String,
    total: usize,
    tasks: Vec<Task>,
}

#[derive(Serialize)]
struct DeleteReport {
    project: String,
    id: u64,
    title: String,
}

fn parse_opt<T>(value: Option<&str>) -> Result<Option<T>>
where
    T: std::str::FromStr<Err = crate::error::Error>,
{
    value.map(str::parse::<T>).transpose()
}

fn task_line(task: &Task) -> String {
    let mut line = format!(
        "#{} [{}] ({}) {}",
        task.id, task.status, task.priority, task.title
    );
    if let Some(assignee) = &task.assigned_to {
        line.push_str(&format!(" @{assignee}"));
    }
    if let Some(holder) = &task.locked_by {
        line.push_str(&format!(" [claimed by {holder}]"));
    }
    line
}

fn task_human(header: &str, task: &Task, claim_stale: bool, now: DateTime<Utc>) -> HumanOutput {
    let mut human = HumanOutput::new(format!("{header}: {}", task));
    if !task.description.is_empty() {
        human.push_summary("Description", task.description.clone());
    }
    human.push_summary("Status", task.status.to_string());
    human.push_summary("Priority", task.priority.to_string());
    if let Some(assignee) = &task.assigned_to {
        human.push_summary("Assigned to", assignee.clone());
    }
    if let Some(holder) = &task.locked_by {
        human.push_summary("Claimed by", holder.clone());
    }
    human.push_detail(format!("created {} ago", task.age(now)));
    human.push_detail(format!("updated {}", task.updated_at.to_rfc3339()));
    if claim_stale {
        human.push_warning("claim is stale; the holder may have stopped working on it");
    }
    human
}

fn emit_task(
    common: &CommonOptions,
    session: &Session,
    command: &str,
    header: &str,
    project: String,
    task: Task,
) -> Result<()> {
    let now = Utc::now();
    let claim_stale = task.is_claim_stale_after(session.config().stale_window(), now);
    let human = task_human(header, &task, claim_stale, now);
    let report = TaskReport {
        project,
        task,
        claim_stale,
    };
    emit_success(common.output(), command, &report, Some(&human))
}

pub fn run_create(options: CreateOptions) -> Result<()> {
    let priority = parse_opt::<Priority>(options.priority.as_deref())?;
    let session = options.common.open_session()?;
    let project = options.common.current_project(&session)?.name;

    let task = session.create_task(
        &project,
        &options.title,
        &options.description,
        priority,
        options.assign.as_deref(),
    )?;
    emit_task(&options.common, &session, "create-task", "Created", project, task)
}

pub fn run_list(options: ListOptions) -> Result<()> {
    let filter = TaskFilter {
        status: parse_opt::<TaskStatus>(options.status.as_deref())?,
        priority: parse_opt::<Priority>(options.priority.as_deref())?,
        assigned_to: options.assigned_to,
        locked_by: options.locked_by,
    };
    let session = options.common.open_session()?;
    let project = options.common.current_project(&session)?.name;
    let store = session.read_store(&project)?;

    let tasks = store.list_tasks(&filter);
    let mut human = HumanOutput::new(format!("Tasks in {project} ({})", tasks.len()));
    for task in &tasks {
        human.push_detail(task_line(task));
    }
    if tasks.is_empty() && filter.is_empty() {
        human.push_next_step("quicktodo create-task \"<title>\"");
    }

    let report = TaskListReport {
        project,
        total: tasks.len(),
        tasks,
    };
    emit_success(options.common.output(), "list-tasks", &report, Some(&human))
}

pub fn run_show(options: ShowOptions) -> Result<()> {
    let session = options.common.open_session()?;
    let project = options.common.current_project(&session)?.name;
    let task = session.read_store(&project)?.get_task(options.id)?;
    emit_task(&options.common, &session, "show-task", "Task", project, task)
}

pub fn run_status(options: StatusOptions) -> Result<()> {
    let status: TaskStatus = options.status.parse()?;
    let session = options.common.open_session()?;
    let project = options.common.current_project(&session)?.name;

    let task = session.update_task(&project, options.id, &TaskPatch::status(status))?;
    emit_task(&options.common, &session, "set-task-status", "Updated", project, task)
}

pub fn run_edit(options: EditOptions) -> Result<()> {
    let assigned_to = if options.unassign {
        Some(None)
    } else {
        options.assign.map(Some)
    };
    let patch = TaskPatch {
        title: options.title,
        description: options.description,
        status: None,
        priority: parse_opt::<Priority>(options.priority.as_deref())?,
        assigned_to,
    };
    patch.validate()?;

    let session = options.common.open_session()?;
    let project = options.common.current_project(&session)?.name;
    let task = session.update_task(&project, options.id, &patch)?;
    let header = if patch.is_empty() { "Unchanged" } else { "Updated" };
    emit_task(&options.common, &session, "edit-task", header, project, task)
}

pub fn run_delete(options: DeleteOptions) -> Result<()> {
    let session = options.common.open_session()?;
    let project = options.common.current_project(&session)?.name;
    let task = session.delete_task(&project, options.id)?;

    let human = HumanOutput::new(format!("Deleted task {}: {}", task.id, task.title));
    let report = DeleteReport {
        project,
        id: task.id,
        title: task.title,
    };
    emit_success(options.common.output(), "delete-task", &report, Some(&human))
}

pub fn run_search(options: SearchOptions) -> Result<()> {
    let session = options.common.open_session()?;
    let project = options.common.current_project(&session)?.name;
    let tasks = session.read_store(&project)?.search_tasks(&options.query);

    let mut human = HumanOutput::new(format!(
        "Tasks matching \"{}\" ({})",
        options.query,
        tasks.len()
    ));
    for task in &tasks {
        human.push_detail(task_line(task));
    }

    let report = TaskListReport {
        project,
        total: tasks.len(),
        tasks,
    };
    emit_success(options.common.output(), "search", &report, Some(&human))
}

pub fn run_claim(options: ClaimOptions) -> Result<()> {
    let session = options.common.open_session()?;
    let project = options.common.current_project(&session)?.name;

    if options.release {
        let task = session.release_claim(&project, options.id, options.force)?;
        emit_task(&options.common, &session, "unclaim", "Released", project, task)
    } else {
        let task = session.claim_task(&project, options.id, options.force)?;
        emit_task(&options.common, &session, "claim", "Claimed", project, task)
    }
}
