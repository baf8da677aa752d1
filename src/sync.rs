//! Mirror of project tasks into an AI TODO list file.
//!
//! When enabled, every saved task change is copied into one JSON document
//! shared by all projects (`ai_todos.json` by default), keyed
//! `<project>-<task id>`. Agents that keep their own TODO list can read it
//! instead of opening each project store.
//!
//! The mirror is never authoritative. Hooks run after the project lock is
//! released and their failures are only logged by the caller. Writers to
//! the TODO file serialize on their own lock under `<data_dir>/sync/`.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::lock::{self, LockManager};
use crate::storage::Storage;
use crate::task::{Priority, Task, TaskStatus};

const TODO_LOCK_NAME: &str = "todos";

/// Settings stored in `<data_dir>/sync_config.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoSyncConfig {
    /// Off until explicitly enabled
    #[serde(default)]
    pub enabled: bool,

    /// Mirror file; `<data_dir>/ai_todos.json` when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub todo_file: Option<PathBuf>,

    /// Mirror changes not covered by a specific switch (claims)
    #[serde(default = "default_true")]
    pub auto_sync: bool,

    #[serde(default = "default_true")]
    pub sync_on_create: bool,

    #[serde(default = "default_true")]
    pub sync_on_status: bool,

    #[serde(default = "default_true")]
    pub sync_on_edit: bool,

    #[serde(default = "default_true")]
    pub sync_on_delete: bool,

    /// Time of the last full sync
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

impl Default for TodoSyncConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            todo_file: None,
            auto_sync: true,
            sync_on_create: true,
            sync_on_status: true,
            sync_on_edit: true,
            sync_on_delete: true,
            last_sync: None,
        }
    }
}

impl TodoSyncConfig {
    fn wants(&self, change: &TaskChange<'_>) -> bool {
        if !self.enabled {
            return false;
        }
        match change {
            TaskChange::Created(_) => self.sync_on_create,
            TaskChange::StatusChanged(_) => self.sync_on_status,
            TaskChange::Edited(_) => self.sync_on_edit,
            TaskChange::Claimed(_) => self.auto_sync,
            TaskChange::Deleted { .. } => self.sync_on_delete,
        }
    }
}

/// Status vocabulary of agent TODO lists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
}

impl From<TaskStatus> for TodoStatus {
    fn from(status: TaskStatus) -> Self {
        match status {
            TaskStatus::Pending => TodoStatus::Pending,
            TaskStatus::InProgress => TodoStatus::InProgress,
            TaskStatus::Done => TodoStatus::Completed,
        }
    }
}

/// One mirrored task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: String,
    pub project: String,
    pub task_id: u64,
    /// `#<id> <title>`, plus ` - <description>` when there is one
    pub content: String,
    pub status: TodoStatus,
    pub priority: Priority,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub claim_stale: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl TodoItem {
    pub fn from_task(project: &str, task: &Task, now: DateTime<Utc>) -> Self {
        let mut content = format!("#{} {}", task.id, task.title);
        if !task.description.is_empty() {
            content.push_str(" - ");
            content.push_str(&task.description);
        }
        Self {
            id: todo_id(project, task.id),
            project: project.to_string(),
            task_id: task.id,
            content,
            status: task.status.into(),
            priority: task.priority,
            updated_at: task.updated_at,
            claimed_by: task.locked_by.clone(),
            claim_stale: task.is_claim_stale(now),
        }
    }
}

pub fn todo_id(project: &str, task_id: u64) -> String {
    format!("{project}-{task_id}")
}

/// A saved task change, as seen by the mirror
#[derive(Debug, Clone, Copy)]
pub enum TaskChange<'a> {
    Created(&'a Task),
    StatusChanged(&'a Task),
    Edited(&'a Task),
    /// Claim taken or released
    Claimed(&'a Task),
    Deleted { id: u64 },
}

/// Handle on the sync settings and the mirror file
#[derive(Debug)]
pub struct TodoSync {
    config: TodoSyncConfig,
    config_file: PathBuf,
    todo_file: PathBuf,
    locks: LockManager,
}

impl TodoSync {
    /// Read the sync settings. A missing settings file means defaults
    /// (disabled); nothing is written until the settings change.
    pub fn open(storage: &Storage, lock_timeout: Duration) -> Result<Self> {
        let config_file = storage.sync_config_file();
        let config = load_config(&config_file)?;
        let todo_file = config
            .todo_file
            .clone()
            .unwrap_or_else(|| storage.default_todo_file());
        Ok(Self {
            config,
            config_file,
            todo_file,
            locks: LockManager::new(storage.sync_dir(), lock_timeout),
        })
    }

    pub fn config(&self) -> &TodoSyncConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn todo_file(&self) -> &Path {
        &self.todo_file
    }

    /// Turn mirroring on, optionally moving the mirror file
    pub fn enable(&mut self, todo_file: Option<PathBuf>) -> Result<()> {
        if let Some(path) = todo_file {
            self.todo_file = path.clone();
            self.config.todo_file = Some(path);
        }
        self.config.enabled = true;
        self.save_config()
    }

    pub fn disable(&mut self) -> Result<()> {
        self.config.enabled = false;
        self.save_config()
    }

    /// Mirrored items ordered by project then task id
    pub fn items(&self) -> Result<Vec<TodoItem>> {
        let mut items: Vec<TodoItem> = read_items(&self.todo_file)?.into_values().collect();
        items.sort_by(|a, b| (&a.project, a.task_id).cmp(&(&b.project, b.task_id)));
        Ok(items)
    }

    /// Apply one change to the mirror. Returns whether the file was
    /// written; disabled sync or a switched-off change kind writes nothing.
    pub fn record(&self, project: &str, change: TaskChange<'_>) -> Result<bool> {
        if !self.config.wants(&change) {
            return Ok(false);
        }

        let now = Utc::now();
        self.with_items(|items| {
            match change {
                TaskChange::Created(task)
                | TaskChange::StatusChanged(task)
                | TaskChange::Edited(task)
                | TaskChange::Claimed(task) => {
                    let item = TodoItem::from_task(project, task, now);
                    items.insert(item.id.clone(), item);
                }
                TaskChange::Deleted { id } => {
                    items.remove(&todo_id(project, id));
                }
            }
            Ok(())
        })?;
        debug!(project, file = %self.todo_file.display(), "TODO mirror updated");
        Ok(true)
    }

    /// Replace every item of `project` with `tasks` and stamp `last_sync`.
    /// Returns the number of items written for the project.
    pub fn full_sync(&mut self, project: &str, tasks: &[Task]) -> Result<usize> {
        if !self.config.enabled {
            return Err(Error::Validation(
                "TODO sync is disabled; run `quicktodo sync enable` first".to_string(),
            ));
        }

        let now = Utc::now();
        self.with_items(|items| {
            items.retain(|_, item| item.project != project);
            for task in tasks {
                let item = TodoItem::from_task(project, task, now);
                items.insert(item.id.clone(), item);
            }
            Ok(())
        })?;

        self.config.last_sync = Some(now);
        self.save_config()?;
        Ok(tasks.len())
    }

    /// Read-modify-write of the mirror file under the sync lock
    fn with_items<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut BTreeMap<String, TodoItem>) -> Result<()>,
    {
        let token = self.locks.acquire(TODO_LOCK_NAME)?;
        let result = (|| {
            let mut items = read_items(&self.todo_file)?;
            f(&mut items)?;
            let mut json = serde_json::to_string_pretty(&items)?;
            json.push('\n');
            lock::write_atomic(&self.todo_file, json.as_bytes())
        })();
        let released = self.locks.release(token);
        result?;
        released
    }

    fn save_config(&self) -> Result<()> {
        let mut json = serde_json::to_string_pretty(&self.config)?;
        json.push('\n');
        lock::write_atomic(&self.config_file, json.as_bytes())
    }
}

fn load_config(path: &Path) -> Result<TodoSyncConfig> {
    match fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content)
            .map_err(|err| Error::InvalidConfig(format!("{}: {err}", path.display()))),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(TodoSyncConfig::default()),
        Err(err) => Err(Error::Io(err)),
    }
}

fn read_items(path: &Path) -> Result<BTreeMap<String, TodoItem>> {
    match fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content).map_err(Error::from_decode),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(BTreeMap::new()),
        Err(err) => Err(Error::Io(err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> TodoSync {
        let storage = Storage::new(dir.path());
        TodoSync::open(&storage, Duration::from_secs(1)).unwrap()
    }

    fn task(id: u64, title: &str) -> Task {
        Task::new(id, title, "", Priority::Medium, Utc::now())
    }

    #[test]
    fn disabled_by_default_and_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let sync = open(&dir);
        assert!(!sync.is_enabled());
        assert_eq!(sync.todo_file(), dir.path().join("ai_todos.json"));

        assert!(!sync.record("demo", TaskChange::Created(&task(1, "a"))).unwrap());
        assert!(!sync.todo_file().exists());
        assert!(!dir.path().join("sync_config.json").exists());
    }

    #[test]
    fn enable_persists_settings() {
        let dir = TempDir::new().unwrap();
        let custom = dir.path().join("agent").join("todos.json");
        open(&dir).enable(Some(custom.clone())).unwrap();

        let reopened = open(&dir);
        assert!(reopened.is_enabled());
        assert_eq!(reopened.todo_file(), custom);

        let mut reopened = reopened;
        reopened.disable().unwrap();
        assert!(!open(&dir).is_enabled());
    }

    #[test]
    fn hooks_follow_their_switches() {
        let dir = TempDir::new().unwrap();
        let mut sync = open(&dir);
        sync.enable(None).unwrap();

        let mut first = task(1, "Fix login bug");
        first.description = "session expiry".to_string();
        assert!(sync.record("demo", TaskChange::Created(&first)).unwrap());

        first.status = TaskStatus::Done;
        assert!(sync.record("demo", TaskChange::StatusChanged(&first)).unwrap());

        let items = sync.items().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "demo-1");
        assert_eq!(items[0].content, "#1 Fix login bug - session expiry");
        assert_eq!(items[0].status, TodoStatus::Completed);

        sync.config.sync_on_delete = false;
        assert!(!sync.record("demo", TaskChange::Deleted { id: 1 }).unwrap());
        assert_eq!(sync.items().unwrap().len(), 1);

        sync.config.sync_on_delete = true;
        assert!(sync.record("demo", TaskChange::Deleted { id: 1 }).unwrap());
        assert!(sync.items().unwrap().is_empty());
    }

    #[test]
    fn stale_claims_are_flagged() {
        let now = Utc::now();
        let mut claimed = task(2, "Shared");
        claimed.claim("agent-1", now - chrono::Duration::minutes(6));

        let item = TodoItem::from_task("demo", &claimed, now);
        assert_eq!(item.claimed_by.as_deref(), Some("agent-1"));
        assert!(item.claim_stale);

        let fresh = TodoItem::from_task("demo", &task(3, "Free"), now);
        let wire = serde_json::to_value(&fresh).unwrap();
        assert!(wire.get("claimed_by").is_none());
        assert!(wire.get("claim_stale").is_none());
    }

    #[test]
    fn full_sync_replaces_one_project_only() {
        let dir = TempDir::new().unwrap();
        let mut sync = open(&dir);
        assert!(matches!(
            sync.full_sync("demo", &[]),
            Err(Error::Validation(_))
        ));

        sync.enable(None).unwrap();
        sync.record("other", TaskChange::Created(&task(1, "keep"))).unwrap();
        sync.record("demo", TaskChange::Created(&task(9, "gone"))).unwrap();

        let written = sync
            .full_sync("demo", &[task(1, "a"), task(2, "b")])
            .unwrap();
        assert_eq!(written, 2);

        let ids: Vec<String> = sync.items().unwrap().into_iter().map(|item| item.id).collect();
        assert_eq!(ids, vec!["demo-1", "demo-2", "other-1"]);
        assert!(open(&dir).config().last_sync.is_some());
    }
}
