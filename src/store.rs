//! Project store: the persisted aggregate for one project.
//!
//! Holds the project record, the tasks in insertion order, and the
//! bookkeeping counters. Every successful mutation bumps `version` by one
//! and stamps `last_modified`; persisting the store does neither, so a
//! saved store loads back unchanged.
//!
//! Nothing here touches the filesystem or locks; callers compose those
//! (see [`crate::ops::Session`]).

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::project::Project;
use crate::task::{validate_title, Priority, Task, TaskFilter, TaskPatch, TaskStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectStore {
    pub project: Project,
    tasks: Vec<Task>,
    next_id: u64,
    last_modified: DateTime<Utc>,
    version: u64,
}

/// Derived counts over a store's tasks
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectSummary {
    pub project: Project,
    pub task_count: usize,
    pub status_counts: BTreeMap<TaskStatus, usize>,
    pub priority_counts: BTreeMap<Priority, usize>,
    pub completed_tasks: usize,
    pub pending_tasks: usize,
    pub in_progress_tasks: usize,
    pub last_task_update: Option<DateTime<Utc>>,
}

impl ProjectStore {
    /// Fresh store: no tasks, `next_id = 1`, `version = 1`
    pub fn new(project: Project) -> Self {
        let last_modified = project.created_at;
        Self {
            project,
            tasks: Vec::new(),
            next_id: 1,
            last_modified,
            version: 1,
        }
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn last_modified(&self) -> DateTime<Utc> {
        self.last_modified
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Check the structural invariants a decoded store must satisfy
    pub fn validate(&self) -> Result<()> {
        self.project.validate()?;
        if self.next_id < 1 {
            return Err(Error::Validation("next_id must be at least 1".to_string()));
        }
        if self.version < 1 {
            return Err(Error::Validation("version must be at least 1".to_string()));
        }

        let mut seen = HashSet::with_capacity(self.tasks.len());
        for task in &self.tasks {
            task.validate()?;
            if !seen.insert(task.id) {
                return Err(Error::Validation(format!("duplicate task id {}", task.id)));
            }
            if task.id >= self.next_id {
                return Err(Error::Validation(format!(
                    "task id {} is not below next_id {}",
                    task.id, self.next_id
                )));
            }
        }
        Ok(())
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Append a pending task with the next identifier
    pub fn add_task(
        &mut self,
        title: &str,
        description: &str,
        priority: Priority,
    ) -> Result<Task> {
        validate_title(title)?;

        let now = Utc::now();
        let task = Task::new(self.next_id, title.trim(), description, priority, now);
        self.tasks.push(task.clone());
        self.next_id += 1;
        self.bump(now);
        Ok(task)
    }

    /// Replace the task with the same id. The replacement keeps the stored
    /// `created_at`, gets a fresh `updated_at`, and is normalized so it
    /// loads back exactly as saved.
    pub fn update_task(&mut self, mut task: Task) -> Result<Task> {
        let index = self.index_of(task.id)?;
        let existing = &self.tasks[index];

        task.normalize();
        task.created_at = existing.created_at;
        task.updated_at = task.updated_at.max(existing.updated_at);
        let now = Utc::now();
        task.touch(now);
        task.validate()?;

        self.tasks[index] = task.clone();
        self.bump(now);
        Ok(task)
    }

    /// Apply a typed partial update. An empty patch changes nothing.
    pub fn apply_patch(&mut self, id: u64, patch: &TaskPatch) -> Result<Task> {
        let index = self.index_of(id)?;
        if patch.is_empty() {
            return Ok(self.tasks[index].clone());
        }
        patch.validate()?;

        let now = Utc::now();
        let task = &mut self.tasks[index];
        patch.apply(task, now);
        let updated = task.clone();
        self.bump(now);
        Ok(updated)
    }

    /// Remove a task, keeping the order of the rest
    pub fn delete_task(&mut self, id: u64) -> Result<Task> {
        let index = self.index_of(id)?;
        let removed = self.tasks.remove(index);
        self.bump(Utc::now());
        Ok(removed)
    }

    /// Record an advisory claim on a task. A task already claimed by a
    /// different holder is refused unless `force` is set.
    pub fn claim_task(&mut self, id: u64, holder: &str, force: bool) -> Result<Task> {
        if holder.trim().is_empty() {
            return Err(Error::Validation("claim holder cannot be empty".to_string()));
        }
        let index = self.index_of(id)?;
        let task = &mut self.tasks[index];
        if let Some(current) = task.locked_by.as_deref() {
            if current != holder && !force {
                return Err(Error::Conflict(format!(
                    "task {id} is claimed by {current}"
                )));
            }
        }

        let now = Utc::now();
        task.claim(holder, now);
        let claimed = task.clone();
        self.bump(now);
        Ok(claimed)
    }

    /// Clear a task's claim. With `holder`, only that holder's claim is
    /// cleared.
    pub fn release_task_claim(&mut self, id: u64, holder: Option<&str>) -> Result<Task> {
        let index = self.index_of(id)?;
        let task = &mut self.tasks[index];
        if let (Some(holder), Some(current)) = (holder, task.locked_by.as_deref()) {
            if current != holder {
                return Err(Error::Conflict(format!(
                    "task {id} is claimed by {current}, not {holder}"
                )));
            }
        }

        task.release_claim();
        let released = task.clone();
        self.bump(Utc::now());
        Ok(released)
    }

    fn bump(&mut self, now: DateTime<Utc>) {
        self.version += 1;
        self.last_modified = now.max(self.last_modified);
        self.project.task_count = self.tasks.len() as u64;
        self.project.touch(now);
    }

    fn index_of(&self, id: u64) -> Result<usize> {
        self.tasks
            .iter()
            .position(|task| task.id == id)
            .ok_or(Error::TaskNotFound(id))
    }

    // =========================================================================
    // Views (always copies)
    // =========================================================================

    pub fn get_task(&self, id: u64) -> Result<Task> {
        self.tasks
            .iter()
            .find(|task| task.id == id)
            .cloned()
            .ok_or(Error::TaskNotFound(id))
    }

    pub fn list_tasks(&self, filter: &TaskFilter) -> Vec<Task> {
        self.tasks
            .iter()
            .filter(|task| filter.matches(task))
            .cloned()
            .collect()
    }

    /// ASCII case-insensitive substring match on title or description.
    /// Non-ASCII letters must match exactly.
    pub fn search_tasks(&self, query: &str) -> Vec<Task> {
        let needle = query.to_ascii_lowercase();
        self.tasks
            .iter()
            .filter(|task| {
                task.title.to_ascii_lowercase().contains(&needle)
                    || task.description.to_ascii_lowercase().contains(&needle)
            })
            .cloned()
            .collect()
    }

    pub fn summary(&self) -> ProjectSummary {
        let mut status_counts: BTreeMap<TaskStatus, usize> =
            TaskStatus::ALL.iter().map(|status| (*status, 0)).collect();
        let mut priority_counts: BTreeMap<Priority, usize> =
            Priority::ALL.iter().map(|priority| (*priority, 0)).collect();

        for task in &self.tasks {
            *status_counts.entry(task.status).or_default() += 1;
            *priority_counts.entry(task.priority).or_default() += 1;
        }

        ProjectSummary {
            project: self.project.clone(),
            task_count: self.tasks.len(),
            completed_tasks: status_counts[&TaskStatus::Done],
            pending_tasks: status_counts[&TaskStatus::Pending],
            in_progress_tasks: status_counts[&TaskStatus::InProgress],
            status_counts,
            priority_counts,
            last_task_update: self.tasks.iter().map(|task| task.updated_at).max(),
        }
    }
}
