//! Task model
//!
//! A task is one unit of work inside a project store. Identifiers are
//! assigned by the store and never change. Every mutation stamps
//! `updated_at`, which never moves backwards.
//!
//! The `locked_by`/`locked_at` pair is an advisory claim by an external
//! worker. It is independent of the project lock file and is never cleared
//! automatically; staleness is only reported.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};

/// Claim age after which [`Task::is_claim_stale`] reports true
pub const CLAIM_STALE_AFTER_MINS: i64 = 5;

// =============================================================================
// Status
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Done,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 3] = [TaskStatus::Pending, TaskStatus::InProgress, TaskStatus::Done];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Done => "done",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" => Ok(TaskStatus::InProgress),
            "done" => Ok(TaskStatus::Done),
            _ => Err(Error::Validation(format!(
                "invalid status '{s}' (expected pending, in_progress, done)"
            ))),
        }
    }
}

impl Default for TaskStatus {
    fn default() -> Self {
        TaskStatus::Pending
    }
}

// =============================================================================
// Priority
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::Low, Priority::Medium, Priority::High];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            _ => Err(Error::Validation(format!(
                "invalid priority '{s}' (expected low, medium, high)"
            ))),
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

// =============================================================================
// Task
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: TaskStatus,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "empty_as_none"
    )]
    pub assigned_to: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "empty_as_none"
    )]
    pub locked_by: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "zero_time_as_none"
    )]
    pub locked_at: Option<DateTime<Utc>>,
}

impl Task {
    /// New pending task with both timestamps set to `now`
    pub fn new(
        id: u64,
        title: impl Into<String>,
        description: impl Into<String>,
        priority: Priority,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            title: title.into(),
            description: description.into(),
            status: TaskStatus::Pending,
            priority,
            created_at: now,
            updated_at: now,
            assigned_to: None,
            locked_by: None,
            locked_at: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.id == 0 {
            return Err(Error::Validation("task id must be positive".to_string()));
        }
        validate_title(&self.title)?;
        if self.updated_at < self.created_at {
            return Err(Error::Validation(format!(
                "task {}: updated_at is before created_at",
                self.id
            )));
        }
        // Empty strings and year-one times decode as None, so they must never be written.
        if self.assigned_to.as_deref() == Some("") || self.locked_by.as_deref() == Some("") {
            return Err(Error::Validation(format!(
                "task {}: assignee and claim holder cannot be empty",
                self.id
            )));
        }
        if self.locked_at.is_some_and(|at| at.year() <= 1) {
            return Err(Error::Validation(format!(
                "task {}: invalid claim time",
                self.id
            )));
        }
        Ok(())
    }

    /// Fold the representations that decode identically into one: blank
    /// assignee or holder becomes `None`, and a claim time without a holder
    /// (or at the year-one sentinel) is dropped.
    pub fn normalize(&mut self) {
        for field in [&mut self.assigned_to, &mut self.locked_by] {
            if field.as_deref().is_some_and(|value| value.trim().is_empty()) {
                *field = None;
            }
        }
        if self.locked_by.is_none() || self.locked_at.is_some_and(|at| at.year() <= 1) {
            self.locked_at = None;
        }
    }

    /// Stamp `updated_at`, strictly after its previous value
    pub fn touch(&mut self, now: DateTime<Utc>) {
        let floor = self.updated_at + Duration::nanoseconds(1);
        self.updated_at = now.max(floor);
    }

    pub fn is_claimed(&self) -> bool {
        self.locked_by.is_some()
    }

    pub fn is_claimed_by(&self, holder: &str) -> bool {
        self.locked_by.as_deref() == Some(holder)
    }

    /// Record an advisory claim. Does not stamp `updated_at`.
    pub fn claim(&mut self, holder: impl Into<String>, now: DateTime<Utc>) {
        self.locked_by = Some(holder.into());
        self.locked_at = Some(now);
    }

    pub fn release_claim(&mut self) {
        self.locked_by = None;
        self.locked_at = None;
    }

    /// Claimed for longer than the fixed five minute window
    pub fn is_claim_stale(&self, now: DateTime<Utc>) -> bool {
        self.is_claim_stale_after(Duration::minutes(CLAIM_STALE_AFTER_MINS), now)
    }

    pub fn is_claim_stale_after(&self, window: Duration, now: DateTime<Utc>) -> bool {
        match (&self.locked_by, self.locked_at) {
            (Some(_), Some(at)) => now - at > window,
            _ => false,
        }
    }

    /// Coarse age for display: minutes, hours or days since creation
    pub fn age(&self, now: DateTime<Utc>) -> String {
        let elapsed = now - self.created_at;
        if elapsed < Duration::hours(1) {
            format!("{} minutes", elapsed.num_minutes().max(0))
        } else if elapsed < Duration::days(1) {
            format!("{} hours", elapsed.num_hours())
        } else {
            format!("{} days", elapsed.num_days())
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Task[{}]: {} ({}, {})",
            self.id, self.title, self.status, self.priority
        )
    }
}

pub(crate) fn validate_title(title: &str) -> Result<()> {
    if title.trim().is_empty() {
        return Err(Error::Validation("task title cannot be empty".to_string()));
    }
    Ok(())
}

fn empty_as_none<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}

// Files written by older tools carry `0001-01-01T00:00:00Z` for "never".
fn zero_time_as_none<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<DateTime<Utc>> = Option::deserialize(deserializer)?;
    Ok(value.filter(|at| at.year() > 1))
}

// =============================================================================
// Partial updates
// =============================================================================

/// Typed partial update. Absent fields are left alone.
///
/// `assigned_to: Some(None)` clears the assignee.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    pub assigned_to: Option<Option<String>>,
}

impl TaskPatch {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Only the status is set
    pub fn is_status_only(&self) -> bool {
        matches!(
            self,
            TaskPatch {
                status: Some(_),
                title: None,
                description: None,
                priority: None,
                assigned_to: None,
            }
        )
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.status.is_none()
            && self.priority.is_none()
            && self.assigned_to.is_none()
    }

    /// Check every present field before any of them is applied
    pub fn validate(&self) -> Result<()> {
        if let Some(title) = &self.title {
            validate_title(title)?;
        }
        Ok(())
    }

    /// Apply a validated patch and stamp `updated_at`
    pub fn apply(&self, task: &mut Task, now: DateTime<Utc>) {
        if let Some(title) = &self.title {
            task.title = title.trim().to_string();
        }
        if let Some(description) = &self.description {
            task.description = description.clone();
        }
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(assignee) = &self.assigned_to {
            task.assigned_to = assignee.clone().filter(|s| !s.trim().is_empty());
        }
        task.touch(now);
    }
}

// =============================================================================
// Filters
// =============================================================================

/// Conjunction of optional equality predicates. The empty filter matches
/// every task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    pub assigned_to: Option<String>,
    pub locked_by: Option<String>,
}

impl TaskFilter {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.priority.is_none()
            && self.assigned_to.is_none()
            && self.locked_by.is_none()
    }

    pub fn matches(&self, task: &Task) -> bool {
        if self.status.is_some_and(|status| task.status != status) {
            return false;
        }
        if self.priority.is_some_and(|priority| task.priority != priority) {
            return false;
        }
        if let Some(assignee) = &self.assigned_to {
            if task.assigned_to.as_deref().unwrap_or("") != assignee {
                return false;
            }
        }
        if let Some(holder) = &self.locked_by {
            if task.locked_by.as_deref().unwrap_or("") != holder {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(now: DateTime<Utc>) -> Task {
        Task::new(1, "Fix login bug", "", Priority::High, now)
    }

    #[test]
    fn new_task_defaults() {
        let now = Utc::now();
        let task = sample(now);
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.created_at, task.updated_at);
        assert!(task.validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_fields() {
        let now = Utc::now();
        let mut task = sample(now);
        task.title = "   ".to_string();
        assert!(matches!(task.validate(), Err(Error::Validation(_))));

        let mut task = sample(now);
        task.id = 0;
        assert!(task.validate().is_err());

        let mut task = sample(now);
        task.updated_at = now - Duration::seconds(1);
        assert!(task.validate().is_err());
    }

    #[test]
    fn normalize_folds_empty_claim_fields() {
        let now = Utc::now();
        let mut task = sample(now);
        task.assigned_to = Some(String::new());
        task.locked_by = Some("  ".to_string());
        task.locked_at = Some(now);
        assert!(matches!(task.validate(), Err(Error::Validation(_))));

        task.normalize();
        assert_eq!(task.assigned_to, None);
        assert_eq!(task.locked_by, None);
        assert_eq!(task.locked_at, None);
        assert!(task.validate().is_ok());

        let mut task = sample(now);
        task.locked_by = Some("agent-1".to_string());
        task.locked_at = Some(DateTime::<Utc>::MIN_UTC);
        assert!(task.validate().is_err());
        task.normalize();
        assert_eq!(task.locked_by.as_deref(), Some("agent-1"));
        assert_eq!(task.locked_at, None);
    }

    #[test]
    fn touch_is_strictly_monotonic() {
        let now = Utc::now();
        let mut task = sample(now);
        task.touch(now);
        assert!(task.updated_at > now);

        let later = now + Duration::seconds(5);
        task.touch(later);
        assert_eq!(task.updated_at, later);
    }

    #[test]
    fn enums_parse_and_reject() {
        assert_eq!("in_progress".parse::<TaskStatus>().unwrap(), TaskStatus::InProgress);
        assert_eq!("high".parse::<Priority>().unwrap(), Priority::High);
        assert!(matches!("urgent".parse::<Priority>(), Err(Error::Validation(_))));
        assert!("finished".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn claim_staleness_is_advisory() {
        let now = Utc::now();
        let mut task = sample(now);
        let before = task.updated_at;

        task.claim("agent-1", now - Duration::minutes(6));
        assert_eq!(task.updated_at, before);
        assert!(task.is_claimed_by("agent-1"));
        assert!(task.is_claim_stale(now));
        assert!(!task.is_claim_stale_after(Duration::minutes(10), now));
        assert!(task.is_claimed());

        task.release_claim();
        assert!(!task.is_claim_stale(now));
        assert!(task.locked_at.is_none());
    }

    #[test]
    fn legacy_empty_fields_decode_as_none() {
        let raw = r#"{
            "id": 3, "title": "t", "description": "", "status": "done",
            "priority": "low",
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z",
            "assigned_to": "", "locked_by": "",
            "locked_at": "0001-01-01T00:00:00Z"
        }"#;
        let task: Task = serde_json::from_str(raw).unwrap();
        assert_eq!(task.assigned_to, None);
        assert_eq!(task.locked_by, None);
        assert_eq!(task.locked_at, None);
    }

    #[test]
    fn patch_applies_present_fields_only() {
        let now = Utc::now();
        let mut task = sample(now);
        task.description = "keep".to_string();

        let patch = TaskPatch {
            status: Some(TaskStatus::InProgress),
            assigned_to: Some(Some("claude".to_string())),
            ..TaskPatch::default()
        };
        patch.validate().unwrap();
        patch.apply(&mut task, now);

        assert_eq!(task.status, TaskStatus::InProgress);
        assert_eq!(task.assigned_to.as_deref(), Some("claude"));
        assert_eq!(task.description, "keep");
        assert_eq!(task.priority, Priority::High);

        TaskPatch {
            assigned_to: Some(None),
            ..TaskPatch::default()
        }
        .apply(&mut task, now);
        assert_eq!(task.assigned_to, None);
    }

    #[test]
    fn patch_with_blank_title_is_rejected() {
        let patch = TaskPatch {
            title: Some(" ".to_string()),
            ..TaskPatch::default()
        };
        assert!(matches!(patch.validate(), Err(Error::Validation(_))));
        assert!(TaskPatch::default().is_empty());
        assert!(!patch.is_status_only());
        assert!(TaskPatch::status(TaskStatus::Done).is_status_only());
    }

    #[test]
    fn filter_treats_missing_assignee_as_empty() {
        let now = Utc::now();
        let task = sample(now);
        let filter = TaskFilter {
            assigned_to: Some(String::new()),
            ..TaskFilter::default()
        };
        assert!(filter.matches(&task));
        assert!(TaskFilter::default().matches(&task));
    }
}
