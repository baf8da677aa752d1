//! Project model.
//!
//! A project is a named workspace bound to exactly one directory. The copy
//! embedded in each project store carries the cached task count; the
//! registry keeps its own name/path/timestamps record.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Longest accepted project name, in characters
pub const MAX_PROJECT_NAME_LEN: usize = 100;

const FORBIDDEN_NAME_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|', '\n', '\r', '\t'];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    #[serde(default)]
    pub task_count: u64,
    #[serde(default)]
    pub description: String,
}

impl Project {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, now: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            created_at: now,
            last_accessed: now,
            task_count: 0,
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Validation("project name cannot be empty".to_string()));
        }
        if self.path.as_os_str().is_empty() {
            return Err(Error::Validation("project path cannot be empty".to_string()));
        }
        if self.last_accessed < self.created_at {
            return Err(Error::Validation(format!(
                "project {}: last_accessed is before created_at",
                self.name
            )));
        }
        Ok(())
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_accessed = now.max(self.created_at);
    }
}

impl fmt::Display for Project {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Project[{}]: {} ({} tasks)",
            self.name,
            self.path.display(),
            self.task_count
        )
    }
}

/// Reject names that cannot be used as a file stem on common filesystems
pub fn validate_project_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Validation("project name cannot be empty".to_string()));
    }
    if name.chars().count() > MAX_PROJECT_NAME_LEN {
        return Err(Error::Validation(format!(
            "project name cannot exceed {MAX_PROJECT_NAME_LEN} characters"
        )));
    }
    if let Some(bad) = name.chars().find(|c| FORBIDDEN_NAME_CHARS.contains(c)) {
        return Err(Error::Validation(format!(
            "project name cannot contain {bad:?}"
        )));
    }
    if name == "." || name == ".." {
        return Err(Error::Validation(format!("invalid project name '{name}'")));
    }
    Ok(())
}

/// Default project name for a directory: its final component
pub fn default_project_name(dir: &Path) -> Option<String> {
    dir.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_validation() {
        assert!(validate_project_name("demo").is_ok());
        assert!(validate_project_name("my project-2").is_ok());
        assert!(validate_project_name("").is_err());
        assert!(validate_project_name("a/b").is_err());
        assert!(validate_project_name("tab\there").is_err());
        assert!(validate_project_name("..").is_err());
        assert!(validate_project_name(&"x".repeat(101)).is_err());
        assert!(validate_project_name(&"x".repeat(100)).is_ok());
    }

    #[test]
    fn validate_checks_timestamps() {
        let now = Utc::now();
        let mut project = Project::new("demo", "/tmp/demo", now);
        assert!(project.validate().is_ok());

        project.last_accessed = now - chrono::Duration::seconds(1);
        assert!(matches!(project.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn default_name_is_directory_basename() {
        assert_eq!(
            default_project_name(Path::new("/home/me/code/widget")),
            Some("widget".to_string())
        );
        assert_eq!(default_project_name(Path::new("/")), None);
    }
}
