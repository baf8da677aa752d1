//! Error types for quicktodo
//!
//! Exit codes:
//! - 0: Success
//! - 2: User error (unknown task/project, invalid data, duplicate registration)
//! - 3: Lock contention (retry later)
//! - 4: Operation failed (I/O, malformed files, viewer errors)

use std::path::PathBuf;
use thiserror::Error;

/// Exit codes for the quicktodo CLI
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const USER_ERROR: i32 = 2;
    pub const LOCK_CONTENDED: i32 = 3;
    pub const OPERATION_FAILED: i32 = 4;
}

/// Main error type for quicktodo operations
#[derive(Error, Debug)]
pub enum Error {
    // User errors (exit code 2)
    #[error("Task not found: {0}")]
    TaskNotFound(u64),

    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("No project registered for {0}")]
    NotARegisteredProject(PathBuf),

    #[error("Project store not found: {0}")]
    StoreNotFound(PathBuf),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Lock contention (exit code 3)
    #[error("Timed out waiting for lock on project '{project}'")]
    LockTimeout {
        project: String,
        holder: Option<u32>,
    },

    #[error("Lock on project '{project}' is held by pid {holder}, not {owner}")]
    LockNotOwned {
        project: String,
        holder: u32,
        owner: u32,
    },

    // Operation failures (exit code 4)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed JSON: {0}")]
    Parse(serde_json::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Operation failed: {0}")]
    OperationFailed(String),
}

impl Error {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            // User errors
            Error::TaskNotFound(_)
            | Error::ProjectNotFound(_)
            | Error::NotARegisteredProject(_)
            | Error::StoreNotFound(_)
            | Error::Validation(_)
            | Error::Conflict(_)
            | Error::InvalidConfig(_) => exit_codes::USER_ERROR,

            // Lock contention
            Error::LockTimeout { .. } | Error::LockNotOwned { .. } => exit_codes::LOCK_CONTENDED,

            // Operation failures
            Error::Io(_)
            | Error::Parse(_)
            | Error::Json(_)
            | Error::Http(_)
            | Error::OperationFailed(_) => exit_codes::OPERATION_FAILED,
        }
    }

    /// Stable category name used in JSON error output
    pub fn kind(&self) -> &'static str {
        match self {
            Error::TaskNotFound(_)
            | Error::ProjectNotFound(_)
            | Error::NotARegisteredProject(_)
            | Error::StoreNotFound(_) => "not_found",
            Error::Validation(_) => "validation",
            Error::Conflict(_) => "conflict",
            Error::InvalidConfig(_) => "invalid_config",
            Error::LockTimeout { .. } => "lock_timeout",
            Error::LockNotOwned { .. } => "lock_not_owned",
            Error::Io(_) => "io",
            Error::Parse(_) => "parse",
            Error::Json(_) => "json",
            Error::Http(_) => "http",
            Error::OperationFailed(_) => "operation_failed",
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == "not_found"
    }

    /// Structured details for JSON error output, when the variant carries any
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Error::TaskNotFound(id) => Some(serde_json::json!({ "task_id": id })),
            Error::ProjectNotFound(name) => Some(serde_json::json!({ "project": name })),
            Error::NotARegisteredProject(path) | Error::StoreNotFound(path) => {
                Some(serde_json::json!({ "path": path }))
            }
            Error::LockTimeout { project, holder } => {
                Some(serde_json::json!({ "project": project, "holder_pid": holder }))
            }
            Error::LockNotOwned {
                project,
                holder,
                owner,
            } => Some(serde_json::json!({
                "project": project,
                "holder_pid": holder,
                "owner_pid": owner,
            })),
            _ => None,
        }
    }

    /// Classify a decode failure: malformed JSON is a parse error, while
    /// well-formed JSON of the wrong shape is a validation error.
    pub fn from_decode(err: serde_json::Error) -> Self {
        use serde_json::error::Category;

        match err.classify() {
            Category::Data => Error::Validation(err.to_string()),
            Category::Io => Error::Io(std::io::Error::other(err.to_string())),
            Category::Syntax | Category::Eof => Error::Parse(err),
        }
    }
}

/// Result type alias for quicktodo operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error body of the JSON output envelope
#[derive(Debug, serde::Serialize)]
pub struct JsonError {
    pub message: String,
    pub code: i32,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<&Error> for JsonError {
    fn from(err: &Error) -> Self {
        JsonError {
            message: err.to_string(),
            code: err.exit_code(),
            kind: err.kind(),
            details: err.details(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_classification() {
        let syntax = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        assert!(matches!(Error::from_decode(syntax), Error::Parse(_)));

        let eof = serde_json::from_str::<serde_json::Value>("{\"a\": ").unwrap_err();
        assert!(matches!(Error::from_decode(eof), Error::Parse(_)));

        let data = serde_json::from_str::<u64>("-1").unwrap_err();
        assert!(matches!(Error::from_decode(data), Error::Validation(_)));
    }

    #[test]
    fn lock_errors_share_exit_code() {
        let timeout = Error::LockTimeout {
            project: "demo".to_string(),
            holder: Some(42),
        };
        assert_eq!(timeout.exit_code(), exit_codes::LOCK_CONTENDED);
        assert_eq!(timeout.kind(), "lock_timeout");

        let json = JsonError::from(&timeout);
        assert_eq!(json.details.unwrap()["holder_pid"], 42);
    }

    #[test]
    fn not_found_helper() {
        assert!(Error::TaskNotFound(3).is_not_found());
        assert!(Error::ProjectNotFound("x".into()).is_not_found());
        assert!(!Error::Conflict("x".into()).is_not_found());
    }
}
