//! Change notifications for a live viewer.
//!
//! After a mutation is saved, a [`Notification`] is offered to a running
//! viewer by POSTing it to `/api/notify` on each configured local port in
//! turn. When no viewer answers, the notification is written to the
//! notifications directory so a viewer started later can replay it.
//!
//! Delivery is best-effort: callers log failures and carry on. The project
//! store is the source of truth; notifications only mirror it.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::lock;
use crate::storage::{next_ulid, Storage};
use crate::task::Task;

const NOTIFY_PATH: &str = "/api/notify";

/// Kinds of change fanned out to viewers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    TaskCreated,
    TaskUpdated,
    TaskDeleted,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::TaskCreated => "task_created",
            EventKind::TaskUpdated => "task_updated",
            EventKind::TaskDeleted => "task_deleted",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One change event. `data` is the full task for created/updated and
/// `{"id", "title"}` for deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub data: serde_json::Value,
    pub project: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    pub fn new(kind: EventKind, project: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            kind,
            data,
            project: project.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn task_created(project: &str, task: &Task) -> Result<Self> {
        Ok(Self::new(EventKind::TaskCreated, project, serde_json::to_value(task)?))
    }

    pub fn task_updated(project: &str, task: &Task) -> Result<Self> {
        Ok(Self::new(EventKind::TaskUpdated, project, serde_json::to_value(task)?))
    }

    pub fn task_deleted(project: &str, id: u64, title: &str) -> Self {
        Self::new(
            EventKind::TaskDeleted,
            project,
            serde_json::json!({ "id": id, "title": title }),
        )
    }

    /// The event as sent to connected viewers
    pub fn viewer_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "type": self.kind,
            "data": self.data,
            "project": self.project,
        })
    }
}

/// How a notification reached (or will reach) a viewer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "via", rename_all = "snake_case")]
pub enum Delivery {
    /// Accepted by a viewer listening on this port
    Http { port: u16 },
    /// Written to the notifications directory
    File { path: PathBuf },
    /// Broadcast in-process to this many connected viewers
    Broadcast { clients: usize },
}

/// Sink for change notifications.
///
/// Implementations may fail; callers are expected to log and ignore errors.
pub trait Notify: Send + Sync {
    fn notify(&self, notification: &Notification) -> Result<Delivery>;
}

/// Notifier used by CLI processes: HTTP to a running viewer, else a file
pub struct Notifier {
    client: reqwest::blocking::Client,
    host: String,
    ports: Vec<u16>,
    fallback_dir: PathBuf,
}

impl Notifier {
    pub fn new(ports: Vec<u16>, timeout: Duration, fallback_dir: impl Into<PathBuf>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| Error::Http(err.to_string()))?;
        Ok(Self {
            client,
            host: "127.0.0.1".to_string(),
            ports,
            fallback_dir: fallback_dir.into(),
        })
    }

    pub fn from_config(config: &Config, storage: &Storage) -> Result<Self> {
        Self::new(
            config.notify_ports.clone(),
            config.notify_timeout(),
            storage.notifications_dir(),
        )
    }

    fn post(&self, port: u16, notification: &Notification) -> bool {
        let url = format!("http://{}:{port}{NOTIFY_PATH}", self.host);
        match self.client.post(&url).json(notification).send() {
            Ok(response) => response.status() == reqwest::StatusCode::OK,
            Err(err) => {
                debug!(port, error = %err, "viewer not reachable");
                false
            }
        }
    }
}

impl Notify for Notifier {
    fn notify(&self, notification: &Notification) -> Result<Delivery> {
        for &port in &self.ports {
            if self.post(port, notification) {
                debug!(port, kind = %notification.kind, "notification delivered over http");
                return Ok(Delivery::Http { port });
            }
        }

        let path = write_notification_file(&self.fallback_dir, notification)?;
        debug!(path = %path.display(), kind = %notification.kind, "notification written to file");
        Ok(Delivery::File { path })
    }
}

/// Write `notification` as `<ulid>_<project>_<type>.json` in `dir`
pub fn write_notification_file(dir: &Path, notification: &Notification) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let name = format!(
        "{}_{}_{}.json",
        next_ulid(),
        notification.project,
        notification.kind
    );
    let path = dir.join(name);
    let json = serde_json::to_vec(notification)?;
    lock::write_atomic(&path, &json)?;
    Ok(path)
}

/// Read and remove every notification file in `dir`, oldest first.
///
/// Files that cannot be decoded are removed and skipped.
pub fn drain_notifications(dir: &Path) -> Result<Vec<Notification>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(Error::Io(err)),
    };

    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
            files.push(path);
        }
    }
    files.sort();

    let mut drained = Vec::with_capacity(files.len());
    for path in files {
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => return Err(Error::Io(err)),
        };
        match serde_json::from_str::<Notification>(&content) {
            Ok(notification) => drained.push(notification),
            Err(err) => warn!(path = %path.display(), error = %err, "discarding unreadable notification"),
        }
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(Error::Io(err)),
        }
    }
    Ok(drained)
}
