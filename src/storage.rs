//! Storage layer for quicktodo
//!
//! Owns the on-disk layout under the configured data directory and the
//! document codec for project stores.
//!
//! # Directory Structure
//!
//! ```text
//! <data_dir>/
//!   config.json                 # Global settings (see crate::config)
//!   projects.json               # Project registry
//!   projects/<name>.json        # Project stores
//!   locks/<name>.lock           # Project lock files
//!   notifications/              # Change notifications awaiting a viewer
//!   backups/<name>/<ulid>.json  # Copies of project stores taken before saves
//!   sync_config.json            # TODO mirror settings (see crate::sync)
//!   ai_todos.json               # Default TODO mirror file
//!   sync/todos.lock             # Serializes writers of the TODO mirror
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::Serialize;
use tracing::debug;
use ulid::{Generator, Ulid};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::lock;
use crate::store::ProjectStore;

/// Storage manager for quicktodo state
#[derive(Debug, Clone)]
pub struct Storage {
    data_dir: PathBuf,
}

impl Storage {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.data_dir.clone())
    }

    // =========================================================================
    // Path accessors
    // =========================================================================

    /// Path to the project registry
    pub fn registry_file(&self) -> PathBuf {
        self.data_dir.join("projects.json")
    }

    pub fn projects_dir(&self) -> PathBuf {
        self.data_dir.join("projects")
    }

    /// Path to a project's store document
    pub fn store_file(&self, project: &str) -> PathBuf {
        self.projects_dir().join(format!("{project}.json"))
    }

    pub fn lock_dir(&self) -> PathBuf {
        self.data_dir.join("locks")
    }

    /// Directory of notification files written when no viewer answered
    pub fn notifications_dir(&self) -> PathBuf {
        self.data_dir.join("notifications")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.data_dir.join("backups")
    }

    pub fn project_backups_dir(&self, project: &str) -> PathBuf {
        self.backups_dir().join(project)
    }

    pub fn sync_config_file(&self) -> PathBuf {
        self.data_dir.join("sync_config.json")
    }

    pub fn default_todo_file(&self) -> PathBuf {
        self.data_dir.join("ai_todos.json")
    }

    /// Lock directory for the TODO mirror, apart from project locks
    pub fn sync_dir(&self) -> PathBuf {
        self.data_dir.join("sync")
    }

    // =========================================================================
    // Initialization
    // =========================================================================

    /// Create every directory quicktodo writes into
    pub fn init(&self) -> Result<()> {
        for dir in [
            self.data_dir.clone(),
            self.projects_dir(),
            self.lock_dir(),
            self.notifications_dir(),
        ] {
            fs::create_dir_all(&dir)?;
        }
        Ok(())
    }

    // =========================================================================
    // Project stores
    // =========================================================================

    pub fn store_exists(&self, project: &str) -> bool {
        self.store_file(project).exists()
    }

    pub fn load_store(&self, project: &str) -> Result<ProjectStore> {
        load_store(&self.store_file(project))
    }

    pub fn save_store(&self, store: &ProjectStore) -> Result<()> {
        save_store(store, &self.store_file(&store.project.name))
    }

    /// Delete a project's store and its backups. Missing files are ignored.
    pub fn remove_store(&self, project: &str) -> Result<()> {
        match fs::remove_file(self.store_file(project)) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(Error::Io(err)),
        }
        match fs::remove_dir_all(self.project_backups_dir(project)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(Error::Io(err)),
        }
    }

    /// Copy the current store file aside and prune to `keep` backups.
    ///
    /// Returns the backup path, or `None` when there was nothing to copy or
    /// `keep` is zero.
    pub fn backup_store(&self, project: &str, keep: usize) -> Result<Option<PathBuf>> {
        let source = self.store_file(project);
        if keep == 0 || !source.exists() {
            return Ok(None);
        }

        let dir = self.project_backups_dir(project);
        fs::create_dir_all(&dir)?;
        let target = dir.join(format!("{}.json", next_ulid()));
        fs::copy(&source, &target)?;

        let mut backups: Vec<PathBuf> = fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| path.extension().and_then(|ext| ext.to_str()) == Some("json"))
            .collect();
        backups.sort();
        let excess = backups.len().saturating_sub(keep);
        for old in backups.into_iter().take(excess) {
            debug!(project, backup = %old.display(), "pruning backup");
            fs::remove_file(&old)?;
        }

        Ok(Some(target))
    }

    /// Backups for a project, oldest first
    pub fn list_backups(&self, project: &str) -> Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(self.project_backups_dir(project)) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(Error::Io(err)),
        };
        let mut backups = Vec::new();
        for entry in entries {
            backups.push(entry?.path());
        }
        backups.sort();
        Ok(backups)
    }
}

/// ULID for file names that sort in creation order. Strictly increasing
/// within this process, even inside one millisecond.
pub(crate) fn next_ulid() -> Ulid {
    static GENERATOR: Mutex<Generator> = Mutex::new(Generator::new());
    let mut generator = GENERATOR
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    // Overflow needs 2^80 ids in one millisecond; fall back to a fresh random one.
    generator.generate().unwrap_or_else(|_| Ulid::new())
}

// =============================================================================
// Document codec
// =============================================================================

/// Load and validate a project store.
///
/// Missing file: [`Error::StoreNotFound`]. Malformed JSON: [`Error::Parse`].
/// Well-formed JSON that breaks the store invariants: [`Error::Validation`].
pub fn load_store(path: &Path) -> Result<ProjectStore> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(Error::StoreNotFound(path.to_path_buf()))
        }
        Err(err) => return Err(Error::Io(err)),
    };

    let store: ProjectStore = serde_json::from_str(&content).map_err(Error::from_decode)?;
    store.validate()?;
    Ok(store)
}

/// Persist a store atomically. Does not change `version` or
/// `last_modified`.
pub fn save_store(store: &ProjectStore, path: &Path) -> Result<()> {
    store.validate()?;
    write_json(path, store)
}

fn write_json<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    let mut json = serde_json::to_string_pretty(data)?;
    json.push('\n');
    lock::write_atomic(path, json.as_bytes())
}
