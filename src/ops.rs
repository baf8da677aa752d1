//! Project operations shared by the CLI and the live viewer.
//!
//! A [`Session`] owns the loaded configuration and wires the pieces together
//! for every mutation:
//!
//! 1. acquire the project lock
//! 2. load the project store
//! 3. apply the change
//! 4. back up the previous file and save atomically
//! 5. release the lock
//! 6. touch the registry, notify viewers and update the TODO mirror (all
//!    best-effort)
//!
//! Step 3 failing leaves the file untouched. Steps after a successful save
//! never turn the command into a failure.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::lock::LockManager;
use crate::notify::{Notification, Notifier, Notify};
use crate::project::{default_project_name, validate_project_name, Project};
use crate::registry::{normalize_path, ProjectRegistry, RegistryEntry};
use crate::storage::Storage;
use crate::store::ProjectStore;
use crate::sync::{TaskChange, TodoSync};
use crate::task::{Priority, Task, TaskPatch};

/// Per-invocation settings passed in by the caller
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Identity recorded on task claims; defaults to `pid:<pid>`
    pub agent_id: Option<String>,
    /// Skip viewer notifications entirely
    pub no_notify: bool,
}

pub struct Session {
    config: Config,
    storage: Storage,
    locks: LockManager,
    notifier: Arc<dyn Notify>,
    options: SessionOptions,
}

impl Session {
    /// Load `config.json` from `root` and prepare the data directory
    pub fn open(root: &Path, options: SessionOptions) -> Result<Self> {
        let config = Config::load(root)?;
        Self::new(config, options)
    }

    /// Session that notifies a viewer over HTTP, falling back to files
    pub fn new(config: Config, options: SessionOptions) -> Result<Self> {
        let storage = Storage::from_config(&config);
        let notifier: Arc<dyn Notify> = Arc::new(Notifier::from_config(&config, &storage)?);
        Self::with_sink(config, options, notifier)
    }

    /// Session that hands change notifications to `notifier`
    pub fn with_sink(
        config: Config,
        options: SessionOptions,
        notifier: Arc<dyn Notify>,
    ) -> Result<Self> {
        let storage = Storage::from_config(&config);
        storage.init()?;
        let locks = LockManager::new(storage.lock_dir(), config.lock_timeout());
        Ok(Self {
            config,
            storage,
            locks,
            notifier,
            options,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Identity used for task claims
    pub fn claim_holder(&self) -> String {
        self.options
            .agent_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| format!("pid:{}", std::process::id()))
    }

    // =========================================================================
    // Registry
    // =========================================================================

    pub fn load_registry(&self) -> Result<ProjectRegistry> {
        ProjectRegistry::load(&self.storage.registry_file())
    }

    fn save_registry(&self, registry: &ProjectRegistry) -> Result<()> {
        registry.save(&self.storage.registry_file())
    }

    /// Register a project for `dir` and create its empty store.
    ///
    /// The name defaults to the directory's final component. If the store
    /// cannot be written the registration is rolled back.
    pub fn init_project(
        &self,
        name: Option<&str>,
        dir: &Path,
        description: Option<&str>,
    ) -> Result<ProjectStore> {
        let dir = normalize_path(dir)?;
        let name = match name {
            Some(name) => name.trim().to_string(),
            None => default_project_name(&dir).ok_or_else(|| {
                Error::Validation(format!("cannot derive a project name from {}", dir.display()))
            })?,
        };
        validate_project_name(&name)?;

        let mut registry = self.load_registry()?;
        let entry = registry.register(&name, &dir)?;
        self.save_registry(&registry)?;

        let project = Project::new(&name, &entry.path, entry.created_at)
            .with_description(description.unwrap_or_default());
        let store = ProjectStore::new(project);
        if let Err(err) = self.storage.save_store(&store) {
            warn!(project = %name, error = %err, "store creation failed, rolling back registration");
            if registry.remove(&name).is_ok() {
                if let Err(rollback) = self.save_registry(&registry) {
                    warn!(project = %name, error = %rollback, "failed to roll back registration");
                }
            }
            return Err(err);
        }

        debug!(project = %name, path = %entry.path.display(), "project initialized");
        Ok(store)
    }

    /// The project registered for `dir` or one of its ancestors
    pub fn resolve_project(&self, dir: &Path) -> Result<RegistryEntry> {
        let registry = self.load_registry()?;
        registry
            .resolve(dir)
            .cloned()
            .ok_or_else(|| Error::NotARegisteredProject(dir.to_path_buf()))
    }

    pub fn project_by_name(&self, name: &str) -> Result<RegistryEntry> {
        self.load_registry()?
            .get_by_name(name)
            .cloned()
            .ok_or_else(|| Error::ProjectNotFound(name.to_string()))
    }

    /// Remove a project from the registry, optionally deleting its store.
    /// Only registered names are touched, and the project lock is held so
    /// no writer is mid-save.
    pub fn remove_project(&self, name: &str, delete_data: bool) -> Result<RegistryEntry> {
        self.project_by_name(name)?;
        let token = self.locks.acquire(name)?;
        let result = (|| {
            let mut registry = self.load_registry()?;
            let entry = registry.remove(name)?;
            self.save_registry(&registry)?;
            if delete_data {
                self.storage.remove_store(name)?;
            }
            Ok(entry)
        })();
        self.release(token);
        result
    }

    /// Drop registry entries whose directories are gone
    pub fn cleanup_registry(&self) -> Result<Vec<String>> {
        let mut registry = self.load_registry()?;
        let removed = registry.cleanup();
        if !removed.is_empty() {
            self.save_registry(&registry)?;
        }
        Ok(removed)
    }

    fn touch_registry(&self, project: &str) {
        let result = self.load_registry().and_then(|mut registry| {
            registry.update_last_accessed(project)?;
            self.save_registry(&registry)
        });
        if let Err(err) = result {
            warn!(project, error = %err, "failed to update last-accessed time");
        }
    }

    // =========================================================================
    // Store access
    // =========================================================================

    /// Load a store without locking (readers may observe the previous save)
    pub fn read_store(&self, project: &str) -> Result<ProjectStore> {
        let store = self.storage.load_store(project)?;
        self.touch_registry(project);
        Ok(store)
    }

    /// Run `f` against the store inside the project lock and save the
    /// result. Nothing is written if `f` fails.
    pub fn mutate<T, F>(&self, project: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut ProjectStore) -> Result<T>,
    {
        let token = self.locks.acquire(project)?;
        let result = (|| {
            let mut store = self.storage.load_store(project)?;
            let output = f(&mut store)?;
            if self.config.create_backups {
                if let Err(err) = self.storage.backup_store(project, self.config.max_backups()) {
                    warn!(project, error = %err, "backup failed");
                }
            }
            self.storage.save_store(&store)?;
            Ok(output)
        })();
        self.release(token);

        if result.is_ok() {
            self.touch_registry(project);
        }
        result
    }

    fn release(&self, token: crate::lock::LockToken) {
        let project = token.name().to_string();
        if let Err(err) = self.locks.release(token) {
            warn!(project = %project, error = %err, "failed to release project lock");
        }
    }

    fn announce(&self, notification: Result<Notification>) {
        if self.options.no_notify {
            return;
        }
        let outcome = notification.and_then(|n| self.notifier.notify(&n));
        match outcome {
            Ok(delivery) => debug!(?delivery, "change announced"),
            Err(err) => warn!(error = %err, "failed to notify viewers"),
        }
    }

    /// Sync settings and mirror file for this data directory
    pub fn todo_sync(&self) -> Result<TodoSync> {
        TodoSync::open(&self.storage, self.config.lock_timeout())
    }

    /// Replace the TODO mirror's items for `project` with its current tasks
    pub fn full_sync(&self, project: &str) -> Result<usize> {
        let store = self.read_store(project)?;
        self.todo_sync()?.full_sync(project, store.tasks())
    }

    fn mirror(&self, project: &str, change: TaskChange<'_>) {
        match self.todo_sync().and_then(|sync| sync.record(project, change)) {
            Ok(true) => debug!(project, "task mirrored to TODO list"),
            Ok(false) => {}
            Err(err) => warn!(project, error = %err, "failed to update TODO mirror"),
        }
    }

    // =========================================================================
    // Task operations
    // =========================================================================

    /// Add a task, optionally assigned, in a single locked save
    pub fn create_task(
        &self,
        project: &str,
        title: &str,
        description: &str,
        priority: Option<Priority>,
        assigned_to: Option<&str>,
    ) -> Result<Task> {
        let priority = priority.unwrap_or_else(|| self.config.default_priority());
        let assignee = assigned_to.map(str::trim).filter(|a| !a.is_empty());
        let task = self.mutate(project, |store| {
            let task = store.add_task(title, description, priority)?;
            match assignee {
                Some(assignee) => {
                    let patch = TaskPatch {
                        assigned_to: Some(Some(assignee.to_string())),
                        ..TaskPatch::default()
                    };
                    store.apply_patch(task.id, &patch)
                }
                None => Ok(task),
            }
        })?;
        self.announce(Notification::task_created(project, &task));
        self.mirror(project, TaskChange::Created(&task));
        Ok(task)
    }

    /// Apply a partial update. An empty patch reads the task without
    /// locking or saving.
    pub fn update_task(&self, project: &str, id: u64, patch: &TaskPatch) -> Result<Task> {
        if patch.is_empty() {
            return self.read_store(project)?.get_task(id);
        }
        let task = self.mutate(project, |store| store.apply_patch(id, patch))?;
        self.announce(Notification::task_updated(project, &task));
        let change = if patch.is_status_only() {
            TaskChange::StatusChanged(&task)
        } else {
            TaskChange::Edited(&task)
        };
        self.mirror(project, change);
        Ok(task)
    }

    /// Replace a whole task record
    pub fn replace_task(&self, project: &str, task: Task) -> Result<Task> {
        let task = self.mutate(project, |store| store.update_task(task))?;
        self.announce(Notification::task_updated(project, &task));
        self.mirror(project, TaskChange::Edited(&task));
        Ok(task)
    }

    pub fn delete_task(&self, project: &str, id: u64) -> Result<Task> {
        let task = self.mutate(project, |store| store.delete_task(id))?;
        self.announce(Ok(Notification::task_deleted(project, task.id, &task.title)));
        self.mirror(project, TaskChange::Deleted { id: task.id });
        Ok(task)
    }

    /// Claim a task for this session's agent
    pub fn claim_task(&self, project: &str, id: u64, force: bool) -> Result<Task> {
        let holder = self.claim_holder();
        let task = self.mutate(project, |store| store.claim_task(id, &holder, force))?;
        self.announce(Notification::task_updated(project, &task));
        self.mirror(project, TaskChange::Claimed(&task));
        Ok(task)
    }

    /// Release this agent's claim, or any claim with `force`
    pub fn release_claim(&self, project: &str, id: u64, force: bool) -> Result<Task> {
        let holder = (!force).then(|| self.claim_holder());
        let task = self.mutate(project, |store| {
            store.release_task_claim(id, holder.as_deref())
        })?;
        self.announce(Notification::task_updated(project, &task));
        self.mirror(project, TaskChange::Claimed(&task));
        Ok(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::Delivery;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Notification>>);

    impl Notify for Recorder {
        fn notify(&self, notification: &Notification) -> Result<Delivery> {
            self.0.lock().unwrap().push(notification.clone());
            Ok(Delivery::Broadcast { clients: 0 })
        }
    }

    fn session(dir: &TempDir) -> (Session, Arc<Recorder>) {
        let config = Config::with_root(&dir.path().join("home"));
        let recorder = Arc::new(Recorder::default());
        let session =
            Session::with_sink(config, SessionOptions::default(), recorder.clone()).unwrap();
        (session, recorder)
    }

    fn project_dir(dir: &TempDir) -> std::path::PathBuf {
        let path = dir.path().join("work").join("demo");
        std::fs::create_dir_all(&path).unwrap();
        path
    }

    #[test]
    fn init_defaults_name_to_directory() {
        let dir = TempDir::new().unwrap();
        let (session, _) = session(&dir);

        let store = session.init_project(None, &project_dir(&dir), None).unwrap();
        assert_eq!(store.project.name, "demo");
        assert_eq!(store.version(), 1);
        assert!(session.storage().store_exists("demo"));

        let again = session.init_project(Some("demo"), &dir.path().join("elsewhere"), None);
        assert!(matches!(again, Err(Error::Conflict(_))));
    }

    #[test]
    fn mutation_saves_and_notifies() {
        let dir = TempDir::new().unwrap();
        let (session, recorder) = session(&dir);
        session.init_project(None, &project_dir(&dir), None).unwrap();

        let task = session.create_task("demo", "Fix login bug", "", None, None).unwrap();
        assert_eq!(task.priority, Priority::Medium);

        let stored = session.read_store("demo").unwrap();
        assert_eq!(stored.version(), 2);
        assert!(!session.locks().lock_path("demo").unwrap().exists());

        let events = recorder.0.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, crate::notify::EventKind::TaskCreated);
    }

    #[test]
    fn failed_mutation_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let (session, recorder) = session(&dir);
        session.init_project(None, &project_dir(&dir), None).unwrap();

        let result = session.create_task("demo", "  ", "", None, None);
        assert!(matches!(result, Err(Error::Validation(_))));
        assert_eq!(session.read_store("demo").unwrap().version(), 1);
        assert!(recorder.0.lock().unwrap().is_empty());
        assert!(!session.locks().lock_path("demo").unwrap().exists());
    }

    #[test]
    fn resolve_from_subdirectory() {
        let dir = TempDir::new().unwrap();
        let (session, _) = session(&dir);
        let project = project_dir(&dir);
        session.init_project(None, &project, None).unwrap();

        let nested = project.join("src");
        assert_eq!(session.resolve_project(&nested).unwrap().name, "demo");
        assert!(matches!(
            session.resolve_project(dir.path()),
            Err(Error::NotARegisteredProject(_))
        ));
    }

    #[test]
    fn claims_use_agent_id() {
        let dir = TempDir::new().unwrap();
        let config = Config::with_root(&dir.path().join("home"));
        let options = SessionOptions {
            agent_id: Some("claude".to_string()),
            no_notify: true,
        };
        let session = Session::new(config, options).unwrap();
        session.init_project(None, &project_dir(&dir), None).unwrap();
        session.create_task("demo", "a", "", None, Some("alice")).unwrap();

        let claimed = session.claim_task("demo", 1, false).unwrap();
        assert_eq!(claimed.locked_by.as_deref(), Some("claude"));
        let released = session.release_claim("demo", 1, false).unwrap();
        assert!(!released.is_claimed());
    }

    #[test]
    fn remove_project_deletes_data_on_request() {
        let dir = TempDir::new().unwrap();
        let (session, _) = session(&dir);
        session.init_project(None, &project_dir(&dir), None).unwrap();

        session.remove_project("demo", true).unwrap();
        assert!(!session.storage().store_exists("demo"));
        assert!(matches!(
            session.project_by_name("demo"),
            Err(Error::ProjectNotFound(_))
        ));
    }
}
