//! Project locks and atomic writes
//!
//! This module provides the cross-process mutual exclusion used around
//! every project mutation:
//! - One lock file per project, `<lock_dir>/<name>.lock`, holding the
//!   holder pid and an RFC3339 creation timestamp on two lines
//! - Exclusive file creation is the only atomic step; inspection and
//!   eviction before it are advisory
//! - Locks older than [`LOCK_STALE_AFTER`] are evicted regardless of the
//!   holder, locks whose holder process is gone are evicted regardless of age
//! - Atomic write pattern (temp file in the same directory + rename)

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::project::validate_project_name;

/// Age after which a lock file is evicted without checking its holder
pub const LOCK_STALE_AFTER: Duration = Duration::from_secs(5 * 60);

/// Sleep between acquisition attempts while a lock is held
pub const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(100);

const LOCK_EXTENSION: &str = "lock";

/// Answers whether a process id refers to a running process.
pub trait ProcessProbe: Send + Sync {
    fn is_alive(&self, pid: u32) -> bool;
}

/// Liveness probe backed by the operating system.
///
/// On Unix this sends signal 0; `EPERM` still means the process exists.
/// Elsewhere every pid is reported alive and only staleness evicts locks.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsProcessProbe;

impl ProcessProbe for OsProcessProbe {
    #[cfg(unix)]
    fn is_alive(&self, pid: u32) -> bool {
        let Ok(pid) = libc::pid_t::try_from(pid) else {
            return false;
        };
        if pid <= 0 {
            return false;
        }
        // SAFETY: signal 0 performs only the existence and permission checks.
        if unsafe { libc::kill(pid, 0) } == 0 {
            return true;
        }
        io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }

    #[cfg(not(unix))]
    fn is_alive(&self, pid: u32) -> bool {
        pid != 0
    }
}

/// A lock file as found on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockInfo {
    pub name: String,
    pub pid: u32,
    pub since: DateTime<Utc>,
    pub path: PathBuf,
}

impl LockInfo {
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.since).to_std().unwrap_or(Duration::ZERO)
    }
}

#[derive(Debug)]
enum LockRecord {
    Held { pid: u32, since: DateTime<Utc> },
    /// Content could not be parsed (possibly mid-write); aged by mtime.
    Unreadable { since: DateTime<Utc> },
}

impl LockRecord {
    fn since(&self) -> DateTime<Utc> {
        match self {
            LockRecord::Held { since, .. } | LockRecord::Unreadable { since } => *since,
        }
    }
}

/// Proof of holding a project lock.
///
/// Pass it back to [`LockManager::release`]. A token dropped without being
/// released removes its lock file if the file still names this token's pid.
#[derive(Debug)]
#[must_use = "dropping a LockToken releases the lock"]
pub struct LockToken {
    name: String,
    pid: u32,
    path: PathBuf,
    released: bool,
}

impl LockToken {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl Drop for LockToken {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = release_owned(&self.path, &self.name, self.pid) {
            warn!(project = %self.name, error = %err, "failed to release lock on drop");
        }
    }
}

/// Acquires and administers per-project lock files in one directory
#[derive(Clone)]
pub struct LockManager {
    dir: PathBuf,
    timeout: Duration,
    pid: u32,
    probe: Arc<dyn ProcessProbe>,
}

impl std::fmt::Debug for LockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockManager")
            .field("dir", &self.dir)
            .field("timeout", &self.timeout)
            .field("pid", &self.pid)
            .finish()
    }
}

impl LockManager {
    /// Lock manager for the current process using the OS liveness probe
    pub fn new(dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            dir: dir.into(),
            timeout,
            pid: std::process::id(),
            probe: Arc::new(OsProcessProbe),
        }
    }

    /// Replace the liveness probe
    pub fn with_probe(mut self, probe: Arc<dyn ProcessProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Record `pid` as the holder instead of the current process
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Lock file for `name`. Names that are not valid project names are
    /// refused so a lock can never land outside the lock directory.
    pub fn lock_path(&self, name: &str) -> Result<PathBuf> {
        validate_project_name(name)?;
        Ok(self.dir.join(format!("{name}.{LOCK_EXTENSION}")))
    }

    /// Acquire the lock for `name`, waiting up to the configured timeout.
    pub fn acquire(&self, name: &str) -> Result<LockToken> {
        let path = self.lock_path(name)?;
        fs::create_dir_all(&self.dir)?;
        let start = Instant::now();

        loop {
            let mut holder = None;
            if let Some(record) = read_record(&path)? {
                let age = (Utc::now() - record.since())
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                match record {
                    _ if age > LOCK_STALE_AFTER => {
                        debug!(project = name, age_secs = age.as_secs(), "evicting stale lock");
                        remove_if_exists(&path)?;
                    }
                    LockRecord::Held { pid, .. } if !self.probe.is_alive(pid) => {
                        debug!(project = name, pid, "evicting orphaned lock");
                        remove_if_exists(&path)?;
                    }
                    LockRecord::Held { pid, .. } => holder = Some(pid),
                    LockRecord::Unreadable { .. } => {}
                }
                if path.exists() {
                    self.wait_or_timeout(name, holder, start)?;
                    continue;
                }
            }

            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let content = format!(
                        "{}\n{}\n",
                        self.pid,
                        Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
                    );
                    if let Err(err) = file.write_all(content.as_bytes()).and_then(|_| file.sync_all())
                    {
                        let _ = fs::remove_file(&path);
                        return Err(Error::Io(err));
                    }
                    debug!(project = name, pid = self.pid, "lock acquired");
                    return Ok(LockToken {
                        name: name.to_string(),
                        pid: self.pid,
                        path,
                        released: false,
                    });
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    self.wait_or_timeout(name, holder, start)?;
                }
                Err(err) => return Err(Error::Io(err)),
            }
        }
    }

    fn wait_or_timeout(&self, name: &str, holder: Option<u32>, start: Instant) -> Result<()> {
        if start.elapsed() >= self.timeout {
            return Err(Error::LockTimeout {
                project: name.to_string(),
                holder,
            });
        }
        std::thread::sleep(LOCK_RETRY_INTERVAL);
        Ok(())
    }

    /// Release a lock. A missing lock file counts as released; a lock file
    /// naming another pid is left in place.
    pub fn release(&self, mut token: LockToken) -> Result<()> {
        token.released = true;
        release_owned(&token.path, &token.name, token.pid)
    }

    /// Inspect the lock file for `name` without touching it
    pub fn read_lock(&self, name: &str) -> Result<Option<LockInfo>> {
        let path = self.lock_path(name)?;
        Ok(match read_record(&path)? {
            Some(LockRecord::Held { pid, since }) => Some(LockInfo {
                name: name.to_string(),
                pid,
                since,
                path,
            }),
            _ => None,
        })
    }

    /// Locks whose holder process is still running, sorted by name
    pub fn active_locks(&self) -> Result<Vec<LockInfo>> {
        let mut active = Vec::new();
        for (name, path) in self.lock_files()? {
            if let Some(LockRecord::Held { pid, since }) = read_record(&path)? {
                if self.probe.is_alive(pid) {
                    active.push(LockInfo {
                        name,
                        pid,
                        since,
                        path,
                    });
                }
            }
        }
        Ok(active)
    }

    /// Remove every lock older than `max_age`, plus locks held by dead
    /// processes. Ownership is not checked. Returns the removed names.
    pub fn cleanup_locks(&self, max_age: Duration) -> Result<Vec<String>> {
        let now = Utc::now();
        let mut removed = Vec::new();
        for (name, path) in self.lock_files()? {
            let Some(record) = read_record(&path)? else {
                continue;
            };
            let age = (now - record.since()).to_std().unwrap_or(Duration::ZERO);
            let orphaned = matches!(record, LockRecord::Held { pid, .. } if !self.probe.is_alive(pid));
            if age > max_age || orphaned {
                debug!(project = %name, age_secs = age.as_secs(), orphaned, "removing lock");
                if remove_if_exists(&path)? {
                    removed.push(name);
                }
            }
        }
        Ok(removed)
    }

    /// Remove the lock for `name` regardless of holder. Returns whether a
    /// lock file existed.
    pub fn force_unlock(&self, name: &str) -> Result<bool> {
        remove_if_exists(&self.lock_path(name)?)
    }

    fn lock_files(&self) -> Result<Vec<(String, PathBuf)>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(Error::Io(err)),
        };

        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(LOCK_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                files.push((stem.to_string(), path.clone()));
            }
        }
        files.sort();
        Ok(files)
    }
}

fn read_record(path: &Path) -> Result<Option<LockRecord>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) if err.kind() == io::ErrorKind::InvalidData => String::new(),
        Err(err) => return Err(Error::Io(err)),
    };

    if let Some((pid, since)) = parse_lock_content(&content) {
        return Ok(Some(LockRecord::Held { pid, since }));
    }

    let modified = match fs::metadata(path).and_then(|meta| meta.modified()) {
        Ok(modified) => DateTime::<Utc>::from(modified),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(Error::Io(err)),
    };
    Ok(Some(LockRecord::Unreadable { since: modified }))
}

fn parse_lock_content(content: &str) -> Option<(u32, DateTime<Utc>)> {
    let mut lines = content.lines();
    let pid = lines.next()?.trim().parse().ok()?;
    let since = DateTime::parse_from_rfc3339(lines.next()?.trim()).ok()?;
    Some((pid, since.with_timezone(&Utc)))
}

fn release_owned(path: &Path, name: &str, pid: u32) -> Result<()> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(Error::Io(err)),
    };

    match parse_lock_content(&content) {
        Some((holder, _)) if holder == pid => {
            remove_if_exists(path)?;
            debug!(project = name, pid, "lock released");
            Ok(())
        }
        Some((holder, _)) => Err(Error::LockNotOwned {
            project: name.to_string(),
            holder,
            owner: pid,
        }),
        None => Err(Error::OperationFailed(format!(
            "lock file for '{name}' is unreadable: {}",
            path.display()
        ))),
    }
}

fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(Error::Io(err)),
    }
}

/// Atomically write data to a file
///
/// Writes a temporary file in the same directory, syncs it, then renames it
/// over `path`. If the rename fails the temporary file is removed and the
/// previous contents of `path` are untouched.
pub fn write_atomic(path: impl AsRef<Path>, data: &[u8]) -> Result<()> {
    let path = path.as_ref();
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(data)?;
    temp.as_file().sync_all()?;
    // On failure the returned temp file is dropped, which deletes it.
    temp.persist(path).map_err(|err| Error::Io(err.error))?;
    Ok(())
}
