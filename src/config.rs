//! Configuration loading and management
//!
//! Handles `config.json` in the per-user config root. The on-disk layout
//! under `data_dir` is owned by [`crate::storage::Storage`].

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::lock;
use crate::task::Priority;

/// Name of the configuration file inside the config root
pub const CONFIG_FILE: &str = "config.json";

/// Environment variable overriding the config root
pub const HOME_ENV: &str = "QUICKTODO_HOME";

const DEFAULT_LOCK_TIMEOUT_SECS: i64 = 30;
const DEFAULT_STALE_TIMEOUT_MINS: i64 = 5;
const DEFAULT_MAX_BACKUPS: i64 = 5;

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Root for registry, stores, locks, notifications and backups
    #[serde(default)]
    pub data_dir: PathBuf,

    /// Seconds to wait for a project lock before giving up
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout: i64,

    /// Minutes after which a task claim is reported as stale
    #[serde(default = "default_stale_timeout")]
    pub stale_timeout: i64,

    /// Priority used when a task is created without one
    #[serde(default = "default_priority")]
    pub default_priority: String,

    /// Copy the project store aside before each save
    #[serde(default = "default_true")]
    pub create_backups: bool,

    /// Number of backups kept per project
    #[serde(default = "default_max_backups")]
    pub max_backups: i64,

    /// Local ports probed for a running viewer, in order
    #[serde(default = "default_notify_ports")]
    pub notify_ports: Vec<u16>,

    /// Per-port request timeout for viewer notifications
    #[serde(default = "default_notify_timeout_ms")]
    pub notify_timeout_ms: u64,
}

fn default_lock_timeout() -> i64 {
    DEFAULT_LOCK_TIMEOUT_SECS
}

fn default_stale_timeout() -> i64 {
    DEFAULT_STALE_TIMEOUT_MINS
}

fn default_priority() -> String {
    "medium".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_backups() -> i64 {
    DEFAULT_MAX_BACKUPS
}

fn default_notify_ports() -> Vec<u16> {
    vec![8080, 3000, 8000, 8086, 9000, 8001, 8008]
}

fn default_notify_timeout_ms() -> u64 {
    300
}

impl Config {
    /// Defaults for a given config root (`data_dir` is the root itself)
    pub fn with_root(root: &Path) -> Self {
        Self {
            data_dir: root.to_path_buf(),
            lock_timeout: default_lock_timeout(),
            stale_timeout: default_stale_timeout(),
            default_priority: default_priority(),
            create_backups: true,
            max_backups: default_max_backups(),
            notify_ports: default_notify_ports(),
            notify_timeout_ms: default_notify_timeout_ms(),
        }
    }

    /// Resolve the config root: explicit override, then `$QUICKTODO_HOME`,
    /// then `~/.config/quicktodo`.
    pub fn resolve_root(explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            return Ok(path.to_path_buf());
        }
        if let Some(home) = std::env::var_os(HOME_ENV).filter(|value| !value.is_empty()) {
            return Ok(PathBuf::from(home));
        }
        let dirs = directories::BaseDirs::new().ok_or_else(|| {
            Error::InvalidConfig("cannot determine home directory".to_string())
        })?;
        Ok(dirs.home_dir().join(".config").join("quicktodo"))
    }

    /// Load `config.json` from `root`, writing defaults when it is missing
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(CONFIG_FILE);
        if !path.exists() {
            let config = Self::with_root(root);
            config.save(root)?;
            return Ok(config);
        }

        let content = fs::read_to_string(&path)?;
        let mut config: Config = serde_json::from_str(&content)
            .map_err(|err| Error::InvalidConfig(format!("{}: {err}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration atomically to `root/config.json`
    pub fn save(&self, root: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        lock::write_atomic(root.join(CONFIG_FILE), content.as_bytes())
    }

    /// Fill defaults for non-positive numbers and reject values that
    /// cannot be repaired.
    pub fn validate(&mut self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(Error::InvalidConfig("data_dir cannot be empty".to_string()));
        }
        if self.lock_timeout <= 0 {
            self.lock_timeout = DEFAULT_LOCK_TIMEOUT_SECS;
        }
        if self.stale_timeout <= 0 {
            self.stale_timeout = DEFAULT_STALE_TIMEOUT_MINS;
        }
        if self.default_priority.trim().is_empty() {
            self.default_priority = default_priority();
        }
        if self.default_priority.parse::<Priority>().is_err() {
            return Err(Error::InvalidConfig(format!(
                "invalid default_priority: {} (must be low, medium, or high)",
                self.default_priority
            )));
        }
        if self.max_backups < 0 {
            self.max_backups = DEFAULT_MAX_BACKUPS;
        }
        Ok(())
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout.max(1) as u64)
    }

    pub fn stale_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.stale_timeout.max(1))
    }

    pub fn default_priority(&self) -> Priority {
        self.default_priority.parse().unwrap_or_default()
    }

    pub fn max_backups(&self) -> usize {
        self.max_backups.max(0) as usize
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_millis(self.notify_timeout_ms)
    }
}
