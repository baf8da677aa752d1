#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use quicktodo::config::Config;
use quicktodo::error::Result;
use quicktodo::notify::{Delivery, Notification, Notify};
use quicktodo::ops::{Session, SessionOptions};
use tempfile::TempDir;

/// Isolated config root plus a scratch area for project directories
pub struct TestEnv {
    home: TempDir,
    work: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        let env = Self {
            home: tempfile::tempdir().expect("failed to create home tempdir"),
            work: tempfile::tempdir().expect("failed to create work tempdir"),
        };
        env.config().save(env.home()).expect("write config");
        env
    }

    pub fn home(&self) -> &Path {
        self.home.path()
    }

    /// Defaults with a short lock timeout and no viewer ports
    pub fn config(&self) -> Config {
        let mut config = Config::with_root(self.home());
        config.lock_timeout = 2;
        config.notify_ports = Vec::new();
        config
    }

    pub fn project_dir(&self, name: &str) -> PathBuf {
        let path = self.work.path().join(name);
        fs::create_dir_all(&path).expect("create project dir");
        path
    }

    pub fn session(&self) -> Session {
        Session::new(self.config(), SessionOptions::default()).expect("session")
    }

    pub fn session_with(&self, notifier: Arc<dyn Notify>) -> Session {
        Session::with_sink(self.config(), SessionOptions::default(), notifier).expect("session")
    }

    pub fn store_file(&self, project: &str) -> PathBuf {
        self.home().join("projects").join(format!("{project}.json"))
    }

    /// `quicktodo` binary isolated to this environment, run from `dir`
    pub fn cmd(&self, dir: &Path) -> assert_cmd::Command {
        let mut cmd = assert_cmd::Command::cargo_bin("quicktodo").expect("binary");
        cmd.current_dir(dir)
            .env("QUICKTODO_HOME", self.home())
            .env_remove("QUICKTODO_AGENT_ID")
            .env_remove("QUICKTODO_PROJECT")
            .env_remove("RUST_LOG");
        cmd
    }
}

/// Notify sink that keeps everything it is given
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<Notification>>,
}

impl Recorder {
    pub fn events(&self) -> Vec<Notification> {
        self.events.lock().expect("recorder poisoned").clone()
    }
}

impl Notify for Recorder {
    fn notify(&self, notification: &Notification) -> Result<Delivery> {
        self.events
            .lock()
            .expect("recorder poisoned")
            .push(notification.clone());
        Ok(Delivery::Broadcast { clients: 0 })
    }
}
