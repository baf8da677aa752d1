//! Lock administration commands.

use std::time::Duration;

use chrono::Utc;
use serde::Serialize;

use super::CommonOptions;
use crate::error::Result;
use crate::lock::LockInfo;
use crate::output::{emit_success, HumanOutput};

pub struct CleanupOptions {
    pub max_age: u64,
    pub common: CommonOptions,
}

pub struct ForceUnlockOptions {
    pub name: String,
    pub common: CommonOptions,
}

#[derive(Serialize)]
struct LockListReport {
    total: usize,
    locks: Vec<LockInfo>,
}

#[derive(Serialize)]
struct LockCleanupReport {
    max_age_secs: u64,
    removed: Vec<String>,
}

#[derive(Serialize)]
struct ForceUnlockReport {
    project: String,
    removed: bool,
}

pub fn run_list(common: CommonOptions) -> Result<()> {
    let session = common.open_session()?;
    let locks = session.locks().active_locks()?;

    let now = Utc::now();
    let mut human = HumanOutput::new(format!("Active locks ({})", locks.len()));
    for lock in &locks {
        human.push_detail(format!(
            "{}  pid {}  held {}s",
            lock.name,
            lock.pid,
            lock.age(now).as_secs()
        ));
    }

    let report = LockListReport {
        total: locks.len(),
        locks,
    };
    emit_success(common.output(), "locks list", &report, Some(&human))
}

pub fn run_cleanup(options: CleanupOptions) -> Result<()> {
    let session = options.common.open_session()?;
    let removed = session
        .locks()
        .cleanup_locks(Duration::from_secs(options.max_age))?;

    let mut human = HumanOutput::new(format!("Removed {} lock(s)", removed.len()));
    for name in &removed {
        human.push_detail(name.clone());
    }

    let report = LockCleanupReport {
        max_age_secs: options.max_age,
        removed,
    };
    emit_success(options.common.output(), "locks cleanup", &report, Some(&human))
}

pub fn run_force_unlock(options: ForceUnlockOptions) -> Result<()> {
    let session = options.common.open_session()?;
    if let Some(holder) = session.locks().read_lock(&options.name)? {
        tracing::warn!(project = %options.name, pid = holder.pid, "forcing lock removal");
    }
    let removed = session.locks().force_unlock(&options.name)?;

    let mut human = if removed {
        HumanOutput::new(format!("Lock removed: {}", options.name))
    } else {
        HumanOutput::new(format!("No lock held on {}", options.name))
    };
    if removed {
        human.push_warning("the previous holder may still be writing; check the project");
    }

    let report = ForceUnlockReport {
        project: options.name,
        removed,
    };
    emit_success(options.common.output(), "locks force-unlock", &report, Some(&human))
}
