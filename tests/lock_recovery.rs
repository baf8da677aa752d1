mod support;

use std::collections::HashSet;
use std::path::Path;
use std::process::{Child, Command};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use quicktodo::error::Error;
use quicktodo::lock::LockManager;
use support::TestEnv;

const READY_POLL_INTERVAL: Duration = Duration::from_millis(25);
const READY_TIMEOUT: Duration = Duration::from_secs(5);

#[test]
fn lock_helper_process() {
    if std::env::var("QT_LOCK_HELPER").ok().as_deref() != Some("1") {
        return;
    }

    let dir = std::env::var("QT_LOCK_DIR").expect("QT_LOCK_DIR");
    let ready = std::env::var("QT_LOCK_READY").expect("QT_LOCK_READY");

    let locks = LockManager::new(dir, Duration::from_secs(1));
    let _token = locks.acquire("demo").expect("lock helper acquire");
    std::fs::write(&ready, "ready").expect("ready write");
    thread::sleep(Duration::from_secs(3));
}

fn spawn_holder(lock_dir: &Path, ready: &Path) -> Result<Child, Box<dyn std::error::Error>> {
    let mut child = Command::new(std::env::current_exe()?)
        .args(["--exact", "lock_helper_process", "--nocapture"])
        .env("QT_LOCK_HELPER", "1")
        .env("QT_LOCK_DIR", lock_dir.display().to_string())
        .env("QT_LOCK_READY", ready.display().to_string())
        .spawn()?;

    let start = Instant::now();
    while !ready.exists() {
        if start.elapsed() > READY_TIMEOUT {
            let _ = child.kill();
            return Err("lock helper not ready".into());
        }
        thread::sleep(READY_POLL_INTERVAL);
    }
    Ok(child)
}

#[test]
fn times_out_while_other_process_holds_lock() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let lock_dir = dir.path().join("locks");
    let mut child = spawn_holder(&lock_dir, &dir.path().join("ready"))?;

    let locks = LockManager::new(&lock_dir, Duration::from_millis(200));
    match locks.acquire("demo") {
        Ok(_) => return Err("expected lock timeout".into()),
        Err(Error::LockTimeout { project, holder }) => {
            assert_eq!(project, "demo");
            assert_eq!(holder, Some(child.id()));
        }
        Err(other) => return Err(format!("unexpected error: {other}").into()),
    }

    child.wait()?;
    Ok(())
}

#[test]
fn lock_of_killed_process_is_recovered() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let lock_dir = dir.path().join("locks");
    let mut child = spawn_holder(&lock_dir, &dir.path().join("ready"))?;
    let holder = child.id();

    child.kill()?;
    child.wait()?;
    assert_eq!(
        std::fs::read_to_string(lock_dir.join("demo.lock"))?
            .lines()
            .next(),
        Some(holder.to_string().as_str())
    );

    let locks = LockManager::new(&lock_dir, Duration::from_millis(500));
    let token = locks.acquire("demo")?;
    assert_eq!(token.pid(), std::process::id());
    locks.release(token)?;
    assert!(!lock_dir.join("demo.lock").exists());
    Ok(())
}

#[test]
fn stale_lock_of_live_process_is_evicted() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let locks = LockManager::new(dir.path(), Duration::from_millis(200));

    let since = Utc::now() - chrono::Duration::minutes(10);
    std::fs::write(
        locks.lock_path("demo")?,
        format!("{}\n{}\n", std::process::id(), since.to_rfc3339()),
    )?;

    let token = locks.acquire("demo")?;
    let info = locks.read_lock("demo")?.ok_or("lock file missing")?;
    assert!(info.since > since);
    locks.release(token)?;
    Ok(())
}

#[test]
fn parallel_sessions_never_lose_updates() -> Result<(), Box<dyn std::error::Error>> {
    let env = TestEnv::new();
    env.session().init_project(Some("demo"), &env.project_dir("demo"), None)?;

    let count = 8;
    let config = env.config();
    let mut handles = Vec::new();
    for idx in 0..count {
        let config = config.clone();
        handles.push(thread::spawn(move || {
            let session = quicktodo::ops::Session::new(config, Default::default())?;
            session.create_task("demo", &format!("task {idx}"), "", None, None)
        }));
    }
    for handle in handles {
        handle.join().expect("join thread")?;
    }

    let store = env.session().read_store("demo")?;
    assert_eq!(store.len(), count);
    assert_eq!(store.version(), 1 + count as u64);
    let ids: HashSet<u64> = store.tasks().iter().map(|task| task.id).collect();
    assert_eq!(ids, (1..=count as u64).collect());
    Ok(())
}

#[test]
fn cli_exits_with_lock_code_when_busy() -> Result<(), Box<dyn std::error::Error>> {
    let env = TestEnv::new();
    let mut config = env.config();
    config.lock_timeout = 1;
    config.save(env.home())?;

    let project = env.project_dir("demo");
    env.cmd(&project).arg("init").assert().success();

    let ready = env.home().join("ready");
    let mut child = spawn_holder(&env.home().join("locks"), &ready)?;

    env.cmd(&project)
        .args(["--json", "create-task", "blocked"])
        .assert()
        .code(3)
        .stdout(predicates::str::contains("\"kind\": \"lock_timeout\""));

    child.wait()?;
    Ok(())
}
