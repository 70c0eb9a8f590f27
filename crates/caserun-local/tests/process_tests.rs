#![cfg(unix)]

use caserun_core::config::Config;
use caserun_core::registry::CancelSignal;
use caserun_core::task::CaseStatus;
use caserun_local::args::ScriptInvocation;
use caserun_local::killer::{default_killer, descendants_of, ProcessTreeKiller};
use caserun_local::supervisor::{Completion, LaunchError, ProcessSupervisor};
use caserun_local::sweep::ProcessSweeper;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn sh_config(root: &Path) -> Config {
    Config {
        root_directory: root.to_path_buf(),
        interpreter: "sh".into(),
        script_extension: "sh".into(),
        poll_interval_ms: 50,
        grace_period_secs: 1,
        output_drain_secs: 2,
        ..Config::default()
    }
}

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    path
}

fn invocation(script: PathBuf) -> ScriptInvocation {
    let label = script.file_name().unwrap().to_string_lossy().into_owned();
    ScriptInvocation {
        script,
        args: vec!["--ip".into(), "\"127.0.0.1\"".into()],
        label,
    }
}

async fn wait_for_descendants(killer: &Arc<dyn ProcessTreeKiller>, pid: u32, n: usize) -> Vec<u32> {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let table = killer.list_processes().await.unwrap();
        let found = descendants_of(&table, pid);
        if found.len() >= n || Instant::now() >= deadline {
            return found;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn test_spawn_merges_output_into_timestamped_log() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        &dir.path().join("scripts"),
        "TC001.sh",
        "echo \"PASS: all assertions ok\"\necho \"args: $*\"\necho \"oops\" >&2\nexit 0\n",
    );
    let supervisor = ProcessSupervisor::new(&sh_config(dir.path()), default_killer());
    let log_path = dir.path().join("logs").join("TC001_1.log");

    let handle = supervisor.spawn(&invocation(script), &log_path).await.unwrap();
    let completion = supervisor
        .await_completion(&handle, Duration::from_secs(10), CancelSignal::never())
        .await
        .unwrap();
    assert_eq!(completion, Completion::Exited(0));
    assert_eq!(handle.finish_output(Duration::from_secs(5)).await, Some(3));

    let log = std::fs::read_to_string(&log_path).unwrap();
    let lines: Vec<&str> = log.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines.iter().all(|l| l.starts_with('[') && l.as_bytes()[13] == b']'));
    assert!(log.contains("] PASS: all assertions ok"));
    assert!(log.contains("] args: --ip \"127.0.0.1\""));
    assert!(log.contains("] oops"));
}

#[tokio::test]
async fn test_nonzero_exit_code_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "fail.sh", "echo 'Permission denied: /dev/ue0'\nexit 3\n");
    let supervisor = ProcessSupervisor::new(&sh_config(dir.path()), default_killer());

    let handle = supervisor
        .spawn(&invocation(script), &dir.path().join("fail.log"))
        .await
        .unwrap();
    let completion = supervisor
        .await_completion(&handle, Duration::from_secs(10), CancelSignal::never())
        .await
        .unwrap();
    assert_eq!(completion, Completion::Exited(3));
}

#[tokio::test]
async fn test_timeout_kills_process() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "slow.sh", "echo started\nsleep 30\necho never\n");
    let killer = default_killer();
    let supervisor = ProcessSupervisor::new(&sh_config(dir.path()), Arc::clone(&killer));

    let handle = supervisor
        .spawn(&invocation(script), &dir.path().join("slow.log"))
        .await
        .unwrap();
    let pid = handle.pid().unwrap();

    let started = Instant::now();
    let completion = supervisor
        .await_completion(&handle, Duration::from_millis(500), CancelSignal::never())
        .await
        .unwrap();
    assert_eq!(completion, Completion::TimedOut);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!killer.is_alive(pid).await);

    handle.finish_output(Duration::from_secs(2)).await;
    let log = std::fs::read_to_string(dir.path().join("slow.log")).unwrap();
    assert!(log.contains("started"));
    assert!(!log.contains("never"));
}

#[tokio::test]
async fn test_terminate_tree_leaves_no_survivors() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "tree.sh", "sleep 60 &\nsleep 60 &\nwait\n");
    let killer = default_killer();
    let supervisor = ProcessSupervisor::new(&sh_config(dir.path()), Arc::clone(&killer));

    let handle = supervisor
        .spawn(&invocation(script), &dir.path().join("tree.log"))
        .await
        .unwrap();
    let pid = handle.pid().unwrap();
    let children = wait_for_descendants(&killer, pid, 2).await;
    assert_eq!(children.len(), 2, "script should have two children");

    supervisor.terminate_tree(&handle).await;

    assert!(!killer.is_alive(pid).await, "parent still alive");
    for child in &children {
        assert!(!killer.is_alive(*child).await, "child {} still alive", child);
    }
    assert!(handle.try_exit().await.unwrap().is_some());
}

#[tokio::test]
async fn test_cancel_signal_interrupts_wait() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "wait.sh", "sleep 30\n");
    let killer = default_killer();
    let supervisor = ProcessSupervisor::new(&sh_config(dir.path()), Arc::clone(&killer));
    let registry = Arc::new(caserun_core::registry::TaskRegistry::new(1));
    let registration = registry.register(&"T-wait".into()).unwrap();
    let signal = registration.state().cancel_signal();

    let handle = supervisor
        .spawn(&invocation(script), &dir.path().join("wait.log"))
        .await
        .unwrap();
    let pid = handle.pid().unwrap();

    let state = Arc::clone(registration.state());
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        state.cancel().await;
    });

    let started = Instant::now();
    let completion = supervisor
        .await_completion(&handle, Duration::from_secs(30), signal)
        .await
        .unwrap();
    assert_eq!(completion, Completion::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!killer.is_alive(pid).await);
}

#[tokio::test]
async fn test_missing_launcher_is_blocked() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "x.sh", "echo PASS\n");
    let config = Config {
        interpreter: "caserun-no-such-launcher-7f3a".into(),
        ..sh_config(dir.path())
    };
    let supervisor = ProcessSupervisor::new(&config, default_killer());

    let err = supervisor
        .spawn(&invocation(script), &dir.path().join("x.log"))
        .await
        .err()
        .expect("spawn must fail");
    assert!(matches!(err, LaunchError::LauncherNotFound { .. }));

    let outcome = err.outcome();
    assert_eq!(outcome.status, CaseStatus::Blocked);
    assert!(outcome.reason.unwrap().starts_with("launcher unavailable"));
}

#[tokio::test]
async fn test_sweep_by_marker_kills_matching_tree() {
    let marker = format!("caserun-sweep-marker-{}-{}", std::process::id(), chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0));
    let mut child = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(format!("sleep 60; : {}", marker))
        .kill_on_drop(true)
        .spawn()
        .unwrap();
    let pid = child.id().unwrap();
    let killer = default_killer();
    let sleeper = wait_for_descendants(&killer, pid, 1).await;

    let sweeper = ProcessSweeper::new(Arc::clone(&killer), None, Duration::from_secs(1));
    let count = sweeper.terminate_by_task_id(&marker).await;
    assert!(count >= 1);

    tokio::time::timeout(Duration::from_secs(5), child.wait())
        .await
        .expect("swept process exits")
        .unwrap();
    for pid in sleeper {
        assert!(!killer.is_alive(pid).await);
    }

    assert_eq!(sweeper.terminate_by_task_id(&marker).await, 0);
}
