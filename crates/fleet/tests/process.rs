// ABOUTME: End-to-end tests that launch real worker processes through /bin/sh.
// ABOUTME: Checks environment passing, secret clearing, exit reporting, and stop escalation.

#![cfg(unix)]

use fleet::{ExitEvent, Launcher, ProcessLauncher, Supervisor};
use fleet_core::{
    FileSourceConfig, LaunchSpec, ReconcileConfig, WorkerConfig, WorkerIdentity,
};
use std::io::Write;
use std::time::Duration;
use tokio::sync::mpsc;

fn shell_worker(script: &str) -> WorkerConfig {
    let mut worker = WorkerConfig::new("/bin/sh");
    worker.args = vec!["-c".to_string(), script.to_string()];
    worker
}

fn spec(id: &str) -> LaunchSpec {
    LaunchSpec::new(WorkerIdentity::new(id).unwrap())
}

async fn next_exit(rx: &mut mpsc::UnboundedReceiver<ExitEvent>) -> ExitEvent {
    tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("timed out waiting for worker exit")
        .expect("exit channel closed")
}

#[tokio::test]
async fn test_worker_receives_identity_and_not_the_secret() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("env.txt");
    let script = format!(
        "printf '%s|%s|%s' \"$AGENT_ID\" \"$CLIENT_ID\" \"${{BOT_TOKEN-unset}}\" > '{}'",
        out.display()
    );

    // Inherited by every child unless the launcher clears it
    std::env::set_var("BOT_TOKEN", "supervisor-secret");

    let mut launcher = ProcessLauncher::new(shell_worker(&script));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = launcher
        .spawn(&spec("agent-env").with_param("client_id", "777"), 1, tx)
        .await
        .unwrap();
    assert!(handle.pid().is_some());

    let exit = next_exit(&mut rx).await;
    assert_eq!(exit.identity.as_str(), "agent-env");
    assert_eq!(exit.generation, 1);
    assert_eq!(exit.code, Some(0));
    assert!(!exit.requested);

    let written = std::fs::read_to_string(&out).unwrap();
    assert_eq!(written, "agent-env|777|unset");
}

#[tokio::test]
async fn test_exit_code_is_reported() {
    let mut launcher = ProcessLauncher::new(shell_worker("exit 3"));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _handle = launcher.spawn(&spec("agent-exit"), 5, tx).await.unwrap();

    let exit = next_exit(&mut rx).await;
    assert_eq!(exit.code, Some(3));
    assert_eq!(exit.generation, 5);
    assert_eq!(exit.signal, None);
}

#[tokio::test]
async fn test_invalid_utf8_output_does_not_break_the_worker() {
    let script = "printf 'bad \\377 byte\\n'; sleep 0.3; \
                  i=0; while [ $i -lt 200 ]; do echo still-running; i=$((i+1)); done; \
                  sleep 0.5; exit 0";
    let mut launcher = ProcessLauncher::new(shell_worker(script));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _handle = launcher.spawn(&spec("agent-bytes"), 1, tx).await.unwrap();

    let exit = next_exit(&mut rx).await;
    assert_eq!(exit.signal, None);
    assert_eq!(exit.code, Some(0));
    assert!(!exit.requested);
}

#[tokio::test]
async fn test_stop_sends_sigterm() {
    let mut launcher = ProcessLauncher::new(shell_worker("sleep 30"));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut handle = launcher.spawn(&spec("agent-term"), 1, tx).await.unwrap();

    assert!(handle.stop());
    let exit = next_exit(&mut rx).await;
    assert!(exit.requested);
    assert_eq!(exit.signal, Some(15));
}

#[tokio::test]
async fn test_stop_escalates_to_kill_when_sigterm_is_ignored() {
    let mut worker = shell_worker("trap '' TERM; while true; do sleep 1; done");
    worker.stop_timeout_secs = 1;
    let mut launcher = ProcessLauncher::new(worker);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut handle = launcher.spawn(&spec("agent-stubborn"), 1, tx).await.unwrap();

    // Give the shell time to install its trap
    tokio::time::sleep(Duration::from_millis(300)).await;
    handle.stop();

    let exit = next_exit(&mut rx).await;
    assert!(exit.requested);
    assert_eq!(exit.signal, Some(9));
}

#[tokio::test]
async fn test_dropping_handle_stops_worker() {
    let mut launcher = ProcessLauncher::new(shell_worker("sleep 30"));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = launcher.spawn(&spec("agent-drop"), 1, tx).await.unwrap();

    drop(handle);
    let exit = next_exit(&mut rx).await;
    assert!(exit.requested);
}

#[tokio::test]
async fn test_supervisor_relaunches_crashed_process() {
    let mut workers = tempfile::NamedTempFile::new().unwrap();
    writeln!(workers, "[[workers]]\nidentity = \"agent-crashy\"").unwrap();

    let source = fleet::FileSource::new(&FileSourceConfig {
        path: workers.path().display().to_string(),
    });
    let launcher = ProcessLauncher::new(shell_worker("sleep 0.2; exit 1"));
    let mut sup = Supervisor::new(
        Box::new(source),
        Box::new(launcher),
        &ReconcileConfig::default(),
    );

    let first = sup.tick().await;
    assert_eq!(first.started.len(), 1);
    let first_pid = sup.registry().get("agent-crashy").unwrap().pid();

    // Wait for the crash to be reported
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while sup.registry().contains("agent-crashy") {
        assert!(tokio::time::Instant::now() < deadline, "worker never exited");
        tokio::time::sleep(Duration::from_millis(50)).await;
        sup.drain_exits();
    }

    let second = sup.tick().await;
    assert_eq!(second.started.len(), 1);
    assert_ne!(sup.registry().get("agent-crashy").unwrap().pid(), first_pid);

    sup.shutdown().await;
    assert!(sup.registry().is_empty());
}
