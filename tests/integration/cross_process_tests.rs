//! Separate hook processes racing on one data directory.

use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::thread;
use std::time::Duration;

use agent_dashboard::config::{CONFIG_PATH_ENV, DATA_DIR_ENV};
use agent_dashboard::lock::{FileLock, LockSettings};
use agent_dashboard::persistence::inbox_repo::InboxRepo;
use agent_dashboard::persistence::session_repo::SessionRepo;
use agent_dashboard::persistence::DocumentStore;

use super::test_helpers::{contended_store, session_start_json, stop_json};

const PROCESSES: usize = 12;

fn run_hook(data_dir: &Path, hook: &str, stdin: &str) -> Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_agent-dashboard-hook"))
        .arg(hook)
        .arg("--no-deliver")
        .env(DATA_DIR_ENV, data_dir)
        .env_remove(CONFIG_PATH_ENV)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn hook");
    child
        .stdin
        .take()
        .expect("stdin")
        .write_all(stdin.as_bytes())
        .expect("write stdin");
    child.wait_with_output().expect("hook output")
}

#[tokio::test]
async fn parallel_hook_processes_register_every_session() {
    let dir = tempfile::tempdir().expect("tempdir");
    let data_dir = dir.path().to_path_buf();

    let handles: Vec<_> = (0..PROCESSES)
        .map(|i| {
            let data_dir = data_dir.clone();
            thread::spawn(move || {
                let payload = session_start_json(&format!("conv-{i}"), &data_dir);
                run_hook(&data_dir, "session-start", &payload)
            })
        })
        .collect();

    for handle in handles {
        let output = handle.join().expect("join");
        assert!(
            output.status.success(),
            "hook failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "{}");
    }

    let sessions = SessionRepo::new(contended_store(&data_dir))
        .list()
        .await
        .expect("list");
    assert_eq!(sessions.len(), PROCESSES);
}

#[tokio::test]
async fn parallel_hook_processes_drain_each_message_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let data_dir = dir.path().to_path_buf();
    let store = DocumentStore::open(data_dir.join("sessions.json"), LockSettings::default());
    let inbox = InboxRepo::new(std::sync::Arc::new(store));
    for i in 0..5 {
        inbox.enqueue("shared", &format!("note {i}")).await.expect("enqueue");
    }

    let handles: Vec<_> = (0..PROCESSES)
        .map(|_| {
            let data_dir = data_dir.clone();
            thread::spawn(move || {
                let payload = session_start_json("shared", &data_dir);
                run_hook(&data_dir, "session-start", &payload)
            })
        })
        .collect();

    let mut delivered = Vec::new();
    for handle in handles {
        let output = handle.join().expect("join");
        assert!(output.status.success());
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if stdout.starts_with("## Messages from Dashboard") {
            delivered.extend(
                stdout
                    .lines()
                    .filter_map(|l| l.strip_prefix("- "))
                    .map(str::to_owned),
            );
        }
    }

    delivered.sort();
    assert_eq!(
        delivered,
        vec!["note 0", "note 1", "note 2", "note 3", "note 4"]
    );
    assert!(inbox.list_pending("shared").await.expect("pending").is_empty());
}

#[test]
fn hook_rejects_payload_without_conversation_id() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = run_hook(dir.path(), "stop", r#"{"workspace_roots": []}"#);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("conversation_id"));
}

#[tokio::test]
async fn hook_exits_75_and_leaves_document_alone_while_lock_is_held() {
    let dir = tempfile::tempdir().expect("tempdir");
    let data_dir = dir.path().to_path_buf();
    let store = contended_store(&data_dir);
    SessionRepo::new(std::sync::Arc::clone(&store))
        .register("conv-1", &data_dir.to_string_lossy(), None)
        .await
        .expect("register");
    let before = std::fs::read(store.path()).expect("read document");

    let config_path = data_dir.join("hook.toml");
    std::fs::write(
        &config_path,
        format!(
            "data_dir = {}\nlock_timeout_ms = 200\nstale_lock_seconds = 60\n",
            toml::Value::String(data_dir.to_string_lossy().into_owned())
        ),
    )
    .expect("write config");

    let holder = FileLock::new(store.lock_path().to_path_buf(), Duration::from_secs(60))
        .try_acquire()
        .expect("try")
        .expect("hold store lock");

    let mut child = Command::new(env!("CARGO_BIN_EXE_agent-dashboard-hook"))
        .arg("stop")
        .arg("--no-deliver")
        .arg("--config")
        .arg(&config_path)
        .env_remove(CONFIG_PATH_ENV)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn hook");
    child
        .stdin
        .take()
        .expect("stdin")
        .write_all(stop_json("conv-1", "fix it", "Fixed.").as_bytes())
        .expect("write stdin");
    let output = child.wait_with_output().expect("hook output");

    assert_eq!(
        output.status.code(),
        Some(75),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert_eq!(
        std::fs::read(store.path()).expect("read document"),
        before,
        "a timed-out hook must not touch the document"
    );

    drop(holder);
    let session = SessionRepo::new(store).get("conv-1").await.expect("get");
    assert_eq!(session.turn_count(), 0);
}
