use std::sync::Arc;

use chrono::Utc;
use replhost::models::session::{SessionRecord, SessionState};
use replhost::orchestrator::{SessionManager, StartOptions};
use replhost::persistence::StateDir;

use super::test_helpers::{manager_with, run, test_config, test_manager};

#[tokio::test]
async fn session_records_follow_transitions() {
    let (manager, temp) = test_manager();
    let dir = StateDir::open(temp.path()).expect("state dir");

    let info = manager.start("main", StartOptions::default()).await.expect("start");
    let record = dir.load_session("main").expect("load").expect("persisted");
    assert_eq!(record.state, SessionState::Running);
    assert_eq!(record.pid, info.pid);

    manager.pause("main").await.expect("pause");
    assert!(dir.load_session("main").expect("load").expect("persisted").paused);

    manager.stop("main").await.expect("stop");
    let record = dir.load_session("main").expect("load").expect("persisted");
    assert_eq!(record.state, SessionState::Stopped);
    assert_eq!(record.pid, None);
}

#[tokio::test]
async fn restart_reconciles_stale_sessions() {
    let temp = tempfile::tempdir().expect("tempdir");
    let dir = StateDir::open(temp.path()).expect("state dir");
    let now = Utc::now();
    let stale = |name: &str, state: SessionState| SessionRecord {
        name: name.into(),
        state,
        created_at: now,
        updated_at: now,
        pid: Some(999_999_999),
        kernel: "builtin".into(),
        working_dir: None,
        paused: false,
        exit_reason: None,
    };
    dir.save_session(&stale("left-running", SessionState::Running)).expect("save");
    dir.save_session(&stale("left-stopping", SessionState::Stopping)).expect("save");
    let mut finished = stale("finished", SessionState::Stopped);
    finished.pid = None;
    dir.save_session(&finished).expect("save");

    let manager = manager_with(test_config(temp.path(), ""));
    assert_eq!(manager.reconcile_persisted().await.expect("reconcile"), 2);

    let running = manager.status("left-running").await.expect("status");
    assert_eq!(running.state, SessionState::Crashed);
    assert!(running
        .exit_reason
        .is_some_and(|reason| reason.starts_with("stale")));
    assert_eq!(
        manager.status("left-stopping").await.expect("status").state,
        SessionState::Stopped
    );
    assert_eq!(
        manager.status("finished").await.expect("status").state,
        SessionState::Stopped
    );
    assert!(dir.stale_sessions().expect("stale").is_empty());

    // A reconciled session starts normally.
    manager.start("left-running", StartOptions::default()).await.expect("start");
    manager.stop("left-running").await.expect("stop");
}

#[tokio::test]
async fn persisted_checkpoints_reload_on_request() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = test_config(temp.path(), "[checkpoints]\npersist = true");

    let first = manager_with(config.clone());
    first.start("main", StartOptions::default()).await.expect("start");
    run(&first, "main", "x = 'saved'").await;
    first.checkpoint("main", "c0").await.expect("checkpoint");
    first.stop_all().await;
    assert!(temp
        .path()
        .join("sessions/main/checkpoints/c0.json")
        .is_file());
    drop(first);

    let second: Arc<SessionManager> = manager_with(config);
    second.reconcile_persisted().await.expect("reconcile");

    second.start("main", StartOptions::default()).await.expect("start");
    assert!(second.list_checkpoints("main").await.expect("list").is_empty());
    second.stop("main").await.expect("stop");

    let info = second
        .start(
            "main",
            StartOptions {
                load_checkpoints: true,
                ..StartOptions::default()
            },
        )
        .await
        .expect("start with checkpoints");
    assert_eq!(info.checkpoints, vec!["c0"]);

    second.rollback("main", "c0").await.expect("rollback");
    let (_, stdout, _) = run(&second, "main", "print(x)").await;
    assert_eq!(stdout, "saved\n");
    second.stop("main").await.expect("stop");
}

#[tokio::test]
async fn tampered_checkpoint_is_discarded_on_reload() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = test_config(temp.path(), "[checkpoints]\npersist = true");

    let manager = manager_with(config);
    manager.start("main", StartOptions::default()).await.expect("start");
    manager.checkpoint("main", "c0").await.expect("checkpoint");
    manager.stop("main").await.expect("stop");

    let path = temp.path().join("sessions/main/checkpoints/c0.json");
    let mut value: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).expect("read")).expect("json");
    value["state"]["vars"]["injected"] = serde_json::json!({"type": "int", "value": 1});
    std::fs::write(&path, value.to_string()).expect("write");

    let info = manager
        .start(
            "main",
            StartOptions {
                load_checkpoints: true,
                ..StartOptions::default()
            },
        )
        .await
        .expect("start");
    assert!(info.checkpoints.is_empty());
    manager.stop("main").await.expect("stop");
}

#[tokio::test]
async fn removed_session_forgets_persisted_checkpoints() {
    let temp = tempfile::tempdir().expect("tempdir");
    let manager = manager_with(test_config(temp.path(), "[checkpoints]\npersist = true"));
    manager.start("main", StartOptions::default()).await.expect("start");
    manager.checkpoint("main", "c0").await.expect("checkpoint");
    manager.stop("main").await.expect("stop");
    manager.remove("main").await.expect("remove");

    let dir = StateDir::open(temp.path()).expect("state dir");
    assert!(dir.load_checkpoints("main").expect("load").is_empty());
}
