use chrono::{Duration, Utc};
use replhost::models::checkpoint::Checkpoint;
use replhost::models::session::{SessionRecord, SessionState};
use replhost::persistence::state_dir::is_stale;
use replhost::persistence::{DaemonInfo, StateDir};
use replhost::AppError;
use serde_json::json;

fn record(name: &str, state: SessionState, pid: Option<u32>, age_secs: i64) -> SessionRecord {
    let at = Utc::now() - Duration::seconds(age_secs);
    SessionRecord {
        name: name.into(),
        state,
        created_at: at,
        updated_at: at,
        pid,
        kernel: "builtin".into(),
        working_dir: None,
        paused: false,
        exit_reason: None,
    }
}

#[test]
fn open_creates_layout() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path().join("nested").join("state");
    let dir = StateDir::open(&root).expect("open");
    assert!(root.join("sessions").is_dir());
    assert_eq!(dir.root(), root);
    assert_eq!(dir.log_path(), root.join("daemon.log"));
}

#[test]
fn lock_is_exclusive_until_dropped() {
    let temp = tempfile::tempdir().expect("tempdir");
    let dir = StateDir::open(temp.path()).expect("open");

    let lock = dir.lock().expect("first lock");
    assert!(lock.path().ends_with("daemon.lock"));
    assert!(matches!(dir.lock(), Err(AppError::AlreadyRunning(_))));

    drop(lock);
    dir.lock().expect("lock after release");
}

#[test]
fn daemon_info_round_trip() {
    let temp = tempfile::tempdir().expect("tempdir");
    let dir = StateDir::open(temp.path()).expect("open");
    assert!(dir.read_daemon_info().expect("read").is_none());

    let info = DaemonInfo {
        pid: 42,
        ipc_name: "replhost-test".into(),
        auth_token: "token".into(),
        started_at: Utc::now(),
    };
    dir.write_daemon_info(&info).expect("write");
    assert_eq!(dir.read_daemon_info().expect("read"), Some(info));

    dir.clear_daemon_info().expect("clear");
    dir.clear_daemon_info().expect("clear twice");
    assert!(dir.read_daemon_info().expect("read").is_none());
}

#[test]
fn sessions_are_listed_oldest_first() {
    let temp = tempfile::tempdir().expect("tempdir");
    let dir = StateDir::open(temp.path()).expect("open");

    dir.save_session(&record("young", SessionState::Stopped, None, 10)).expect("save");
    dir.save_session(&record("old", SessionState::Crashed, None, 100)).expect("save");

    let names: Vec<_> = dir.list_sessions().expect("list").into_iter().map(|r| r.name).collect();
    assert_eq!(names, vec!["old", "young"]);
    assert_eq!(
        dir.load_session("old").expect("load").expect("present").state,
        SessionState::Crashed
    );
    assert!(dir.load_session("missing").expect("load").is_none());
}

#[test]
fn corrupt_records_are_skipped() {
    let temp = tempfile::tempdir().expect("tempdir");
    let dir = StateDir::open(temp.path()).expect("open");
    dir.save_session(&record("good", SessionState::Stopped, None, 1)).expect("save");

    let bad = temp.path().join("sessions").join("bad");
    std::fs::create_dir_all(&bad).expect("mkdir");
    std::fs::write(bad.join("session.json"), "{ not json").expect("write");

    let sessions = dir.list_sessions().expect("list");
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].name, "good");
}

#[test]
fn stale_sessions_are_live_records_without_a_process() {
    let temp = tempfile::tempdir().expect("tempdir");
    let dir = StateDir::open(temp.path()).expect("open");

    // A pid far above any default pid_max.
    dir.save_session(&record("ghost", SessionState::Running, Some(999_999_999), 3)).expect("save");
    dir.save_session(&record("no-pid", SessionState::Starting, None, 2)).expect("save");
    dir.save_session(&record("done", SessionState::Stopped, None, 1)).expect("save");
    #[cfg(unix)]
    dir.save_session(&record("me", SessionState::Running, Some(std::process::id()), 0))
        .expect("save");

    let stale: Vec<_> = dir.stale_sessions().expect("stale").into_iter().map(|r| r.name).collect();
    assert_eq!(stale, vec!["ghost", "no-pid"]);

    assert!(is_stale(&record("ghost", SessionState::Stopping, Some(999_999_999), 0)));
    assert!(!is_stale(&record("done", SessionState::Crashed, None, 0)));
    #[cfg(unix)]
    assert!(!is_stale(&record("me", SessionState::Running, Some(std::process::id()), 0)));
}

#[test]
fn checkpoints_persist_per_session() {
    let temp = tempfile::tempdir().expect("tempdir");
    let dir = StateDir::open(temp.path()).expect("open");

    let first = Checkpoint::new("c0".into(), "main".into(), "builtin".into(), json!({"n": 0})).expect("cp");
    let second = Checkpoint::new("c1".into(), "main".into(), "builtin".into(), json!({"n": 1})).expect("cp");
    dir.save_checkpoint(&first).expect("save");
    dir.save_checkpoint(&second).expect("save");

    let loaded = dir.load_checkpoints("main").expect("load");
    assert_eq!(loaded, vec![first, second]);
    assert!(dir.load_checkpoints("other").expect("load").is_empty());

    dir.remove_checkpoint("main", "c0").expect("remove");
    dir.remove_checkpoint("main", "c0").expect("remove missing");
    assert_eq!(dir.load_checkpoints("main").expect("load").len(), 1);
}

#[test]
fn remove_session_deletes_checkpoints() {
    let temp = tempfile::tempdir().expect("tempdir");
    let dir = StateDir::open(temp.path()).expect("open");
    dir.save_session(&record("main", SessionState::Stopped, None, 0)).expect("save");
    let cp = Checkpoint::new("c0".into(), "main".into(), "builtin".into(), json!({})).expect("cp");
    dir.save_checkpoint(&cp).expect("save");

    dir.remove_session("main").expect("remove");
    assert!(dir.load_session("main").expect("load").is_none());
    assert!(dir.load_checkpoints("main").expect("load").is_empty());
    dir.remove_session("main").expect("remove again");
}

#[test]
fn names_cannot_escape_the_state_dir() {
    let temp = tempfile::tempdir().expect("tempdir");
    let dir = StateDir::open(temp.path()).expect("open");
    assert!(matches!(dir.load_session("../etc"), Err(AppError::InvalidName(_))));
    assert!(matches!(dir.remove_checkpoint("main", "../x"), Err(AppError::InvalidName(_))));
}
