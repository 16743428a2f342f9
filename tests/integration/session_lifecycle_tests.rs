use replhost::models::session::SessionState;
use replhost::orchestrator::StartOptions;
use replhost::AppError;

use super::test_helpers::{run, test_manager};

#[tokio::test]
async fn start_reports_running_with_pid() {
    let (manager, _temp) = test_manager();

    let info = manager.start("main", StartOptions::default()).await.expect("start");
    assert_eq!(info.state, SessionState::Running);
    assert!(info.alive);
    assert!(info.pid.is_some());
    assert_eq!(info.kernel, "builtin");
    assert_eq!(info.last_request_id, 0);

    manager.stop("main").await.expect("stop");
}

#[tokio::test]
async fn duplicate_start_is_rejected() {
    let (manager, _temp) = test_manager();
    manager.start("main", StartOptions::default()).await.expect("start");

    let err = manager
        .start("main", StartOptions::default())
        .await
        .expect_err("second start");
    assert!(matches!(err, AppError::AlreadyRunning(_)));

    manager.stop("main").await.expect("stop");
}

#[tokio::test]
async fn invalid_names_never_register() {
    let (manager, _temp) = test_manager();
    let err = manager
        .start("bad name!", StartOptions::default())
        .await
        .expect_err("invalid");
    assert!(matches!(err, AppError::InvalidName(_)));
    assert!(manager.list().await.is_empty());
}

#[tokio::test]
async fn stop_is_idempotent_and_session_restarts() {
    let (manager, _temp) = test_manager();
    manager.start("main", StartOptions::default()).await.expect("start");
    run(&manager, "main", "x = 41").await;

    let stopped = manager.stop("main").await.expect("stop");
    assert_eq!(stopped.state, SessionState::Stopped);
    assert!(!stopped.alive);
    assert_eq!(stopped.exit_reason.as_deref(), Some("stopped"));
    manager.stop("main").await.expect("stop again");

    let err = manager.send("main", "x".into(), false).await.expect_err("stopped");
    assert!(matches!(err, AppError::SessionNotRunning(_)));

    // A fresh kernel starts with empty state.
    manager.start("main", StartOptions::default()).await.expect("restart");
    let (ok, _, stderr) = run(&manager, "main", "x").await;
    assert!(!ok);
    assert!(stderr.contains("NameError"));
    manager.stop("main").await.expect("stop");
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let (manager, _temp) = test_manager();
    assert!(matches!(manager.status("ghost").await, Err(AppError::SessionNotFound(_))));
    assert!(matches!(manager.stop("ghost").await, Err(AppError::SessionNotFound(_))));
    assert!(matches!(
        manager.send("ghost", "1".into(), false).await,
        Err(AppError::SessionNotFound(_))
    ));
}

#[tokio::test]
async fn sessions_are_isolated() {
    let (manager, _temp) = test_manager();
    manager.start("a", StartOptions::default()).await.expect("start a");
    manager.start("b", StartOptions::default()).await.expect("start b");

    run(&manager, "a", "x = 'from a'").await;
    let (ok, _, _) = run(&manager, "b", "x").await;
    assert!(!ok);

    let names: Vec<_> = manager.list().await.into_iter().map(|s| s.name).collect();
    assert_eq!(names, vec!["a", "b"]);

    manager.stop_all().await;
    for info in manager.list().await {
        assert_eq!(info.state, SessionState::Stopped);
    }
}

#[tokio::test]
async fn remove_requires_stopped_session() {
    let (manager, temp) = test_manager();
    manager.start("main", StartOptions::default()).await.expect("start");

    let err = manager.remove("main").await.expect_err("live");
    assert!(matches!(err, AppError::AlreadyRunning(_)));

    manager.stop("main").await.expect("stop");
    manager.remove("main").await.expect("remove");
    assert!(matches!(manager.status("main").await, Err(AppError::SessionNotFound(_))));
    assert!(!temp.path().join("sessions").join("main").exists());
}

#[tokio::test]
async fn lifecycle_events_are_published() {
    let (manager, _temp) = test_manager();
    let mut events = manager.subscribe();

    manager.start("main", StartOptions::default()).await.expect("start");
    manager.stop("main").await.expect("stop");

    let mut seen = Vec::new();
    while let Ok(change) = events.try_recv() {
        assert_eq!(change.session, "main");
        seen.push((change.from, change.to));
    }
    assert_eq!(
        seen,
        vec![
            (SessionState::Unstarted, SessionState::Starting),
            (SessionState::Starting, SessionState::Running),
            (SessionState::Running, SessionState::Stopping),
            (SessionState::Stopping, SessionState::Stopped),
        ]
    );
}

#[tokio::test]
async fn working_dir_override_must_exist() {
    let (manager, temp) = test_manager();
    let missing = temp.path().join("nope");
    let err = manager
        .start(
            "main",
            StartOptions {
                working_dir: Some(missing),
                ..StartOptions::default()
            },
        )
        .await
        .expect_err("missing dir");
    assert!(matches!(err, AppError::Config(_)));
}
