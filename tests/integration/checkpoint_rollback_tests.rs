use replhost::models::session::SessionState;
use replhost::orchestrator::StartOptions;
use replhost::AppError;

use super::test_helpers::{manager_with, run, test_config, test_manager};

#[tokio::test]
async fn rollback_restores_checkpointed_state() {
    let (manager, _temp) = test_manager();
    manager.start("main", StartOptions::default()).await.expect("start");

    run(&manager, "main", "x = 1").await;
    let summary = manager.checkpoint("main", "c0").await.expect("checkpoint");
    assert_eq!(summary.name, "c0");
    assert_eq!(summary.kernel, "builtin");
    assert!(summary.size_bytes > 0);

    run(&manager, "main", "x = 2; y = 'later'").await;
    let outcome = manager.rollback("main", "c0").await.expect("rollback");
    assert_eq!(outcome.checkpoint.name, "c0");
    assert!(outcome.warning.contains("discarded"));

    let (ok, stdout, _) = run(&manager, "main", "print(x)").await;
    assert!(ok);
    assert_eq!(stdout, "1\n");
    let (ok, _, stderr) = run(&manager, "main", "y").await;
    assert!(!ok);
    assert!(stderr.contains("NameError"));

    // The checkpoint survives its own rollback.
    run(&manager, "main", "x = 3").await;
    manager.rollback("main", "c0").await.expect("rollback again");
    let (_, stdout, _) = run(&manager, "main", "print(x)").await;
    assert_eq!(stdout, "1\n");

    manager.stop("main").await.expect("stop");
}

#[tokio::test]
async fn checkpoint_waits_for_queued_payloads() {
    let (manager, _temp) = test_manager();
    manager.start("main", StartOptions::default()).await.expect("start");

    manager
        .send("main", "sleep(0.2); x = 'queued'".into(), false)
        .await
        .expect("send");
    manager.checkpoint("main", "after").await.expect("checkpoint");
    run(&manager, "main", "x = 'changed'").await;
    manager.rollback("main", "after").await.expect("rollback");

    let (_, stdout, _) = run(&manager, "main", "print(x)").await;
    assert_eq!(stdout, "queued\n");
    manager.stop("main").await.expect("stop");
}

#[tokio::test]
async fn duplicate_and_missing_checkpoints() {
    let (manager, _temp) = test_manager();
    manager.start("main", StartOptions::default()).await.expect("start");

    manager.checkpoint("main", "c0").await.expect("checkpoint");
    let err = manager.checkpoint("main", "c0").await.expect_err("duplicate");
    assert!(matches!(err, AppError::DuplicateCheckpoint(_)));

    let err = manager.rollback("main", "c9").await.expect_err("missing");
    assert!(matches!(err, AppError::CheckpointNotFound(_)));

    let err = manager.checkpoint("main", "../c1").await.expect_err("invalid");
    assert!(matches!(err, AppError::InvalidName(_)));

    manager.delete_checkpoint("main", "c0").await.expect("delete");
    assert!(matches!(
        manager.delete_checkpoint("main", "c0").await,
        Err(AppError::CheckpointNotFound(_))
    ));
    manager.checkpoint("main", "c0").await.expect("name reusable after delete");

    manager.stop("main").await.expect("stop");
}

#[tokio::test]
async fn retention_prunes_oldest() {
    let temp = tempfile::tempdir().expect("tempdir");
    let manager = manager_with(test_config(
        temp.path(),
        "[checkpoints]\nmax_per_session = 2",
    ));
    manager.start("main", StartOptions::default()).await.expect("start");

    for name in ["c0", "c1", "c2"] {
        manager.checkpoint("main", name).await.expect("checkpoint");
    }
    let names: Vec<_> = manager
        .list_checkpoints("main")
        .await
        .expect("list")
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(names, vec!["c1", "c2"]);
    assert!(matches!(
        manager.rollback("main", "c0").await,
        Err(AppError::CheckpointNotFound(_))
    ));

    manager.stop("main").await.expect("stop");
}

#[tokio::test]
async fn checkpoint_requires_running_session() {
    let (manager, _temp) = test_manager();
    manager.start("main", StartOptions::default()).await.expect("start");
    manager.checkpoint("main", "c0").await.expect("checkpoint");
    manager.stop("main").await.expect("stop");

    let err = manager.checkpoint("main", "c1").await.expect_err("stopped");
    assert!(matches!(err, AppError::SessionNotRunning(_)));
    let err = manager.rollback("main", "c0").await.expect_err("stopped");
    assert!(matches!(err, AppError::SessionNotRunning(_)));

    // Listing still works on a stopped session.
    assert_eq!(manager.list_checkpoints("main").await.expect("list").len(), 1);
    assert_eq!(
        manager.status("main").await.expect("status").state,
        SessionState::Stopped
    );
}

#[tokio::test]
async fn demo_scenario_prints_checkpointed_value() {
    let (manager, _temp) = test_manager();
    let info = manager.start("demo", StartOptions::default()).await.expect("start");
    assert_eq!(info.state, SessionState::Running);

    manager.send("demo", "x = 1".into(), false).await.expect("send");
    manager.checkpoint("demo", "c0").await.expect("checkpoint");
    manager.send("demo", "x = 2".into(), false).await.expect("send");
    manager.rollback("demo", "c0").await.expect("rollback");

    let (ok, stdout, _) = run(&manager, "demo", "print(x)").await;
    assert!(ok);
    assert_eq!(stdout, "1\n");
    manager.stop("demo").await.expect("stop");
}
