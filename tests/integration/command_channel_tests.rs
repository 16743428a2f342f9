use std::time::Duration;

use replhost::models::command::RequestState;
use replhost::models::output::OutputStream;
use replhost::orchestrator::StartOptions;
use replhost::AppError;

use super::test_helpers::{manager_with, run, test_config, test_manager};

#[tokio::test]
async fn payloads_run_in_submission_order() {
    let (manager, _temp) = test_manager();
    manager.start("main", StartOptions::default()).await.expect("start");

    let first = manager
        .send("main", "sleep(0.2); print('a')".into(), false)
        .await
        .expect("send");
    let second = manager.send("main", "print('b')".into(), false).await.expect("send");
    let third = manager.send("main", "print('c')".into(), false).await.expect("send");
    assert_eq!((first, second, third), (1, 2, 3));

    let result = manager
        .wait("main", third, Duration::from_secs(5))
        .await
        .expect("wait");
    assert_eq!(result.state, RequestState::Completed);
    assert_eq!(result.stdout, "c\n");

    let read = manager.read("main", None, false).await.expect("read");
    let lines: Vec<_> = read
        .entries
        .iter()
        .map(|e| (e.request_id, e.text.as_str()))
        .collect();
    assert_eq!(lines, vec![(1, "a"), (2, "b"), (3, "c")]);
    assert!(!read.truncated);

    manager.stop("main").await.expect("stop");
}

#[tokio::test]
async fn failed_payload_reports_stderr() {
    let (manager, _temp) = test_manager();
    manager.start("main", StartOptions::default()).await.expect("start");

    let (ok, stdout, stderr) = run(&manager, "main", "print('partial')\n1 / 0").await;
    assert!(!ok);
    assert_eq!(stdout, "partial\n");
    assert!(stderr.contains("ZeroDivisionError"));

    let read = manager.read("main", None, false).await.expect("read");
    assert!(read
        .entries
        .iter()
        .any(|e| e.stream == OutputStream::Stderr && e.text.contains("ZeroDivisionError")));

    // The kernel survives a failed payload.
    let (ok, stdout, _) = run(&manager, "main", "print(1 + 1)").await;
    assert!(ok);
    assert_eq!(stdout, "2\n");

    manager.stop("main").await.expect("stop");
}

#[tokio::test]
async fn read_since_and_drain() {
    let (manager, _temp) = test_manager();
    manager.start("main", StartOptions::default()).await.expect("start");
    run(&manager, "main", "print('one')").await;
    run(&manager, "main", "print('two')").await;

    let newer = manager.read("main", Some(1), false).await.expect("read");
    assert_eq!(newer.entries.len(), 1);
    assert_eq!(newer.entries[0].text, "two");
    assert_eq!(newer.last_request_id(), Some(2));

    let drained = manager.read("main", None, true).await.expect("drain");
    assert_eq!(drained.entries.len(), 2);
    assert!(manager.read("main", None, false).await.expect("read").entries.is_empty());

    manager.stop("main").await.expect("stop");
}

#[tokio::test]
async fn full_buffer_evicts_oldest_and_marks_truncation() {
    let temp = tempfile::tempdir().expect("tempdir");
    let manager = manager_with(test_config(temp.path(), "[output]\ncapacity = 3"));
    manager.start("main", StartOptions::default()).await.expect("start");

    run(&manager, "main", "print('l1'); print('l2')").await;
    run(&manager, "main", "print('l3'); print('l4'); print('l5')").await;

    let read = manager.read("main", None, false).await.expect("read");
    let texts: Vec<_> = read.entries.iter().map(|e| e.text.as_str()).collect();
    assert_eq!(texts, vec!["l3", "l4", "l5"]);
    assert!(read.truncated);
    assert_eq!(read.dropped, 2);
    assert!(read.marker().expect("marker").contains("2 earlier line(s)"));

    // Nothing unseen was lost for a caller that already read request 1.
    let since = manager.read("main", Some(1), false).await.expect("read");
    assert!(!since.truncated);

    manager.stop("main").await.expect("stop");
}

#[tokio::test]
async fn wait_times_out_with_pending_result() {
    let (manager, _temp) = test_manager();
    manager.start("main", StartOptions::default()).await.expect("start");

    let id = manager.send("main", "sleep(1)".into(), false).await.expect("send");
    let result = manager
        .wait("main", id, Duration::from_millis(50))
        .await
        .expect("wait");
    assert_eq!(result.state, RequestState::Pending);
    assert_eq!(manager.status("main").await.expect("status").pending_requests, 1);

    let result = manager
        .wait("main", id, Duration::from_secs(5))
        .await
        .expect("wait");
    assert_eq!(result.state, RequestState::Completed);

    manager.stop("main").await.expect("stop");
}

#[tokio::test]
async fn wait_is_capped_by_max_wait() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut config = test_config(temp.path(), "");
    config.timeouts.max_wait_seconds = 1;
    let manager = manager_with(config);
    manager.start("main", StartOptions::default()).await.expect("start");

    let id = manager.send("main", "sleep(3)".into(), false).await.expect("send");
    let started = std::time::Instant::now();
    let result = manager
        .wait("main", id, Duration::from_secs(60))
        .await
        .expect("wait");
    assert_eq!(result.state, RequestState::Pending);
    assert!(started.elapsed() < Duration::from_secs(2));

    manager.stop("main").await.expect("stop");
}

#[tokio::test]
async fn wait_rejects_unknown_request() {
    let (manager, _temp) = test_manager();
    manager.start("main", StartOptions::default()).await.expect("start");
    let err = manager
        .wait("main", 7, Duration::from_millis(10))
        .await
        .expect_err("never issued");
    assert!(matches!(err, AppError::Kernel(ref msg) if msg.contains("never issued")));
    manager.stop("main").await.expect("stop");
}

#[tokio::test]
async fn paused_session_refuses_unforced_sends() {
    let (manager, _temp) = test_manager();
    manager.start("main", StartOptions::default()).await.expect("start");

    let info = manager.pause("main").await.expect("pause");
    assert!(info.paused);

    let err = manager.send("main", "x = 1".into(), false).await.expect_err("paused");
    assert!(matches!(err, AppError::SessionPaused(_)));

    let id = manager.send("main", "x = 1".into(), true).await.expect("forced");
    manager.wait("main", id, Duration::from_secs(5)).await.expect("wait");

    let info = manager.resume("main").await.expect("resume");
    assert!(!info.paused);
    let (ok, stdout, _) = run(&manager, "main", "print(x)").await;
    assert!(ok);
    assert_eq!(stdout, "1\n");

    manager.stop("main").await.expect("stop");
}

#[tokio::test]
async fn stop_fails_queued_requests() {
    let (manager, _temp) = test_manager();
    manager.start("main", StartOptions::default()).await.expect("start");

    manager.send("main", "sleep(2)".into(), false).await.expect("send");
    let queued = manager.send("main", "print('never')".into(), false).await.expect("send");
    manager.stop("main").await.expect("stop");

    let result = manager
        .wait("main", queued, Duration::from_millis(100))
        .await
        .expect("wait");
    assert_eq!(result.state, RequestState::Failed);
    assert!(result.stdout.is_empty());
}

#[tokio::test]
async fn five_payloads_into_three_slots() {
    let temp = tempfile::tempdir().expect("tempdir");
    let manager = manager_with(test_config(temp.path(), "[output]\ncapacity = 3"));
    manager.start("demo", StartOptions::default()).await.expect("start");

    for n in 1..=5 {
        run(&manager, "demo", &format!("print('line {n}')")).await;
    }

    let read = manager.read("demo", None, false).await.expect("read");
    let texts: Vec<_> = read.entries.iter().map(|e| e.text.as_str()).collect();
    assert_eq!(texts, vec!["line 3", "line 4", "line 5"]);
    assert!(read.marker().is_some());

    manager.stop("demo").await.expect("stop");
}
