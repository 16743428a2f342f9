use std::time::Duration;

use replhost::models::command::RequestState;
use replhost::models::session::SessionState;
use replhost::orchestrator::StartOptions;
use replhost::AppError;

use super::test_helpers::{run, test_manager, wait_for_state};

#[tokio::test]
async fn kernel_exit_marks_session_crashed() {
    let (manager, _temp) = test_manager();
    manager.start("main", StartOptions::default()).await.expect("start");
    run(&manager, "main", "x = 1").await;

    let id = manager
        .send("main", "print('bye'); exit(3)".into(), false)
        .await
        .expect("send");
    let result = manager
        .wait("main", id, Duration::from_secs(5))
        .await
        .expect("wait");
    assert_eq!(result.state, RequestState::Failed);

    wait_for_state(&manager, "main", SessionState::Crashed).await;
    let info = manager.status("main").await.expect("status");
    assert!(!info.alive);
    assert!(info.pid.is_none());
    assert!(info.exit_reason.is_some());

    let err = manager.send("main", "x".into(), false).await.expect_err("crashed");
    assert!(matches!(err, AppError::ProcessCrashed(_)));

    // Output captured before the crash is still readable.
    let read = manager.read("main", None, false).await.expect("read");
    assert!(read.entries.iter().any(|e| e.text == "bye"));
}

#[tokio::test]
async fn crashed_session_can_be_stopped_and_restarted() {
    let (manager, _temp) = test_manager();
    manager.start("main", StartOptions::default()).await.expect("start");
    manager.send("main", "exit(1)".into(), false).await.expect("send");
    wait_for_state(&manager, "main", SessionState::Crashed).await;

    let stopped = manager.stop("main").await.expect("stop");
    assert_eq!(stopped.state, SessionState::Stopped);
    assert!(stopped.exit_reason.is_some_and(|r| r != "stopped"));

    let info = manager.start("main", StartOptions::default()).await.expect("restart");
    assert_eq!(info.state, SessionState::Running);
    manager.stop("main").await.expect("stop");
}

#[tokio::test]
async fn crashed_session_can_restart_directly() {
    let (manager, _temp) = test_manager();
    manager.start("main", StartOptions::default()).await.expect("start");
    manager.send("main", "exit(2)".into(), false).await.expect("send");
    wait_for_state(&manager, "main", SessionState::Crashed).await;

    manager.start("main", StartOptions::default()).await.expect("restart");
    let (ok, stdout, _) = run(&manager, "main", "print('back')").await;
    assert!(ok);
    assert_eq!(stdout, "back\n");
    manager.stop("main").await.expect("stop");
}

#[cfg(unix)]
#[tokio::test]
async fn silent_kernel_times_out_on_startup() {
    use super::test_helpers::manager_with;
    use replhost::config::GlobalConfig;

    let temp = tempfile::tempdir().expect("tempdir");
    let toml = format!(
        r#"
state_dir = '{state}'

[kernel]
kind = "command"
program = "sleep"
args = ["5"]

[timeouts]
startup_seconds = 1
"#,
        state = temp.path().display()
    );
    let manager = manager_with(GlobalConfig::from_toml_str(&toml).expect("config"));

    let err = manager
        .start("main", StartOptions::default())
        .await
        .expect_err("timeout");
    assert!(matches!(err, AppError::StartupTimeout(_)));
    assert_eq!(
        manager.status("main").await.expect("status").state,
        SessionState::Crashed
    );
}

#[cfg(unix)]
#[tokio::test]
async fn kernel_exiting_before_ready_is_crashed() {
    use super::test_helpers::manager_with;
    use replhost::config::GlobalConfig;

    let temp = tempfile::tempdir().expect("tempdir");
    let toml = format!(
        r#"
state_dir = '{state}'

[kernel]
kind = "command"
program = "true"
"#,
        state = temp.path().display()
    );
    let manager = manager_with(GlobalConfig::from_toml_str(&toml).expect("config"));

    let err = manager
        .start("main", StartOptions::default())
        .await
        .expect_err("no ready");
    assert!(matches!(err, AppError::ProcessCrashed(_)));
}

#[tokio::test]
async fn missing_program_fails_to_spawn() {
    use super::test_helpers::manager_with;
    use replhost::config::GlobalConfig;

    let temp = tempfile::tempdir().expect("tempdir");
    let toml = format!(
        r#"
state_dir = '{state}'

[kernel]
kind = "command"
program = "/definitely/not/a/kernel"
"#,
        state = temp.path().display().to_string().replace('\\', "\\\\")
    );
    let manager = manager_with(GlobalConfig::from_toml_str(&toml).expect("config"));

    let err = manager
        .start("main", StartOptions::default())
        .await
        .expect_err("spawn");
    assert!(matches!(err, AppError::Kernel(_)));
}
