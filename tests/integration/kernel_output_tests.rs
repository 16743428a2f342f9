use std::time::Duration;

use replhost::config::GlobalConfig;
use replhost::models::command::RequestState;
use replhost::models::output::OutputStream;
use replhost::models::session::SessionState;
use replhost::orchestrator::StartOptions;
use replhost::AppError;

use super::test_helpers::{manager_with, run, test_config, test_manager};

/// Config running `sh -c script` as a command kernel.
#[cfg(unix)]
fn shell_kernel(state_dir: &std::path::Path, script: &str, max_message_bytes: usize) -> GlobalConfig {
    let toml = format!(
        r#"
state_dir = '{state}'

[kernel]
kind = "command"
program = "sh"
args = ["-c", '''{script}''']
max_message_bytes = {max_message_bytes}

[timeouts]
startup_seconds = 5
stop_grace_seconds = 1
"#,
        state = state_dir.display()
    );
    GlobalConfig::from_toml_str(&toml).expect("config")
}

#[tokio::test]
async fn huge_output_is_clipped_and_the_session_survives() {
    let (manager, _temp) = test_manager();
    manager.start("main", StartOptions::default()).await.expect("start");

    let (ok, stdout, _) = run(&manager, "main", "print('a' * 2000000)").await;
    assert!(ok);
    assert!(stdout.len() < 1_048_576);
    assert!(stdout.contains("bytes of output truncated"));

    assert_eq!(
        manager.status("main").await.expect("status").state,
        SessionState::Running
    );
    let (ok, stdout, _) = run(&manager, "main", "print(1 + 1)").await;
    assert!(ok);
    assert_eq!(stdout, "2\n");

    manager.stop("main").await.expect("stop");
}

#[tokio::test]
async fn oversized_snapshot_fails_the_checkpoint_only() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut config = test_config(temp.path(), "");
    config.kernel.max_message_bytes = 4096;
    let manager = manager_with(config);
    manager.start("main", StartOptions::default()).await.expect("start");

    run(&manager, "main", "x = 'a' * 10000").await;
    let err = manager.checkpoint("main", "big").await.expect_err("too big");
    assert!(matches!(err, AppError::Kernel(ref msg) if msg.contains("message limit")));
    assert!(manager.list_checkpoints("main").await.expect("list").is_empty());

    assert_eq!(
        manager.status("main").await.expect("status").state,
        SessionState::Running
    );
    run(&manager, "main", "del x; y = 1").await;
    manager.checkpoint("main", "small").await.expect("checkpoint");

    manager.stop("main").await.expect("stop");
}

#[cfg(unix)]
#[tokio::test]
async fn over_long_reply_fails_the_request_and_keeps_reading() {
    let temp = tempfile::tempdir().expect("tempdir");
    let script = r#"
printf '{"event":"ready","kernel":"sh"}\n'
read -r req
head -c 8192 /dev/zero | tr '\0' a
echo
read -r req
printf '{"event":"result","id":2,"ok":true,"stdout":"fine\\n","stderr":""}\n'
cat > /dev/null
"#;
    let manager = manager_with(shell_kernel(temp.path(), script, 4096));
    manager.start("main", StartOptions::default()).await.expect("start");

    let first = manager.send("main", "first".into(), false).await.expect("send");
    let result = manager
        .wait("main", first, Duration::from_secs(5))
        .await
        .expect("wait");
    assert_eq!(result.state, RequestState::Failed);
    assert!(result.stderr.contains("message limit"));

    let second = manager.send("main", "second".into(), false).await.expect("send");
    let result = manager
        .wait("main", second, Duration::from_secs(5))
        .await
        .expect("wait");
    assert_eq!(result.state, RequestState::Completed);
    assert_eq!(result.stdout, "fine\n");

    assert_eq!(
        manager.status("main").await.expect("status").state,
        SessionState::Running
    );
    manager.stop("main").await.expect("stop");
}

#[cfg(unix)]
#[tokio::test]
async fn stray_lines_belong_to_the_last_finished_request() {
    let temp = tempfile::tempdir().expect("tempdir");
    let script = r#"
printf '{"event":"ready","kernel":"sh"}\n'
echo banner
read -r req
printf '{"event":"result","id":1,"ok":true,"stdout":"one\\n","stderr":""}\n'
echo late
echo late-err >&2
read -r req
printf '{"event":"result","id":2,"ok":true,"stdout":"two\\n","stderr":""}\n'
cat > /dev/null
"#;
    let manager = manager_with(shell_kernel(temp.path(), script, 1_048_576));
    manager.start("main", StartOptions::default()).await.expect("start");

    let (ok, stdout, _) = run(&manager, "main", "first").await;
    assert!(ok);
    assert_eq!(stdout, "one\n");
    tokio::time::sleep(Duration::from_millis(300)).await;

    let (ok, stdout, stderr) = run(&manager, "main", "second").await;
    assert!(ok);
    assert_eq!(stdout, "two\n");
    assert!(stderr.is_empty());

    let read = manager.read("main", None, false).await.expect("read");
    let owner = |text: &str| {
        read.entries
            .iter()
            .find(|e| e.text == text)
            .map(|e| (e.request_id, e.stream))
    };
    assert_eq!(owner("banner"), Some((0, OutputStream::Stdout)));
    assert_eq!(owner("late"), Some((1, OutputStream::Stdout)));
    assert_eq!(owner("late-err"), Some((1, OutputStream::Stderr)));
    assert_eq!(owner("two"), Some((2, OutputStream::Stdout)));

    manager.stop("main").await.expect("stop");
}
