use replhost::config::KernelKind;
use replhost::ipc::{IpcCommand, IpcRequest, IpcResponse};
use replhost::orchestrator::StartOptions;
use replhost::{AppError, ErrorKind};
use serde_json::json;

#[test]
fn request_flattens_command_and_token() {
    let request = IpcRequest {
        auth_token: Some("secret".into()),
        command: IpcCommand::Send {
            session: "main".into(),
            code: "x = 1".into(),
            force: true,
        },
    };
    assert_eq!(
        serde_json::to_value(&request).expect("encode"),
        json!({"auth_token": "secret", "command": "send", "session": "main", "code": "x = 1", "force": true})
    );
}

#[test]
fn request_defaults_optional_fields() {
    let request: IpcRequest =
        serde_json::from_str(r#"{"command":"read","session":"main"}"#).expect("decode");
    assert_eq!(request.auth_token, None);
    assert_eq!(
        request.command,
        IpcCommand::Read {
            session: "main".into(),
            since: None,
            drain: false,
        }
    );

    let start: IpcRequest = serde_json::from_str(
        r#"{"command":"start","session":"s1","options":{"kernel":"builtin"},"auth_token":"t"}"#,
    )
    .expect("decode");
    assert_eq!(
        start.command,
        IpcCommand::Start {
            session: "s1".into(),
            options: StartOptions {
                kernel: Some(KernelKind::Builtin),
                ..StartOptions::default()
            },
        }
    );
}

#[test]
fn wait_carries_request_id() {
    let request: IpcRequest = serde_json::from_str(
        r#"{"command":"wait","session":"main","request_id":7,"timeout_ms":1500}"#,
    )
    .expect("decode");
    assert_eq!(request.command.verb(), "wait");
    assert!(matches!(
        request.command,
        IpcCommand::Wait { request_id: 7, timeout_ms: 1500, .. }
    ));
}

#[test]
fn unknown_command_is_rejected() {
    assert!(serde_json::from_str::<IpcRequest>(r#"{"command":"approve","id":"x"}"#).is_err());
}

#[test]
fn failure_round_trips_error_kind() {
    let response = IpcResponse::failure(&AppError::CheckpointNotFound("no checkpoint 'c9'".into()));
    let wire = serde_json::to_string(&response).expect("encode");
    assert!(wire.contains("\"error_kind\":\"checkpoint_not_found\""));

    let decoded: IpcResponse = serde_json::from_str(&wire).expect("decode");
    let err = decoded.into_result().expect_err("failure");
    assert_eq!(err.kind(), ErrorKind::CheckpointNotFound);
    assert_eq!(err.message(), "no checkpoint 'c9'");
}

#[test]
fn success_without_data_is_null() {
    let decoded: IpcResponse = serde_json::from_str(r#"{"ok":true}"#).expect("decode");
    assert_eq!(decoded.into_result().expect("ok"), serde_json::Value::Null);
}

#[test]
fn unclassified_failure_is_ipc() {
    let decoded: IpcResponse = serde_json::from_str(r#"{"ok":false,"error":"boom"}"#).expect("decode");
    assert_eq!(decoded.into_result().expect_err("failure").kind(), ErrorKind::Ipc);
}
