//! Blocking IPC client used by `replhost-ctl`.

use std::io::{BufRead, BufReader, Write};

use interprocess::local_socket::{traits::Stream as _, GenericNamespaced, Stream, ToNsName};
use serde::de::DeserializeOwned;

use crate::ipc::protocol::{IpcCommand, IpcRequest, IpcResponse};
use crate::{AppError, Result};

/// Connection parameters for one daemon.
#[derive(Debug, Clone)]
pub struct IpcClient {
    ipc_name: String,
    auth_token: Option<String>,
}

impl IpcClient {
    /// Target the daemon listening on `ipc_name`.
    #[must_use]
    pub fn new(ipc_name: impl Into<String>, auth_token: Option<String>) -> Self {
        Self {
            ipc_name: ipc_name.into(),
            auth_token,
        }
    }

    /// Socket name this client connects to.
    #[must_use]
    pub fn ipc_name(&self) -> &str {
        &self.ipc_name
    }

    /// Send one command and return the response payload.
    ///
    /// Each call opens its own connection, so a long `wait` does not block
    /// other callers.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Ipc` if the daemon is unreachable or the reply is
    /// malformed, and the daemon-side error otherwise.
    pub fn call(&self, command: IpcCommand) -> Result<serde_json::Value> {
        let request = IpcRequest {
            auth_token: self.auth_token.clone(),
            command,
        };

        let name = self
            .ipc_name
            .as_str()
            .to_ns_name::<GenericNamespaced>()
            .map_err(|err| AppError::Ipc(format!("invalid ipc socket name '{}': {err}", self.ipc_name)))?;
        let mut stream = Stream::connect(name).map_err(|err| {
            AppError::Ipc(format!("cannot connect to daemon at '{}': {err}", self.ipc_name))
        })?;

        let mut request_line = serde_json::to_string(&request)?;
        request_line.push('\n');
        stream
            .write_all(request_line.as_bytes())
            .and_then(|()| stream.flush())
            .map_err(|err| AppError::Ipc(format!("failed to send request: {err}")))?;

        let mut reader = BufReader::new(&stream);
        let mut response_line = String::new();
        let read = reader
            .read_line(&mut response_line)
            .map_err(|err| AppError::Ipc(format!("failed to read response: {err}")))?;
        if read == 0 {
            return Err(AppError::Ipc("daemon closed the connection".into()));
        }

        let response: IpcResponse = serde_json::from_str(response_line.trim())
            .map_err(|err| AppError::Ipc(format!("malformed response: {err}")))?;
        response.into_result()
    }

    /// Like [`IpcClient::call`], decoding the payload into `T`.
    ///
    /// # Errors
    ///
    /// As [`IpcClient::call`]; a payload of the wrong shape is
    /// `AppError::Ipc`.
    pub fn call_as<T: DeserializeOwned>(&self, command: IpcCommand) -> Result<T> {
        let data = self.call(command)?;
        serde_json::from_value(data).map_err(|err| AppError::Ipc(format!("unexpected response payload: {err}")))
    }

    /// Whether a daemon answers on this socket.
    #[must_use]
    pub fn ping(&self) -> bool {
        self.call(IpcCommand::Ping).is_ok()
    }
}
