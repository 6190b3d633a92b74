//! Gateway client: verifies the socket file, then performs one call per
//! connection over the newline-delimited JSON protocol.

use crate::gateway::{RpcRequest, RpcResponse, RunResult};
use crate::socket::{self, SocketError};
use serde_json::json;
use std::path::PathBuf;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

/// Client-side failures. Everything here is local or transport-level; a
/// denied command is not an error (it is a normal result with exit code 127).
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("socket check failed: {0}")]
    Socket(#[from] SocketError),

    #[error("connecting to {}: {source}", path.display())]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("gateway error: {0}")]
    Gateway(String),
}

/// Client for the postern gateway socket.
#[derive(Debug, Clone)]
pub struct GatewayClient {
    socket_path: PathBuf,
}

impl GatewayClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    /// Submit one command for execution and return the gateway's result.
    pub async fn run(&self, program: &str, args: &[String]) -> Result<RunResult, ClientError> {
        let payload = self
            .call("run", json!({ "program": program, "args": args }))
            .await?;
        serde_json::from_value(payload)
            .map_err(|e| ClientError::Protocol(format!("decoding run result: {}", e)))
    }

    /// Fetch the gateway's status payload.
    pub async fn status(&self) -> Result<serde_json::Value, ClientError> {
        self.call("status", serde_json::Value::Null).await
    }

    /// One request/response round trip: verify the socket file, connect,
    /// send the request, and read frames until the matching response id.
    async fn call(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, ClientError> {
        socket::verify_socket(&self.socket_path)?;
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|source| ClientError::Connect {
                path: self.socket_path.clone(),
                source,
            })?;
        let (read_half, mut write_half) = stream.into_split();

        let id = uuid::Uuid::new_v4().to_string();
        let req = RpcRequest::new(&id, method, params);
        let mut frame = serde_json::to_string(&req)
            .map_err(|e| ClientError::Protocol(format!("encoding request: {}", e)))?;
        frame.push('\n');
        write_half.write_all(frame.as_bytes()).await?;

        let mut lines = BufReader::new(read_half).lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let res: RpcResponse = match serde_json::from_str(&line) {
                Ok(res) => res,
                Err(_) => continue,
            };
            if res.typ != "res" || res.id != id {
                continue;
            }
            if !res.ok {
                return Err(ClientError::Gateway(
                    res.error.unwrap_or_else(|| "request failed".to_string()),
                ));
            }
            return res
                .payload
                .ok_or_else(|| ClientError::Protocol("response missing payload".to_string()));
        }
        Err(ClientError::Protocol(
            "connection closed before response".to_string(),
        ))
    }
}
