//! Gateway server: accepts local connections on the Unix socket and serves
//! allowlisted command execution.

use crate::allowlist::{command_line, Allowlist};
use crate::config::{self, Config};
use crate::exec::{CommandRunner, ProcessRunner};
use crate::gateway::protocol::{RpcRequest, RpcResponse, RunParams, RunResult};
use crate::socket;
use anyhow::{Context, Result};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tokio::task::JoinSet;

const PROTOCOL_VERSION: u32 = 1;

/// Fixed result for a request no allowlist pattern matches. The exit code
/// mirrors the shell's "command not found".
pub const DENIED_OUTPUT: &str = "Command not found.";
pub const DENIED_EXIT_CODE: i32 = 127;

/// Shared state for the gateway (allowlist, runner, shutdown channel).
#[derive(Clone)]
pub struct GatewayState {
    /// Compiled allowlist, read-only for the process lifetime.
    pub allowlist: Arc<Allowlist>,
    /// Executes approved commands; swapped for a stub in tests.
    pub runner: Arc<dyn CommandRunner>,
    /// Broadcasts shutdown to connection tasks.
    pub shutdown_tx: broadcast::Sender<()>,
}

/// Handle one request envelope and produce the response envelope.
pub async fn handle_request(state: &GatewayState, req: RpcRequest) -> RpcResponse {
    match req.method.as_str() {
        "run" => {
            let params: RunParams = match serde_json::from_value(req.params.clone()) {
                Ok(p) => p,
                Err(_) => return RpcResponse::err(&req.id, "invalid run params"),
            };
            let result = handle_run(state, &params).await;
            match serde_json::to_value(&result) {
                Ok(payload) => RpcResponse::ok(&req.id, payload),
                Err(e) => RpcResponse::err(&req.id, format!("encoding result: {}", e)),
            }
        }
        "status" => {
            let payload = json!({
                "runtime": "running",
                "protocol": PROTOCOL_VERSION,
                "version": env!("CARGO_PKG_VERSION"),
                "patterns": state.allowlist.len(),
            });
            RpcResponse::ok(&req.id, payload)
        }
        _ => RpcResponse::err(&req.id, format!("unknown method: {}", req.method)),
    }
}

/// Decide and execute one command request. When no pattern matches the full
/// command line the fixed denial result is returned and nothing is spawned;
/// otherwise the runner's outcome is returned verbatim.
async fn handle_run(state: &GatewayState, params: &RunParams) -> RunResult {
    let line = command_line(&params.program, &params.args);
    log::info!("run requested: {}", line);
    let Some(entry) = state.allowlist.find_match(&line) else {
        log::warn!("denied (no allowlist match): {}", line);
        return RunResult {
            output: DENIED_OUTPUT.to_string(),
            exit_code: DENIED_EXIT_CODE,
        };
    };
    log::info!("allowed by pattern {} `{}`", entry.line, entry.raw);
    let outcome = state.runner.run(&params.program, &params.args).await;
    log::info!(
        "finished: {} bytes, exit code {}",
        outcome.output.len(),
        outcome.exit_code
    );
    RunResult {
        output: outcome.output,
        exit_code: outcome.exit_code,
    }
}

/// Serve one connection: newline-delimited request frames until EOF, a read
/// error, or shutdown. The shutdown branch is only taken between requests,
/// so an in-flight command finishes and its response is written first.
async fn handle_connection(stream: UnixStream, state: GatewayState) {
    let mut shutdown_rx = state.shutdown_tx.subscribe();
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.recv() => break,

            line = lines.next_line() => {
                let text = match line {
                    Ok(Some(text)) => text,
                    Ok(None) => break,
                    Err(e) => {
                        log::debug!("connection read error: {}", e);
                        break;
                    }
                };
                if text.trim().is_empty() {
                    continue;
                }
                let Ok(req): Result<RpcRequest, _> = serde_json::from_str(&text) else {
                    log::debug!("skipping undecodable frame");
                    continue;
                };
                if req.typ != "req" {
                    continue;
                }
                let res = handle_request(&state, req).await;
                let mut out = serde_json::to_string(&res).unwrap_or_default();
                out.push('\n');
                if write_half.write_all(out.as_bytes()).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Run the gateway on the configured Unix socket. Blocks until SIGINT or
/// SIGTERM; in-flight requests drain, connection tasks are awaited, and the
/// socket file is removed before returning.
pub async fn run_gateway(config: Config, config_path: PathBuf) -> Result<()> {
    let socket_path = config::resolve_socket_path(&config, &config_path);
    let allowlist_path = config::resolve_allowlist_path(&config, &config_path);

    let allowlist = Allowlist::load(&allowlist_path)
        .with_context(|| format!("loading allowlist from {}", allowlist_path.display()))?;
    log::info!(
        "loaded {} allowlist pattern(s) from {}",
        allowlist.len(),
        allowlist_path.display()
    );
    if allowlist.is_empty() {
        log::warn!("allowlist is empty, every request will be denied");
    }

    socket::prepare_socket_path(&socket_path)?;
    if let Some(parent) = socket_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating socket directory {}", parent.display()))?;
    }
    let listener = UnixListener::bind(&socket_path)
        .with_context(|| format!("binding to {}", socket_path.display()))?;
    socket::restrict_socket(&socket_path)?;
    log::info!("gateway listening on {}", socket_path.display());

    let runner = ProcessRunner {
        timeout: config.gateway.exec_timeout_secs.map(Duration::from_secs),
    };
    let (shutdown_tx, _) = broadcast::channel(8);
    let state = GatewayState {
        allowlist: Arc::new(allowlist),
        runner: Arc::new(runner),
        shutdown_tx: shutdown_tx.clone(),
    };

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let mut conn_tasks = JoinSet::new();
    loop {
        tokio::select! {
            _ = &mut shutdown => break,

            // Reap finished connection tasks; the set tracks live
            // connections only, not every connection ever served.
            Some(_) = conn_tasks.join_next() => {}

            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        conn_tasks.spawn(handle_connection(stream, state.clone()));
                    }
                    Err(e) => log::warn!("accept failed: {}", e),
                }
            }
        }
    }

    log::info!("shutdown signal received, draining connections");
    drop(listener);
    socket::remove_socket(&socket_path);
    let _ = shutdown_tx.send(());
    while conn_tasks.join_next().await.is_some() {}
    log::info!("gateway stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::RunOutcome;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRunner {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CommandRunner for CountingRunner {
        async fn run(&self, _program: &str, _args: &[String]) -> RunOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            RunOutcome {
                output: "ran\n".to_string(),
                exit_code: 0,
            }
        }
    }

    fn test_state(allowlist: &str) -> (GatewayState, Arc<CountingRunner>) {
        let runner = Arc::new(CountingRunner {
            calls: AtomicUsize::new(0),
        });
        let (shutdown_tx, _) = broadcast::channel(1);
        let state = GatewayState {
            allowlist: Arc::new(Allowlist::parse(allowlist).unwrap()),
            runner: runner.clone(),
            shutdown_tx,
        };
        (state, runner)
    }

    #[tokio::test]
    async fn denial_returns_sentinel_and_never_spawns() {
        let (state, runner) = test_state("echo hello");
        let params = RunParams {
            program: "echo".into(),
            args: vec!["goodbye".into()],
        };
        let result = handle_run(&state, &params).await;
        assert_eq!(result.output, DENIED_OUTPUT);
        assert_eq!(result.exit_code, DENIED_EXIT_CODE);
        assert_eq!(runner.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn allowed_request_invokes_runner_once() {
        let (state, runner) = test_state("echo hello");
        let params = RunParams {
            program: "echo".into(),
            args: vec!["hello".into()],
        };
        let result = handle_run(&state, &params).await;
        assert_eq!(result.output, "ran\n");
        assert_eq!(result.exit_code, 0);
        assert_eq!(runner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn handle_request_dispatches_run_and_status() {
        let (state, _runner) = test_state("echo hello");
        let req = RpcRequest::new("1", "run", json!({"program": "echo", "args": ["hello"]}));
        let res = handle_request(&state, req).await;
        assert!(res.ok);
        let payload = res.payload.unwrap();
        assert_eq!(payload.get("exitCode").and_then(|v| v.as_i64()), Some(0));

        let req = RpcRequest::new("2", "status", serde_json::Value::Null);
        let res = handle_request(&state, req).await;
        assert!(res.ok);
        let payload = res.payload.unwrap();
        assert_eq!(payload.get("patterns").and_then(|v| v.as_u64()), Some(1));
        assert_eq!(payload.get("runtime").and_then(|v| v.as_str()), Some("running"));
    }

    #[tokio::test]
    async fn bad_params_and_unknown_methods_get_error_responses() {
        let (state, runner) = test_state("echo hello");
        let req = RpcRequest::new("3", "run", json!({"args": []}));
        let res = handle_request(&state, req).await;
        assert!(!res.ok);
        assert_eq!(res.error.as_deref(), Some("invalid run params"));
        assert_eq!(runner.calls.load(Ordering::SeqCst), 0);

        let req = RpcRequest::new("4", "bogus", serde_json::Value::Null);
        let res = handle_request(&state, req).await;
        assert!(!res.ok);
        assert_eq!(res.error.as_deref(), Some("unknown method: bogus"));
    }
}
