//! Integration test: start the gateway on a temp socket, submit commands over
//! the wire, assert allowlisted execution and denial behavior end to end.
//! Runs a real process (echo) through the socket.

use lib::client::{ClientError, GatewayClient};
use lib::config::Config;
use lib::gateway;
use lib::socket::SocketError;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn temp_gateway_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("postern-gw-test-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn write_allowlist(dir: &Path, patterns: &str) -> PathBuf {
    let path = dir.join("allowlist");
    std::fs::File::create(&path)
        .and_then(|mut f| f.write_all(patterns.as_bytes()))
        .expect("write allowlist");
    path
}

async fn wait_for_gateway(client: &GatewayClient) {
    for _ in 0..100 {
        if client.status().await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("gateway did not come up within 5s");
}

#[tokio::test]
async fn allowed_and_denied_commands_round_trip() {
    let dir = temp_gateway_dir();
    let allowlist_path = write_allowlist(&dir, "echo hello\n");
    let socket_path = dir.join("gateway.sock");

    let mut config = Config::default();
    config.gateway.socket = Some(socket_path.clone());
    config.gateway.allowlist = Some(allowlist_path);

    let config_path = dir.join("config.json");
    let gateway_handle = tokio::spawn(async move {
        let _ = gateway::run_gateway(config, config_path).await;
    });

    let client = GatewayClient::new(&socket_path);
    wait_for_gateway(&client).await;

    let allowed = client
        .run("echo", &["hello".to_string()])
        .await
        .expect("allowed run");
    assert_eq!(allowed.output, "hello\n");
    assert_eq!(allowed.exit_code, 0);

    // Same command again: same verdict, same result.
    let again = client
        .run("echo", &["hello".to_string()])
        .await
        .expect("repeat run");
    assert_eq!(again, allowed);

    let denied = client
        .run("echo", &["goodbye".to_string()])
        .await
        .expect("denied run");
    assert_eq!(denied.output, "Command not found.");
    assert_eq!(denied.exit_code, 127);

    let status = client.status().await.expect("status");
    assert_eq!(
        status.get("runtime").and_then(|v| v.as_str()),
        Some("running")
    );
    assert_eq!(status.get("patterns").and_then(|v| v.as_u64()), Some(1));

    gateway_handle.abort();
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn connection_skips_garbage_frames_and_serves_sequential_requests() {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    let dir = temp_gateway_dir();
    let allowlist_path = write_allowlist(&dir, "echo hello\n");
    let socket_path = dir.join("gateway.sock");

    let mut config = Config::default();
    config.gateway.socket = Some(socket_path.clone());
    config.gateway.allowlist = Some(allowlist_path);

    let config_path = dir.join("config.json");
    let gateway_handle = tokio::spawn(async move {
        let _ = gateway::run_gateway(config, config_path).await;
    });

    let client = GatewayClient::new(&socket_path);
    wait_for_gateway(&client).await;

    let stream = tokio::net::UnixStream::connect(&socket_path)
        .await
        .expect("connect");
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    // Garbage and non-request frames must not drop the connection; the
    // request after them is still answered.
    write_half
        .write_all(b"this is not json\n")
        .await
        .expect("write garbage frame");
    write_half
        .write_all(b"{\"type\":\"res\",\"id\":\"x\",\"method\":\"run\"}\n")
        .await
        .expect("write non-request frame");
    write_half
        .write_all(
            b"{\"type\":\"req\",\"id\":\"1\",\"method\":\"run\",\"params\":{\"program\":\"echo\",\"args\":[\"hello\"]}}\n",
        )
        .await
        .expect("write first request");

    let line = lines
        .next_line()
        .await
        .expect("read first response")
        .expect("first response line");
    let res: serde_json::Value = serde_json::from_str(&line).expect("decode first response");
    assert_eq!(res.get("id").and_then(|v| v.as_str()), Some("1"));
    assert_eq!(res.get("ok").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(
        res.pointer("/payload/output").and_then(|v| v.as_str()),
        Some("hello\n")
    );

    // A second request on the same connection gets its own response.
    write_half
        .write_all(b"{\"type\":\"req\",\"id\":\"2\",\"method\":\"status\"}\n")
        .await
        .expect("write second request");
    let line = lines
        .next_line()
        .await
        .expect("read second response")
        .expect("second response line");
    let res: serde_json::Value = serde_json::from_str(&line).expect("decode second response");
    assert_eq!(res.get("id").and_then(|v| v.as_str()), Some("2"));
    assert_eq!(
        res.pointer("/payload/runtime").and_then(|v| v.as_str()),
        Some("running")
    );

    gateway_handle.abort();
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn many_sequential_connections_are_all_served() {
    let dir = temp_gateway_dir();
    let allowlist_path = write_allowlist(&dir, "echo hello\n");
    let socket_path = dir.join("gateway.sock");

    let mut config = Config::default();
    config.gateway.socket = Some(socket_path.clone());
    config.gateway.allowlist = Some(allowlist_path);

    let config_path = dir.join("config.json");
    let gateway_handle = tokio::spawn(async move {
        let _ = gateway::run_gateway(config, config_path).await;
    });

    let client = GatewayClient::new(&socket_path);
    wait_for_gateway(&client).await;

    // Each call opens and closes its own connection; the accept loop reaps
    // completed connection tasks while later ones are being served.
    for _ in 0..20 {
        let result = client
            .run("echo", &["hello".to_string()])
            .await
            .expect("run over fresh connection");
        assert_eq!(result.output, "hello\n");
        assert_eq!(result.exit_code, 0);
    }

    gateway_handle.abort();
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn client_rejects_socket_with_loose_permissions() {
    use std::os::unix::fs::PermissionsExt;

    let dir = temp_gateway_dir();
    let socket_path = dir.join("gateway.sock");
    let _listener = std::os::unix::net::UnixListener::bind(&socket_path).expect("bind socket");
    std::fs::set_permissions(&socket_path, std::fs::Permissions::from_mode(0o644))
        .expect("chmod socket");

    let client = GatewayClient::new(&socket_path);
    let err = client
        .run("echo", &["hello".to_string()])
        .await
        .expect_err("loose permissions must fail");
    match err {
        ClientError::Socket(SocketError::BadPermissions { mode, .. }) => assert_eq!(mode, 0o644),
        other => panic!("expected permission failure, got: {other:?}"),
    }

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn gateway_refuses_regular_file_at_socket_path() {
    let dir = temp_gateway_dir();
    let allowlist_path = write_allowlist(&dir, "uptime\n");
    let socket_path = dir.join("gateway.sock");
    std::fs::write(&socket_path, b"not a socket").expect("write blocker file");

    let mut config = Config::default();
    config.gateway.socket = Some(socket_path);
    config.gateway.allowlist = Some(allowlist_path);

    let err = gateway::run_gateway(config, dir.join("config.json"))
        .await
        .expect_err("startup must fail");
    assert!(
        err.to_string().contains("not a unix socket"),
        "unexpected error: {err:#}"
    );

    let _ = std::fs::remove_dir_all(&dir);
}
