//! End-to-end tests for the btr-host binary.
//!
//! A `serve` process is pointed at a local axum server through `--base-url`,
//! and `call` processes talk to it over the TCP transport.

use axum::extract::Path;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;

async fn friends(Path(id): Path<u64>) -> Json<Value> {
    Json(json!({ "data": [{ "id": id * 10, "name": "friend" }] }))
}

async fn spawn_mock() -> SocketAddr {
    let app = Router::new().route("/friends/v1/users/:id/friends", get(friends));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_btr-host"))
}

struct HostHandle {
    child: tokio::process::Child,
    port: u16,
    stdout_drain: Option<tokio::task::JoinHandle<()>>,
}

impl Drop for HostHandle {
    fn drop(&mut self) {
        if let Some(drain) = self.stdout_drain.take() {
            drain.abort();
        }
        let _ = self.child.start_kill();
    }
}

/// Start `btr-host serve` and wait for its `BRIDGE_PORT=` line.
async fn start_host(base_url: &str) -> Result<HostHandle, String> {
    let mut child = tokio::process::Command::new(binary())
        .arg("serve")
        .arg("--port")
        .arg("0")
        .arg("--base-url")
        .arg(base_url)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| format!("failed to spawn btr-host: {e}"))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| "failed to capture stdout".to_string())?;
    let mut lines = tokio::io::BufReader::new(stdout).lines();

    let mut discovered_port: Option<u16> = None;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(250), lines.next_line()).await {
            Ok(Ok(Some(line))) => {
                if let Some(value) = line.strip_prefix("BRIDGE_PORT=") {
                    let parsed = value
                        .trim()
                        .parse::<u16>()
                        .map_err(|e| format!("invalid BRIDGE_PORT value '{value}': {e}"))?;
                    discovered_port = Some(parsed);
                    break;
                }
            }
            Ok(Ok(None)) => break,
            Ok(Err(err)) => return Err(format!("failed to read btr-host stdout: {err}")),
            Err(_) => continue,
        }
    }

    let port =
        discovered_port.ok_or_else(|| "BRIDGE_PORT line not emitted by btr-host".to_string())?;
    let stdout_drain =
        tokio::spawn(async move { while let Ok(Some(_)) = lines.next_line().await {} });

    Ok(HostHandle {
        child,
        port,
        stdout_drain: Some(stdout_drain),
    })
}

async fn call(port: u16, endpoint: &str, args: &[&str]) -> std::process::Output {
    tokio::process::Command::new(binary())
        .arg("call")
        .arg("--port")
        .arg(port.to_string())
        .arg(endpoint)
        .args(args)
        .output()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_call_through_running_host() {
    let mock = spawn_mock().await;
    let host = start_host(&format!("http://{}", mock)).await.unwrap();

    let output = call(host.port, "friends.getFriends", &["4"]).await;
    assert!(output.status.success(), "call failed: {:?}", output);

    let result: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(result, json!([{ "id": 40, "name": "friend" }]));
}

#[tokio::test]
async fn test_unknown_endpoint_is_rejected() {
    let mock = spawn_mock().await;
    let host = start_host(&format!("http://{}", mock)).await.unwrap();

    let output = call(host.port, "friends.getEnemies", &["4"]).await;
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Unknown endpoint"));
}

#[tokio::test]
async fn test_remote_failure_exits_with_message() {
    let mock = spawn_mock().await;
    let host = start_host(&format!("http://{}", mock)).await.unwrap();

    // Missing required argument is reported back from the background
    let output = call(host.port, "friends.getFriends", &[]).await;
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("userId"));
}

#[tokio::test]
async fn test_call_without_host_fails() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let output = call(port, "friends.getFriends", &["1"]).await;
    assert!(!output.status.success());
}
