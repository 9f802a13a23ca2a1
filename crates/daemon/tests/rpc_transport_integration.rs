#![cfg(unix)]

use std::{
    fs, io,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use redraft_common::protocol::framing::{encode_frame, FrameDecoder};
use redraft_common::protocol::jsonrpc::{Request, RequestId, Response};
use redraft_daemon::agent::SearchPathResolver;
use redraft_daemon::config::{AgentBackend, DaemonConfig};
use redraft_daemon::rpc::{methods::RpcServerState, unix::serve_unix_until_shutdown};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{UnixListener, UnixStream},
    sync::broadcast,
    task::JoinHandle,
};

const GOOD_REWRITE: &str = "# Goal\nShip the feature.\n\n## Steps\n1. Read the code.\n2. Make the change.\n";

struct Daemon {
    socket_path: PathBuf,
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<anyhow::Result<()>>,
}

impl Daemon {
    async fn start(prefix: &str, config: DaemonConfig) -> Option<Self> {
        let socket_path = unique_socket_path(prefix);
        let listener = match UnixListener::bind(&socket_path) {
            Ok(listener) => listener,
            Err(error) if error.kind() == io::ErrorKind::PermissionDenied => {
                eprintln!("skipping unix socket test: bind is not permitted in this environment");
                return None;
            }
            Err(error) => panic!("failed to bind unix socket: {error}"),
        };
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let state = RpcServerState::new(&config, Arc::new(SearchPathResolver::new(Vec::new())))
            .with_shutdown_notifier(shutdown_tx.clone());
        let task = tokio::spawn(serve_unix_until_shutdown(listener, state, shutdown_rx));
        Some(Self { socket_path, shutdown_tx, task })
    }

    async fn connect(&self) -> Client {
        let stream = UnixStream::connect(&self.socket_path).await.expect("client should connect");
        Client { stream, decoder: FrameDecoder::new(), next_id: 0 }
    }

    async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.task.await;
        let _ = fs::remove_file(&self.socket_path);
    }
}

struct Client {
    stream: UnixStream,
    decoder: FrameDecoder,
    next_id: i64,
}

impl Client {
    async fn send(&mut self, method: &str, params: Value) -> RequestId {
        self.next_id += 1;
        let id = RequestId::Number(self.next_id);
        let request = Request::new(method, Some(params), id.clone());
        let body = serde_json::to_vec(&request).expect("request should serialize");
        self.stream.write_all(&encode_frame(&body)).await.expect("request write should succeed");
        id
    }

    async fn recv(&mut self) -> Response {
        loop {
            if let Some(frame) = self.decoder.next_frame().expect("response frame should decode") {
                return serde_json::from_slice(&frame).expect("response should decode");
            }
            let mut buffer = [0_u8; 4096];
            let read = tokio::time::timeout(Duration::from_secs(10), self.stream.read(&mut buffer))
                .await
                .expect("response should arrive")
                .expect("response should be readable");
            assert!(read > 0, "connection closed before a response arrived");
            self.decoder.push_bytes(&buffer[..read]);
        }
    }

    async fn call(&mut self, method: &str, params: Value) -> Value {
        let id = self.send(method, params).await;
        let response = self.recv().await;
        assert_eq!(response.id, Some(id));
        assert!(response.error.is_none(), "{method} failed: {response:?}");
        response.result.expect("result should be present")
    }
}

fn base_config() -> DaemonConfig {
    let mut config = DaemonConfig::default();
    config.watch_external_changes = false;
    config.autosave_debounce_ms = 10_000;
    config
}

fn agent_config(script: &Path) -> DaemonConfig {
    let mut config = base_config();
    config.agent.command = script.display().to_string();
    config.agent.backend = AgentBackend::Plain;
    config.agent.timeout_ms = 5_000;
    config
}

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("script should be written");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("script should be executable");
    path
}

#[tokio::test]
async fn draft_is_answered_out_of_band_while_connection_keeps_serving() {
    let tmp = TempDir::new().expect("temp dir should be created");
    let doc = tmp.path().join("prompt.md");
    fs::write(&doc, "make the feature work").unwrap();
    let script = write_script(
        tmp.path(),
        "slow-agent",
        &format!("cat >/dev/null\nsleep 1\nprintf '%s' '{GOOD_REWRITE}'"),
    );
    let Some(daemon) = Daemon::start("rpc-draft", agent_config(&script)).await else { return };
    let mut client = daemon.connect().await;

    client.call("session.open", json!({ "path": doc })).await;

    let draft_id = client.send("session.requestDraft", json!({ "instruction": "tighten it" })).await;
    let status_id = client.send("session.status", json!({})).await;

    let first = client.recv().await;
    assert_eq!(first.id, Some(status_id), "status must not wait behind the draft");
    let second = client.recv().await;
    assert_eq!(second.id, Some(draft_id));

    let draft = second.result.expect("draft should succeed");
    assert_eq!(draft["needsRepair"], false);
    assert!(draft["output"].as_str().unwrap().contains("## Implementation Steps"));
    assert!(draft["snapshotId"].is_string());

    let status = client.call("session.status", json!({})).await;
    assert_eq!(status["state"], "dirty");
    assert_eq!(status["history"]["count"], 1);

    daemon.stop().await;
}

#[tokio::test]
async fn agent_timeout_is_reported_with_kind() {
    let tmp = TempDir::new().expect("temp dir should be created");
    let doc = tmp.path().join("prompt.md");
    fs::write(&doc, "draft").unwrap();
    let script = write_script(tmp.path(), "hung-agent", "sleep 30");
    let mut config = agent_config(&script);
    config.agent.timeout_ms = 1_000;
    let Some(daemon) = Daemon::start("rpc-timeout", config).await else { return };
    let mut client = daemon.connect().await;

    client.call("session.open", json!({ "path": doc })).await;
    client.send("session.requestDraft", json!({})).await;
    let response = client.recv().await;

    let error = response.error.expect("draft should time out");
    assert_eq!(error.code, -32012);
    assert_eq!(error.data.unwrap()["kind"], "timed_out");

    let status = client.call("session.status", json!({})).await;
    assert_eq!(status["state"], "clean");

    daemon.stop().await;
}

#[tokio::test]
async fn conflict_flow_over_the_socket() {
    let tmp = TempDir::new().expect("temp dir should be created");
    let doc = tmp.path().join("prompt.md");
    fs::write(&doc, "v1").unwrap();
    let Some(daemon) = Daemon::start("rpc-conflict", base_config()).await else { return };
    let mut client = daemon.connect().await;

    client.call("session.open", json!({ "path": doc })).await;
    client.call("session.edit", json!({ "text": "v1 plus local edits" })).await;
    fs::write(&doc, "v2 from another tool").unwrap();

    let saved = client.call("session.save", json!({})).await;
    assert_eq!(saved["saved"], false);
    assert_eq!(saved["conflict"]["content"], "v2 from another tool");
    assert_eq!(fs::read_to_string(&doc).unwrap(), "v2 from another tool");

    let history = client.call("session.history", json!({})).await;
    assert_eq!(history["count"], 1);
    assert_eq!(history["items"][0]["reason"], "conflict");

    let dismissed = client.call("session.dismissConflict", json!({})).await;
    assert_eq!(dismissed["state"], "clean");

    daemon.stop().await;
}

#[tokio::test]
async fn wait_on_one_connection_is_released_by_open_on_another() {
    let tmp = TempDir::new().expect("temp dir should be created");
    let Some(daemon) = Daemon::start("rpc-wait", base_config()).await else { return };
    let mut editor = daemon.connect().await;
    let mut waiter = daemon.connect().await;

    let opened = editor.call("session.open", json!({ "path": tmp.path().join("a.md") })).await;
    let wait_id = waiter
        .send("session.wait", json!({ "sessionId": opened["sessionId"], "timeoutMs": 10_000 }))
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    editor.call("session.open", json!({ "path": tmp.path().join("b.md") })).await;

    let response = waiter.recv().await;
    assert_eq!(response.id, Some(wait_id));
    let result = response.result.expect("wait should succeed");
    assert_eq!(result["closed"], true);
    assert_eq!(result["reason"], "superseded");

    daemon.stop().await;
}

#[tokio::test]
async fn shutdown_request_stops_the_server() {
    let Some(daemon) = Daemon::start("rpc-shutdown", base_config()).await else { return };
    let mut client = daemon.connect().await;

    let result = client.call("daemon.shutdown", json!({})).await;
    assert_eq!(result["ok"], true);

    let Daemon { socket_path, task, .. } = daemon;
    let served = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("server should stop after daemon.shutdown")
        .expect("server task should not panic");
    assert!(served.is_ok());
    let _ = fs::remove_file(socket_path);
}

fn unique_socket_path(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time should be after unix epoch")
        .as_nanos();
    std::env::temp_dir().join(format!("redraft-{prefix}-{nanos}.sock"))
}
