use std::ffi::OsString;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use redraft_common::protocol::framing::{encode_frame, FrameDecoder};
use redraft_common::protocol::jsonrpc::{Request, RequestId, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::time::timeout;
use tracing::debug;

pub const DAEMON_NOT_RUNNING_EXIT_CODE: i32 = 10;

const SOCKET_PATH_ENV: &str = "REDRAFT_SOCKET";
const CONFIG_PATH_ENV: &str = "REDRAFT_CONFIG";
const DEFAULT_SOCKET_RELATIVE_PATH: &str = ".redraft/redraftd.sock";
const DEFAULT_CONFIG_RELATIVE_PATH: &str = ".redraft/config.toml";
const DEFAULT_TIMEOUT_SECS: u64 = 5;

#[derive(Debug)]
pub struct DaemonUnavailable {
    socket_path: PathBuf,
    source: io::Error,
}

impl DaemonUnavailable {
    pub(crate) fn new(socket_path: PathBuf, source: io::Error) -> Self {
        Self { socket_path, source }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn exit_code(&self) -> i32 {
        DAEMON_NOT_RUNNING_EXIT_CODE
    }
}

impl fmt::Display for DaemonUnavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "daemon is not running (socket `{}`)", self.socket_path.display())
    }
}

impl std::error::Error for DaemonUnavailable {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// A JSON-RPC error returned by the daemon, kept in the `anyhow` chain.
#[derive(Debug, Clone, PartialEq)]
pub struct DaemonRpcError {
    pub code: i32,
    pub message: String,
    pub data: Option<Value>,
}

impl DaemonRpcError {
    /// Snake-case failure kind from `data.kind`, when the daemon sent one.
    pub fn kind(&self) -> Option<&str> {
        self.data.as_ref()?.get("kind")?.as_str()
    }
}

impl fmt::Display for DaemonRpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "daemon error {}: {}", self.code, self.message)?;
        if let Some(kind) = self.kind() {
            write!(f, " ({kind})")?;
        }
        Ok(())
    }
}

impl std::error::Error for DaemonRpcError {}

/// Framed JSON-RPC client. Each call uses its own connection.
#[derive(Debug)]
pub struct DaemonClient {
    socket_path: PathBuf,
    timeout: Option<Duration>,
    next_request_id: AtomicI64,
}

impl Default for DaemonClient {
    fn default() -> Self {
        Self::new(default_socket_path())
    }
}

impl DaemonClient {
    pub fn new(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            timeout: Some(Duration::from_secs(DEFAULT_TIMEOUT_SECS)),
            next_request_id: AtomicI64::new(1),
        }
    }

    /// `None` waits for the response indefinitely.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub async fn call<P, R>(&self, method: &str, params: P) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        self.call_with_timeout(method, params, self.timeout).await
    }

    pub async fn call_with_timeout<P, R>(
        &self,
        method: &str,
        params: P,
        limit: Option<Duration>,
    ) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        let params = serde_json::to_value(params).context("failed to serialize json-rpc params")?;
        let request = Request::new(method, Some(params), RequestId::Number(id));
        let body = serde_json::to_vec(&request).context("failed to serialize json-rpc request")?;

        let connect = UnixStream::connect(&self.socket_path);
        let mut stream = bounded(limit, connect)
            .await
            .context("timed out connecting to daemon socket")?
            .map_err(|err| {
                if is_daemon_unavailable_kind(err.kind()) {
                    anyhow!(DaemonUnavailable::new(self.socket_path.clone(), err))
                } else {
                    anyhow!(err)
                }
            })
            .with_context(|| {
                format!("failed to connect to daemon socket `{}`", self.socket_path.display())
            })?;

        debug!(method, id, "sending json-rpc request");
        bounded(limit, stream.write_all(&encode_frame(&body)))
            .await
            .context("timed out writing json-rpc request")?
            .context("failed writing json-rpc request to daemon socket")?;

        let response = bounded(limit, read_response(&mut stream))
            .await
            .context("timed out waiting for json-rpc response")??;

        if response.id != Some(RequestId::Number(id)) {
            anyhow::bail!("daemon answered request {id} with id {:?}", response.id);
        }
        if let Some(error) = response.error {
            return Err(anyhow!(DaemonRpcError {
                code: error.code,
                message: error.message,
                data: error.data,
            }));
        }

        let result = response.result.context("daemon json-rpc response missing `result` field")?;
        serde_json::from_value(result).context("failed to decode daemon json-rpc result")
    }
}

async fn read_response(stream: &mut UnixStream) -> Result<Response> {
    let mut decoder = FrameDecoder::new();
    let mut buffer = [0_u8; 8192];
    loop {
        if let Some(frame) = decoder.next_frame().context("daemon sent a malformed frame")? {
            return serde_json::from_slice(&frame)
                .context("failed to decode daemon json-rpc response");
        }
        let read = stream
            .read(&mut buffer)
            .await
            .context("failed reading json-rpc response from daemon socket")?;
        if read == 0 {
            anyhow::bail!("daemon closed the connection before responding");
        }
        decoder.push_bytes(&buffer[..read]);
    }
}

async fn bounded<F: std::future::Future>(
    limit: Option<Duration>,
    future: F,
) -> Result<F::Output, tokio::time::error::Elapsed> {
    match limit {
        Some(limit) => timeout(limit, future).await,
        None => Ok(future.await),
    }
}

pub fn daemon_unavailable_exit_code(error: &anyhow::Error) -> Option<i32> {
    error.downcast_ref::<DaemonUnavailable>().map(DaemonUnavailable::exit_code)
}

/// `$REDRAFT_SOCKET`, else `socket_path` from the daemon config, else
/// `~/.redraft/redraftd.sock`.
pub fn default_socket_path() -> PathBuf {
    socket_path_with(|key| std::env::var_os(key))
}

fn socket_path_with(lookup: impl Fn(&str) -> Option<OsString>) -> PathBuf {
    if let Some(path) = lookup(SOCKET_PATH_ENV).filter(|value| !value.is_empty()) {
        return PathBuf::from(path);
    }

    let home = lookup("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
    let config_path = lookup(CONFIG_PATH_ENV)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| home.join(DEFAULT_CONFIG_RELATIVE_PATH));

    configured_socket_path(&config_path)
        .unwrap_or_else(|| home.join(DEFAULT_SOCKET_RELATIVE_PATH))
}

fn configured_socket_path(config_path: &Path) -> Option<PathBuf> {
    let raw = std::fs::read_to_string(config_path).ok()?;
    let table = raw.parse::<toml::Table>().ok()?;
    table.get("socket_path")?.as_str().map(PathBuf::from)
}

fn is_daemon_unavailable_kind(kind: io::ErrorKind) -> bool {
    matches!(kind, io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused)
}
