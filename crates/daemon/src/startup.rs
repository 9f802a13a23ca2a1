// Single-instance startup: runtime directory, PID file, Unix socket.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use thiserror::Error;
use tokio::net::UnixListener;
use tracing::{info, warn};

use crate::config::{global_dir, DaemonConfig};
use crate::security::{create_private_dir, open_private_truncate};

const SOCKET_NAME: &str = "redraftd.sock";
/// Diagnostics only; liveness is decided by the socket.
const PID_FILE_NAME: &str = "redraftd.pid";

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("another redraft daemon is already serving `{}`", socket_path.display())]
    AlreadyRunning { socket_path: PathBuf },
}

/// Resolved paths for daemon runtime files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonPaths {
    pub base_dir: PathBuf,
    pub socket_path: PathBuf,
    pub pid_path: PathBuf,
}

impl DaemonPaths {
    /// Resolve paths under `~/.redraft/`, honoring the configured socket path.
    pub fn resolve(config: &DaemonConfig) -> Result<Self> {
        let base_dir = global_dir().context("could not determine home directory")?;
        let paths = Self::under(base_dir, config.socket_path.clone());
        paths.prepare()?;
        Ok(paths)
    }

    pub fn under(base_dir: PathBuf, socket_override: Option<PathBuf>) -> Self {
        Self {
            socket_path: socket_override.unwrap_or_else(|| base_dir.join(SOCKET_NAME)),
            pid_path: base_dir.join(PID_FILE_NAME),
            base_dir,
        }
    }

    /// Create the base directory and the socket's parent, owner-only.
    pub fn prepare(&self) -> Result<()> {
        create_private_dir(&self.base_dir)?;
        if let Some(parent) = self.socket_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                create_private_dir(parent)?;
            }
        }
        Ok(())
    }
}

/// Write the current process PID.
pub fn write_pid_file(path: &Path) -> Result<()> {
    let pid = std::process::id();
    let mut file = open_private_truncate(path).context("failed to create PID file")?;
    write!(file, "{pid}").context("failed to write PID")?;
    info!(pid, path = %path.display(), "wrote PID file");
    Ok(())
}

pub fn remove_pid_file(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(error = %e, "failed to remove PID file");
        }
    }
}

/// Bind the daemon socket. A live daemon on the same path is an error; a
/// stale socket file left by a crashed daemon is replaced.
pub async fn bind_socket(path: &Path) -> Result<UnixListener> {
    if is_daemon_running(path).await {
        return Err(StartupError::AlreadyRunning { socket_path: path.to_path_buf() }.into());
    }
    if path.exists() {
        fs::remove_file(path).context("failed to remove stale socket")?;
    }

    let listener = UnixListener::bind(path)
        .with_context(|| format!("failed to bind Unix socket `{}`", path.display()))?;
    info!(path = %path.display(), "daemon socket ready");
    Ok(listener)
}

/// A daemon is alive when its socket accepts a connection.
pub async fn is_daemon_running(socket_path: &Path) -> bool {
    tokio::net::UnixStream::connect(socket_path).await.is_ok()
}
