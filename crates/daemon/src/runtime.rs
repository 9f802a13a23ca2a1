use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::info;

use crate::agent::SearchPathResolver;
use crate::config::DaemonConfig;
use crate::rpc::methods::RpcServerState;
use crate::rpc::unix::serve_unix_until_shutdown;
use crate::startup::{bind_socket, remove_pid_file, write_pid_file, DaemonPaths};

/// Load config, claim the socket, and serve until Ctrl-C or `daemon.shutdown`.
pub async fn run_standalone() -> Result<()> {
    let config = DaemonConfig::load();
    let paths = DaemonPaths::resolve(&config)?;
    run_standalone_with(paths, config).await
}

pub async fn run_standalone_with(paths: DaemonPaths, config: DaemonConfig) -> Result<()> {
    let listener = bind_socket(&paths.socket_path).await?;
    write_pid_file(&paths.pid_path)?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(4);
    let state = RpcServerState::new(&config, Arc::new(SearchPathResolver::from_env()))
        .with_shutdown_notifier(shutdown_tx.clone());
    let ctrl_c_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("interrupt received");
        let _ = ctrl_c_tx.send(());
    });

    info!(
        socket_path = %paths.socket_path.display(),
        agent_enabled = config.agent.enabled,
        agent_command = %config.agent.command,
        "standalone daemon started"
    );
    let result = serve_unix_until_shutdown(listener, state, shutdown_rx).await;
    cleanup_paths(&paths);
    info!("standalone daemon stopped");
    result.context("standalone daemon exited with error")
}

fn cleanup_paths(paths: &DaemonPaths) {
    remove_pid_file(&paths.pid_path);
    let _ = std::fs::remove_file(&paths.socket_path);
}
