// redraftd: standalone daemon entry point.

use anyhow::Context;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting redraft daemon");
    redraft_daemon::runtime::run_standalone()
        .await
        .context("redraft daemon terminated unexpectedly")
}
