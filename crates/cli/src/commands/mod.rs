// CLI subcommand dispatch.

use std::path::PathBuf;

use clap::Subcommand;

use crate::client::DaemonClient;
use crate::exit_code::ExitCode;
use crate::output::OutputFormat;

pub mod close;
pub mod draft;
pub mod open;
pub mod status;

#[derive(Subcommand)]
pub enum Command {
    /// Open a file in the daemon's editor session
    Open(open::OpenArgs),
    /// Show the current session state
    Status(status::StatusArgs),
    /// Rewrite the buffer with the configured agent
    Draft(draft::DraftArgs),
    /// Close the current session
    Close(close::CloseArgs),
}

/// Settings shared by every subcommand.
#[derive(Debug, Clone)]
pub struct Context {
    pub socket_path: PathBuf,
    pub format: OutputFormat,
}

impl Context {
    pub fn client(&self) -> DaemonClient {
        DaemonClient::new(self.socket_path.clone())
    }
}

pub async fn run(cmd: Command, ctx: &Context) -> anyhow::Result<ExitCode> {
    match cmd {
        Command::Open(args) => open::run(args, ctx).await,
        Command::Status(args) => status::run(args, ctx).await,
        Command::Draft(args) => draft::run(args, ctx).await,
        Command::Close(args) => close::run(args, ctx).await,
    }
}
