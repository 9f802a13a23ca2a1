// redraft CLI entry point.

use std::path::PathBuf;
use std::process;

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod client;
mod commands;
mod exit_code;
mod output;

use exit_code::ExitCode;
use output::OutputFormat;

#[derive(Parser)]
#[command(name = "redraft", version, about = "Client for the redraft prompt-drafting daemon")]
struct Cli {
    /// Daemon socket (defaults to $REDRAFT_SOCKET, then the daemon config).
    #[arg(long, global = true)]
    socket_path: Option<PathBuf>,

    /// Force JSON output.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: commands::Command,
}

#[tokio::main]
async fn main() -> process::ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let ctx = commands::Context {
        socket_path: cli.socket_path.unwrap_or_else(client::default_socket_path),
        format: OutputFormat::detect(cli.json),
    };

    match commands::run(cli.command, &ctx).await {
        Ok(code) => code.into(),
        Err(error) => {
            output::print_anyhow_error(ctx.format, &error);
            ExitCode::from_error(&error).into()
        }
    }
}
