// `redraft open`: open a file, optionally blocking until the session ends.

use std::path::PathBuf;

use anyhow::Context as _;
use clap::Args;
use redraft_common::protocol::rpc_methods;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::Context;
use crate::exit_code::ExitCode;
use crate::output;

#[derive(Debug, Args)]
pub struct OpenArgs {
    /// File to edit. Relative paths resolve against the current directory.
    pub path: String,

    /// Block until the session is closed or replaced by another open.
    #[arg(long)]
    pub wait: bool,

    /// Give up waiting after this many milliseconds.
    #[arg(long, requires = "wait")]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenResult {
    pub session_id: String,
    pub path: PathBuf,
    pub revision: String,
    #[serde(default)]
    pub content: String,
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub superseded_conflict: Option<SupersededConflict>,
}

/// Unsaved edits of the replaced session that could not be written back.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupersededConflict {
    pub path: PathBuf,
    pub snapshot_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitResult {
    pub closed: bool,
    pub reason: String,
}

pub async fn run(args: OpenArgs, ctx: &Context) -> anyhow::Result<ExitCode> {
    let cwd = std::env::current_dir().context("failed to read the current directory")?;
    let client = ctx.client();

    let opened: OpenResult = client
        .call(rpc_methods::SESSION_OPEN, json!({ "path": args.path, "cwd": cwd }))
        .await
        .with_context(|| format!("failed to open `{}`", args.path))?;
    if let Some(displaced) = &opened.superseded_conflict {
        output::print_warning(ctx.format, "SUPERSEDED_CONFLICT", &superseded_warning(displaced));
    }
    output::print_output(ctx.format, &opened, format_opened)?;

    if !args.wait {
        return Ok(ExitCode::Success);
    }

    let mut params = json!({ "sessionId": opened.session_id });
    if let Some(timeout_ms) = args.timeout_ms {
        params["timeoutMs"] = json!(timeout_ms);
    }
    let waited: WaitResult = client
        .call_with_timeout(rpc_methods::SESSION_WAIT, params, None)
        .await
        .context("failed while waiting for the session to close")?;
    output::print_output(ctx.format, &waited, format_waited)?;

    Ok(wait_exit_code(&waited))
}

fn wait_exit_code(waited: &WaitResult) -> ExitCode {
    if waited.closed {
        ExitCode::Success
    } else {
        ExitCode::Error
    }
}

fn format_opened(result: &OpenResult) -> String {
    format!(
        "Opened {} ({}, {} bytes)\n  session: {}",
        result.path.display(),
        result.state,
        result.content.len(),
        result.session_id
    )
}

fn superseded_warning(displaced: &SupersededConflict) -> String {
    format!(
        "{} could not be saved; unsaved edits kept as snapshot {} in this session's history",
        displaced.path.display(),
        displaced.snapshot_id
    )
}

fn format_waited(result: &WaitResult) -> String {
    match result.reason.as_str() {
        "closed" => "Session closed.".to_string(),
        "superseded" => "Session replaced by another open.".to_string(),
        "timeout" => "Timed out waiting for the session to close.".to_string(),
        other => format!("Wait finished: {other}"),
    }
}
