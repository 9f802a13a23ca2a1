// `redraft close`: save and close the open session.

use anyhow::Context as _;
use clap::Args;
use redraft_common::protocol::rpc_methods;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::Context;
use crate::exit_code::ExitCode;
use crate::output;

#[derive(Debug, Args)]
pub struct CloseArgs {
    /// Discard unsaved edits instead of writing them first.
    #[arg(long)]
    pub no_save: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseResult {
    pub closed: bool,
    pub saved_before_close: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict: Option<serde_json::Value>,
}

pub async fn run(args: CloseArgs, ctx: &Context) -> anyhow::Result<ExitCode> {
    let result: CloseResult = ctx
        .client()
        .call(rpc_methods::SESSION_CLOSE, json!({ "save": !args.no_save }))
        .await
        .context("failed to close session")?;
    output::print_output(ctx.format, &result, format_human)?;

    Ok(close_exit_code(&result))
}

fn close_exit_code(result: &CloseResult) -> ExitCode {
    if result.closed {
        ExitCode::Success
    } else {
        ExitCode::Conflict
    }
}

fn format_human(result: &CloseResult) -> String {
    if !result.closed {
        let message = result
            .conflict
            .as_ref()
            .and_then(|conflict| conflict.get("message"))
            .and_then(|message| message.as_str())
            .unwrap_or("file changed on disk");
        return format!(
            "Session left open: {message}. Review the buffer, then close again or use --no-save."
        );
    }
    if result.saved_before_close {
        "Saved and closed.".to_string()
    } else {
        "Closed.".to_string()
    }
}
