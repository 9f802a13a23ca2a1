// `redraft draft`: ask the daemon's agent to rewrite the open buffer.

use std::time::Duration;

use anyhow::Context as _;
use clap::Args;
use redraft_common::protocol::rpc_methods;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::Context;
use crate::exit_code::ExitCode;
use crate::output;

/// Covers the agent timeout across the first attempt and its repairs.
const DRAFT_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Args)]
pub struct DraftArgs {
    /// Extra guidance for this rewrite.
    #[arg(long)]
    pub instruction: Option<String>,

    /// Image to attach; relative paths resolve against the opening directory.
    #[arg(long = "image")]
    pub images: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftResult {
    pub output: String,
    #[serde(default)]
    pub reasons: Vec<String>,
    pub needs_repair: bool,
    pub repair_attempts: u32,
    #[serde(default)]
    pub effort: Option<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    pub snapshot_id: Option<String>,
    pub revision: String,
}

pub async fn run(args: DraftArgs, ctx: &Context) -> anyhow::Result<ExitCode> {
    let mut params = json!({ "images": args.images });
    if let Some(instruction) = &args.instruction {
        params["instruction"] = json!(instruction);
    }

    let result: DraftResult = ctx
        .client()
        .call_with_timeout(rpc_methods::SESSION_REQUEST_DRAFT, params, Some(DRAFT_TIMEOUT))
        .await
        .context("draft request failed")?;

    for warning in &result.warnings {
        output::print_warning(ctx.format, "DRAFT_WARNING", warning);
    }
    output::print_output(ctx.format, &result, format_human)?;

    Ok(ExitCode::Success)
}

fn format_human(result: &DraftResult) -> String {
    let mut lines = Vec::new();
    match &result.snapshot_id {
        Some(snapshot) => lines.push(format!("Draft applied. Previous buffer kept as {snapshot}.")),
        None => lines.push("Draft not applied.".to_string()),
    }
    if result.repair_attempts > 0 {
        lines.push(format!("  repairs: {}", result.repair_attempts));
    }
    if let Some(effort) = &result.effort {
        lines.push(format!("  effort:  {effort}"));
    }
    if result.needs_repair {
        lines.push(format!("  still flagged: {}", result.reasons.join(", ")));
    }
    if !result.output.is_empty() {
        lines.push(String::new());
        lines.push(result.output.trim_end().to_string());
    }
    lines.join("\n")
}
