// `redraft status`: show the open session.

use anyhow::Context as _;
use clap::Args;
use redraft_common::protocol::rpc_methods;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::Context;
use crate::exit_code::ExitCode;
use crate::output;

#[derive(Debug, Args)]
pub struct StatusArgs {}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResult {
    pub session_id: String,
    pub path: String,
    pub state: String,
    pub dirty: bool,
    pub revision: String,
    pub disk_revision: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict: Option<ConflictSummary>,
    pub history: HistorySummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictSummary {
    pub message: String,
    pub snapshot_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistorySummary {
    pub count: usize,
    pub total_bytes: usize,
}

pub async fn run(_args: StatusArgs, ctx: &Context) -> anyhow::Result<ExitCode> {
    let status: StatusResult = ctx
        .client()
        .call(rpc_methods::SESSION_STATUS, json!({}))
        .await
        .context("failed to fetch session status")?;
    output::print_output(ctx.format, &status, format_human)?;

    Ok(ExitCode::Success)
}

fn format_human(result: &StatusResult) -> String {
    let mut lines = Vec::new();
    lines.push(format!("{} [{}]", result.path, result.state));
    lines.push(format!("  session:  {}", result.session_id));
    lines.push(format!("  revision: {}", short_revision(&result.revision)));
    if result.dirty {
        lines.push(format!("  on disk:  {}", short_revision(&result.disk_revision)));
    }
    lines.push(format!(
        "  history:  {} snapshot(s), {} bytes",
        result.history.count, result.history.total_bytes
    ));
    if let Some(conflict) = &result.conflict {
        lines.push(String::new());
        lines.push(format!("  Conflict: {}", conflict.message));
        lines.push(format!("  Local edits kept in snapshot {}", conflict.snapshot_id));
    }
    lines.join("\n")
}

fn short_revision(revision: &str) -> &str {
    let digest = revision.strip_prefix("sha256:").unwrap_or(revision);
    digest.get(..12).unwrap_or(digest)
}
