// How `redraft` talks back: results on stdout, diagnostics on stderr.
//
// An interactive terminal gets prose; a pipe or `--json` gets one JSON
// object per line so editor integrations can parse it.

use std::io::{self, IsTerminal, Write};

use redraft_common::protocol::jsonrpc::{
    AGENT_COMMAND_NOT_FOUND, AGENT_DISABLED, SESSION_MISMATCH, SESSION_NOT_OPEN,
    SESSION_SUPERSEDED,
};
use serde::Serialize;
use serde_json::json;

use crate::client::{DaemonRpcError, DaemonUnavailable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Human,
    Json,
}

impl OutputFormat {
    /// `--json` wins; otherwise prose only when stdout is a terminal.
    pub fn detect(json_flag: bool) -> Self {
        if json_flag {
            Self::Json
        } else {
            Self::detect_from_terminal(io::stdout().is_terminal())
        }
    }

    pub fn detect_from_terminal(is_tty: bool) -> Self {
        if is_tty {
            Self::Human
        } else {
            Self::Json
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Severity {
    Error,
    Warning,
}

impl Severity {
    fn label(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
        }
    }

    fn color(self) -> &'static str {
        match self {
            Self::Error => "\x1b[31m",
            Self::Warning => "\x1b[33m",
        }
    }
}

/// Print a command result on stdout.
pub fn print_output<T, F>(format: OutputFormat, value: &T, human_fn: F) -> io::Result<()>
where
    T: Serialize,
    F: FnOnce(&T) -> String,
{
    let line = render_result(format, value, human_fn)?;
    writeln!(io::stdout().lock(), "{line}")
}

pub fn print_warning(format: OutputFormat, code: &str, message: &str) {
    emit_diagnostic(format, Severity::Warning, code, message);
}

/// Map a failed command to a stable code and a hint, then print it.
pub fn print_anyhow_error(format: OutputFormat, error: &anyhow::Error) {
    let (code, message) = actionable_error(error);
    emit_diagnostic(format, Severity::Error, code, &message);
}

fn render_result<T, F>(format: OutputFormat, value: &T, human_fn: F) -> io::Result<String>
where
    T: Serialize,
    F: FnOnce(&T) -> String,
{
    match format {
        OutputFormat::Human => Ok(human_fn(value)),
        OutputFormat::Json => serde_json::to_string(value).map_err(io::Error::other),
    }
}

fn emit_diagnostic(format: OutputFormat, severity: Severity, code: &str, message: &str) {
    let line = render_diagnostic(format, severity, code, message, io::stderr().is_terminal());
    // Nowhere left to report a failing stderr.
    let _ = writeln!(io::stderr().lock(), "{line}");
}

fn render_diagnostic(
    format: OutputFormat,
    severity: Severity,
    code: &str,
    message: &str,
    is_tty: bool,
) -> String {
    match format {
        OutputFormat::Json => {
            json!({ (severity.label()): { "code": code, "message": message } }).to_string()
        }
        OutputFormat::Human if is_tty => {
            format!("{}{}:\x1b[0m {message}", severity.color(), severity.label())
        }
        OutputFormat::Human => format!("{}: {message}", severity.label()),
    }
}

fn actionable_error(error: &anyhow::Error) -> (&'static str, String) {
    if let Some(down) = error.chain().find_map(|cause| cause.downcast_ref::<DaemonUnavailable>()) {
        return (
            "DAEMON_NOT_RUNNING",
            format!(
                "Daemon is not running at {}. Start it with: redraftd",
                down.socket_path().display()
            ),
        );
    }

    if let Some(rpc) = error.chain().find_map(|cause| cause.downcast_ref::<DaemonRpcError>()) {
        return match rpc.code {
            SESSION_NOT_OPEN => {
                ("SESSION_NOT_OPEN", "No session is open. Run: redraft open <path>".to_string())
            }
            SESSION_MISMATCH | SESSION_SUPERSEDED => (
                "SESSION_MISMATCH",
                format!("{}. Another file was opened since", rpc.message),
            ),
            AGENT_DISABLED => (
                "AGENT_DISABLED",
                "The rewrite agent is disabled. Set [agent] enabled = true in the daemon config"
                    .to_string(),
            ),
            AGENT_COMMAND_NOT_FOUND => (
                "AGENT_NOT_FOUND",
                format!("{}. Set [agent] command to an absolute path", rpc.message),
            ),
            _ => ("RPC_ERROR", format!("{error:#}")),
        };
    }

    let message = format!("{error:#}");
    if message.to_ascii_lowercase().contains("timed out") {
        return (
            "NETWORK_TIMEOUT",
            "Daemon did not answer in time. Check if redraftd is running: ps aux | grep redraftd"
                .to_string(),
        );
    }

    ("ERROR", message)
}
