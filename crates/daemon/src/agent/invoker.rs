// Agent subprocess invocation.
//
// The child is owned for the whole call: stdin carries the composed prompt,
// stdout is captured up to a byte ceiling, stderr is drained into a bounded
// tail for diagnostics. Timeout and overflow both kill and reap the child
// before returning.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use redraft_common::protocol::jsonrpc::{
    AGENT_COMMAND_NOT_FOUND, AGENT_NON_ZERO_EXIT, AGENT_OUTPUT_TOO_LARGE, AGENT_SPAWN_FAILED,
    AGENT_TIMEOUT, INTERNAL_ERROR,
};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use super::guard::{GuardReason, ReasoningEffort};
use super::prompt::compose;
use super::resolver::CommandResolver;
use crate::config::{AgentBackend, AgentConfig};

/// Stderr kept for error messages.
const STDERR_TAIL_BYTES: usize = 16 * 1024;
const READ_CHUNK_BYTES: usize = 8 * 1024;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agent command `{command}` was not found on the search path")]
    CommandNotFound { command: String },
    #[error("failed to start agent `{command}`: {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("agent did not finish within {after_ms} ms")]
    TimedOut { after_ms: u64 },
    #[error("agent output exceeded {limit} bytes")]
    OutputTooLarge { limit: usize },
    #[error("agent exited with status {code:?}: {message}")]
    NonZeroExit { code: Option<i32>, message: String },
    #[error("agent I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentError {
    /// Stable snake_case kind reported to clients.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CommandNotFound { .. } => "command_not_found",
            Self::SpawnFailed { .. } => "spawn_failed",
            Self::TimedOut { .. } => "timed_out",
            Self::OutputTooLarge { .. } => "output_too_large",
            Self::NonZeroExit { .. } => "non_zero_exit",
            Self::Io(_) => "io",
        }
    }

    pub fn rpc_code(&self) -> i32 {
        match self {
            Self::CommandNotFound { .. } => AGENT_COMMAND_NOT_FOUND,
            Self::SpawnFailed { .. } => AGENT_SPAWN_FAILED,
            Self::TimedOut { .. } => AGENT_TIMEOUT,
            Self::OutputTooLarge { .. } => AGENT_OUTPUT_TOO_LARGE,
            Self::NonZeroExit { .. } => AGENT_NON_ZERO_EXIT,
            Self::Io(_) => INTERNAL_ERROR,
        }
    }
}

/// One agent call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentRequest {
    pub draft: String,
    pub instruction: Option<String>,
    pub images: Vec<PathBuf>,
    pub effort: Option<ReasoningEffort>,
    /// Guard reasons from the previous attempt, if this is a repair.
    pub repair_notes: Vec<GuardReason>,
    pub cwd: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentOutput {
    pub text: String,
    pub warnings: Vec<String>,
}

pub struct AgentInvoker {
    config: AgentConfig,
    resolver: Arc<dyn CommandResolver>,
}

impl AgentInvoker {
    pub fn new(config: AgentConfig, resolver: Arc<dyn CommandResolver>) -> Self {
        Self { config, resolver }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub async fn draft(&self, request: &AgentRequest) -> Result<AgentOutput, AgentError> {
        let program = self.resolver.resolve(&self.config.command).ok_or_else(|| {
            AgentError::CommandNotFound { command: self.config.command.clone() }
        })?;

        let mut warnings = Vec::new();
        let images: &[PathBuf] = if self.config.backend.accepts_images() {
            &request.images
        } else {
            if !request.images.is_empty() {
                warn!(count = request.images.len(), backend = ?self.config.backend, "agent backend is text-only, dropping images");
                warnings.push(format!(
                    "dropped {} image(s): the configured agent backend accepts text only",
                    request.images.len()
                ));
            }
            &[]
        };

        let args = build_args(&self.config, request.effort, images);
        let prompt = compose(
            self.config.prompt_profile,
            &request.draft,
            request.instruction.as_deref(),
            &request.repair_notes,
        );

        let mut command = Command::new(&program);
        command
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &request.cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn().map_err(|source| AgentError::SpawnFailed {
            command: program.display().to_string(),
            source,
        })?;
        info!(
            program = %program.display(),
            backend = ?self.config.backend,
            effort = request.effort.map(ReasoningEffort::as_str),
            repair = !request.repair_notes.is_empty(),
            "agent spawned"
        );

        let timeout = Duration::from_millis(self.config.timeout_ms);
        let collected = tokio::time::timeout(
            timeout,
            collect(&mut child, prompt, self.config.max_output_bytes),
        )
        .await;

        let (status, stdout, stderr) = match collected {
            Ok(Ok(collected)) => collected,
            Ok(Err(error)) => {
                terminate(&mut child).await;
                warn!(%error, "agent invocation failed");
                return Err(error);
            }
            Err(_) => {
                terminate(&mut child).await;
                warn!(timeout_ms = self.config.timeout_ms, "agent timed out");
                return Err(AgentError::TimedOut { after_ms: self.config.timeout_ms });
            }
        };

        if !status.success() {
            let message = failure_message(&stderr, &stdout);
            warn!(code = status.code(), %message, "agent exited unsuccessfully");
            return Err(AgentError::NonZeroExit { code: status.code(), message });
        }

        let text = String::from_utf8_lossy(&stdout).trim().to_string();
        debug!(bytes = text.len(), "agent finished");
        Ok(AgentOutput { text, warnings })
    }
}

/// Arguments for the configured backend. The prompt always goes on stdin.
pub fn build_args(
    config: &AgentConfig,
    effort: Option<ReasoningEffort>,
    images: &[PathBuf],
) -> Vec<String> {
    let mut args = Vec::new();
    if config.backend == AgentBackend::Exec {
        args.extend(
            ["exec", "--skip-git-repo-check", "--sandbox", "read-only", "--model"]
                .map(String::from),
        );
        args.push(config.model.clone());
        if let Some(effort) = effort.map(|effort| effective_effort(&config.model, effort)) {
            args.push("-c".into());
            args.push(format!("model_reasoning_effort={effort}"));
        }
        args.push("-c".into());
        args.push(format!("model_reasoning_summary={}", config.reasoning_summary.as_str()));
        args.push("-c".into());
        args.push(format!("web_search={}", config.web_search.as_str()));
        for image in images {
            args.push("--image".into());
            args.push(image.display().to_string());
        }
    }
    args.extend(config.extra_args.iter().cloned());
    if config.backend == AgentBackend::Exec {
        args.push("-".into());
    }
    args
}

/// Adjust efforts that a model family is known to reject.
pub fn effective_effort(model: &str, effort: ReasoningEffort) -> ReasoningEffort {
    let model = model.to_ascii_lowercase();
    match effort {
        ReasoningEffort::Minimal | ReasoningEffort::None if model.contains("spark") => {
            ReasoningEffort::Low
        }
        ReasoningEffort::Minimal if model.contains("gpt-5.3-codex") => ReasoningEffort::None,
        other => other,
    }
}

async fn collect(
    child: &mut Child,
    prompt: String,
    limit: usize,
) -> Result<(ExitStatus, Vec<u8>, Vec<u8>), AgentError> {
    let stdin = child.stdin.take();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let write = async move {
        let Some(mut stdin) = stdin else {
            return Ok(());
        };
        match stdin.write_all(prompt.as_bytes()).await {
            // The agent may exit without reading its input.
            Err(error) if error.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
            Err(error) => Err(AgentError::Io(error)),
            Ok(()) => Ok(()),
        }
        // stdin drops here, closing the pipe.
    };

    let ((), stdout, stderr) =
        tokio::try_join!(write, read_capped(stdout, limit), read_tail(stderr, STDERR_TAIL_BYTES))?;
    let status = child.wait().await?;
    Ok((status, stdout, stderr))
}

/// Read to EOF, failing once more than `limit` bytes arrive.
async fn read_capped<R: AsyncRead + Unpin>(
    reader: Option<R>,
    limit: usize,
) -> Result<Vec<u8>, AgentError> {
    let Some(reader) = reader else {
        return Ok(Vec::new());
    };
    let mut buffer = Vec::new();
    reader.take(limit as u64 + 1).read_to_end(&mut buffer).await?;
    if buffer.len() > limit {
        return Err(AgentError::OutputTooLarge { limit });
    }
    Ok(buffer)
}

/// Drain to EOF, keeping only the last `keep` bytes.
async fn read_tail<R: AsyncRead + Unpin>(
    reader: Option<R>,
    keep: usize,
) -> Result<Vec<u8>, AgentError> {
    let Some(mut reader) = reader else {
        return Ok(Vec::new());
    };
    let mut tail = Vec::new();
    let mut chunk = vec![0_u8; READ_CHUNK_BYTES];
    loop {
        let read = reader.read(&mut chunk).await?;
        if read == 0 {
            return Ok(tail);
        }
        tail.extend_from_slice(&chunk[..read]);
        if tail.len() > keep {
            tail.drain(..tail.len() - keep);
        }
    }
}

async fn terminate(child: &mut Child) {
    if let Err(error) = child.kill().await {
        debug!(%error, "agent already exited before kill");
    }
}

fn failure_message(stderr: &[u8], stdout: &[u8]) -> String {
    let stderr = String::from_utf8_lossy(stderr);
    let stderr = stderr.trim();
    if !stderr.is_empty() {
        return stderr.to_string();
    }
    let stdout = String::from_utf8_lossy(stdout);
    let stdout = stdout.trim();
    if stdout.is_empty() {
        "agent produced no output".to_string()
    } else {
        stdout.to_string()
    }
}
