// Draft pipeline: invoke → guard → bounded repair retries.

use std::future::Future;

use serde::Serialize;
use tracing::{info, warn};

use super::guard::{check, normalize, suggested_repair_effort, GuardReason, ReasoningEffort};
use super::invoker::{AgentError, AgentInvoker, AgentOutput, AgentRequest};

/// Guard-checked result of a draft request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDraftResult {
    /// Normalized output of the best attempt.
    pub output: String,
    pub reasons: Vec<GuardReason>,
    pub needs_repair: bool,
    /// Repairs performed after the first attempt.
    pub repair_attempts: u32,
    /// Effort used for the returned output.
    pub effort: Option<ReasoningEffort>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DraftPipeline {
    max_repair_attempts: u32,
}

impl DraftPipeline {
    pub fn new(max_repair_attempts: u32) -> Self {
        Self { max_repair_attempts }
    }

    pub async fn run(
        &self,
        invoker: &AgentInvoker,
        request: AgentRequest,
    ) -> Result<AgentDraftResult, AgentError> {
        self.run_with(request, |request| async move { invoker.draft(&request).await }).await
    }

    /// Retry loop over any invoke function. The first attempt's error is
    /// returned as-is; a failing repair attempt yields the best output so far.
    pub async fn run_with<F, Fut>(
        &self,
        mut request: AgentRequest,
        mut invoke: F,
    ) -> Result<AgentDraftResult, AgentError>
    where
        F: FnMut(AgentRequest) -> Fut,
        Fut: Future<Output = Result<AgentOutput, AgentError>>,
    {
        let mut best: Option<AgentDraftResult> = None;
        let mut warnings: Vec<String> = Vec::new();
        let mut repairs = 0;

        loop {
            let output = match invoke(request.clone()).await {
                Ok(output) => output,
                Err(error) => match best.take() {
                    Some(mut best) => {
                        warn!(%error, repairs, "repair attempt failed, keeping best output");
                        push_unique(&mut warnings, format!("repair attempt failed: {error}"));
                        best.repair_attempts = repairs;
                        best.warnings = warnings;
                        return Ok(best);
                    }
                    None => return Err(error),
                },
            };
            for warning in output.warnings {
                push_unique(&mut warnings, warning);
            }

            let verdict = check(&request.draft, &output.text);
            info!(
                attempt = repairs,
                needs_repair = verdict.needs_repair,
                reasons = ?verdict.reasons,
                "output guard verdict"
            );

            let candidate = AgentDraftResult {
                output: normalize(&output.text).trim().to_string(),
                reasons: verdict.reasons.clone(),
                needs_repair: verdict.needs_repair,
                repair_attempts: repairs,
                effort: request.effort,
                warnings: Vec::new(),
            };
            best = Some(match best {
                Some(current) if current.reasons.len() < candidate.reasons.len() => current,
                _ => candidate,
            });

            if !verdict.needs_repair || repairs >= self.max_repair_attempts {
                break;
            }
            repairs += 1;
            request.effort = suggested_repair_effort(request.effort);
            request.repair_notes = verdict.reasons;
        }

        let mut result = best.ok_or_else(|| {
            AgentError::Io(std::io::Error::other("draft pipeline produced no attempt"))
        })?;
        result.repair_attempts = repairs;
        result.warnings = warnings;
        Ok(result)
    }
}

fn push_unique(warnings: &mut Vec<String>, warning: String) {
    if !warnings.contains(&warning) {
        warnings.push(warning);
    }
}
