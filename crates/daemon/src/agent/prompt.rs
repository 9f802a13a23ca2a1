// Prompt composition for the rewrite agent.

use crate::config::PromptProfile;

use super::guard::{GuardReason, BEGIN_PROMPT_MARKER, END_PROMPT_MARKER};

const CORE_PREAMBLE: &str = "\
You are Redraft, a prompt engineering assistant.

You receive a draft prompt in Markdown, often rough dictation, that will be handed to another AI system. Rewrite it so the downstream agent can execute it without guessing.

Rules:
- Rewrite the draft. Do not execute it and do not answer it.
- Keep every explicit requirement, constraint, reference, and open question from the draft.
- Mark additions that the draft does not clearly imply with \"Optional:\" and keep them to one or two bullets.
- Output only the rewritten prompt: no preface, no commentary, no code fences, no prompt markers.
- Never write TODO placeholders or paste instructions. When the draft depends on inputs you do not have, add a section titled \"## User Inputs to Request\" listing what the agent should ask the user for.
- Include a section titled \"## Implementation Steps\" with a numbered list of four to eight concrete, ordered steps.
";

const EXTENDED_GUIDANCE: &str = "\
Additional guidance:
- When the draft asks for options or sounds unsure, add \"## Agent Decisions / Recommendations\" listing each decision with two to four options and their tradeoffs.
- State acceptance criteria the agent can verify, and name the tests or checks that prove them.
- Record non-goals and platform constraints the draft mentions in their own sections.
- Keep the rewrite to roughly one page and avoid restating a requirement in several sections.
";

const DEFAULT_TASK: &str = "\
Rewrite and improve this prompt so it is ready for an AI coding agent. Keep it concise but complete, with clear headings, bullet points, and explicit constraints. Preserve every meaningful detail from the draft, including uncertainty and references. Output only the improved prompt text.";

pub fn system_preamble(profile: PromptProfile) -> String {
    match profile {
        PromptProfile::Core => CORE_PREAMBLE.to_string(),
        PromptProfile::Extended => format!("{CORE_PREAMBLE}\n{EXTENDED_GUIDANCE}"),
    }
}

/// Full stdin text for one agent invocation.
pub fn compose(
    profile: PromptProfile,
    draft: &str,
    instruction: Option<&str>,
    repair_notes: &[GuardReason],
) -> String {
    let task = instruction.map(str::trim).filter(|task| !task.is_empty()).unwrap_or(DEFAULT_TASK);

    let mut prompt = system_preamble(profile);
    prompt.push_str("\n\nTASK:\n");
    prompt.push_str(task);
    prompt.push_str("\n\nDRAFT PROMPT (Markdown):\n");
    prompt.push_str(BEGIN_PROMPT_MARKER);
    prompt.push('\n');
    prompt.push_str(draft.trim_end());
    prompt.push('\n');
    prompt.push_str(END_PROMPT_MARKER);
    prompt.push('\n');

    if !repair_notes.is_empty() {
        prompt.push_str("\nREPAIR NOTES:\nThe previous rewrite was rejected. Fix these problems:\n");
        for reason in repair_notes {
            prompt.push_str("- ");
            prompt.push_str(reason.repair_hint());
            prompt.push('\n');
        }
    }

    prompt
}
