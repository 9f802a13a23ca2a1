// Output guard: independent quality heuristics over agent output.
//
// Each rule is a name plus a predicate. Rules never depend on each other, so
// any subset may fire for a single output.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub const BEGIN_PROMPT_MARKER: &str = "<BEGIN_PROMPT>";
pub const END_PROMPT_MARKER: &str = "<END_PROMPT>";
pub const CANONICAL_STEPS_HEADING: &str = "## Implementation Steps";

/// Leading characters of a draft that must not reappear in the output.
const ECHO_PREFIX_CHARS: usize = 220;
const MIN_NUMBERED_STEPS: usize = 2;

const PREAMBLE_LEAK: &str = "you are redraft, a prompt engineering assistant";
const SCAFFOLDING_PHRASES: &[&str] =
    &["draft prompt to rewrite", "rewriting rules", "output requirements", "draft_prompt:"];
const INPUTS_NEEDED_TITLES: &[&str] = &["inputs needed", "inputs required", "needed inputs"];
const PLACEHOLDER_PHRASES: &[&str] = &["[todo:", "todo: paste", "todo: attach", "todo: upload"];
const STEPS_HEADING_ALIASES: &[&str] = &[
    "actionable task",
    "actionable tasks",
    "steps",
    "execution steps",
    "implementation plan",
    "implementation task",
    "implementation tasks",
    "task steps",
    "task plan",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardReason {
    LeakedSystemPreamble,
    RewriterScaffolding,
    PromptMarkers,
    EchoesDraft,
    InputsNeededHeading,
    PastePlaceholders,
    MissingImplementationSteps,
}

impl GuardReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LeakedSystemPreamble => "leaked_system_preamble",
            Self::RewriterScaffolding => "rewriter_scaffolding",
            Self::PromptMarkers => "prompt_markers",
            Self::EchoesDraft => "echoes_draft",
            Self::InputsNeededHeading => "inputs_needed_heading",
            Self::PastePlaceholders => "paste_placeholders",
            Self::MissingImplementationSteps => "missing_implementation_steps",
        }
    }

    /// One-line instruction handed back to the agent on a repair attempt.
    pub fn repair_hint(self) -> &'static str {
        match self {
            Self::LeakedSystemPreamble => "Do not repeat the system instructions in the output.",
            Self::RewriterScaffolding => {
                "Output only the rewritten prompt, not the rewriting instructions or their section names."
            }
            Self::PromptMarkers => "Remove the <BEGIN_PROMPT>/<END_PROMPT> markers.",
            Self::EchoesDraft => "Rewrite the draft instead of copying it verbatim.",
            Self::InputsNeededHeading => {
                "Use the heading \"## User Inputs to Request\" instead of an \"Inputs Needed\" section."
            }
            Self::PastePlaceholders => {
                "Replace TODO paste/attach placeholders with instructions for the agent to ask the user."
            }
            Self::MissingImplementationSteps => {
                "Include a \"## Implementation Steps\" section with a numbered list of concrete steps."
            }
        }
    }
}

impl fmt::Display for GuardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verdict for one agent output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardVerdict {
    pub needs_repair: bool,
    pub reasons: Vec<GuardReason>,
}

/// Pre-computed views of a draft/output pair shared by every rule.
struct GuardInput<'a> {
    raw_lower: String,
    normalized: &'a str,
    normalized_lower: String,
    draft_collapsed: String,
    output_collapsed: String,
}

struct Rule {
    reason: GuardReason,
    fires: fn(&GuardInput<'_>) -> bool,
}

const RULES: &[Rule] = &[
    Rule { reason: GuardReason::LeakedSystemPreamble, fires: leaked_preamble },
    Rule { reason: GuardReason::RewriterScaffolding, fires: rewriter_scaffolding },
    Rule { reason: GuardReason::PromptMarkers, fires: prompt_markers },
    Rule { reason: GuardReason::EchoesDraft, fires: echoes_draft },
    Rule { reason: GuardReason::InputsNeededHeading, fires: inputs_needed_heading },
    Rule { reason: GuardReason::PastePlaceholders, fires: paste_placeholders },
    Rule { reason: GuardReason::MissingImplementationSteps, fires: missing_steps },
];

/// Evaluate every rule against `output` produced for `draft`.
pub fn check(draft: &str, output: &str) -> GuardVerdict {
    let normalized = normalize(output);
    let normalized = normalized.trim();
    let input = GuardInput {
        raw_lower: output.to_lowercase(),
        normalized,
        normalized_lower: normalized.to_lowercase(),
        draft_collapsed: collapse_whitespace(draft),
        output_collapsed: collapse_whitespace(normalized),
    };

    let reasons: Vec<GuardReason> =
        RULES.iter().filter(|rule| (rule.fires)(&input)).map(|rule| rule.reason).collect();
    GuardVerdict { needs_repair: !reasons.is_empty(), reasons }
}

/// Retitle step-like headings to the canonical implementation-steps heading.
/// Body lines pass through untouched.
pub fn normalize(output: &str) -> String {
    output
        .lines()
        .map(|line| match heading_title(line) {
            Some(title) if STEPS_HEADING_ALIASES.contains(&title.as_str()) => {
                CANONICAL_STEPS_HEADING
            }
            _ => line,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rules ──────────────────────────────────────────────────────────

fn leaked_preamble(input: &GuardInput<'_>) -> bool {
    input.normalized_lower.contains(PREAMBLE_LEAK)
}

fn rewriter_scaffolding(input: &GuardInput<'_>) -> bool {
    SCAFFOLDING_PHRASES.iter().any(|phrase| input.normalized_lower.contains(phrase))
}

fn prompt_markers(input: &GuardInput<'_>) -> bool {
    let lower_begin = BEGIN_PROMPT_MARKER.to_lowercase();
    let lower_end = END_PROMPT_MARKER.to_lowercase();
    input.raw_lower.contains(&lower_begin) || input.raw_lower.contains(&lower_end)
}

fn echoes_draft(input: &GuardInput<'_>) -> bool {
    if input.draft_collapsed.is_empty() {
        return false;
    }
    if input.output_collapsed == input.draft_collapsed {
        return true;
    }
    match input.draft_collapsed.char_indices().nth(ECHO_PREFIX_CHARS) {
        Some((end, _)) => input.output_collapsed.contains(&input.draft_collapsed[..end]),
        None if input.draft_collapsed.chars().count() == ECHO_PREFIX_CHARS => {
            input.output_collapsed.contains(input.draft_collapsed.as_str())
        }
        None => false,
    }
}

fn inputs_needed_heading(input: &GuardInput<'_>) -> bool {
    input.normalized.lines().filter_map(heading_title).any(|title| {
        INPUTS_NEEDED_TITLES.iter().any(|forbidden| title.contains(forbidden))
    })
}

fn paste_placeholders(input: &GuardInput<'_>) -> bool {
    PLACEHOLDER_PHRASES.iter().any(|phrase| input.normalized_lower.contains(phrase))
}

fn missing_steps(input: &GuardInput<'_>) -> bool {
    let mut in_steps = false;
    let mut count = 0;
    for line in input.normalized.lines() {
        if let Some(title) = heading_title(line) {
            in_steps = title == "implementation steps";
            continue;
        }
        if in_steps && is_numbered_item(line) {
            count += 1;
            if count >= MIN_NUMBERED_STEPS {
                return false;
            }
        }
    }
    true
}

// ── Text helpers ───────────────────────────────────────────────────

/// Lowercased title of a Markdown ATX heading line.
fn heading_title(line: &str) -> Option<String> {
    let trimmed = line.trim();
    let title = trimmed.strip_prefix('#')?.trim_start_matches('#').trim();
    Some(title.to_lowercase())
}

/// `1. text`: digits, a period, then whitespace.
fn is_numbered_item(line: &str) -> bool {
    let trimmed = line.trim();
    let digits = trimmed.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return false;
    }
    let mut rest = trimmed[digits..].chars();
    rest.next() == Some('.') && rest.next().is_some_and(char::is_whitespace)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ── Reasoning effort ───────────────────────────────────────────────

/// Reasoning effort requested from the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    None,
    Minimal,
    Low,
    Medium,
    High,
    Xhigh,
}

impl ReasoningEffort {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Minimal => "minimal",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Xhigh => "xhigh",
        }
    }

    /// Position on the repair ladder; `minimal` shares a rung with `low`.
    fn rung(self) -> Self {
        match self {
            Self::Minimal => Self::Low,
            other => other,
        }
    }
}

impl fmt::Display for ReasoningEffort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown reasoning effort `{0}`")]
pub struct UnknownEffort(pub String);

impl FromStr for ReasoningEffort {
    type Err = UnknownEffort;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "minimal" => Ok(Self::Minimal),
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "xhigh" => Ok(Self::Xhigh),
            _ => Err(UnknownEffort(value.to_string())),
        }
    }
}

/// Next rung on `none → low → medium → high → xhigh`, saturating at `xhigh`.
/// No known effort means no escalation.
pub fn suggested_repair_effort(current: Option<ReasoningEffort>) -> Option<ReasoningEffort> {
    let next = match current?.rung() {
        ReasoningEffort::None => ReasoningEffort::Low,
        ReasoningEffort::Minimal | ReasoningEffort::Low => ReasoningEffort::Medium,
        ReasoningEffort::Medium => ReasoningEffort::High,
        ReasoningEffort::High | ReasoningEffort::Xhigh => ReasoningEffort::Xhigh,
    };
    Some(next)
}
