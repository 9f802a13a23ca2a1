// Rewrite agent: executable lookup, subprocess invocation, output guard, and
// the repair-retry pipeline that ties them together.

pub mod guard;
pub mod invoker;
pub mod pipeline;
pub mod prompt;
pub mod resolver;

pub use guard::{GuardReason, GuardVerdict, ReasoningEffort};
pub use invoker::{AgentError, AgentInvoker, AgentOutput, AgentRequest};
pub use pipeline::{AgentDraftResult, DraftPipeline};
pub use resolver::{CommandResolver, SearchPathResolver};
