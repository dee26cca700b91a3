//! What one top-level request produced.

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

pub const NO_RESPONSE_MESSAGE: &str = "I couldn't generate a response.";
pub const BUDGET_EXCEEDED_MESSAGE: &str = "Maximum iterations reached without completing the query.";
pub const REASONING_FAILED_MESSAGE: &str =
    "I was unable to retrieve that information from the available data sources.";

/// How the loop reached `Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The reasoning component returned free text
    Answered,
    /// It returned neither text nor tool calls
    NoResponse,
    /// The iteration budget ran out while tools were still being proposed
    BudgetExceeded,
    /// The reasoning component itself failed
    ReasoningFailed,
}

impl Termination {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Answered => "answered",
            Self::NoResponse => "no_response",
            Self::BudgetExceeded => "budget_exceeded",
            Self::ReasoningFailed => "reasoning_failed",
        }
    }
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One executed (or rejected) tool invocation.
#[derive(Debug, Clone, Serialize)]
pub struct InvocationRecord {
    /// Round trip the invocation belonged to, starting at 1
    pub iteration: u32,
    /// Tool name as proposed by the reasoning component
    pub proposed: String,
    /// Resolved worker, when resolution succeeded
    pub worker: Option<String>,
    /// Resolved operation, when resolution succeeded
    pub operation: Option<String>,
    pub success: bool,
    /// The JSON recorded as the tool-result turn
    pub result: Value,
}

/// The caller-facing result of one request.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestrationOutcome {
    pub conversation_id: Uuid,
    pub answer: String,
    pub termination: Termination,
    /// Reasoning-component calls made
    pub iterations: u32,
    pub invocations: Vec<InvocationRecord>,
    /// Present when `termination` is `ReasoningFailed`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_error: Option<String>,
}
