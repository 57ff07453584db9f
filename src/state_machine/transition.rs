//! Pure routing functions
//!
//! Given a thread's state, decide which step runs next. Nothing here does
//! I/O; the driver in `runtime::executor` performs the node work and feeds
//! the updated state back in.

use super::state::{ConversationState, Message};
use thiserror::Error;

/// Below this confidence a turn is handed to a human
pub const ESCALATION_THRESHOLD: f64 = 0.3;

/// A node of the per-turn state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Start,
    Classify,
    CallTools,
    DispatchTools,
    Synthesize,
    Escalate,
    End,
}

impl Step {
    pub fn is_terminal(self) -> bool {
        matches!(self, Step::Escalate | Step::End)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Step::Start => "start",
            Step::Classify => "classify",
            Step::CallTools => "call_tools",
            Step::DispatchTools => "dispatch_tools",
            Step::Synthesize => "synthesize",
            Step::Escalate => "escalate",
            Step::End => "end",
        }
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decision produced by a router
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    InvokeTools,
    Synthesize,
    Escalate,
    End,
}

impl Route {
    fn into_step(self) -> Step {
        match self {
            Route::InvokeTools => Step::DispatchTools,
            Route::Synthesize => Step::Synthesize,
            Route::Escalate => Step::Escalate,
            Route::End => Step::End,
        }
    }
}

/// Per-turn loop accounting consulted by `next_step`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnBudget {
    pub tool_rounds: u32,
    pub max_tool_rounds: u32,
}

impl TurnBudget {
    pub fn new(max_tool_rounds: u32) -> Self {
        Self {
            tool_rounds: 0,
            max_tool_rounds,
        }
    }

    pub fn exhausted(&self) -> bool {
        self.tool_rounds >= self.max_tool_rounds
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Invalid transition: {0} is terminal")]
    FromTerminal(Step),
}

/// Whether tool results exist that no later plain assistant message answers.
///
/// Finds the most recent assistant message carrying tool requests, collects
/// the `ToolResult` messages after it, and reports `true` only when no plain
/// assistant message follows the last of those results.
pub fn has_unsynthesized_tool_results(messages: &[Message]) -> bool {
    let Some(request_idx) = messages.iter().rposition(Message::has_tool_requests) else {
        return false;
    };
    let after_request = &messages[request_idx + 1..];
    let Some(last_result) = after_request.iter().rposition(Message::is_tool_result) else {
        return false;
    };
    !after_request[last_result + 1..]
        .iter()
        .any(Message::is_plain_assistant)
}

/// Router run after the tool-invocation node and after each dispatch round
pub fn route_after_call_tools(state: &ConversationState) -> Route {
    let Some(last) = state.last_message() else {
        return Route::End;
    };

    if state.should_escalate {
        return Route::Escalate;
    }
    if last.has_tool_requests() {
        return Route::InvokeTools;
    }
    if state.confidence < ESCALATION_THRESHOLD {
        return Route::Escalate;
    }
    if last.is_plain_assistant() && !last.content().is_empty() {
        if has_unsynthesized_tool_results(&state.messages) {
            return Route::Synthesize;
        }
        return Route::End;
    }
    Route::Synthesize
}

/// Router run after the synthesizer
pub fn route_after_synthesis(state: &ConversationState) -> Route {
    let Some(last) = state.last_message() else {
        return Route::End;
    };

    if state.should_escalate {
        return Route::Escalate;
    }
    if last.has_tool_requests() {
        return Route::InvokeTools;
    }
    if state.confidence < ESCALATION_THRESHOLD {
        return Route::Escalate;
    }
    Route::End
}

/// Compute the step that follows `current`.
///
/// Dispatch re-enters the post-call-tools router. A request to invoke tools
/// once the budget is spent becomes an escalation.
pub fn next_step(
    current: Step,
    state: &ConversationState,
    budget: &TurnBudget,
) -> Result<Step, TransitionError> {
    let route = match current {
        Step::Start => return Ok(Step::Classify),
        Step::Classify => return Ok(Step::CallTools),
        Step::CallTools | Step::DispatchTools => route_after_call_tools(state),
        Step::Synthesize => route_after_synthesis(state),
        Step::Escalate | Step::End => return Err(TransitionError::FromTerminal(current)),
    };

    if route == Route::InvokeTools && budget.exhausted() {
        return Ok(Step::Escalate);
    }
    Ok(route.into_step())
}
