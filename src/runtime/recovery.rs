//! Repair of threads left mid-dispatch
//!
//! A turn abandoned after the model requested tools (cancelled, timed out,
//! or the process died) leaves an assistant message whose requests have no
//! results. Providers reject such a history, so before the next human message
//! is appended every pending request is closed with an error result.

use crate::state_machine::{ConversationState, Message, StatePatch};

/// Content of the synthetic result closing an interrupted request
pub const INTERRUPTED_TOOL_MESSAGE: &str = "Tool execution interrupted before completion";

/// Result of inspecting a loaded thread
#[derive(Debug, Clone, PartialEq)]
pub struct RepairDecision {
    /// Messages to append before the new turn starts
    pub patch: StatePatch,
    /// Reason for the decision (for debugging)
    pub reason: RepairReason,
}

/// Why we made a particular repair decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairReason {
    /// Thread has no messages yet
    EmptyThread,
    /// Every request of the last assistant message has a result
    Consistent,
    /// Last assistant message has requests without results
    InterruptedDispatch { pending: usize },
}

impl RepairDecision {
    fn clean(reason: RepairReason) -> Self {
        Self {
            patch: StatePatch::new(),
            reason,
        }
    }

    pub fn needs_repair(&self) -> bool {
        matches!(self.reason, RepairReason::InterruptedDispatch { .. })
    }
}

/// Decide which error results, if any, must be appended to `state`
pub fn repair_orphans(state: &ConversationState) -> RepairDecision {
    if state.messages.is_empty() {
        return RepairDecision::clean(RepairReason::EmptyThread);
    }

    let pending = state.unanswered_tool_requests();
    if pending.is_empty() {
        return RepairDecision::clean(RepairReason::Consistent);
    }

    let closing = pending
        .iter()
        .map(|request| Message::tool_result(request, INTERRUPTED_TOOL_MESSAGE, true));
    RepairDecision {
        patch: StatePatch::new().with_messages(closing),
        reason: RepairReason::InterruptedDispatch {
            pending: pending.len(),
        },
    }
}
