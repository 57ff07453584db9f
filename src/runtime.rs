//! Turn driver for support conversations
//!
//! A turn appends the user's message to the thread, then walks the step
//! graph from `state_machine::next_step` until it reaches `End` or
//! `Escalate`. Each node returns a `StatePatch`; the driver applies it and
//! persists the thread before choosing the next step.

mod executor;
mod locks;
mod nodes;
mod recovery;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use executor::ConversationRuntime;
pub use traits::*;

use crate::llm::LlmError;
use crate::state_machine::{Intent, Step, ToolCallRecord, TransitionError};
use std::time::Duration;
use thiserror::Error;

/// Type alias for production runtime with concrete implementations
pub type ProductionRuntime =
    ConversationRuntime<DatabaseStore, ServiceLlmClient, ToolRegistryExecutor>;

/// Returned instead of an empty final answer
pub const NO_RESPONSE_APOLOGY: &str =
    "I apologize, but I couldn't generate a response. Please try again.";

/// Fixed hand-off appended by the escalation node
pub const ESCALATION_MESSAGE: &str = "I understand this is a complex issue. Let me connect you with a human support agent who can provide more specialized assistance. Your ticket has been created and you'll receive an email confirmation shortly.";

// ============================================================================
// Configuration
// ============================================================================

const DEFAULT_MAX_TOOL_ROUNDS: u32 = 8;
const DEFAULT_LLM_TIMEOUT_SECS: u64 = 120;
const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 60;
const DEFAULT_LLM_MAX_ATTEMPTS: u32 = 3;

/// Limits applied to every turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Dispatch rounds allowed per turn before the driver escalates
    pub max_tool_rounds: u32,
    pub llm_timeout: Duration,
    pub tool_timeout: Duration,
    /// Attempts per model call, counting the first
    pub llm_max_attempts: u32,
    /// Delay before the first retry; doubled for each further attempt
    pub retry_base_delay: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            llm_timeout: Duration::from_secs(DEFAULT_LLM_TIMEOUT_SECS),
            tool_timeout: Duration::from_secs(DEFAULT_TOOL_TIMEOUT_SECS),
            llm_max_attempts: DEFAULT_LLM_MAX_ATTEMPTS,
            retry_base_delay: Duration::from_millis(500),
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source; unparseable values keep the default
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            max_tool_rounds: parse_or(
                &lookup,
                "SUPPORT_AGENT_MAX_TOOL_ROUNDS",
                defaults.max_tool_rounds,
            ),
            llm_timeout: Duration::from_secs(parse_or(
                &lookup,
                "SUPPORT_AGENT_LLM_TIMEOUT_SECS",
                DEFAULT_LLM_TIMEOUT_SECS,
            )),
            tool_timeout: Duration::from_secs(parse_or(
                &lookup,
                "SUPPORT_AGENT_TOOL_TIMEOUT_SECS",
                DEFAULT_TOOL_TIMEOUT_SECS,
            )),
            llm_max_attempts: parse_or(
                &lookup,
                "SUPPORT_AGENT_LLM_MAX_ATTEMPTS",
                defaults.llm_max_attempts,
            )
            .max(1),
            retry_base_delay: defaults.retry_base_delay,
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, var: &str, default: T) -> T
where
    T: std::str::FromStr + Copy + std::fmt::Display,
{
    let Some(raw) = lookup(var) else {
        return default;
    };
    if let Ok(value) = raw.trim().parse() {
        value
    } else {
        tracing::warn!(var, value = %raw, default = %default, "Ignoring unparseable setting");
        default
    }
}

// ============================================================================
// Turn inputs and outputs
// ============================================================================

/// One user message addressed to a thread
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub thread_id: String,
    pub message: String,
    /// Known customer, applied only if the thread has none yet
    pub customer_id: Option<String>,
}

impl TurnRequest {
    pub fn new(thread_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            message: message.into(),
            customer_id: None,
        }
    }

    pub fn with_customer(mut self, customer_id: Option<String>) -> Self {
        self.customer_id = customer_id;
        self
    }
}

/// What a completed turn reports to its caller
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub final_assistant_text: String,
    pub intent: Option<Intent>,
    pub confidence: f64,
    /// The whole thread's tool-call log, not only this turn's
    pub tool_call_log: Vec<ToolCallRecord>,
    pub should_escalate: bool,
}

/// Why a turn stopped before reaching a terminal step
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("model call failed in {node}: {source}")]
    Model {
        node: Step,
        #[source]
        source: LlmError,
    },

    #[error("model call in {node} timed out after {after:?}")]
    Timeout { node: Step, after: Duration },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("turn cancelled")]
    Cancelled,

    #[error(transparent)]
    Transition(#[from] TransitionError),
}
