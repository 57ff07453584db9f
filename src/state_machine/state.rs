//! Conversation state types

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Confidence assigned to a thread before any classification runs
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

// ============================================================================
// Intent
// ============================================================================

/// Coarse category assigned to the latest user message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    OrderInquiry,
    Account,
    TicketManagement,
    Billing,
    TechnicalSupport,
    General,
}

impl Intent {
    pub const ALL: [Intent; 6] = [
        Intent::OrderInquiry,
        Intent::Account,
        Intent::TicketManagement,
        Intent::Billing,
        Intent::TechnicalSupport,
        Intent::General,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Intent::OrderInquiry => "order_inquiry",
            Intent::Account => "account",
            Intent::TicketManagement => "ticket_management",
            Intent::Billing => "billing",
            Intent::TechnicalSupport => "technical_support",
            Intent::General => "general",
        }
    }

    /// Parse a model reply. Only an exact label (after trim + lowercase) matches.
    pub fn parse(raw: &str) -> Option<Self> {
        let label = raw.trim().to_lowercase();
        Self::ALL.into_iter().find(|intent| intent.as_str() == label)
    }
}

/// Confidence after the classifier recognized a label
pub const CLASSIFIED_CONFIDENCE: f64 = 0.9;

/// Ceiling applied when a synthesized answer admits uncertainty
pub const UNCERTAIN_CONFIDENCE_CAP: f64 = 0.4;

const UNCERTAINTY_MARKERS: [&str; 4] = ["i don't know", "i don\u{2019}t know", "i do not know", "not sure"];

/// Map a classifier reply to `(intent, confidence)`; unrecognized output is `general` at 0.5
pub fn interpret_classification(reply: &str) -> (Intent, f64) {
    match Intent::parse(reply) {
        Some(intent) => (intent, CLASSIFIED_CONFIDENCE),
        None => (Intent::General, DEFAULT_CONFIDENCE),
    }
}

/// Confidence carried past the synthesizer
pub fn synthesized_confidence(reply: &str, incoming: f64) -> f64 {
    let lowered = reply.to_lowercase();
    if UNCERTAINTY_MARKERS.iter().any(|m| lowered.contains(m)) {
        incoming.min(UNCERTAIN_CONFIDENCE_CAP)
    } else {
        incoming
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Messages
// ============================================================================

/// A model-issued instruction to invoke a named tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    pub tool_name: String,
    pub arguments: Value,
    pub request_id: String,
}

impl ToolRequest {
    pub fn new(
        tool_name: impl Into<String>,
        arguments: Value,
        request_id: impl Into<String>,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments,
            request_id: request_id.into(),
        }
    }
}

/// Audit entry for one tool request, kept apart from the message history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool_name: String,
    pub arguments: Value,
    pub request_id: String,
}

impl From<&ToolRequest> for ToolCallRecord {
    fn from(request: &ToolRequest) -> Self {
        Self {
            tool_name: request.tool_name.clone(),
            arguments: request.arguments.clone(),
            request_id: request.request_id.clone(),
        }
    }
}

/// One entry of a thread's history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    System {
        content: String,
    },
    Human {
        content: String,
    },
    Assistant {
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_requests: Vec<ToolRequest>,
    },
    ToolResult {
        request_id: String,
        tool_name: String,
        content: String,
        is_error: bool,
    },
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message::System {
            content: content.into(),
        }
    }

    pub fn human(content: impl Into<String>) -> Self {
        Message::Human {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Message::Assistant {
            content: content.into(),
            tool_requests: Vec::new(),
        }
    }

    pub fn assistant_with_tools(content: impl Into<String>, tool_requests: Vec<ToolRequest>) -> Self {
        Message::Assistant {
            content: content.into(),
            tool_requests,
        }
    }

    pub fn tool_result(request: &ToolRequest, content: impl Into<String>, is_error: bool) -> Self {
        Message::ToolResult {
            request_id: request.request_id.clone(),
            tool_name: request.tool_name.clone(),
            content: content.into(),
            is_error,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Message::System { content }
            | Message::Human { content }
            | Message::Assistant { content, .. }
            | Message::ToolResult { content, .. } => content,
        }
    }

    /// Tool requests carried by an assistant message (empty for every other role)
    pub fn tool_requests(&self) -> &[ToolRequest] {
        match self {
            Message::Assistant { tool_requests, .. } => tool_requests,
            _ => &[],
        }
    }

    pub fn has_tool_requests(&self) -> bool {
        !self.tool_requests().is_empty()
    }

    pub fn is_system(&self) -> bool {
        matches!(self, Message::System { .. })
    }

    pub fn is_tool_result(&self) -> bool {
        matches!(self, Message::ToolResult { .. })
    }

    /// Assistant message with no tool requests
    pub fn is_plain_assistant(&self) -> bool {
        matches!(self, Message::Assistant { tool_requests, .. } if tool_requests.is_empty())
    }

    pub fn role(&self) -> &'static str {
        match self {
            Message::System { .. } => "system",
            Message::Human { .. } => "human",
            Message::Assistant { .. } => "assistant",
            Message::ToolResult { .. } => "tool_result",
        }
    }
}

// ============================================================================
// Conversation State
// ============================================================================

/// Per-thread state, persisted between turns.
///
/// Every field has a default so a state decoded from an older or partial
/// record is always complete; the Start step only has to ensure the system
/// message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationState {
    pub messages: Vec<Message>,
    pub customer_id: Option<String>,
    pub current_ticket_id: Option<String>,
    pub tool_call_log: Vec<ToolCallRecord>,
    pub context: Map<String, Value>,
    pub intent: Option<Intent>,
    pub confidence: f64,
    pub should_escalate: bool,
}

impl Default for ConversationState {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            customer_id: None,
            current_ticket_id: None,
            tool_call_log: Vec::new(),
            context: Map::new(),
            intent: None,
            confidence: DEFAULT_CONFIDENCE,
            should_escalate: false,
        }
    }
}

impl ConversationState {
    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Content of the most recent human message, scanning backward
    pub fn latest_human_text(&self) -> Option<&str> {
        self.messages.iter().rev().find_map(|m| match m {
            Message::Human { content } => Some(content.as_str()),
            _ => None,
        })
    }

    pub fn has_system_message(&self) -> bool {
        self.messages.iter().any(Message::is_system)
    }

    /// Tool requests of the last message that have no `ToolResult` yet.
    ///
    /// Only the trailing assistant message is considered: results always
    /// follow their request message directly.
    pub fn unanswered_tool_requests(&self) -> Vec<ToolRequest> {
        let Some(idx) = self
            .messages
            .iter()
            .rposition(|m| matches!(m, Message::Assistant { .. }))
        else {
            return Vec::new();
        };

        let answered: Vec<&str> = self.messages[idx + 1..]
            .iter()
            .filter_map(|m| match m {
                Message::ToolResult { request_id, .. } => Some(request_id.as_str()),
                _ => None,
            })
            .collect();

        // A human message after the request means the turn moved on
        if self.messages[idx + 1..]
            .iter()
            .any(|m| matches!(m, Message::Human { .. }))
        {
            return Vec::new();
        }

        self.messages[idx]
            .tool_requests()
            .iter()
            .filter(|r| !answered.contains(&r.request_id.as_str()))
            .cloned()
            .collect()
    }
}
