//! Node outputs and the rules for merging them into thread state
//!
//! Each node returns a `StatePatch`; only the driver applies it. Merge rules
//! per field:
//!
//! | field               | rule                                        |
//! |---------------------|---------------------------------------------|
//! | `system_prompt`     | appended first if no system message exists  |
//! | `messages`          | appended in order                           |
//! | `tool_calls`        | appended to `tool_call_log` in order        |
//! | `intent`            | overwritten when present                    |
//! | `confidence`        | overwritten when present, clamped to [0,1]  |
//! | `escalate`          | sets `should_escalate`, never clears it     |
//! | `customer_id`       | set once, never overwritten or cleared      |
//! | `current_ticket_id` | set or cleared explicitly                   |
//! | `context`           | merged key by key                           |

use super::state::{ConversationState, Intent, Message, ToolCallRecord};
use serde_json::{Map, Value};

/// Explicit change to the current ticket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TicketUpdate {
    Set(String),
    Clear,
}

/// Partial state produced by one node step
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatePatch {
    pub system_prompt: Option<Message>,
    pub messages: Vec<Message>,
    pub tool_calls: Vec<ToolCallRecord>,
    pub intent: Option<Intent>,
    pub confidence: Option<f64>,
    pub escalate: bool,
    pub customer_id: Option<String>,
    pub current_ticket_id: Option<TicketUpdate>,
    pub context: Map<String, Value>,
}

impl StatePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    pub fn with_messages(mut self, messages: impl IntoIterator<Item = Message>) -> Self {
        self.messages.extend(messages);
        self
    }

    pub fn with_tool_calls(mut self, records: impl IntoIterator<Item = ToolCallRecord>) -> Self {
        self.tool_calls.extend(records);
        self
    }

    pub fn with_intent(mut self, intent: Intent, confidence: f64) -> Self {
        self.intent = Some(intent);
        self.confidence = Some(confidence);
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn escalating(mut self) -> Self {
        self.escalate = true;
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl ConversationState {
    /// Merge a node's patch into this state
    pub fn apply(&mut self, patch: StatePatch) {
        let StatePatch {
            system_prompt,
            messages,
            tool_calls,
            intent,
            confidence,
            escalate,
            customer_id,
            current_ticket_id,
            context,
        } = patch;

        if let Some(system) = system_prompt {
            if !self.has_system_message() {
                self.messages.push(system);
            }
        }

        self.messages.extend(messages);
        self.tool_call_log.extend(tool_calls);

        if let Some(intent) = intent {
            self.intent = Some(intent);
        }
        if let Some(confidence) = confidence {
            self.confidence = confidence.clamp(0.0, 1.0);
        }
        if escalate {
            self.should_escalate = true;
        }
        if self.customer_id.is_none() {
            self.customer_id = customer_id;
        }
        match current_ticket_id {
            Some(TicketUpdate::Set(id)) => self.current_ticket_id = Some(id),
            Some(TicketUpdate::Clear) => self.current_ticket_id = None,
            None => {}
        }
        self.context.extend(context);
    }
}
