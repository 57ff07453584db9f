//! Node bodies of the turn graph
//!
//! Each model-backed node is split in two: a builder producing the
//! `LlmRequest` from the thread state, and an interpreter turning the reply
//! into a `StatePatch`. The executor owns the I/O in between, so everything
//! here is synchronous and side-effect free.

use crate::llm::{
    ContentBlock, LlmMessage, LlmRequest, LlmResponse, MessageRole, SystemContent, ToolDefinition,
};
use crate::state_machine::state::{interpret_classification, synthesized_confidence};
use crate::state_machine::transition::ESCALATION_THRESHOLD;
use crate::state_machine::{
    ConversationState, Message, StatePatch, TicketUpdate, ToolCallRecord, ToolRequest,
};
use crate::system_prompt::{build_system_prompt, classification_prompt};
use crate::tools::{record_update, ToolOutput};
use serde_json::{Map, Value};

use super::ESCALATION_MESSAGE;

/// Output budget for the one-word classifier reply
const CLASSIFIER_MAX_TOKENS: u32 = 16;

/// Output budget for tool invocation and synthesis
const REPLY_MAX_TOKENS: u32 = 4096;

// ============================================================================
// Start
// ============================================================================

/// Seed the system prompt. Applying the patch to a thread that already has a
/// system message changes nothing.
pub(super) fn start(state: &ConversationState, tools: &[ToolDefinition]) -> StatePatch {
    if state.has_system_message() {
        return StatePatch::new();
    }
    StatePatch {
        system_prompt: Some(Message::system(build_system_prompt(tools))),
        ..StatePatch::new()
    }
}

// ============================================================================
// Intent classification
// ============================================================================

pub(super) fn classification_request(state: &ConversationState) -> LlmRequest {
    let subject = state.latest_human_text().unwrap_or_default();
    LlmRequest::new(vec![LlmMessage::user(classification_prompt(subject))])
        .with_max_tokens(CLASSIFIER_MAX_TOKENS)
        .with_temperature(0.0)
}

pub(super) fn classification_patch(response: &LlmResponse) -> StatePatch {
    let (intent, confidence) = interpret_classification(&response.text());
    StatePatch::new().with_intent(intent, confidence)
}

// ============================================================================
// Tool invocation
// ============================================================================

/// Request over the whole history with tools bound; `None` for an empty thread
pub(super) fn tool_invocation_request(
    state: &ConversationState,
    tools: Vec<ToolDefinition>,
) -> Option<LlmRequest> {
    if state.messages.is_empty() {
        return None;
    }
    Some(build_request(state.messages.iter(), tools))
}

/// Append the model's reply; requested tools also go to the audit log
pub(super) fn tool_invocation_patch(response: &LlmResponse) -> StatePatch {
    let reply = assistant_reply(response);
    let records: Vec<ToolCallRecord> = reply.tool_requests().iter().map(Into::into).collect();
    StatePatch::new()
        .with_message(reply)
        .with_tool_calls(records)
}

// ============================================================================
// Synthesis
// ============================================================================

/// Messages the synthesizer sees, in order.
///
/// Messages without content are dropped unless they belong to a tool
/// exchange; a request without its results (or the reverse) is rejected by
/// chat-completions providers.
fn synthesis_input(messages: &[Message]) -> impl Iterator<Item = &Message> {
    messages
        .iter()
        .filter(|m| !m.content().is_empty() || m.has_tool_requests() || m.is_tool_result())
}

pub(super) fn synthesis_request(
    state: &ConversationState,
    tools: Vec<ToolDefinition>,
) -> Option<LlmRequest> {
    if state.messages.is_empty() {
        return None;
    }
    Some(build_request(synthesis_input(&state.messages), tools))
}

pub(super) fn synthesis_patch(state: &ConversationState, response: &LlmResponse) -> StatePatch {
    let reply = assistant_reply(response);
    let confidence = synthesized_confidence(reply.content(), state.confidence);
    let records: Vec<ToolCallRecord> = reply.tool_requests().iter().map(Into::into).collect();
    StatePatch::new()
        .with_message(reply)
        .with_tool_calls(records)
        .with_confidence(confidence)
}

// ============================================================================
// Dispatch
// ============================================================================

/// One `ToolResult` per request, in request order, plus any customer or
/// ticket identifiers the successful calls revealed
pub(super) fn dispatch_patch(
    state: &ConversationState,
    results: Vec<(ToolRequest, ToolOutput)>,
) -> StatePatch {
    let mut patch = StatePatch::new();
    let mut ticket = state.current_ticket_id.clone();

    for (request, output) in results {
        if output.success {
            let update = record_update(&request, &output.output, ticket.as_deref());
            if patch.customer_id.is_none() {
                patch.customer_id = update.customer_id;
            }
            match update.ticket {
                Some(TicketUpdate::Set(id)) => {
                    ticket = Some(id.clone());
                    patch.current_ticket_id = Some(TicketUpdate::Set(id));
                }
                Some(TicketUpdate::Clear) => {
                    ticket = None;
                    patch.current_ticket_id = Some(TicketUpdate::Clear);
                }
                None => {}
            }
        }
        patch
            .messages
            .push(Message::tool_result(&request, output.output, !output.success));
    }

    patch
}

// ============================================================================
// Escalation
// ============================================================================

/// Why the turn was handed off, recorded under `context.escalation_reason`
fn escalation_reason(state: &ConversationState) -> &'static str {
    if state.should_escalate {
        "flagged"
    } else if state.confidence < ESCALATION_THRESHOLD {
        "low_confidence"
    } else {
        "tool_round_limit"
    }
}

/// Close any requests left without results, then hand off
pub(super) fn escalation_patch(state: &ConversationState) -> StatePatch {
    let mut context = Map::new();
    context.insert(
        "escalation_reason".to_string(),
        Value::from(escalation_reason(state)),
    );

    let closing = state.unanswered_tool_requests().into_iter().map(|request| {
        Message::tool_result(
            &request,
            "Error: not executed, conversation escalated to a human agent",
            true,
        )
    });
    StatePatch {
        context,
        ..StatePatch::new()
            .with_messages(closing)
            .with_message(Message::assistant(ESCALATION_MESSAGE))
            .escalating()
    }
}

// ============================================================================
// Request construction
// ============================================================================

/// Translate thread messages into a provider request.
///
/// System messages become the system prompt. Tool results travel as user
/// messages carrying a `ToolResult` block.
pub(super) fn build_request<'a>(
    messages: impl Iterator<Item = &'a Message>,
    tools: Vec<ToolDefinition>,
) -> LlmRequest {
    let mut system = Vec::new();
    let mut llm_messages = Vec::new();

    for msg in messages {
        match msg {
            Message::System { content } => system.push(SystemContent::new(content)),
            Message::Human { content } => llm_messages.push(LlmMessage::user(content)),
            Message::Assistant {
                content,
                tool_requests,
            } => {
                let mut blocks = Vec::with_capacity(tool_requests.len() + 1);
                if !content.is_empty() {
                    blocks.push(ContentBlock::text(content));
                }
                blocks.extend(tool_requests.iter().map(|r| {
                    ContentBlock::tool_use(&r.request_id, &r.tool_name, r.arguments.clone())
                }));
                llm_messages.push(LlmMessage::from_blocks(MessageRole::Assistant, blocks));
            }
            Message::ToolResult {
                request_id,
                content,
                is_error,
                ..
            } => llm_messages.push(LlmMessage::from_blocks(
                MessageRole::User,
                vec![ContentBlock::tool_result(request_id, content, *is_error)],
            )),
        }
    }

    LlmRequest::new(llm_messages)
        .with_system(system)
        .with_tools(tools)
        .with_max_tokens(REPLY_MAX_TOKENS)
}

/// The model's reply as an assistant message. Requests without an id get one
/// so their results can be matched.
fn assistant_reply(response: &LlmResponse) -> Message {
    let requests = response
        .tool_uses()
        .into_iter()
        .map(|call| {
            let request_id = if call.id.is_empty() {
                format!("call_{}", uuid::Uuid::new_v4().simple())
            } else {
                call.id.to_string()
            };
            ToolRequest::new(call.name, call.input.clone(), request_id)
        })
        .collect();
    Message::assistant_with_tools(response.text(), requests)
}
