//! Property-based tests for the chat-completions translation layer
//!
//! - Message translation never produces empty output
//! - Every tool result becomes its own role "tool" message, in order
//! - Tool calls with empty names are dropped from responses
//! - Text content survives the round through the wire types

use super::openai::{
    normalize_response, translate_message, OpenAIChoice, OpenAIFunctionCall, OpenAIMessage,
    OpenAIResponse, OpenAIToolCall,
};
use super::types::{ContentBlock, LlmMessage, MessageRole};
use proptest::prelude::*;

// ============================================================================
// Strategies
// ============================================================================

fn arb_text_block() -> impl Strategy<Value = ContentBlock> {
    "[a-zA-Z0-9 _.!?,]{1,100}".prop_map(|text| ContentBlock::Text { text })
}

fn arb_tool_use_block() -> impl Strategy<Value = ContentBlock> {
    ("[a-z0-9_]{5,20}", "[a-z_]{3,20}", "[A-Z]{3}-[0-9]{3}").prop_map(|(id, name, order)| {
        ContentBlock::ToolUse {
            id,
            name,
            input: serde_json::json!({ "order_number": order }),
        }
    })
}

fn arb_tool_result_block() -> impl Strategy<Value = ContentBlock> {
    ("[a-z0-9_]{5,20}", "[a-zA-Z0-9 _.!?,]{0,100}", any::<bool>()).prop_map(
        |(tool_use_id, content, is_error)| ContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        },
    )
}

fn arb_role() -> impl Strategy<Value = MessageRole> {
    prop_oneof![Just(MessageRole::User), Just(MessageRole::Assistant)]
}

fn arb_message() -> impl Strategy<Value = LlmMessage> {
    (
        arb_role(),
        proptest::collection::vec(
            prop_oneof![arb_text_block(), arb_tool_use_block(), arb_tool_result_block()],
            0..6,
        ),
    )
        .prop_map(|(role, content)| LlmMessage { role, content })
}

fn arb_tool_call() -> impl Strategy<Value = OpenAIToolCall> {
    ("[a-z0-9]{4,10}", "[a-z_]{0,12}").prop_map(|(id, name)| OpenAIToolCall {
        id,
        r#type: "function".to_string(),
        function: OpenAIFunctionCall {
            name,
            arguments: "{}".to_string(),
        },
    })
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn prop_translation_never_empty(msg in arb_message()) {
        prop_assert!(!translate_message(&msg).is_empty());
    }

    #[test]
    fn prop_tool_results_in_order(msg in arb_message()) {
        let expected: Vec<String> = msg
            .content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolResult { tool_use_id, .. } => Some(tool_use_id.clone()),
                _ => None,
            })
            .collect();
        let actual: Vec<String> = translate_message(&msg)
            .into_iter()
            .filter(|m| m.role == "tool")
            .filter_map(|m| m.tool_call_id)
            .collect();
        prop_assert_eq!(actual, expected);
    }

    #[test]
    fn prop_empty_tool_names_dropped(
        text in proptest::option::of("[a-z ]{1,30}"),
        calls in proptest::collection::vec(arb_tool_call(), 0..5),
    ) {
        let named = calls.iter().filter(|c| !c.function.name.is_empty()).count();
        let resp = OpenAIResponse {
            choices: vec![OpenAIChoice {
                message: OpenAIMessage {
                    role: "assistant".to_string(),
                    content: text.clone(),
                    tool_calls: Some(calls),
                    tool_call_id: None,
                },
                finish_reason: Some("tool_calls".to_string()),
            }],
            usage: None,
        };
        let normalized = normalize_response(resp).unwrap();
        prop_assert_eq!(normalized.tool_uses().len(), named);
        prop_assert_eq!(normalized.text(), text.unwrap_or_default());
    }
}
