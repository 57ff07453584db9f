//! Prompt text seeded into every thread and used by the intent classifier

use crate::llm::ToolDefinition;
use crate::state_machine::Intent;
use std::fmt::Write;

/// Base system prompt establishing the agent's role
const BASE_PROMPT: &str = r"You are a professional customer support assistant. Be direct and helpful, and only greet the customer on the first message of a conversation.

Rules:
1. Always use tools to retrieve facts about orders, customers and tickets. Never guess or invent data.
2. The full conversation history is available to you. When the customer asks about earlier questions, answer from what they actually said.
3. When asked what you can do, describe the tools listed below.
4. After receiving tool results, give the customer a clear, concise summary.";

/// Per-intent guidance listed in the classifier prompt
const INTENT_GUIDE: &[(Intent, &str)] = &[
    (
        Intent::OrderInquiry,
        "questions about specific orders, shipping status, tracking, delivery",
    ),
    (
        Intent::Account,
        "customer account info, profile, login, registration",
    ),
    (
        Intent::TicketManagement,
        "creating, updating, or checking support tickets",
    ),
    (
        Intent::Billing,
        "payments, refunds, invoices, pricing questions",
    ),
    (
        Intent::TechnicalSupport,
        "product issues, troubleshooting, how-to questions",
    ),
    (
        Intent::General,
        "general questions, policies, FAQs, product information",
    ),
];

/// Build the thread's system prompt, listing the tools the agent can call
pub fn build_system_prompt(tools: &[ToolDefinition]) -> String {
    let mut prompt = BASE_PROMPT.to_string();
    if tools.is_empty() {
        return prompt;
    }

    prompt.push_str("\n\nAvailable tools:\n");
    for tool in tools {
        let summary = tool.description.lines().next().unwrap_or_default();
        let _ = writeln!(prompt, "- {}: {summary}", tool.name);
    }
    prompt
}

/// Single-shot classification prompt for the customer's latest message
pub fn classification_prompt(subject: &str) -> String {
    let mut prompt = format!(
        "Analyze this customer support message and classify its primary intent.\n\nMessage: \"{subject}\"\n\nIntent categories:\n"
    );
    for (intent, guide) in INTENT_GUIDE {
        let _ = writeln!(prompt, "- {intent}: {guide}");
    }
    prompt.push_str(
        "\nRules:\n\
         1. Choose the most specific category that fits\n\
         2. Messages mentioning order numbers (ORD-XXX) are usually order_inquiry\n\
         3. Questions about policies or procedures are usually general\n\
         4. Problem reports are usually technical_support or ticket_management\n\
         \nRespond with ONLY the category name, nothing else.",
    );
    prompt
}
