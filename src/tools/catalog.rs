//! Support-desk tools backed by the remote tool server
//!
//! Each entry is a name, description and argument schema; running one
//! forwards the arguments to the server unchanged.

use super::mcp::RemoteToolServer;
use super::{Tool, ToolContext, ToolOutput};
use crate::state_machine::{TicketUpdate, ToolRequest};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

/// One remotely executed tool
pub struct RemoteTool {
    name: &'static str,
    description: &'static str,
    input_schema: Value,
    server: Arc<dyn RemoteToolServer>,
}

#[async_trait]
impl Tool for RemoteTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> String {
        self.description.to_string()
    }

    fn input_schema(&self) -> Value {
        self.input_schema.clone()
    }

    async fn run(&self, input: Value, ctx: ToolContext) -> ToolOutput {
        let call = self.server.call_tool(self.name, input);
        let result = tokio::select! {
            () = ctx.cancel.cancelled() => return ToolOutput::error("Tool call cancelled"),
            result = call => result,
        };

        match result {
            Ok(remote) if remote.is_error || remote.text.starts_with("Error:") => {
                ToolOutput::error(remote.text)
            }
            Ok(remote) => ToolOutput::success(remote.text),
            Err(e) => {
                tracing::warn!(
                    tool = %self.name,
                    thread_id = %ctx.thread_id,
                    error = %e,
                    "Remote tool call failed"
                );
                ToolOutput::error(format!("Error: {e}"))
            }
        }
    }
}

fn object(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// The eleven support-desk operations
pub fn support_desk_tools(server: &Arc<dyn RemoteToolServer>) -> Vec<RemoteTool> {
    let entry = |name, description, input_schema| RemoteTool {
        name,
        description,
        input_schema,
        server: Arc::clone(server),
    };

    vec![
        // Knowledge base
        entry(
            "search_knowledge_base_tool",
            "Search the knowledge base for articles relevant to the customer's question.",
            object(
                json!({
                    "query": {"type": "string", "description": "Search query or keywords"},
                    "category": {"type": "string", "description": "Optional category filter"}
                }),
                &["query"],
            ),
        ),
        entry(
            "get_knowledge_base_by_category_tool",
            "List every knowledge base article in a category.",
            object(
                json!({"category": {"type": "string", "description": "Article category"}}),
                &["category"],
            ),
        ),
        // Orders
        entry(
            "lookup_order_tool",
            "Look up order details by order number.",
            object(
                json!({
                    "order_number": {"type": "string", "description": "Order number, e.g. 'ORD-001'"},
                    "customer_id": {"type": "integer", "description": "Optional customer ID to verify ownership"}
                }),
                &["order_number"],
            ),
        ),
        entry(
            "get_order_status_tool",
            "Get the current status of an order.",
            object(
                json!({"order_number": {"type": "string", "description": "Order number to check"}}),
                &["order_number"],
            ),
        ),
        entry(
            "get_order_history_tool",
            "List all orders placed by a customer.",
            object(
                json!({"customer_id": {"type": "integer", "description": "Customer ID"}}),
                &["customer_id"],
            ),
        ),
        // Customers
        entry(
            "lookup_customer_tool",
            "Find a customer by email, phone number or customer ID.",
            object(
                json!({
                    "email": {"type": "string", "description": "Customer email address"},
                    "phone": {"type": "string", "description": "Customer phone number"},
                    "customer_id": {"type": "integer", "description": "Customer ID"}
                }),
                &[],
            ),
        ),
        entry(
            "get_customer_profile_tool",
            "Get a customer's full profile including order and ticket counts.",
            object(
                json!({"customer_id": {"type": "integer", "description": "Customer ID"}}),
                &["customer_id"],
            ),
        ),
        entry(
            "create_customer_tool",
            "Create a new customer account.",
            object(
                json!({
                    "name": {"type": "string", "description": "Full name"},
                    "email": {"type": "string", "description": "Email address"},
                    "phone": {"type": "string", "description": "Optional phone number"}
                }),
                &["name", "email"],
            ),
        ),
        // Tickets
        entry(
            "create_ticket_tool",
            "Open a support ticket for a customer.",
            object(
                json!({
                    "customer_id": {"type": "integer", "description": "Customer opening the ticket"},
                    "subject": {"type": "string", "description": "Short subject line"},
                    "description": {"type": "string", "description": "Detailed description of the issue"},
                    "priority": {
                        "type": "string",
                        "enum": ["low", "medium", "high", "urgent"],
                        "default": "medium"
                    },
                    "order_id": {"type": "integer", "description": "Related order ID, if any"}
                }),
                &["customer_id", "subject", "description"],
            ),
        ),
        entry(
            "update_ticket_tool",
            "Change a ticket's status or add notes.",
            object(
                json!({
                    "ticket_id": {"type": "integer", "description": "Ticket to update"},
                    "status": {
                        "type": "string",
                        "enum": ["open", "in_progress", "resolved", "closed"]
                    },
                    "notes": {"type": "string", "description": "Notes to append"}
                }),
                &["ticket_id"],
            ),
        ),
        entry(
            "get_ticket_tool",
            "Get a ticket's details and status.",
            object(
                json!({"ticket_id": {"type": "integer", "description": "Ticket ID"}}),
                &["ticket_id"],
            ),
        ),
    ]
}

// ============================================================================
// Record tracking
// ============================================================================

const CUSTOMER_TOOLS: [&str; 3] = [
    "lookup_customer_tool",
    "get_customer_profile_tool",
    "create_customer_tool",
];

/// Thread-level identifiers learned from one successful tool call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordUpdate {
    pub customer_id: Option<String>,
    pub ticket: Option<TicketUpdate>,
}

/// Value of the first line starting with `label`, e.g. `ID: 42`
fn labeled_value(output: &str, label: &str) -> Option<String> {
    output
        .lines()
        .find_map(|line| line.trim().strip_prefix(label))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn argument_id(arguments: &Value, key: &str) -> Option<String> {
    match arguments.get(key)? {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

/// Derive customer and ticket identifiers from a successful call
pub fn record_update(
    request: &ToolRequest,
    output: &str,
    current_ticket: Option<&str>,
) -> RecordUpdate {
    let mut update = RecordUpdate::default();
    let name = request.tool_name.as_str();

    if CUSTOMER_TOOLS.contains(&name) {
        update.customer_id = labeled_value(output, "ID:");
    }
    if update.customer_id.is_none() && name != "lookup_customer_tool" {
        update.customer_id = argument_id(&request.arguments, "customer_id");
    }

    match name {
        "create_ticket_tool" => {
            update.ticket = labeled_value(output, "Ticket ID:").map(TicketUpdate::Set);
        }
        "update_ticket_tool" => {
            let closes = request
                .arguments
                .get("status")
                .and_then(Value::as_str)
                .is_some_and(|s| matches!(s, "resolved" | "closed"));
            let ticket = argument_id(&request.arguments, "ticket_id");
            if closes && ticket.is_some() && ticket.as_deref() == current_ticket {
                update.ticket = Some(TicketUpdate::Clear);
            }
        }
        _ => {}
    }

    update
}
