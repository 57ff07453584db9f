//! API request and response types

use crate::state_machine::{Intent, ToolCallRecord};
use serde::{Deserialize, Serialize};

fn default_thread_id() -> String {
    "default".to_string()
}

/// Customer reference as sent by clients, either a number or a string
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CustomerRef {
    Number(i64),
    Text(String),
}

impl CustomerRef {
    pub fn into_id(self) -> Option<String> {
        match self {
            CustomerRef::Number(n) => Some(n.to_string()),
            CustomerRef::Text(s) => {
                let trimmed = s.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
        }
    }
}

/// Request to send a message to a persistent thread
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default = "default_thread_id")]
    pub thread_id: String,
    #[serde(default)]
    pub customer_id: Option<CustomerRef>,
}

/// Response for a completed chat turn
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub response: String,
    pub thread_id: String,
    pub tool_calls: Vec<ToolCallRecord>,
    pub intent: Option<Intent>,
    pub confidence: f64,
    pub escalated: bool,
}

/// Request for a one-off answer
#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub message: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub customer_id: Option<CustomerRef>,
}

/// Response for a one-off answer
#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub response: String,
    pub thread_id: String,
}

/// Health check body
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
}

/// Service description returned from `/`
#[derive(Debug, Serialize)]
pub struct ServiceInfo {
    pub message: &'static str,
    pub version: &'static str,
    pub model: String,
    pub endpoints: Vec<EndpointInfo>,
}

#[derive(Debug, Serialize)]
pub struct EndpointInfo {
    pub path: &'static str,
    pub method: &'static str,
    pub description: &'static str,
}

/// Simple success response
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_request_defaults() {
        let req: ChatRequest = serde_json::from_str(r#"{"message": "hi"}"#).unwrap();
        assert_eq!(req.thread_id, "default");
        assert!(req.customer_id.is_none());
    }

    #[test]
    fn test_customer_ref_forms() {
        let req: ChatRequest =
            serde_json::from_str(r#"{"message": "hi", "customer_id": 42}"#).unwrap();
        assert_eq!(req.customer_id.and_then(CustomerRef::into_id).as_deref(), Some("42"));

        let req: ChatRequest =
            serde_json::from_str(r#"{"message": "hi", "customer_id": " 7 "}"#).unwrap();
        assert_eq!(req.customer_id.and_then(CustomerRef::into_id).as_deref(), Some("7"));

        let req: ChatRequest =
            serde_json::from_str(r#"{"message": "hi", "customer_id": ""}"#).unwrap();
        assert!(req.customer_id.and_then(CustomerRef::into_id).is_none());
    }
}
