//! JSON-RPC client for the remote support-desk tool server
//!
//! Speaks the streamable-HTTP flavor of the model context protocol: every
//! call is a POST of one JSON-RPC message, the reply is either a JSON body
//! or an SSE stream whose `data:` lines carry the response.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

pub const DEFAULT_SERVER_URL: &str = "http://0.0.0.0:9000/mcp";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const PROTOCOL_VERSION: &str = "2024-11-05";
const SESSION_HEADER: &str = "mcp-session-id";

#[derive(Debug, Clone)]
pub struct McpConfig {
    pub server_url: String,
    pub request_timeout: Duration,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl McpConfig {
    pub fn from_env() -> Self {
        let timeout_secs = std::env::var("MCP_REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        Self {
            server_url: std::env::var("MCP_SERVER_URL")
                .unwrap_or_else(|_| DEFAULT_SERVER_URL.to_string()),
            request_timeout: Duration::from_secs(timeout_secs),
        }
    }
}

#[derive(Debug, Error)]
pub enum McpError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Tool server returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Malformed JSON-RPC response: {0}")]
    Protocol(String),
    #[error("JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
}

/// Text returned by one remote tool call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteToolResult {
    pub text: String,
    pub is_error: bool,
}

/// Anything that can run a named tool remotely
#[async_trait]
pub trait RemoteToolServer: Send + Sync {
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<RemoteToolResult, McpError>;
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
pub(super) struct JsonRpcResponse {
    #[serde(default)]
    pub(super) id: Option<Value>,
    #[serde(default)]
    pub(super) result: Option<Value>,
    #[serde(default)]
    pub(super) error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
pub(super) struct JsonRpcError {
    pub(super) code: i64,
    pub(super) message: String,
}

impl JsonRpcResponse {
    fn into_result(self) -> Result<Value, McpError> {
        if let Some(err) = self.error {
            return Err(McpError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        self.result
            .ok_or_else(|| McpError::Protocol("response has neither result nor error".into()))
    }
}

/// Session negotiated by `initialize`
#[derive(Debug, Clone, Default)]
struct Session {
    id: Option<String>,
}

pub struct McpClient {
    client: Client,
    server_url: String,
    session: Mutex<Option<Session>>,
    request_id: AtomicU64,
}

impl McpClient {
    pub fn new(config: &McpConfig) -> Result<Self, McpError> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self {
            client,
            server_url: config.server_url.clone(),
            session: Mutex::new(None),
            request_id: AtomicU64::new(1),
        })
    }

    fn next_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::SeqCst)
    }

    async fn post(
        &self,
        session: &Session,
        request: &JsonRpcRequest<'_>,
    ) -> Result<(Option<String>, String, bool), McpError> {
        let mut builder = self
            .client
            .post(&self.server_url)
            .header("Accept", "application/json, text/event-stream")
            .json(request);
        if let Some(id) = &session.id {
            builder = builder.header(SESSION_HEADER, id);
        }

        let response = builder.send().await?;
        let status = response.status();
        let session_id = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let is_sse = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));
        let body = response.text().await?;

        if !status.is_success() {
            return Err(McpError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok((session_id, body, is_sse))
    }

    async fn handshake(&self) -> Result<Session, McpError> {
        let id = self.next_id();
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: Some(id),
            method: "initialize",
            params: json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {
                    "name": env!("CARGO_PKG_NAME"),
                    "version": env!("CARGO_PKG_VERSION"),
                },
            }),
        };

        let (session_id, body, is_sse) = self.post(&Session::default(), &request).await?;
        let result = parse_rpc_body(&body, is_sse, id)?.into_result()?;
        let session = Session { id: session_id };

        tracing::info!(
            server = %self.server_url,
            protocol = negotiated_protocol(&result),
            session = session.id.as_deref().unwrap_or("-"),
            "Tool server session initialized"
        );

        let notification = JsonRpcRequest {
            jsonrpc: "2.0",
            id: None,
            method: "notifications/initialized",
            params: json!({}),
        };
        if let Err(e) = self.post(&session, &notification).await {
            tracing::debug!(error = %e, "initialized notification not acknowledged");
        }

        Ok(session)
    }

    async fn session(&self) -> Result<Session, McpError> {
        let mut guard = self.session.lock().await;
        if let Some(session) = guard.as_ref() {
            return Ok(session.clone());
        }
        let session = self.handshake().await?;
        *guard = Some(session.clone());
        Ok(session)
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, McpError> {
        let session = self.session().await?;
        let id = self.next_id();
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: Some(id),
            method,
            params: params.clone(),
        };

        match self.post(&session, &request).await {
            // Expired session: renegotiate once
            Err(McpError::Status { status: 404, .. }) if session.id.is_some() => {
                tracing::warn!(server = %self.server_url, "Tool server session expired, reconnecting");
                *self.session.lock().await = None;
                let session = self.session().await?;
                let id = self.next_id();
                let retry = JsonRpcRequest {
                    jsonrpc: "2.0",
                    id: Some(id),
                    method,
                    params,
                };
                let (_, body, is_sse) = self.post(&session, &retry).await?;
                parse_rpc_body(&body, is_sse, id)?.into_result()
            }
            Err(e) => Err(e),
            Ok((_, body, is_sse)) => parse_rpc_body(&body, is_sse, id)?.into_result(),
        }
    }
}

#[async_trait]
impl RemoteToolServer for McpClient {
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<RemoteToolResult, McpError> {
        let result = self
            .request("tools/call", json!({ "name": name, "arguments": arguments }))
            .await?;
        Ok(extract_tool_result(&result))
    }
}

/// Pull the JSON-RPC response with `id` out of a JSON or SSE body
pub(super) fn parse_rpc_body(body: &str, is_sse: bool, id: u64) -> Result<JsonRpcResponse, McpError> {
    if !is_sse {
        return serde_json::from_str(body)
            .map_err(|e| McpError::Protocol(format!("{e}: {body}")));
    }

    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .filter_map(|data| serde_json::from_str::<JsonRpcResponse>(data.trim()).ok())
        .find(|resp| resp.id.as_ref().and_then(Value::as_u64) == Some(id))
        .ok_or_else(|| McpError::Protocol(format!("no response for request {id} in event stream")))
}

/// Join the text parts of a `tools/call` result
/// Protocol version the server agreed to in its `initialize` result
fn negotiated_protocol(result: &Value) -> &str {
    result
        .get("protocolVersion")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
}

pub(super) fn extract_tool_result(result: &Value) -> RemoteToolResult {
    let is_error = result
        .get("isError")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let parts: Vec<&str> = result
        .get("content")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter(|item| item.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|item| item.get("text").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();

    let text = if parts.is_empty() {
        result
            .get("structuredContent")
            .map_or_else(|| result.to_string(), ToString::to_string)
    } else {
        parts.join("\n")
    };

    RemoteToolResult { text, is_error }
}
