//! HTTP request handlers

use super::types::{
    ChatRequest, ChatResponse, CustomerRef, EndpointInfo, ErrorResponse, GenerateRequest,
    GenerateResponse, HealthResponse, ServiceInfo, SuccessResponse,
};
use super::AppState;
use crate::db::ThreadRecord;
use crate::runtime::{TurnError, TurnOutcome, TurnRequest};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(service_info))
        .route("/health", get(health))
        // Multi-turn conversation on a named thread
        .route("/chat", post(chat))
        // One-off answer on a fresh thread
        .route("/generate", post(generate))
        // Thread inspection and administration
        .route("/threads/:id", get(get_thread))
        .route("/threads/:id/clear-escalation", post(clear_escalation))
        .with_state(state)
}

// ============================================================
// Service Info
// ============================================================

async fn service_info(State(state): State<AppState>) -> Json<ServiceInfo> {
    Json(ServiceInfo {
        message: "Customer Support Agent API",
        version: env!("CARGO_PKG_VERSION"),
        model: state.runtime.model_id().to_string(),
        endpoints: vec![
            EndpointInfo {
                path: "/chat",
                method: "POST",
                description: "Chat with the agent (maintains conversation state)",
            },
            EndpointInfo {
                path: "/generate",
                method: "POST",
                description: "Generate a single response on a new thread",
            },
            EndpointInfo {
                path: "/threads/:id",
                method: "GET",
                description: "Inspect a thread's persisted state",
            },
            EndpointInfo {
                path: "/threads/:id/clear-escalation",
                method: "POST",
                description: "Return an escalated thread to the agent",
            },
            EndpointInfo {
                path: "/health",
                method: "GET",
                description: "Health check",
            },
        ],
    })
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "customer-support-agent",
    })
}

// ============================================================
// Turns
// ============================================================

async fn chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    let thread_id = if req.thread_id.trim().is_empty() {
        "default".to_string()
    } else {
        req.thread_id
    };
    tracing::info!(
        thread_id = %thread_id,
        message_len = req.message.len(),
        "Chat request received"
    );

    let request = TurnRequest::new(thread_id.clone(), validated_message(req.message)?)
        .with_customer(req.customer_id.and_then(CustomerRef::into_id));
    let outcome = run_turn(&state, request).await?;

    Ok(Json(ChatResponse {
        response: outcome.final_assistant_text,
        thread_id,
        tool_calls: outcome.tool_call_log,
        intent: outcome.intent,
        confidence: outcome.confidence,
        escalated: outcome.should_escalate,
    }))
}

async fn generate(
    State(state): State<AppState>,
    Json(req): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, AppError> {
    let thread_id = req
        .thread_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    tracing::info!(thread_id = %thread_id, "Generate request received");

    let request = TurnRequest::new(thread_id.clone(), validated_message(req.message)?)
        .with_customer(req.customer_id.and_then(CustomerRef::into_id));
    let outcome = run_turn(&state, request).await?;

    Ok(Json(GenerateResponse {
        response: outcome.final_assistant_text,
        thread_id,
    }))
}

fn validated_message(message: String) -> Result<String, AppError> {
    if message.trim().is_empty() {
        return Err(AppError::BadRequest("Message cannot be empty".to_string()));
    }
    Ok(message)
}

/// Run a turn on its own task. If the client goes away this handler is
/// dropped, which cancels the turn at its next suspension point.
async fn run_turn(state: &AppState, request: TurnRequest) -> Result<TurnOutcome, AppError> {
    let cancel = CancellationToken::new();
    let _disconnect = cancel.clone().drop_guard();

    let runtime = Arc::clone(&state.runtime);
    let turn = tokio::spawn(async move { runtime.process_turn_with_cancel(request, cancel).await });

    let outcome = turn
        .await
        .map_err(|e| AppError::Internal(format!("Turn task failed: {e}")))??;
    Ok(outcome)
}

// ============================================================
// Threads
// ============================================================

async fn get_thread(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ThreadRecord>, AppError> {
    let record = state
        .runtime
        .store()
        .inner()
        .load_thread(&id)
        .map_err(|e| AppError::Internal(e.to_string()))?;

    record
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Thread not found: {id}")))
}

async fn clear_escalation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse>, AppError> {
    if state.runtime.clear_escalation(&id).await? {
        Ok(Json(SuccessResponse { success: true }))
    } else {
        Err(AppError::NotFound(format!("Thread not found: {id}")))
    }
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
enum AppError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
    /// The model backend failed
    BadGateway(String),
    /// The model backend did not answer in time
    GatewayTimeout(String),
}

impl From<TurnError> for AppError {
    fn from(err: TurnError) -> Self {
        let message = err.to_string();
        match err {
            TurnError::Model { .. } => AppError::BadGateway(message),
            TurnError::Timeout { .. } => AppError::GatewayTimeout(message),
            TurnError::Storage(_) | TurnError::Cancelled | TurnError::Transition(_) => {
                AppError::Internal(message)
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            AppError::GatewayTimeout(msg) => (StatusCode::GATEWAY_TIMEOUT, msg),
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::llm::{ContentBlock, LlmError, LlmRequest, LlmResponse, LlmService, Usage};
    use crate::runtime::{
        ConversationRuntime, DatabaseStore, RuntimeConfig, ServiceLlmClient, ToolRegistryExecutor,
    };
    use crate::tools::ToolRegistry;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tower::ServiceExt;

    /// Model backend answering from a script
    struct ScriptedService {
        replies: Mutex<VecDeque<Result<String, LlmError>>>,
    }

    #[async_trait]
    impl LlmService for ScriptedService {
        async fn complete(&self, _request: &LlmRequest) -> Result<LlmResponse, LlmError> {
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(LlmError::invalid_request("script exhausted")))?;
            Ok(LlmResponse {
                content: vec![ContentBlock::text(reply)],
                end_turn: true,
                usage: Usage::default(),
            })
        }

        fn model_id(&self) -> &'static str {
            "scripted"
        }
    }

    fn app(replies: Vec<Result<&str, LlmError>>) -> Router {
        let service = ScriptedService {
            replies: Mutex::new(
                replies
                    .into_iter()
                    .map(|r| r.map(str::to_string))
                    .collect(),
            ),
        };
        let runtime = ConversationRuntime::new(
            DatabaseStore::new(Database::open_in_memory().unwrap()),
            ServiceLlmClient::new(Arc::new(service)),
            ToolRegistryExecutor::new(ToolRegistry::new(vec![])),
            RuntimeConfig {
                llm_max_attempts: 1,
                ..RuntimeConfig::default()
            },
        );
        create_router(AppState::new(runtime))
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body.map_or_else(Body::empty, |b| Body::from(b.to_string())))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_health() {
        let app = app(vec![]);
        let (status, body) = send(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({"status": "healthy", "service": "customer-support-agent"})
        );
    }

    #[tokio::test]
    async fn test_service_info_lists_endpoints() {
        let app = app(vec![]);
        let (status, body) = send(&app, "GET", "/", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["model"], "scripted");
        assert!(body["endpoints"].as_array().unwrap().len() >= 4);
    }

    #[tokio::test]
    async fn test_chat_turn_and_thread_inspection() {
        let app = app(vec![Ok("general"), Ok("Hello! How can I help?")]);
        let (status, body) = send(
            &app,
            "POST",
            "/chat",
            Some(json!({"message": "Hello", "thread_id": "t-1", "customer_id": 5})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["response"], "Hello! How can I help?");
        assert_eq!(body["thread_id"], "t-1");
        assert_eq!(body["intent"], "general");
        assert_eq!(body["escalated"], false);
        assert_eq!(body["tool_calls"], json!([]));

        let (status, thread) = send(&app, "GET", "/threads/t-1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(thread["state"]["customer_id"], "5");
        let roles: Vec<&str> = thread["state"]["messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["role"].as_str().unwrap())
            .collect();
        assert_eq!(roles, vec!["system", "human", "assistant"]);
    }

    #[tokio::test]
    async fn test_chat_defaults_thread() {
        let app = app(vec![Ok("general"), Ok("Hi")]);
        let (status, body) = send(&app, "POST", "/chat", Some(json!({"message": "Hi"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["thread_id"], "default");
    }

    #[tokio::test]
    async fn test_empty_message_rejected() {
        let app = app(vec![]);
        let (status, body) = send(&app, "POST", "/chat", Some(json!({"message": "  "}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Message cannot be empty");
    }

    #[tokio::test]
    async fn test_generate_uses_fresh_thread() {
        let app = app(vec![Ok("general"), Ok("Returns take 30 days.")]);
        let (status, body) = send(
            &app,
            "POST",
            "/generate",
            Some(json!({"message": "What is the return policy?"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["response"], "Returns take 30 days.");
        let thread_id = body["thread_id"].as_str().unwrap();
        assert!(uuid::Uuid::parse_str(thread_id).is_ok());
    }

    #[tokio::test]
    async fn test_generate_records_customer() {
        let app = app(vec![Ok("account"), Ok("Your account is active.")]);
        let (status, body) = send(
            &app,
            "POST",
            "/generate",
            Some(json!({"message": "Is my account active?", "thread_id": "g-1", "customer_id": 12})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["thread_id"], "g-1");

        let (status, thread) = send(&app, "GET", "/threads/g-1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(thread["state"]["customer_id"], "12");
    }

    #[tokio::test]
    async fn test_model_failure_is_bad_gateway() {
        let app = app(vec![Err(LlmError::auth("invalid key"))]);
        let (status, body) = send(&app, "POST", "/chat", Some(json!({"message": "Hi"}))).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body["error"].as_str().unwrap().contains("invalid key"));
    }

    #[tokio::test]
    async fn test_unknown_thread_not_found() {
        let app = app(vec![]);
        let (status, _) = send(&app, "GET", "/threads/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, "POST", "/threads/nope/clear-escalation", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_clear_escalation() {
        let app = app(vec![Ok("general"), Ok("Hi")]);
        send(&app, "POST", "/chat", Some(json!({"message": "Hi", "thread_id": "t-2"}))).await;

        let (status, body) = send(&app, "POST", "/threads/t-2/clear-escalation", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"success": true}));
    }
}
