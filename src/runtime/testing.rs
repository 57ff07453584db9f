//! Mock implementations for testing
//!
//! These mocks enable turn-level testing without real I/O.

use super::traits::*;
use crate::llm::{ContentBlock, LlmError, LlmRequest, LlmResponse, ToolDefinition, Usage};
use crate::state_machine::ConversationState;
use crate::tools::{ToolContext, ToolOutput};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

// ============================================================================
// Response helpers
// ============================================================================

/// A reply carrying only text
pub fn text_response(text: &str) -> LlmResponse {
    LlmResponse {
        content: vec![ContentBlock::text(text)],
        end_turn: true,
        usage: Usage::default(),
    }
}

/// A reply requesting the given `(id, tool, arguments)` calls
pub fn tool_use_response(calls: &[(&str, &str, Value)]) -> LlmResponse {
    LlmResponse {
        content: calls
            .iter()
            .map(|(id, name, input)| ContentBlock::tool_use(*id, *name, input.clone()))
            .collect(),
        end_turn: false,
        usage: Usage::default(),
    }
}

// ============================================================================
// Mock LLM Client
// ============================================================================

/// Mock LLM client that returns queued responses
pub struct MockLlmClient {
    responses: Mutex<VecDeque<Result<LlmResponse, LlmError>>>,
    model_id: String,
    /// Record of all requests made
    pub requests: Mutex<Vec<LlmRequest>>,
}

impl MockLlmClient {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            model_id: model_id.into(),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a successful response
    pub fn queue_response(&self, response: LlmResponse) {
        self.responses.lock().unwrap().push_back(Ok(response));
    }

    /// Queue an error response
    pub fn queue_error(&self, error: LlmError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    /// Get recorded requests
    pub fn recorded_requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next_response(&self) -> Result<LlmResponse, LlmError> {
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::network("No mock response queued")))
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        self.next_response()
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

// ============================================================================
// Delayed Mock LLM Client (for cancellation and timeout testing)
// ============================================================================

/// Mock LLM client that sleeps before answering
pub struct DelayedMockLlmClient {
    inner: MockLlmClient,
    delay: Duration,
    /// Notified when a request starts (for test synchronization)
    pub request_started: Arc<Notify>,
}

impl DelayedMockLlmClient {
    pub fn new(model_id: impl Into<String>, delay: Duration) -> Self {
        Self {
            inner: MockLlmClient::new(model_id),
            delay,
            request_started: Arc::new(Notify::new()),
        }
    }

    pub fn queue_response(&self, response: LlmResponse) {
        self.inner.queue_response(response);
    }

    pub fn recorded_requests(&self) -> Vec<LlmRequest> {
        self.inner.recorded_requests()
    }
}

#[async_trait]
impl LlmClient for DelayedMockLlmClient {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.inner.requests.lock().unwrap().push(request.clone());
        self.request_started.notify_one();
        tokio::time::sleep(self.delay).await;
        self.inner.next_response()
    }

    fn model_id(&self) -> &str {
        self.inner.model_id()
    }
}

// ============================================================================
// Mock Tool Executor
// ============================================================================

/// Mock tool executor with predefined outputs
pub struct MockToolExecutor {
    outputs: HashMap<String, ToolOutput>,
    delays: HashMap<String, Duration>,
    definitions: Vec<ToolDefinition>,
    /// Record of tool executions, in start order
    pub executions: Mutex<Vec<(String, Value)>>,
    /// Notified when an execution starts
    pub execution_started: Arc<Notify>,
}

impl MockToolExecutor {
    pub fn new() -> Self {
        Self {
            outputs: HashMap::new(),
            delays: HashMap::new(),
            definitions: Vec::new(),
            executions: Mutex::new(Vec::new()),
            execution_started: Arc::new(Notify::new()),
        }
    }

    /// Add a tool with a predefined output
    pub fn with_tool(mut self, name: impl Into<String>, output: ToolOutput) -> Self {
        let name = name.into();
        self.definitions.push(ToolDefinition {
            name: name.clone(),
            description: format!("Mock {name}"),
            input_schema: serde_json::json!({ "type": "object", "properties": {} }),
        });
        self.outputs.insert(name, output);
        self
    }

    /// Add a tool that answers only after `delay`, unless the turn is cancelled
    pub fn with_slow_tool(
        self,
        name: impl Into<String>,
        output: ToolOutput,
        delay: Duration,
    ) -> Self {
        let name = name.into();
        let mut executor = self.with_tool(name.clone(), output);
        executor.delays.insert(name, delay);
        executor
    }

    /// Get recorded executions
    pub fn recorded_executions(&self) -> Vec<(String, Value)> {
        self.executions.lock().unwrap().clone()
    }
}

impl Default for MockToolExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolExecutor for MockToolExecutor {
    async fn execute(&self, name: &str, input: Value, ctx: ToolContext) -> Option<ToolOutput> {
        self.executions
            .lock()
            .unwrap()
            .push((name.to_string(), input));
        self.execution_started.notify_one();

        if let Some(delay) = self.delays.get(name) {
            tokio::select! {
                () = tokio::time::sleep(*delay) => {}
                () = ctx.cancel.cancelled() => {
                    return Some(ToolOutput::error("Error: cancelled"));
                }
            }
        }
        self.outputs.get(name).cloned()
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        self.definitions.clone()
    }
}

// ============================================================================
// In-Memory Store
// ============================================================================

/// In-memory thread store for testing
#[derive(Default)]
pub struct InMemoryStore {
    threads: Mutex<HashMap<String, ConversationState>>,
    /// Number of successful saves, per thread
    pub saves: Mutex<HashMap<String, usize>>,
    fail_saves: Mutex<bool>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a thread, as if an earlier turn had saved it
    pub fn insert(&self, thread_id: &str, state: ConversationState) {
        self.threads
            .lock()
            .unwrap()
            .insert(thread_id.to_string(), state);
    }

    pub fn get(&self, thread_id: &str) -> Option<ConversationState> {
        self.threads.lock().unwrap().get(thread_id).cloned()
    }

    pub fn save_count(&self, thread_id: &str) -> usize {
        self.saves
            .lock()
            .unwrap()
            .get(thread_id)
            .copied()
            .unwrap_or_default()
    }

    /// Make every later save fail
    pub fn fail_saves(&self) {
        *self.fail_saves.lock().unwrap() = true;
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn load(&self, thread_id: &str) -> Result<Option<ConversationState>, String> {
        Ok(self.get(thread_id))
    }

    async fn save(&self, thread_id: &str, state: &ConversationState) -> Result<(), String> {
        if *self.fail_saves.lock().unwrap() {
            return Err("disk full".to_string());
        }
        let mut threads = self.threads.lock().unwrap();
        if let Some(stored) = threads.get(thread_id) {
            if !state.messages.starts_with(&stored.messages)
                || !state.tool_call_log.starts_with(&stored.tool_call_log)
            {
                return Err(format!("history of {thread_id} would be rewritten"));
            }
        }
        threads.insert(thread_id.to_string(), state.clone());
        *self
            .saves
            .lock()
            .unwrap()
            .entry(thread_id.to_string())
            .or_default() += 1;
        Ok(())
    }

    async fn set_escalation(&self, thread_id: &str, should_escalate: bool) -> Result<(), String> {
        let mut threads = self.threads.lock().unwrap();
        let state = threads
            .get_mut(thread_id)
            .ok_or_else(|| format!("thread not found: {thread_id}"))?;
        state.should_escalate = should_escalate;
        Ok(())
    }
}
