//! Trait abstractions for runtime I/O
//!
//! These traits let the turn driver run against mock implementations.

use crate::db::Database;
use crate::llm::{LlmError, LlmRequest, LlmResponse, LlmService, ToolDefinition};
use crate::state_machine::ConversationState;
use crate::tools::{ToolContext, ToolOutput, ToolRegistry};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Thread-keyed persistence of conversation state
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Load a thread's state; `None` means the thread has no history yet
    async fn load(&self, thread_id: &str) -> Result<Option<ConversationState>, String>;

    /// Persist a thread's state
    async fn save(&self, thread_id: &str, state: &ConversationState) -> Result<(), String>;

    /// Overwrite the escalation flag of an existing thread
    async fn set_escalation(&self, thread_id: &str, should_escalate: bool) -> Result<(), String>;
}

/// Client for making LLM requests
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Complete an LLM request
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError>;

    /// Get the model ID
    fn model_id(&self) -> &str;
}

/// Executor for tools
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Execute a tool by name; `None` when the tool is unknown
    async fn execute(
        &self,
        name: &str,
        input: Value,
        ctx: ToolContext,
    ) -> Option<ToolOutput>;

    /// Get tool definitions for LLM
    fn definitions(&self) -> Vec<ToolDefinition>;
}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

#[async_trait]
impl<T: ConversationStore + ?Sized> ConversationStore for Arc<T> {
    async fn load(&self, thread_id: &str) -> Result<Option<ConversationState>, String> {
        (**self).load(thread_id).await
    }

    async fn save(&self, thread_id: &str, state: &ConversationState) -> Result<(), String> {
        (**self).save(thread_id, state).await
    }

    async fn set_escalation(&self, thread_id: &str, should_escalate: bool) -> Result<(), String> {
        (**self).set_escalation(thread_id, should_escalate).await
    }
}

#[async_trait]
impl<T: LlmClient + ?Sized> LlmClient for Arc<T> {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        (**self).complete(request).await
    }

    fn model_id(&self) -> &str {
        (**self).model_id()
    }
}

#[async_trait]
impl<T: ToolExecutor + ?Sized> ToolExecutor for Arc<T> {
    async fn execute(
        &self,
        name: &str,
        input: Value,
        ctx: ToolContext,
    ) -> Option<ToolOutput> {
        (**self).execute(name, input, ctx).await
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        (**self).definitions()
    }
}

// ============================================================================
// Production Adapters
// ============================================================================

/// Adapter to use Database as ConversationStore
#[derive(Clone)]
pub struct DatabaseStore {
    db: Database,
}

impl DatabaseStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn inner(&self) -> &Database {
        &self.db
    }
}

#[async_trait]
impl ConversationStore for DatabaseStore {
    async fn load(&self, thread_id: &str) -> Result<Option<ConversationState>, String> {
        self.db
            .load_thread(thread_id)
            .map(|record| record.map(|r| r.state))
            .map_err(|e| e.to_string())
    }

    async fn save(&self, thread_id: &str, state: &ConversationState) -> Result<(), String> {
        self.db
            .save_thread(thread_id, state)
            .map_err(|e| e.to_string())
    }

    async fn set_escalation(&self, thread_id: &str, should_escalate: bool) -> Result<(), String> {
        self.db
            .set_escalation(thread_id, should_escalate)
            .map_err(|e| e.to_string())
    }
}

/// Adapter to use an `LlmService` as LlmClient
pub struct ServiceLlmClient {
    service: Arc<dyn LlmService>,
}

impl ServiceLlmClient {
    pub fn new(service: Arc<dyn LlmService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl LlmClient for ServiceLlmClient {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.service.complete(request).await
    }

    fn model_id(&self) -> &str {
        self.service.model_id()
    }
}

/// Adapter to use ToolRegistry as ToolExecutor
pub struct ToolRegistryExecutor {
    registry: ToolRegistry,
}

impl ToolRegistryExecutor {
    pub fn new(registry: ToolRegistry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistryExecutor {
    async fn execute(
        &self,
        name: &str,
        input: Value,
        ctx: ToolContext,
    ) -> Option<ToolOutput> {
        self.registry.execute(name, input, ctx).await
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        self.registry.definitions()
    }
}
