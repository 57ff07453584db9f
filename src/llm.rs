//! LLM provider abstraction
//!
//! The agent talks to one model through an `OpenAI`-compatible gateway. The
//! `LlmService` trait keeps the runtime independent of that choice.

mod config;
mod error;
mod openai;
mod types;

#[cfg(test)]
mod proptests;

pub use config::LlmConfig;
pub use error::LlmError;
pub use openai::OpenAIService;
pub use types::*;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;

/// A model endpoint the runtime can ask for completions
#[async_trait]
pub trait LlmService: Send + Sync {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError>;

    fn model_id(&self) -> &str;
}

/// Wraps a service and records one structured event per call
pub struct LoggingService {
    inner: Arc<dyn LlmService>,
}

impl LoggingService {
    pub fn new(inner: Arc<dyn LlmService>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl LlmService for LoggingService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let started = Instant::now();
        let result = self.inner.complete(request).await;
        let elapsed_ms = started.elapsed().as_millis();

        match &result {
            Ok(response) => tracing::info!(
                model = %self.inner.model_id(),
                elapsed_ms,
                messages = request.messages.len(),
                tools_offered = request.tools.len(),
                tool_requests = response.tool_uses().len(),
                input_tokens = response.usage.input_tokens,
                output_tokens = response.usage.output_tokens,
                "Model call completed"
            ),
            Err(e) => tracing::warn!(
                model = %self.inner.model_id(),
                elapsed_ms,
                kind = ?e.kind,
                retryable = e.is_retryable(),
                error = %e,
                "Model call failed"
            ),
        }

        result
    }

    fn model_id(&self) -> &str {
        self.inner.model_id()
    }
}
