//! Conversation turn executor

use super::locks::ThreadLocks;
use super::traits::{ConversationStore, LlmClient, ToolExecutor};
use super::{nodes, recovery};
use super::{RuntimeConfig, TurnError, TurnOutcome, TurnRequest, NO_RESPONSE_APOLOGY};

use crate::llm::{LlmRequest, LlmResponse};
use crate::state_machine::{
    next_step, ConversationState, Message, StatePatch, Step, ToolRequest, TurnBudget,
};
use crate::tools::{ToolContext, ToolOutput};
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Generic turn driver that can work with any store, LLM, and tool implementations
pub struct ConversationRuntime<S, L, T>
where
    S: ConversationStore,
    L: LlmClient,
    T: ToolExecutor,
{
    store: S,
    llm_client: Arc<L>,
    tool_executor: Arc<T>,
    config: RuntimeConfig,
    locks: ThreadLocks,
}

impl<S, L, T> ConversationRuntime<S, L, T>
where
    S: ConversationStore,
    L: LlmClient,
    T: ToolExecutor,
{
    pub fn new(store: S, llm_client: L, tool_executor: T, config: RuntimeConfig) -> Self {
        Self {
            store,
            llm_client: Arc::new(llm_client),
            tool_executor: Arc::new(tool_executor),
            config,
            locks: ThreadLocks::default(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn model_id(&self) -> &str {
        self.llm_client.model_id()
    }

    /// Run one user turn to completion
    pub async fn process_turn(
        &self,
        thread_id: &str,
        text: &str,
    ) -> Result<TurnOutcome, TurnError> {
        self.process_turn_with_cancel(TurnRequest::new(thread_id, text), CancellationToken::new())
            .await
    }

    /// Run one user turn, abandoning it when `cancel` fires.
    ///
    /// State saved after the last completed step stays persisted; nothing is
    /// rolled back.
    pub async fn process_turn_with_cancel(
        &self,
        request: TurnRequest,
        cancel: CancellationToken,
    ) -> Result<TurnOutcome, TurnError> {
        let TurnRequest {
            thread_id,
            message,
            customer_id,
        } = request;

        let _guard = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(TurnError::Cancelled),
            guard = self.locks.acquire(&thread_id) => guard,
        };

        let mut state = self
            .store
            .load(&thread_id)
            .await
            .map_err(TurnError::Storage)?
            .unwrap_or_default();

        let repair = recovery::repair_orphans(&state);
        if repair.needs_repair() {
            tracing::warn!(
                thread_id = %thread_id,
                reason = ?repair.reason,
                "Closing tool requests left by an interrupted turn"
            );
            state.apply(repair.patch);
        }

        // A new thread's system prompt precedes its first human message
        let seed = nodes::start(&state, &self.tool_executor.definitions());
        let turn_start = state.messages.len();
        state.apply(StatePatch {
            customer_id,
            ..seed.with_message(Message::human(message))
        });
        self.save(&thread_id, &state).await?;

        tracing::info!(
            thread_id = %thread_id,
            history = state.messages.len(),
            "Processing turn"
        );

        if let Err(e) = self.drive(&thread_id, &mut state, Step::Start, &cancel).await {
            tracing::error!(thread_id = %thread_id, error = %e, "Turn failed");
            return Err(e);
        }

        Ok(outcome(&state, turn_start))
    }

    /// Reset a thread's escalation flag; `false` when the thread does not exist
    pub async fn clear_escalation(&self, thread_id: &str) -> Result<bool, TurnError> {
        let _guard = self.locks.acquire(thread_id).await;
        let exists = self
            .store
            .load(thread_id)
            .await
            .map_err(TurnError::Storage)?
            .is_some();
        if !exists {
            return Ok(false);
        }
        self.store
            .set_escalation(thread_id, false)
            .await
            .map_err(TurnError::Storage)?;
        tracing::info!(thread_id = %thread_id, "Escalation cleared");
        Ok(true)
    }

    /// Load a thread's persisted state
    pub async fn load_thread(&self, thread_id: &str) -> Result<Option<ConversationState>, TurnError> {
        self.store.load(thread_id).await.map_err(TurnError::Storage)
    }

    /// Walk the step graph from `step` until a terminal step has run
    async fn drive(
        &self,
        thread_id: &str,
        state: &mut ConversationState,
        mut step: Step,
        cancel: &CancellationToken,
    ) -> Result<(), TurnError> {
        let mut budget = TurnBudget::new(self.config.max_tool_rounds);

        loop {
            if cancel.is_cancelled() {
                return Err(TurnError::Cancelled);
            }

            tracing::debug!(thread_id = %thread_id, node = %step, "Running node");
            let patch = self.run_node(step, thread_id, state, cancel).await?;
            if !patch.is_empty() {
                state.apply(patch);
                self.save(thread_id, state).await?;
            }

            if step.is_terminal() {
                return Ok(());
            }
            if step == Step::DispatchTools {
                budget.tool_rounds += 1;
            }

            let next = next_step(step, state, &budget)?;
            tracing::info!(
                thread_id = %thread_id,
                from = %step,
                to = %next,
                confidence = state.confidence,
                tool_rounds = budget.tool_rounds,
                "Routed"
            );
            step = next;
        }
    }

    async fn run_node(
        &self,
        step: Step,
        thread_id: &str,
        state: &ConversationState,
        cancel: &CancellationToken,
    ) -> Result<StatePatch, TurnError> {
        match step {
            Step::Start => Ok(nodes::start(state, &self.tool_executor.definitions())),

            Step::Classify => {
                let request = nodes::classification_request(state);
                let response = self.call_model(step, &request, cancel).await?;
                Ok(nodes::classification_patch(&response))
            }

            Step::CallTools => {
                let Some(request) =
                    nodes::tool_invocation_request(state, self.tool_executor.definitions())
                else {
                    tracing::warn!(thread_id = %thread_id, "Tool invocation with empty history");
                    return Ok(StatePatch::new());
                };
                let response = self.call_model(step, &request, cancel).await?;
                Ok(nodes::tool_invocation_patch(&response))
            }

            Step::DispatchTools => {
                let requests = state
                    .last_message()
                    .map(|m| m.tool_requests().to_vec())
                    .unwrap_or_default();
                let results = self.dispatch(thread_id, requests, cancel).await?;
                Ok(nodes::dispatch_patch(state, results))
            }

            Step::Synthesize => {
                let Some(request) =
                    nodes::synthesis_request(state, self.tool_executor.definitions())
                else {
                    tracing::warn!(thread_id = %thread_id, "Synthesis with empty history");
                    return Ok(StatePatch::new());
                };
                let response = self.call_model(step, &request, cancel).await?;
                Ok(nodes::synthesis_patch(state, &response))
            }

            Step::Escalate => {
                tracing::info!(thread_id = %thread_id, "Escalating to a human agent");
                Ok(nodes::escalation_patch(state))
            }

            Step::End => Ok(StatePatch::new()),
        }
    }

    /// One model call with timeout, cancellation and retry of transient failures
    async fn call_model(
        &self,
        node: Step,
        request: &LlmRequest,
        cancel: &CancellationToken,
    ) -> Result<LlmResponse, TurnError> {
        let mut attempt = 1;
        loop {
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(TurnError::Cancelled),
                r = tokio::time::timeout(self.config.llm_timeout, self.llm_client.complete(request)) => r,
            };

            let (retryable, retry_after, error) = match result {
                Ok(Ok(response)) => return Ok(response),
                Ok(Err(e)) => (
                    e.is_retryable(),
                    e.retry_after,
                    TurnError::Model { node, source: e },
                ),
                Err(_) => (
                    true,
                    None,
                    TurnError::Timeout {
                        node,
                        after: self.config.llm_timeout,
                    },
                ),
            };

            if !retryable || attempt >= self.config.llm_max_attempts {
                return Err(error);
            }

            let delay =
                retry_after.unwrap_or_else(|| backoff(self.config.retry_base_delay, attempt));
            tracing::warn!(
                node = %node,
                attempt,
                delay_ms = %delay.as_millis(),
                error = %error,
                "Retrying model call"
            );
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(TurnError::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    /// Run every request concurrently; outputs come back in request order
    async fn dispatch(
        &self,
        thread_id: &str,
        requests: Vec<ToolRequest>,
        cancel: &CancellationToken,
    ) -> Result<Vec<(ToolRequest, ToolOutput)>, TurnError> {
        let calls = requests.iter().map(|request| {
            let ctx = ToolContext::new(cancel.child_token(), thread_id.to_string());
            self.run_tool(request, ctx)
        });

        let outputs = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(TurnError::Cancelled),
            outputs = join_all(calls) => outputs,
        };

        Ok(requests.into_iter().zip(outputs).collect())
    }

    async fn run_tool(&self, request: &ToolRequest, ctx: ToolContext) -> ToolOutput {
        let started = Instant::now();
        let thread_id = ctx.thread_id.clone();
        let call = self
            .tool_executor
            .execute(&request.tool_name, request.arguments.clone(), ctx);

        let output = match tokio::time::timeout(self.config.tool_timeout, call).await {
            Ok(Some(output)) => output,
            Ok(None) => ToolOutput::error(format!("Error: unknown tool '{}'", request.tool_name)),
            Err(_) => ToolOutput::error(format!(
                "Error: {} timed out after {}s",
                request.tool_name,
                self.config.tool_timeout.as_secs()
            )),
        };

        if output.success {
            tracing::info!(
                thread_id = %thread_id,
                tool = %request.tool_name,
                request_id = %request.request_id,
                duration_ms = %started.elapsed().as_millis(),
                "Tool completed"
            );
        } else {
            tracing::warn!(
                thread_id = %thread_id,
                tool = %request.tool_name,
                request_id = %request.request_id,
                duration_ms = %started.elapsed().as_millis(),
                output = %output.output,
                "Tool failed"
            );
        }
        output
    }

    async fn save(&self, thread_id: &str, state: &ConversationState) -> Result<(), TurnError> {
        self.store
            .save(thread_id, state)
            .await
            .map_err(TurnError::Storage)
    }
}

/// Delay before retry number `attempt`: base, 2x base, 4x base, ...
fn backoff(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1 << attempt.saturating_sub(1).min(10))
}

/// Summarize a finished turn; messages before `turn_start` belong to earlier turns
fn outcome(state: &ConversationState, turn_start: usize) -> TurnOutcome {
    let final_text = state
        .messages
        .get(turn_start..)
        .unwrap_or_default()
        .iter()
        .rev()
        .find(|m| m.is_plain_assistant() && !m.content().trim().is_empty())
        .map(|m| m.content().to_string())
        .unwrap_or_else(|| NO_RESPONSE_APOLOGY.to_string());

    TurnOutcome {
        final_assistant_text: final_text,
        intent: state.intent,
        confidence: state.confidence,
        tool_call_log: state.tool_call_log.clone(),
        should_escalate: state.should_escalate,
    }
}
