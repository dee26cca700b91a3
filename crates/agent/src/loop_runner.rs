//! The bounded orchestration loop.
//!
//! States: `AwaitingModel` → (`ExecutingTools` → `AwaitingModel`)* → `Done`.
//! The iteration counter and budget are explicit fields of [`RunState`], and
//! the budget is checked before every reasoning call, so a component that
//! never stops proposing tools gets exactly `max_iterations` round trips.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use rustedbridge_catalog::{Catalog, CatalogCache, ResolvedInvocation, resolve};
use rustedbridge_core::error::TransportError;
use rustedbridge_core::event::{DomainEvent, EventBus};
use rustedbridge_core::message::{Conversation, Message, MessageToolCall};
use rustedbridge_core::provider::{Proposal, Provider, ProviderRequest};
use rustedbridge_core::rpc::ToolSchema;
use rustedbridge_transport::CallOutcome;
use tracing::{debug, error, info, warn};

use crate::outcome::{
    BUDGET_EXCEEDED_MESSAGE, InvocationRecord, NO_RESPONSE_MESSAGE, OrchestrationOutcome,
    REASONING_FAILED_MESSAGE, Termination,
};

pub const DEFAULT_MAX_ITERATIONS: u32 = 5;

/// Loop state.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopState {
    AwaitingModel,
    ExecutingTools(Vec<MessageToolCall>),
    Done(Termination, String),
}

/// Everything one request accumulates. Dropped when the request finishes.
#[derive(Debug)]
pub struct RunState {
    pub conversation: Conversation,
    pub state: LoopState,
    /// Reasoning-component calls made so far
    pub iterations: u32,
    pub max_iterations: u32,
    pub invocations: Vec<InvocationRecord>,
    pub reasoning_error: Option<String>,
}

impl RunState {
    pub fn new(system_prompt: &str, question: &str, max_iterations: u32) -> Self {
        Self {
            conversation: Conversation::seeded(system_prompt, question),
            state: LoopState::AwaitingModel,
            iterations: 0,
            max_iterations,
            invocations: Vec::new(),
            reasoning_error: None,
        }
    }

    pub fn budget_exhausted(&self) -> bool {
        self.iterations >= self.max_iterations
    }

    pub fn is_done(&self) -> bool {
        matches!(self.state, LoopState::Done(..))
    }
}

/// Drives the reasoning component and the workers for one request at a time.
///
/// Shareable across concurrent requests; the catalog cache is the only
/// shared mutable state.
pub struct OrchestrationLoop {
    provider: Arc<dyn Provider>,
    catalog: Arc<CatalogCache>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    system_prompt: String,
    discovery_tools: Vec<String>,
    max_iterations: u32,
    event_bus: Arc<EventBus>,
}

impl OrchestrationLoop {
    pub fn new(
        provider: Arc<dyn Provider>,
        catalog: Arc<CatalogCache>,
        model: impl Into<String>,
        system_prompt: impl Into<String>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            provider,
            catalog,
            model: model.into(),
            temperature: 0.0,
            max_tokens: None,
            system_prompt: system_prompt.into(),
            discovery_tools: vec![
                "find_location".into(),
                "find_address".into(),
                "find_area".into(),
                "find_place".into(),
            ],
            max_iterations: DEFAULT_MAX_ITERATIONS,
            event_bus,
        }
    }

    /// Set the round-trip budget. Values below 1 are raised to 1.
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max.max(1);
        self
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Operations that receive a `query` argument.
    pub fn with_discovery_tools(mut self, tools: Vec<String>) -> Self {
        self.discovery_tools = tools;
        self
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    /// Answer one question. Never fails: every failure mode ends in `Done`
    /// with a textual answer.
    pub async fn run(&self, question: &str) -> OrchestrationOutcome {
        let mut run = RunState::new(&self.system_prompt, question, self.max_iterations);
        info!(
            conversation_id = %run.conversation.id(),
            max_iterations = run.max_iterations,
            "Processing question"
        );

        let catalog = self.catalog.get_catalog().await;
        let tools = catalog.selector_schemas();
        if tools.is_empty() {
            warn!("No workers available; the reasoning component gets no tools");
        }

        let (termination, answer) = loop {
            if let LoopState::Done(termination, answer) = &run.state {
                break (*termination, answer.clone());
            }
            self.step(&mut run, &catalog, &tools).await;
        };

        info!(
            conversation_id = %run.conversation.id(),
            termination = %termination,
            iterations = run.iterations,
            invocations = run.invocations.len(),
            "Question finished"
        );
        self.event_bus.publish(DomainEvent::RequestFinished {
            termination: termination.to_string(),
            iterations: run.iterations,
            timestamp: Utc::now(),
        });

        OrchestrationOutcome {
            conversation_id: run.conversation.id(),
            answer,
            termination,
            iterations: run.iterations,
            invocations: run.invocations,
            reasoning_error: run.reasoning_error,
        }
    }

    /// Advance `run` by one transition.
    pub async fn step(&self, run: &mut RunState, catalog: &Catalog, tools: &[ToolSchema]) {
        let state = std::mem::replace(&mut run.state, LoopState::AwaitingModel);
        run.state = match state {
            LoopState::AwaitingModel => self.await_model(run, tools).await,
            LoopState::ExecutingTools(calls) => {
                self.execute_tools(run, catalog, &calls).await;
                LoopState::AwaitingModel
            }
            done @ LoopState::Done(..) => done,
        };
    }

    async fn await_model(&self, run: &mut RunState, tools: &[ToolSchema]) -> LoopState {
        if run.budget_exhausted() {
            warn!(
                conversation_id = %run.conversation.id(),
                iterations = run.iterations,
                "Iteration budget exhausted"
            );
            return LoopState::Done(Termination::BudgetExceeded, BUDGET_EXCEEDED_MESSAGE.into());
        }
        run.iterations += 1;
        debug!(
            conversation_id = %run.conversation.id(),
            iteration = run.iterations,
            max_iterations = run.max_iterations,
            "Calling reasoning component"
        );

        let request = ProviderRequest {
            model: self.model.clone(),
            messages: run.conversation.messages().to_vec(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            tools: tools.to_vec(),
        };

        let response = match self.provider.complete(request).await {
            Ok(response) => response,
            Err(e) => {
                error!(provider = %self.provider.name(), error = %e, "Reasoning component failed");
                run.reasoning_error = Some(e.to_string());
                return LoopState::Done(Termination::ReasoningFailed, REASONING_FAILED_MESSAGE.into());
            }
        };

        let proposal = response.proposal();
        self.event_bus.publish(DomainEvent::ResponseGenerated {
            iteration: run.iterations,
            model: response.model.clone(),
            tool_calls: response.message.tool_calls.len(),
            tokens_used: response.usage.as_ref().map_or(0, |u| u.total_tokens),
            timestamp: Utc::now(),
        });

        match proposal {
            Proposal::ToolCalls(calls) => {
                info!(iteration = run.iterations, count = calls.len(), "Reasoning component requested tools");
                run.conversation.push(Message::assistant_tool_calls(calls.clone()));
                LoopState::ExecutingTools(calls)
            }
            Proposal::FinalAnswer(text) => {
                run.conversation.push(Message::assistant(text.clone()));
                LoopState::Done(Termination::Answered, text)
            }
            Proposal::Nothing => LoopState::Done(Termination::NoResponse, NO_RESPONSE_MESSAGE.into()),
        }
    }

    /// Run every proposed invocation in order, one at a time.
    async fn execute_tools(&self, run: &mut RunState, catalog: &Catalog, calls: &[MessageToolCall]) {
        for call in calls {
            let record = self.invoke(run.iterations, catalog, call).await;
            let content = serde_json::to_string_pretty(&record.result)
                .unwrap_or_else(|_| record.result.to_string());
            run.conversation.push(Message::tool_result(&call.id, content));
            run.invocations.push(record);
        }
    }

    async fn invoke(&self, iteration: u32, catalog: &Catalog, call: &MessageToolCall) -> InvocationRecord {
        let started = Instant::now();

        let (worker, operation, success, result) =
            match resolve(catalog, &self.discovery_tools, &call.name, &call.arguments) {
                Ok(invocation) => {
                    let outcome = self.call_worker(catalog, &invocation).await;
                    let success = outcome.is_success();
                    if success {
                        info!(worker = %invocation.worker, operation = %invocation.operation, "Tool call succeeded");
                    } else {
                        warn!(worker = %invocation.worker, operation = %invocation.operation, "Tool call returned an error");
                    }
                    (
                        Some(invocation.worker),
                        Some(invocation.operation),
                        success,
                        outcome.to_json(),
                    )
                }
                Err(e) => {
                    warn!(tool = %call.name, arguments = %call.arguments, error = %e, "Could not resolve tool call");
                    (None, None, false, serde_json::json!({ "error": e.to_string() }))
                }
            };

        self.event_bus.publish(DomainEvent::ToolInvoked {
            worker: worker.clone().unwrap_or_else(|| call.name.clone()),
            operation: operation.clone().unwrap_or_default(),
            success,
            duration_ms: started.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
        });

        InvocationRecord {
            iteration,
            proposed: call.name.clone(),
            worker,
            operation,
            success,
            result,
        }
    }

    async fn call_worker(&self, catalog: &Catalog, invocation: &ResolvedInvocation) -> CallOutcome {
        info!(
            worker = %invocation.worker,
            operation = %invocation.operation,
            arguments = %invocation.arguments,
            "Calling worker tool"
        );
        match catalog.entry(&invocation.worker) {
            Some(entry) => {
                self.catalog
                    .client()
                    .call_tool(&entry.worker, &invocation.operation, invocation.arguments.clone())
                    .await
            }
            None => CallOutcome::Failed(
                TransportError::Unreachable {
                    worker: invocation.worker.clone(),
                    reason: "worker is not in the catalog".into(),
                }
                .into(),
            ),
        }
    }
}
