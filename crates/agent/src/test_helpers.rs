//! Shared test helpers for orchestration and server tests.

use std::sync::{Arc, Mutex};

use rustedbridge_catalog::CatalogCache;
use rustedbridge_core::error::ProviderError;
use rustedbridge_core::message::{Message, MessageToolCall};
use rustedbridge_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use rustedbridge_core::worker::WorkerSpec;
use rustedbridge_transport::testing::{ScriptedConnector, ScriptedWorker};
use rustedbridge_transport::{SessionConfig, WorkerClient};
use serde_json::{Value, json};

/// A mock provider that returns scripted responses in order.
///
/// Once the script runs out it answers with plain text, so a test that
/// under-scripts still terminates.
pub struct ScriptedProvider {
    responses: Mutex<Vec<ProviderResponse>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(mut responses: Vec<ProviderResponse>) -> Self {
        responses.reverse();
        Self {
            responses: Mutex::new(responses),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        Ok(self
            .responses
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| text("out of script")))
    }
}

/// A final-answer response.
pub fn text(content: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(content),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock-model".into(),
    }
}

/// A response proposing `(id, name, arguments)` tool calls.
pub fn tool_calls(calls: Vec<(&str, &str, &str)>) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant_tool_calls(
            calls
                .into_iter()
                .map(|(id, name, args)| MessageToolCall {
                    id: id.into(),
                    name: name.into(),
                    arguments: args.into(),
                })
                .collect(),
        ),
        usage: None,
        model: "mock-model".into(),
    }
}

/// Calls the `Stats` worker's handler received, as `(tool, arguments)`.
pub type Seen = Arc<Mutex<Vec<(String, Value)>>>;

/// A two-worker catalog: `Stats` records every call it serves, `Alpha`
/// echoes.
pub fn stats_catalog() -> (Arc<CatalogCache>, Arc<ScriptedConnector>, Seen) {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    let connector = Arc::new(
        ScriptedConnector::new()
            .with_worker(
                ScriptedWorker::new("Stats")
                    .with_tool("get_statistics", "Population figures")
                    .with_handler(move |name, args| {
                        log.lock().unwrap().push((name.to_string(), args.clone()));
                        Ok(json!({"content": [{"type": "text", "text": "{\"population\": 918117}"}]}))
                    }),
            )
            .with_worker(
                ScriptedWorker::new("Alpha")
                    .with_tool("find_x", "Find a place")
                    .with_tool("get_details", "Details"),
            ),
    );
    let cache = CatalogCache::new(
        WorkerClient::new(connector.clone(), SessionConfig::default()),
        vec![
            WorkerSpec::new("Stats", "stats", "Statistics"),
            WorkerSpec::new("Alpha", "alpha", "Places"),
        ],
    );
    (Arc::new(cache), connector, seen)
}
