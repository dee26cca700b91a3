//! End-to-end integration tests for the RustedBridge pipeline.
//!
//! These tests drive a question through catalog discovery, the reasoning
//! component, name resolution, RPC sessions and frame demultiplexing against
//! in-memory workers that speak the framed protocol.

use std::sync::{Arc, Mutex};

use rustedbridge_agent::{AgentServer, OrchestrationLoop, Termination};
use rustedbridge_catalog::CatalogCache;
use rustedbridge_config::AppConfig;
use rustedbridge_core::error::ProviderError;
use rustedbridge_core::event::{DomainEvent, EventBus};
use rustedbridge_core::message::{Message, MessageToolCall, Role};
use rustedbridge_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use rustedbridge_core::worker::WorkerSpec;
use rustedbridge_transport::testing::{ScriptedConnector, ScriptedWorker};
use rustedbridge_transport::{SessionConfig, WorkerClient};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

// ── Mock Provider ────────────────────────────────────────────────────────

/// A mock provider that returns scripted responses in sequence.
struct ScriptedProvider {
    responses: Mutex<Vec<ProviderResponse>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    fn new(responses: Vec<ProviderResponse>) -> Self {
        Self {
            responses: Mutex::new(responses),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Ok(text_response("out of script"))
        } else {
            Ok(responses.remove(0))
        }
    }
}

fn text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: Some(Usage {
            prompt_tokens: 120,
            completion_tokens: 30,
            total_tokens: 150,
        }),
        model: "e2e-model".into(),
    }
}

fn tool_response(calls: &[(&str, &str, Value)]) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant_tool_calls(
            calls
                .iter()
                .map(|(id, name, args)| MessageToolCall {
                    id: (*id).into(),
                    name: (*name).into(),
                    arguments: args.to_string(),
                })
                .collect(),
        ),
        usage: None,
        model: "e2e-model".into(),
    }
}

// ── Scripted workers ─────────────────────────────────────────────────────

fn kadaster() -> ScriptedWorker {
    ScriptedWorker::new("Kadaster")
        .with_tool("find_location", "Find a location by name or address")
        .with_tool("get_buildings", "Buildings at a location")
        .with_diagnostics(&["kadaster: request received"])
        .with_handler(|name, args| match name {
            "find_location" => Ok(json!({
                "content": [{"type": "text", "text": json!({
                    "query": args["query"],
                    "location_id": "LOC001",
                    "name": "Amsterdam Centrum",
                }).to_string()}]
            })),
            "get_buildings" => Ok(json!({
                "content": [{"type": "text", "text": "{\"buildings\": 4211}"}]
            })),
            other => Err((-32602, format!("unknown tool {other}"))),
        })
}

fn cbs() -> ScriptedWorker {
    ScriptedWorker::new("CBS")
        .with_tool("get_statistics", "Population and income statistics")
        .with_split_frames(7)
        .with_handler(|name, args| match (name, args["location_id"].as_str()) {
            ("get_statistics", Some("LOC001")) => Ok(json!({
                "content": [{"type": "text", "text": "{\"population\": 918117}"}]
            })),
            ("get_statistics", _) => Err((-32602, "location_id is required".into())),
            (other, _) => Err((-32602, format!("unknown tool {other}"))),
        })
}

fn rijkswaterstaat() -> ScriptedWorker {
    ScriptedWorker::new("Rijkswaterstaat").with_tool("get_water_levels", "Water levels near a location")
}

fn specs() -> Vec<WorkerSpec> {
    vec![
        WorkerSpec::new("Kadaster", "eai-kadaster-service", "Land registry"),
        WorkerSpec::new("CBS", "eai-cbs-service", "Statistics"),
        WorkerSpec::new("Rijkswaterstaat", "eai-rijkswaterstaat-service", "Water management"),
    ]
}

fn pipeline(
    connector: ScriptedConnector,
    provider: Arc<ScriptedProvider>,
) -> (OrchestrationLoop, Arc<ScriptedConnector>, Arc<EventBus>) {
    let connector = Arc::new(connector);
    let bus = Arc::new(EventBus::default());
    let catalog = Arc::new(
        CatalogCache::new(WorkerClient::new(connector.clone(), SessionConfig::default()), specs())
            .with_event_bus(bus.clone()),
    );
    let config = AppConfig::default();
    let orchestrator = OrchestrationLoop::new(
        provider,
        catalog,
        "e2e-model",
        config.agent.system_prompt(),
        bus.clone(),
    )
    .with_max_iterations(config.agent.max_iterations)
    .with_discovery_tools(config.agent.discovery_tools.clone());
    (orchestrator, connector, bus)
}

fn all_workers() -> ScriptedConnector {
    ScriptedConnector::new()
        .with_worker(kadaster())
        .with_worker(cbs())
        .with_worker(rijkswaterstaat())
}

fn tool_turns(request: &ProviderRequest) -> Vec<Value> {
    request
        .messages
        .iter()
        .filter(|m| m.role == Role::Tool)
        .map(|m| serde_json::from_str(&m.content).unwrap())
        .collect()
}

// ── Tests ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_discovery_then_retrieval_across_workers() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        tool_response(&[(
            "call_1",
            "Kadaster",
            json!({"tool": "find_location", "query": "Amsterdam Centrum"}),
        )]),
        tool_response(&[(
            "call_2",
            "CBS",
            json!({"tool": "get_statistics", "location_id": "LOC001", "query": "ignored"}),
        )]),
        text_response("Amsterdam Centrum has 918,117 inhabitants. (Source: CBS > get_statistics)"),
    ]));
    let (orchestrator, connector, _) = pipeline(all_workers(), provider.clone());

    let outcome = orchestrator.run("How many people live in Amsterdam Centrum?").await;

    assert_eq!(outcome.termination, Termination::Answered);
    assert_eq!(outcome.iterations, 3);
    assert!(outcome.answer.contains("918,117"));
    assert_eq!(outcome.invocations.len(), 2);
    assert!(outcome.invocations.iter().all(|r| r.success));

    let requests = provider.requests();
    let selectors: Vec<_> = requests[0].tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(selectors, vec!["Kadaster", "CBS", "Rijkswaterstaat"]);
    assert_eq!(
        requests[0].tools[1].input_schema["properties"]["tool"]["enum"],
        json!(["get_statistics"])
    );

    let turns = tool_turns(&requests[2]);
    assert_eq!(turns.len(), 2);
    assert!(turns[0]["content"][0]["text"].as_str().unwrap().contains("LOC001"));
    // Split into 7-byte frames on the wire, reassembled intact.
    assert_eq!(turns[1]["content"][0]["text"], "{\"population\": 918117}");

    // One discovery session per worker, one call session per invocation.
    assert_eq!(connector.requests("Kadaster", "tools/list"), 1);
    assert_eq!(connector.requests("Kadaster", "tools/call"), 1);
    assert_eq!(connector.requests("CBS", "tools/call"), 1);
    assert_eq!(connector.requests("Rijkswaterstaat", "tools/call"), 0);
    assert_eq!(connector.opens("CBS"), 2);
    connector.wait_closed("CBS", 2).await;
}

#[tokio::test]
async fn e2e_dotted_name_resolves_like_the_selector_form() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        tool_response(&[("call_1", "CBS.get_statistics", json!({"location_id": "LOC001"}))]),
        text_response("918,117"),
    ]));
    let (orchestrator, connector, _) = pipeline(all_workers(), provider.clone());

    let outcome = orchestrator.run("Population?").await;

    assert_eq!(outcome.termination, Termination::Answered);
    let record = &outcome.invocations[0];
    assert_eq!(record.worker.as_deref(), Some("CBS"));
    assert_eq!(record.operation.as_deref(), Some("get_statistics"));
    assert!(record.success);
    assert_eq!(connector.requests("CBS", "tools/call"), 1);
}

#[tokio::test]
async fn e2e_stopped_worker_is_left_out_of_the_catalog() {
    let connector = ScriptedConnector::new()
        .with_worker(kadaster())
        .with_worker(cbs().not_ready("exited"))
        .with_worker(rijkswaterstaat());
    let provider = Arc::new(ScriptedProvider::new(vec![
        tool_response(&[("call_1", "CBS.get_statistics", json!({"location_id": "LOC001"}))]),
        text_response("I was unable to retrieve that information from the available data sources."),
    ]));
    let (orchestrator, connector, bus) = pipeline(connector, provider.clone());
    let mut events = bus.subscribe();

    let outcome = orchestrator.run("Population?").await;

    let requests = provider.requests();
    let selectors: Vec<_> = requests[0].tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(selectors, vec!["Kadaster", "Rijkswaterstaat"]);

    // The call is rejected at resolution; the stopped worker never sees a session.
    assert!(!outcome.invocations[0].success);
    assert_eq!(tool_turns(&requests[1])[0], json!({"error": "Unknown worker: CBS"}));
    assert_eq!(connector.opens("CBS"), 0);

    let mut skipped = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let DomainEvent::WorkerSkipped { worker, .. } = event.as_ref() {
            skipped.push(worker.clone());
        }
    }
    assert_eq!(skipped, vec!["CBS".to_string()]);
}

#[tokio::test]
async fn e2e_worker_error_object_is_fed_back_verbatim() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        tool_response(&[("call_1", "CBS", json!({"tool": "get_statistics"}))]),
        text_response("I need a location first."),
    ]));
    let (orchestrator, _, _) = pipeline(all_workers(), provider.clone());

    let outcome = orchestrator.run("Population?").await;

    assert_eq!(outcome.termination, Termination::Answered);
    assert!(!outcome.invocations[0].success);
    let turn = &tool_turns(&provider.requests()[1])[0];
    assert_eq!(turn["error"]["code"], -32602);
    assert_eq!(turn["error"]["message"], "location_id is required");
}

#[tokio::test]
async fn e2e_budget_stops_a_model_that_never_answers() {
    let loops: Vec<_> = (1..=10)
        .map(|i| {
            tool_response(&[(
                format!("call_{i}").as_str(),
                "Rijkswaterstaat",
                json!({"tool": "get_water_levels", "location_id": "LOC001"}),
            )])
        })
        .collect();
    let provider = Arc::new(ScriptedProvider::new(loops));
    let (orchestrator, connector, _) = pipeline(all_workers(), provider.clone());

    let outcome = orchestrator.run("Water levels?").await;

    assert_eq!(outcome.termination, Termination::BudgetExceeded);
    assert_eq!(outcome.answer, "Maximum iterations reached without completing the query.");
    assert_eq!(outcome.iterations, 5);
    assert_eq!(provider.requests().len(), 5);
    assert_eq!(connector.requests("Rijkswaterstaat", "tools/call"), 5);
}

#[tokio::test]
async fn e2e_concurrent_requests_share_one_discovery() {
    let provider = Arc::new(ScriptedProvider::new(vec![]));
    let (orchestrator, connector, _) = pipeline(all_workers(), provider.clone());
    let orchestrator = Arc::new(orchestrator);

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move { orchestrator.run(&format!("question {i}")).await })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.await.unwrap().termination, Termination::Answered);
    }

    for worker in ["Kadaster", "CBS", "Rijkswaterstaat"] {
        assert_eq!(connector.requests(worker, "tools/list"), 1, "{worker}");
    }
}

#[tokio::test]
async fn e2e_agent_server_answers_over_a_byte_stream() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        tool_response(&[("call_1", "CBS", json!({"tool": "get_statistics", "location_id": "LOC001"}))]),
        text_response("918,117 (Source: CBS > get_statistics)"),
    ]));
    let (orchestrator, _, _) = pipeline(all_workers(), provider);
    let server = Arc::new(AgentServer::new(Arc::new(orchestrator)));

    let (client, server_side) = tokio::io::duplex(64 * 1024);
    let (server_read, server_write) = tokio::io::split(server_side);
    let task = {
        let server = server.clone();
        tokio::spawn(async move { server.serve(BufReader::new(server_read), server_write).await })
    };

    let (client_read, mut client_write) = tokio::io::split(client);
    let requests = [
        json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {"protocolVersion": "2024-11-05"}}),
        json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
        json!({"jsonrpc": "2.0", "id": 2, "method": "tools/call", "params": {
            "name": "ask_question",
            "arguments": {"question": "Population of LOC001?"}
        }}),
    ];
    for request in &requests {
        client_write
            .write_all(format!("{request}\n").as_bytes())
            .await
            .unwrap();
    }
    client_write.shutdown().await.unwrap();

    let mut lines = BufReader::new(client_read).lines();
    let mut replies = Vec::new();
    while let Some(line) = lines.next_line().await.unwrap() {
        replies.push(serde_json::from_str::<Value>(&line).unwrap());
    }
    task.await.unwrap().unwrap();

    assert_eq!(replies.len(), 2);
    assert_eq!(replies[0]["result"]["serverInfo"]["name"], "agent-service");
    assert_eq!(replies[1]["id"], 2);
    assert_eq!(
        replies[1]["result"]["content"][0]["text"],
        "918,117 (Source: CBS > get_statistics)"
    );
}

#[tokio::test]
async fn e2e_config_defaults_and_validation() {
    let config = AppConfig::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.agent.max_iterations, 5);
    let names: Vec<_> = config.workers.iter().map(|w| w.name.as_str()).collect();
    assert_eq!(names, vec!["Kadaster", "CBS", "Rijkswaterstaat"]);
    assert!(config.agent.system_prompt().contains("(Source:"));
}
