//! Single-use RPC sessions.
//!
//! An [`RpcSession`] owns one freshly opened channel to one worker and
//! carries exactly one call over it: `initialize` (id 1), the request
//! (id 2), then teardown. The session is consumed by the call, so a
//! channel can never be reused, and the channel is shut down on every
//! exit path.

use std::sync::Arc;
use std::time::Instant;

use rustedbridge_core::error::{ProtocolError, TransportError};
use rustedbridge_core::rpc::{
    ClientInfo, ListToolsResult, PROTOCOL_VERSION, RpcErrorObject, RpcRequest, RpcResponse,
    ToolSchema,
};
use rustedbridge_core::worker::{WorkerConnector, WorkerSpec, WorkerState, WorkerStream};
use serde_json::Value;
use tokio::io::AsyncWriteExt;

use crate::frame::{DemuxedMessage, read_message};

const HANDSHAKE_ID: u64 = 1;
const REQUEST_ID: u64 = 2;

/// Handshake parameters announced by every session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub protocol_version: String,
    pub client: ClientInfo,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.into(),
            client: ClientInfo::default(),
        }
    }
}

/// Why a session produced no usable reply.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The worker answered with a JSON-RPC error object
    #[error("Worker returned error {}: {}", .0.code, .0.message)]
    Rejected(RpcErrorObject),
}

impl SessionError {
    /// Raw or partial reply text kept for diagnostics.
    pub fn raw(&self) -> Option<&str> {
        match self {
            Self::Transport(e) => e.partial(),
            Self::Protocol(e) => e.raw(),
            Self::Rejected(_) => None,
        }
    }
}

/// The result of one `tools/call`.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    /// The `result` member of the worker's reply, verbatim
    Success(Value),
    /// The worker's JSON-RPC error object, verbatim
    WorkerError(RpcErrorObject),
    /// No usable reply
    Failed(SessionError),
}

impl CallOutcome {
    /// True for a result that does not flag itself with `isError`.
    pub fn is_success(&self) -> bool {
        match self {
            Self::Success(result) => !result
                .get("isError")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            _ => false,
        }
    }

    /// JSON shape recorded as the tool-result turn.
    ///
    /// - success: the result object as received
    /// - worker error: `{"error": {"code", "message", "data"?}}`
    /// - failure: `{"error": "<message>", "raw"?: "<text>"}`
    pub fn to_json(&self) -> Value {
        match self {
            Self::Success(result) => result.clone(),
            Self::WorkerError(err) => serde_json::json!({ "error": err }),
            Self::Failed(err) => {
                let mut obj = serde_json::json!({ "error": err.to_string() });
                if let Some(raw) = err.raw() {
                    obj["raw"] = Value::String(raw.to_string());
                }
                obj
            }
        }
    }
}

/// One channel, one call.
pub struct RpcSession {
    worker: String,
    stream: Box<dyn WorkerStream>,
    config: SessionConfig,
}

impl RpcSession {
    /// Open a fresh channel. A worker that is missing or not running fails
    /// here, before any protocol traffic.
    pub async fn open(
        connector: &dyn WorkerConnector,
        spec: &WorkerSpec,
        config: SessionConfig,
    ) -> Result<Self, TransportError> {
        let stream = connector.open_channel(spec).await?;
        tracing::debug!(worker = %spec.name, "Session channel opened");
        Ok(Self {
            worker: spec.name.clone(),
            stream,
            config,
        })
    }

    /// Invoke one operation.
    pub async fn call_tool(self, operation: &str, arguments: Value) -> CallOutcome {
        let request = RpcRequest::call_tool(REQUEST_ID, operation, arguments);
        match self.exchange(request).await {
            Ok(Reply::Result(result)) => CallOutcome::Success(result),
            Ok(Reply::Error(err)) => CallOutcome::WorkerError(err),
            Err(e) => CallOutcome::Failed(e),
        }
    }

    /// Fetch the worker's operation directory.
    pub async fn list_tools(self) -> Result<Vec<ToolSchema>, SessionError> {
        let result = match self.exchange(RpcRequest::list_tools(REQUEST_ID)).await? {
            Reply::Result(result) => result,
            Reply::Error(err) => return Err(SessionError::Rejected(err)),
        };
        let listed: ListToolsResult =
            serde_json::from_value(result).map_err(|e| ProtocolError::UnexpectedShape {
                reason: format!("tools/list result: {e}"),
            })?;
        Ok(listed.tools)
    }

    /// Handshake, send `request`, read its reply, close.
    async fn exchange(mut self, request: RpcRequest) -> Result<Reply, SessionError> {
        let outcome = self.converse(&request).await;

        if let Err(e) = self.stream.shutdown().await {
            tracing::debug!(worker = %self.worker, error = %e, "Channel shutdown failed");
        }
        drop(self.stream);
        tracing::debug!(worker = %self.worker, "Session channel closed");

        let reply = outcome?;
        let response = match RpcResponse::parse(&reply.text) {
            Ok(response) => response,
            Err(_) if !reply.complete => {
                return Err(TransportError::Truncated {
                    worker: self.worker,
                    partial: reply.text,
                }
                .into());
            }
            Err(e) => return Err(e.into()),
        };

        // A worker that could not parse the request reports it with a null id.
        let expected = Value::from(REQUEST_ID);
        let null_id_error = response.id.is_null() && response.error.is_some();
        if response.id != expected && !null_id_error {
            return Err(ProtocolError::MismatchedId {
                expected: REQUEST_ID,
                found: response.id.to_string(),
                raw: reply.text,
            }
            .into());
        }

        match (response.error, response.result) {
            (Some(err), _) => Ok(Reply::Error(err)),
            (None, Some(result)) => Ok(Reply::Result(result)),
            (None, None) => Err(ProtocolError::MissingResult { raw: reply.text }.into()),
        }
    }

    async fn converse(&mut self, request: &RpcRequest) -> Result<DemuxedMessage, TransportError> {
        let handshake = RpcRequest::initialize(
            HANDSHAKE_ID,
            &self.config.protocol_version,
            &self.config.client,
        );
        self.send(&handshake).await?;
        let ack = read_message(&mut self.stream, &self.worker).await;
        tracing::debug!(worker = %self.worker, complete = ack.complete, "Handshake reply read");

        self.send(request).await?;
        Ok(read_message(&mut self.stream, &self.worker).await)
    }

    async fn send(&mut self, request: &RpcRequest) -> Result<(), TransportError> {
        let line = request.to_line().map_err(|e| TransportError::Io {
            worker: self.worker.clone(),
            reason: format!("encode {}: {e}", request.method),
        })?;
        let io_err = |e: std::io::Error| TransportError::Io {
            worker: self.worker.clone(),
            reason: e.to_string(),
        };
        self.stream.write_all(line.as_bytes()).await.map_err(io_err)?;
        self.stream.flush().await.map_err(io_err)
    }
}

enum Reply {
    Result(Value),
    Error(RpcErrorObject),
}

/// Opens sessions against a connector.
///
/// Cheap to clone; shared by the catalog and the orchestration loop.
#[derive(Clone)]
pub struct WorkerClient {
    connector: Arc<dyn WorkerConnector>,
    config: SessionConfig,
}

impl WorkerClient {
    pub fn new(connector: Arc<dyn WorkerConnector>, config: SessionConfig) -> Self {
        Self { connector, config }
    }

    /// Run one `tools/call` in a fresh session.
    pub async fn call_tool(&self, worker: &WorkerSpec, operation: &str, arguments: Value) -> CallOutcome {
        let started = Instant::now();
        let outcome = match RpcSession::open(self.connector.as_ref(), worker, self.config.clone()).await {
            Ok(session) => session.call_tool(operation, arguments).await,
            Err(e) => CallOutcome::Failed(e.into()),
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            CallOutcome::Failed(e) => {
                tracing::warn!(worker = %worker.name, operation, duration_ms, error = %e, "Tool call failed");
            }
            CallOutcome::WorkerError(e) => {
                tracing::warn!(worker = %worker.name, operation, duration_ms, code = e.code, message = %e.message, "Tool call returned error");
            }
            CallOutcome::Success(_) => {
                tracing::info!(worker = %worker.name, operation, duration_ms, success = outcome.is_success(), "Tool call finished");
            }
        }
        outcome
    }

    /// Run one `tools/list` in a fresh session.
    pub async fn list_tools(&self, worker: &WorkerSpec) -> Result<Vec<ToolSchema>, SessionError> {
        let session = RpcSession::open(self.connector.as_ref(), worker, self.config.clone()).await?;
        session.list_tools().await
    }

    pub async fn inspect(&self, worker: &WorkerSpec) -> Result<WorkerState, TransportError> {
        self.connector.inspect(worker).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedConnector, ScriptedWorker};
    use rustedbridge_core::rpc::METHOD_INITIALIZE;
    use serde_json::json;

    fn stats_worker() -> ScriptedWorker {
        ScriptedWorker::new("Stats")
            .with_tool("get_statistics", "Population and income")
            .with_handler(|name, args| match name {
                "get_statistics" => Ok(json!({
                    "content": [{"type": "text", "text": format!("stats for {}", args["location_id"].as_str().unwrap_or("?"))}]
                })),
                other => Err((-32602, format!("Unknown tool: {other}"))),
            })
    }

    fn client(connector: ScriptedConnector) -> (WorkerClient, Arc<ScriptedConnector>) {
        let connector = Arc::new(connector);
        (
            WorkerClient::new(connector.clone(), SessionConfig::default()),
            connector,
        )
    }

    #[tokio::test]
    async fn call_tool_returns_result_verbatim() {
        let (client, connector) = client(ScriptedConnector::new().with_worker(stats_worker()));
        let spec = WorkerSpec::new("Stats", "stats", "");

        let outcome = client
            .call_tool(&spec, "get_statistics", json!({"location_id": "LOC001"}))
            .await;

        assert!(outcome.is_success());
        assert_eq!(outcome.to_json()["content"][0]["text"], "stats for LOC001");
        assert_eq!(connector.opens("Stats"), 1);
        assert_eq!(connector.requests("Stats", METHOD_INITIALIZE), 1);
        assert_eq!(connector.requests("Stats", "tools/call"), 1);
    }

    #[tokio::test]
    async fn handshake_precedes_request_and_channel_closes() {
        let (client, connector) = client(ScriptedConnector::new().with_worker(stats_worker()));
        let spec = WorkerSpec::new("Stats", "stats", "");

        client.call_tool(&spec, "get_statistics", json!({})).await;

        assert_eq!(connector.methods("Stats"), vec!["initialize", "tools/call"]);
        connector.wait_closed("Stats", 1).await;
        assert_eq!(connector.closes("Stats"), 1);
    }

    #[tokio::test]
    async fn worker_error_object_passes_through() {
        let (client, _) = client(ScriptedConnector::new().with_worker(stats_worker()));
        let spec = WorkerSpec::new("Stats", "stats", "");

        let outcome = client.call_tool(&spec, "get_weather", json!({})).await;
        match &outcome {
            CallOutcome::WorkerError(err) => {
                assert_eq!(err.code, -32602);
                assert_eq!(err.message, "Unknown tool: get_weather");
            }
            other => panic!("expected worker error, got {other:?}"),
        }
        assert_eq!(outcome.to_json()["error"]["code"], -32602);
    }

    #[tokio::test]
    async fn garbled_reply_is_protocol_error_and_channel_still_closes() {
        let worker = stats_worker().with_garbled_reply("Traceback (most recent call last):");
        let (client, connector) = client(ScriptedConnector::new().with_worker(worker));
        let spec = WorkerSpec::new("Stats", "stats", "");

        let outcome = client.call_tool(&spec, "get_statistics", json!({})).await;
        match &outcome {
            CallOutcome::Failed(SessionError::Protocol(ProtocolError::InvalidJson { raw, .. })) => {
                assert_eq!(raw, "Traceback (most recent call last):");
            }
            other => panic!("expected protocol error, got {other:?}"),
        }

        let json = outcome.to_json();
        assert!(json["error"].as_str().unwrap().starts_with("Invalid JSON response"));
        assert_eq!(json["raw"], "Traceback (most recent call last):");

        connector.wait_closed("Stats", 1).await;
        assert_eq!(connector.requests("Stats", METHOD_INITIALIZE), 1);
        assert_eq!(connector.requests("Stats", "tools/call"), 1);
    }

    #[tokio::test]
    async fn reply_with_another_id_is_not_taken_as_the_result() {
        let stale = r#"{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05"}}"#;
        let worker = stats_worker().with_garbled_reply(stale);
        let (client, _) = client(ScriptedConnector::new().with_worker(worker));
        let spec = WorkerSpec::new("Stats", "stats", "");

        let outcome = client.call_tool(&spec, "get_statistics", json!({})).await;
        match &outcome {
            CallOutcome::Failed(SessionError::Protocol(ProtocolError::MismatchedId { expected, found, raw })) => {
                assert_eq!(*expected, 2);
                assert_eq!(found, "1");
                assert_eq!(raw, stale);
            }
            other => panic!("expected id mismatch, got {other:?}"),
        }
        assert!(!outcome.is_success());
        assert_eq!(outcome.to_json()["raw"], stale);

        let worker = ScriptedWorker::new("Stats")
            .with_tool("get_statistics", "")
            .with_garbled_reply(r#"{"jsonrpc":"2.0","id":7,"result":{"tools":[]}}"#);
        let (client, _) = self::client(ScriptedConnector::new().with_worker(worker));
        assert!(matches!(
            client.list_tools(&spec).await,
            Err(SessionError::Protocol(ProtocolError::MismatchedId { .. }))
        ));
    }

    #[tokio::test]
    async fn null_result_is_a_success() {
        let worker = stats_worker().with_garbled_reply(r#"{"jsonrpc":"2.0","id":2,"result":null}"#);
        let (client, _) = client(ScriptedConnector::new().with_worker(worker));
        let spec = WorkerSpec::new("Stats", "stats", "");

        let outcome = client.call_tool(&spec, "get_statistics", json!({})).await;
        assert_eq!(outcome, CallOutcome::Success(Value::Null));
    }

    #[tokio::test]
    async fn null_id_error_from_worker_still_passes_through() {
        let worker = stats_worker()
            .with_garbled_reply(r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32603,"message":"Parse error"}}"#);
        let (client, _) = client(ScriptedConnector::new().with_worker(worker));
        let spec = WorkerSpec::new("Stats", "stats", "");

        let outcome = client.call_tool(&spec, "get_statistics", json!({})).await;
        assert!(matches!(&outcome, CallOutcome::WorkerError(err) if err.code == -32603));
    }

    #[tokio::test]
    async fn truncated_reply_carries_partial_text() {
        let worker = stats_worker().with_truncated_reply(r#"{"jsonrpc":"2.0","id":2,"res"#);
        let (client, _) = client(ScriptedConnector::new().with_worker(worker));
        let spec = WorkerSpec::new("Stats", "stats", "");

        let outcome = client.call_tool(&spec, "get_statistics", json!({})).await;
        match &outcome {
            CallOutcome::Failed(SessionError::Transport(TransportError::Truncated { partial, .. })) => {
                assert_eq!(partial, r#"{"jsonrpc":"2.0","id":2,"res"#);
            }
            other => panic!("expected truncation, got {other:?}"),
        }
        assert_eq!(outcome.to_json()["raw"], r#"{"jsonrpc":"2.0","id":2,"res"#);
    }

    #[tokio::test]
    async fn not_ready_worker_fails_without_handshake() {
        let worker = stats_worker().not_ready("exited");
        let (client, connector) = client(ScriptedConnector::new().with_worker(worker));
        let spec = WorkerSpec::new("Stats", "stats", "");

        let outcome = client.call_tool(&spec, "get_statistics", json!({})).await;
        assert!(matches!(
            outcome,
            CallOutcome::Failed(SessionError::Transport(TransportError::NotReady { .. }))
        ));
        assert_eq!(connector.requests("Stats", METHOD_INITIALIZE), 0);
        assert!(outcome.to_json().get("raw").is_none());
    }

    #[tokio::test]
    async fn unknown_worker_is_unreachable() {
        let (client, _) = client(ScriptedConnector::new());
        let spec = WorkerSpec::new("Ghost", "ghost", "");
        let outcome = client.call_tool(&spec, "anything", json!({})).await;
        assert!(matches!(
            outcome,
            CallOutcome::Failed(SessionError::Transport(TransportError::Unreachable { .. }))
        ));
    }

    #[tokio::test]
    async fn list_tools_returns_directory() {
        let worker = stats_worker().with_tool("find_location", "Search by name");
        let (client, connector) = client(ScriptedConnector::new().with_worker(worker));
        let spec = WorkerSpec::new("Stats", "stats", "");

        let tools = client.list_tools(&spec).await.unwrap();
        let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["get_statistics", "find_location"]);
        assert_eq!(connector.requests("Stats", "tools/list"), 1);
    }

    #[tokio::test]
    async fn diagnostics_do_not_leak_into_reply() {
        let worker = stats_worker()
            .with_diagnostics(&["warming cache", "{\"not\":\"the reply\"}"])
            .with_split_frames(4);
        let (client, _) = client(ScriptedConnector::new().with_worker(worker));
        let spec = WorkerSpec::new("Stats", "stats", "");

        let outcome = client
            .call_tool(&spec, "get_statistics", json!({"location_id": "LOC002"}))
            .await;
        assert_eq!(outcome.to_json()["content"][0]["text"], "stats for LOC002");
    }

    #[test]
    fn is_success_honours_is_error_flag() {
        let flagged = CallOutcome::Success(json!({"content": [], "isError": true}));
        assert!(!flagged.is_success());
        assert_eq!(flagged.to_json()["isError"], true);
    }
}
