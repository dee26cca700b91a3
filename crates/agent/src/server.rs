//! Line-delimited JSON-RPC server exposing the orchestration loop as a worker.
//!
//! One request per line on the input, one response per line on the output.
//! Requests are answered in arrival order.

use std::sync::Arc;

use rustedbridge_core::rpc::{
    CallToolResult, ERROR_INTERNAL, ERROR_METHOD_NOT_FOUND, ListToolsResult, METHOD_CALL_TOOL,
    METHOD_INITIALIZE, METHOD_LIST_TOOLS, PROTOCOL_VERSION, RpcRequest, RpcResponse, ToolSchema,
};
use serde_json::{Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, info, warn};

use crate::loop_runner::OrchestrationLoop;

pub const SERVER_NAME: &str = "agent-service";
pub const ASK_TOOL: &str = "ask_question";

const SERVER_DESCRIPTION: &str =
    "Answers questions about Dutch locations by orchestrating the Kadaster, CBS and Rijkswaterstaat workers";

/// Serves `initialize`, `tools/list` and `tools/call ask_question`.
pub struct AgentServer {
    orchestrator: Arc<OrchestrationLoop>,
}

impl AgentServer {
    pub fn new(orchestrator: Arc<OrchestrationLoop>) -> Self {
        Self { orchestrator }
    }

    /// The single tool this server offers.
    pub fn ask_tool() -> ToolSchema {
        ToolSchema {
            name: ASK_TOOL.into(),
            description: "Ask a question about a Dutch location. The agent combines cadastral \
                          data (Kadaster), statistics (CBS) and water management data \
                          (Rijkswaterstaat) into one answer."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "question": {
                        "type": "string",
                        "description": "The question to answer"
                    }
                },
                "required": ["question"]
            }),
        }
    }

    /// Handle one request. Notifications get `None`.
    pub async fn handle(&self, request: RpcRequest) -> Option<RpcResponse> {
        let Some(id) = request.id.clone() else {
            debug!(method = %request.method, "Notification received");
            return None;
        };

        let response = match request.method.as_str() {
            METHOD_INITIALIZE => RpcResponse::success(id, initialize_result()),
            METHOD_LIST_TOOLS => {
                let result = ListToolsResult {
                    tools: vec![Self::ask_tool()],
                };
                to_response(id, &result)
            }
            METHOD_CALL_TOOL => {
                let result = self.call_tool(&request.params).await;
                to_response(id, &result)
            }
            other => {
                warn!(method = %other, "Unknown method");
                RpcResponse::failure(id, ERROR_METHOD_NOT_FOUND, format!("Method not found: {other}"))
            }
        };
        Some(response)
    }

    /// Handle one raw input line. Blank lines and notifications produce nothing.
    pub async fn handle_line(&self, line: &str) -> Option<RpcResponse> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        match serde_json::from_str::<RpcRequest>(line) {
            Ok(request) => self.handle(request).await,
            Err(e) => {
                warn!(error = %e, "Unparseable request line");
                Some(RpcResponse::failure(Value::Null, ERROR_INTERNAL, e.to_string()))
            }
        }
    }

    /// Handle one raw input line that may not be valid UTF-8.
    pub async fn handle_bytes(&self, line: &[u8]) -> Option<RpcResponse> {
        match std::str::from_utf8(line) {
            Ok(text) => self.handle_line(text).await,
            Err(e) => {
                warn!(error = %e, line = %String::from_utf8_lossy(line), "Request line is not UTF-8");
                Some(RpcResponse::failure(
                    Value::Null,
                    ERROR_INTERNAL,
                    format!("Invalid UTF-8 in request: {e}"),
                ))
            }
        }
    }

    /// Read requests from `input` until it closes, writing each response to `output`.
    pub async fn serve<R, W>(&self, mut input: R, mut output: W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        info!(server = SERVER_NAME, "Agent server listening on stdio");
        let mut line = Vec::new();
        loop {
            line.clear();
            if input.read_until(b'\n', &mut line).await? == 0 {
                break;
            }
            let Some(response) = self.handle_bytes(&line).await else {
                continue;
            };
            let mut text = match serde_json::to_string(&response) {
                Ok(text) => text,
                Err(e) => {
                    error!(error = %e, "Failed to encode response");
                    continue;
                }
            };
            text.push('\n');
            output.write_all(text.as_bytes()).await?;
            output.flush().await?;
        }
        info!("Input closed, agent server stopping");
        Ok(())
    }

    async fn call_tool(&self, params: &Value) -> CallToolResult {
        let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
        if name != ASK_TOOL {
            warn!(tool = %name, "Unknown tool requested");
            return CallToolResult::error_text(format!("Unknown tool: {name}"));
        }

        let question = params
            .get("arguments")
            .and_then(|args| args.get("question"))
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default();
        if question.is_empty() {
            return CallToolResult::error_text("Error: Question is required");
        }

        info!(question = %question, "Answering question");
        let outcome = self.orchestrator.run(question).await;
        CallToolResult::text(outcome.answer)
    }
}

fn initialize_result() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": { "tools": {} },
        "serverInfo": {
            "name": SERVER_NAME,
            "version": env!("CARGO_PKG_VERSION"),
            "description": SERVER_DESCRIPTION,
        }
    })
}

fn to_response<T: serde::Serialize>(id: Value, result: &T) -> RpcResponse {
    match serde_json::to_value(result) {
        Ok(value) => RpcResponse::success(id, value),
        Err(e) => RpcResponse::failure(id, ERROR_INTERNAL, e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{ScriptedProvider, stats_catalog, text, tool_calls};
    use rustedbridge_core::event::EventBus;
    use tokio::io::BufReader;

    fn server(provider: Arc<ScriptedProvider>) -> AgentServer {
        let (catalog, _, _) = stats_catalog();
        let orchestrator =
            OrchestrationLoop::new(provider, catalog, "mock-model", "rules", Arc::new(EventBus::default()));
        AgentServer::new(Arc::new(orchestrator))
    }

    async fn call(server: &AgentServer, line: &str) -> Value {
        let response = server.handle_line(line).await.unwrap();
        serde_json::to_value(response).unwrap()
    }

    #[tokio::test]
    async fn initialize_advertises_tools_capability() {
        let server = server(Arc::new(ScriptedProvider::new(vec![])));
        let reply = call(&server, r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#).await;

        assert_eq!(reply["id"], 1);
        assert_eq!(reply["result"]["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(reply["result"]["capabilities"], json!({"tools": {}}));
        assert_eq!(reply["result"]["serverInfo"]["name"], "agent-service");
    }

    #[tokio::test]
    async fn tools_list_offers_ask_question() {
        let server = server(Arc::new(ScriptedProvider::new(vec![])));
        let reply = call(&server, r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#).await;

        let tools = reply["result"]["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["name"], "ask_question");
        assert_eq!(tools[0]["inputSchema"]["required"], json!(["question"]));
    }

    #[tokio::test]
    async fn ask_question_runs_the_loop() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_calls(vec![(
                "call_1",
                "Stats",
                r#"{"tool":"get_statistics","location_id":"LOC001"}"#,
            )]),
            text("918,117 (Source: Stats > get_statistics)"),
        ]));
        let server = server(provider.clone());
        let reply = call(
            &server,
            r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"ask_question","arguments":{"question":"Population of LOC001?"}}}"#,
        )
        .await;

        assert_eq!(
            reply["result"]["content"],
            json!([{"type": "text", "text": "918,117 (Source: Stats > get_statistics)"}])
        );
        assert!(reply["result"].get("isError").is_none());
        assert_eq!(provider.requests().len(), 2);
    }

    #[tokio::test]
    async fn missing_question_is_a_tool_error() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let server = server(provider.clone());
        let reply = call(
            &server,
            r#"{"jsonrpc":"2.0","id":4,"method":"tools/call","params":{"name":"ask_question","arguments":{}}}"#,
        )
        .await;

        assert_eq!(reply["result"]["isError"], true);
        assert_eq!(reply["result"]["content"][0]["text"], "Error: Question is required");
        assert!(provider.requests().is_empty());
    }

    #[tokio::test]
    async fn unknown_tool_is_a_tool_error() {
        let server = server(Arc::new(ScriptedProvider::new(vec![])));
        let reply = call(
            &server,
            r#"{"jsonrpc":"2.0","id":5,"method":"tools/call","params":{"name":"delete_everything","arguments":{}}}"#,
        )
        .await;

        assert_eq!(reply["result"]["isError"], true);
        assert_eq!(reply["result"]["content"][0]["text"], "Unknown tool: delete_everything");
    }

    #[tokio::test]
    async fn unknown_method_is_not_found() {
        let server = server(Arc::new(ScriptedProvider::new(vec![])));
        let reply = call(&server, r#"{"jsonrpc":"2.0","id":6,"method":"resources/list"}"#).await;

        assert_eq!(reply["error"]["code"], ERROR_METHOD_NOT_FOUND);
        assert_eq!(reply["error"]["message"], "Method not found: resources/list");
    }

    #[tokio::test]
    async fn garbage_line_is_internal_error_with_null_id() {
        let server = server(Arc::new(ScriptedProvider::new(vec![])));
        let reply = call(&server, "{not json").await;

        assert_eq!(reply["error"]["code"], ERROR_INTERNAL);
        assert!(reply["id"].is_null());
    }

    #[tokio::test]
    async fn notifications_and_blank_lines_get_no_reply() {
        let server = server(Arc::new(ScriptedProvider::new(vec![])));
        assert!(server
            .handle_line(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .await
            .is_none());
        assert!(server.handle_line("   ").await.is_none());
    }

    #[tokio::test]
    async fn non_utf8_line_gets_an_error_and_serving_continues() {
        let server = server(Arc::new(ScriptedProvider::new(vec![])));
        let mut input = b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"\xff\xfe\"}\n".to_vec();
        input.extend_from_slice(br#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#);
        input.push(b'\n');

        let mut output = Vec::new();
        server
            .serve(BufReader::new(input.as_slice()), &mut output)
            .await
            .unwrap();

        let replies: Vec<Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0]["error"]["code"], ERROR_INTERNAL);
        assert!(replies[0]["id"].is_null());
        assert_eq!(replies[1]["id"], 2);
        assert_eq!(replies[1]["result"]["tools"][0]["name"], "ask_question");
    }

    #[tokio::test]
    async fn serve_answers_each_line_in_order() {
        let server = server(Arc::new(ScriptedProvider::new(vec![])));
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#,
            "\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
            "\n",
        );
        let mut output = Vec::new();
        server
            .serve(BufReader::new(input.as_bytes()), &mut output)
            .await
            .unwrap();

        let text = String::from_utf8(output).unwrap();
        let ids: Vec<Value> = text
            .lines()
            .map(|line| serde_json::from_str::<Value>(line).unwrap()["id"].clone())
            .collect();
        assert_eq!(ids, vec![json!(1), json!(2)]);
    }
}
