//! Scripted in-memory workers.
//!
//! [`ScriptedConnector`] implements [`WorkerConnector`] over
//! `tokio::io::duplex` pipes. Each opened channel spawns a fake worker task
//! that answers newline-delimited JSON-RPC requests with framed replies, so
//! the whole session path (framing, handshake, teardown) runs for real.
//! Counters record opens, closes, and request methods per worker.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rustedbridge_core::error::TransportError;
use rustedbridge_core::rpc::{
    ERROR_METHOD_NOT_FOUND, METHOD_CALL_TOOL, METHOD_INITIALIZE, METHOD_LIST_TOOLS, RpcRequest,
    RpcResponse, ToolSchema,
};
use rustedbridge_core::worker::{WorkerConnector, WorkerSpec, WorkerState, WorkerStream};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Notify;

pub use crate::frame::{Channel, encode_frame};

/// Result of a scripted `tools/call`: a result value, or an error code and message.
pub type HandlerResult = Result<Value, (i64, String)>;

type Handler = Arc<dyn Fn(&str, &Value) -> HandlerResult + Send + Sync>;

#[derive(Clone)]
enum ReplyOverride {
    /// Sent as a complete primary line
    Garbled(String),
    /// Sent without a newline, then the worker closes its output
    Truncated(String),
}

/// Behaviour of one fake worker.
#[derive(Clone)]
pub struct ScriptedWorker {
    name: String,
    tools: Vec<ToolSchema>,
    handler: Handler,
    state: WorkerState,
    reply_override: Option<ReplyOverride>,
    diagnostics: Vec<String>,
    split: Option<usize>,
    delay: Option<Duration>,
}

impl ScriptedWorker {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tools: Vec::new(),
            handler: Arc::new(|name, args| {
                Ok(json!({
                    "content": [{"type": "text", "text": json!({"tool": name, "arguments": args}).to_string()}]
                }))
            }),
            state: WorkerState::Running,
            reply_override: None,
            diagnostics: Vec::new(),
            split: None,
            delay: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Advertise an operation taking an optional `location_id`.
    pub fn with_tool(self, name: &str, description: &str) -> Self {
        self.with_tool_schema(ToolSchema {
            name: name.into(),
            description: description.into(),
            input_schema: json!({
                "type": "object",
                "properties": {"location_id": {"type": "string"}},
            }),
        })
    }

    pub fn with_tool_schema(mut self, schema: ToolSchema) -> Self {
        self.tools.push(schema);
        self
    }

    pub fn with_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str, &Value) -> HandlerResult + Send + Sync + 'static,
    {
        self.handler = Arc::new(handler);
        self
    }

    /// Report the worker as existing but stopped.
    pub fn not_ready(mut self, state: &str) -> Self {
        self.state = WorkerState::Stopped(state.into());
        self
    }

    /// Report the worker as missing entirely.
    pub fn missing(mut self) -> Self {
        self.state = WorkerState::Missing;
        self
    }

    /// Answer every post-handshake request with `text` as a complete line.
    pub fn with_garbled_reply(mut self, text: &str) -> Self {
        self.reply_override = Some(ReplyOverride::Garbled(text.into()));
        self
    }

    /// Answer every post-handshake request with `text` and no newline,
    /// then close the output side.
    pub fn with_truncated_reply(mut self, text: &str) -> Self {
        self.reply_override = Some(ReplyOverride::Truncated(text.into()));
        self
    }

    /// Emit these lines on the diagnostic channel before every reply.
    pub fn with_diagnostics(mut self, lines: &[&str]) -> Self {
        self.diagnostics = lines.iter().map(|l| l.to_string()).collect();
        self
    }

    /// Split every primary reply into frames of at most `max` bytes.
    pub fn with_split_frames(mut self, max: usize) -> Self {
        self.split = Some(max.max(1));
        self
    }

    /// Sleep before answering any post-handshake request.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn respond(&self, request: &RpcRequest) -> Option<RpcResponse> {
        let id = request.id.clone()?;
        let response = match request.method.as_str() {
            METHOD_INITIALIZE => RpcResponse::success(
                id,
                json!({
                    "protocolVersion": request.params["protocolVersion"],
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": self.name, "version": "1.0.0"},
                }),
            ),
            METHOD_LIST_TOOLS => RpcResponse::success(id, json!({ "tools": self.tools })),
            METHOD_CALL_TOOL => {
                let name = request.params["name"].as_str().unwrap_or_default();
                let args = request.params.get("arguments").cloned().unwrap_or(json!({}));
                match (self.handler)(name, &args) {
                    Ok(result) => RpcResponse::success(id, result),
                    Err((code, message)) => RpcResponse::failure(id, code, message),
                }
            }
            other => RpcResponse::failure(id, ERROR_METHOD_NOT_FOUND, format!("Method not found: {other}")),
        };
        Some(response)
    }
}

#[derive(Default)]
struct Counters {
    opens: AtomicUsize,
    closes: AtomicUsize,
    methods: Mutex<Vec<String>>,
    closed: Notify,
}

/// An in-memory [`WorkerConnector`] backed by [`ScriptedWorker`]s, keyed by
/// worker name.
#[derive(Default)]
pub struct ScriptedConnector {
    workers: HashMap<String, ScriptedWorker>,
    counters: HashMap<String, Arc<Counters>>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_worker(mut self, worker: ScriptedWorker) -> Self {
        self.counters
            .insert(worker.name.clone(), Arc::new(Counters::default()));
        self.workers.insert(worker.name.clone(), worker);
        self
    }

    /// Channels opened to `worker`.
    pub fn opens(&self, worker: &str) -> usize {
        self.counters
            .get(worker)
            .map_or(0, |c| c.opens.load(Ordering::SeqCst))
    }

    /// Channels to `worker` whose caller side has been closed.
    pub fn closes(&self, worker: &str) -> usize {
        self.counters
            .get(worker)
            .map_or(0, |c| c.closes.load(Ordering::SeqCst))
    }

    /// Requests with `method` received by `worker`.
    pub fn requests(&self, worker: &str, method: &str) -> usize {
        self.methods(worker).iter().filter(|m| *m == method).count()
    }

    /// Every request method received by `worker`, in order.
    pub fn methods(&self, worker: &str) -> Vec<String> {
        self.counters
            .get(worker)
            .and_then(|c| c.methods.lock().ok().map(|m| m.clone()))
            .unwrap_or_default()
    }

    /// Wait until `worker` has seen at least `count` closed channels.
    ///
    /// Panics after five seconds.
    pub async fn wait_closed(&self, worker: &str, count: usize) {
        let Some(counters) = self.counters.get(worker) else {
            panic!("no scripted worker named {worker}");
        };
        let wait = async {
            loop {
                let notified = counters.closed.notified();
                if counters.closes.load(Ordering::SeqCst) >= count {
                    return;
                }
                notified.await;
            }
        };
        if tokio::time::timeout(Duration::from_secs(5), wait).await.is_err() {
            panic!("worker {worker} never saw {count} closed channel(s)");
        }
    }
}

#[async_trait]
impl WorkerConnector for ScriptedConnector {
    async fn open_channel(&self, spec: &WorkerSpec) -> Result<Box<dyn WorkerStream>, TransportError> {
        let worker = match self.workers.get(&spec.name) {
            Some(w) => w.clone(),
            None => {
                return Err(TransportError::Unreachable {
                    worker: spec.name.clone(),
                    reason: format!("no such container: {}", spec.container),
                });
            }
        };
        match &worker.state {
            WorkerState::Running => {}
            WorkerState::Stopped(state) => {
                return Err(TransportError::NotReady {
                    worker: spec.name.clone(),
                    state: state.clone(),
                });
            }
            WorkerState::Missing => {
                return Err(TransportError::Unreachable {
                    worker: spec.name.clone(),
                    reason: format!("no such container: {}", spec.container),
                });
            }
        }

        let counters = self.counters.get(&spec.name).cloned().unwrap_or_default();
        counters.opens.fetch_add(1, Ordering::SeqCst);

        let (caller, worker_side) = tokio::io::duplex(64 * 1024);
        tokio::spawn(serve(worker, worker_side, counters));
        Ok(Box::new(caller))
    }

    async fn inspect(&self, spec: &WorkerSpec) -> Result<WorkerState, TransportError> {
        Ok(self
            .workers
            .get(&spec.name)
            .map_or(WorkerState::Missing, |w| w.state.clone()))
    }
}

async fn serve(worker: ScriptedWorker, io: tokio::io::DuplexStream, counters: Arc<Counters>) {
    let (read_half, mut write_half) = tokio::io::split(io);
    let mut lines = BufReader::new(read_half).lines();
    let mut output_open = true;

    while let Ok(Some(line)) = lines.next_line().await {
        let Ok(request) = serde_json::from_str::<RpcRequest>(&line) else {
            continue;
        };
        if let Ok(mut methods) = counters.methods.lock() {
            methods.push(request.method.clone());
        }
        if !output_open {
            continue;
        }

        let is_handshake = request.method == METHOD_INITIALIZE;
        if !is_handshake {
            if let Some(delay) = worker.delay {
                tokio::time::sleep(delay).await;
            }
        }

        for diag in &worker.diagnostics {
            let frame = encode_frame(Channel::Diagnostic, format!("{diag}\n").as_bytes());
            if write_half.write_all(&frame).await.is_err() {
                break;
            }
        }

        match (&worker.reply_override, is_handshake) {
            (Some(ReplyOverride::Garbled(text)), false) => {
                write_primary(&mut write_half, format!("{text}\n").as_bytes(), worker.split).await;
            }
            (Some(ReplyOverride::Truncated(text)), false) => {
                write_primary(&mut write_half, text.as_bytes(), worker.split).await;
                let _ = write_half.shutdown().await;
                output_open = false;
            }
            _ => {
                let Some(response) = worker.respond(&request) else {
                    continue;
                };
                if let Ok(mut text) = serde_json::to_string(&response) {
                    text.push('\n');
                    write_primary(&mut write_half, text.as_bytes(), worker.split).await;
                }
            }
        }
    }

    counters.closes.fetch_add(1, Ordering::SeqCst);
    counters.closed.notify_waiters();
}

async fn write_primary<W>(writer: &mut W, payload: &[u8], split: Option<usize>)
where
    W: AsyncWrite + Unpin,
{
    let chunk = split.unwrap_or(payload.len().max(1));
    for part in payload.chunks(chunk) {
        if writer.write_all(&encode_frame(Channel::Primary, part)).await.is_err() {
            return;
        }
    }
    let _ = writer.flush().await;
}
