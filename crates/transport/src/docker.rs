//! Docker Engine connector.
//!
//! Opens worker channels by creating an exec instance inside the worker's
//! container and hijacking the HTTP connection of `POST /exec/{id}/start`.
//! With `Tty: false` the engine multiplexes the process's stdout and stderr
//! into the 8-byte-header frames that [`crate::frame`] decodes.
//!
//! Talks to the engine over its Unix socket with hyper's legacy client and
//! `hyperlocal`.

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyperlocal::UnixConnector;
use rustedbridge_core::error::TransportError;
use rustedbridge_core::worker::{WorkerConnector, WorkerSpec, WorkerState, WorkerStream};
use serde_json::{Value, json};

type HyperClient = Client<UnixConnector, Full<Bytes>>;

pub const DEFAULT_SOCKET_PATH: &str = "/var/run/docker.sock";

/// Reaches workers running as Docker containers.
pub struct DockerConnector {
    client: HyperClient,
    socket_path: String,
}

impl DockerConnector {
    pub fn new(socket_path: impl Into<String>) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(UnixConnector);
        Self {
            client,
            socket_path: socket_path.into(),
        }
    }

    pub fn socket_path(&self) -> &str {
        &self.socket_path
    }

    async fn send(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<Value>,
        upgrade: bool,
    ) -> Result<Response<Incoming>, String> {
        let uri: hyper::Uri = hyperlocal::Uri::new(&self.socket_path, endpoint).into();
        let payload = match body {
            Some(value) => Bytes::from(serde_json::to_vec(&value).map_err(|e| e.to_string())?),
            None => Bytes::new(),
        };

        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("Content-Type", "application/json");
        if upgrade {
            builder = builder
                .header("Connection", "Upgrade")
                .header("Upgrade", "tcp");
        }
        let req = builder.body(Full::new(payload)).map_err(|e| e.to_string())?;

        self.client.request(req).await.map_err(|e| {
            format!("Docker engine at {} unavailable: {e}", self.socket_path)
        })
    }

    async fn read_json(response: Response<Incoming>) -> (StatusCode, Value) {
        let status = response.status();
        let body = match response.into_body().collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(_) => Bytes::new(),
        };
        let value = serde_json::from_slice(&body)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body).into_owned()));
        (status, value)
    }

    async fn container_state(&self, worker: &WorkerSpec) -> Result<WorkerState, TransportError> {
        let endpoint = format!("/containers/{}/json", worker.container);
        let response = self
            .send(Method::GET, &endpoint, None, false)
            .await
            .map_err(|reason| unreachable(worker, reason))?;
        let (status, body) = Self::read_json(response).await;

        if status == StatusCode::NOT_FOUND {
            return Ok(WorkerState::Missing);
        }
        if !status.is_success() {
            return Err(unreachable(worker, engine_message(status, &body)));
        }

        let state = body["State"]["Status"].as_str().unwrap_or("unknown");
        Ok(if state == "running" {
            WorkerState::Running
        } else {
            WorkerState::Stopped(state.to_string())
        })
    }

    async fn create_exec(&self, worker: &WorkerSpec) -> Result<String, TransportError> {
        let endpoint = format!("/containers/{}/exec", worker.container);
        let body = json!({
            "AttachStdin": true,
            "AttachStdout": true,
            "AttachStderr": true,
            "Tty": false,
            "Cmd": worker.command,
        });
        let response = self
            .send(Method::POST, &endpoint, Some(body), false)
            .await
            .map_err(|reason| unreachable(worker, reason))?;
        let (status, body) = Self::read_json(response).await;

        match status {
            s if s.is_success() => body["Id"]
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| unreachable(worker, "exec create returned no Id".into())),
            StatusCode::CONFLICT => Err(TransportError::NotReady {
                worker: worker.name.clone(),
                state: engine_message(status, &body),
            }),
            _ => Err(unreachable(worker, engine_message(status, &body))),
        }
    }

    async fn start_exec(
        &self,
        worker: &WorkerSpec,
        exec_id: &str,
    ) -> Result<Box<dyn WorkerStream>, TransportError> {
        let endpoint = format!("/exec/{exec_id}/start");
        let response = self
            .send(
                Method::POST,
                &endpoint,
                Some(json!({ "Detach": false, "Tty": false })),
                true,
            )
            .await
            .map_err(|reason| unreachable(worker, reason))?;

        let status = response.status();
        if status != StatusCode::SWITCHING_PROTOCOLS {
            let (status, body) = Self::read_json(response).await;
            return Err(TransportError::Io {
                worker: worker.name.clone(),
                reason: format!("exec start not upgraded: {}", engine_message(status, &body)),
            });
        }

        let upgraded = hyper::upgrade::on(response)
            .await
            .map_err(|e| TransportError::Io {
                worker: worker.name.clone(),
                reason: format!("exec stream upgrade failed: {e}"),
            })?;
        Ok(Box::new(TokioIo::new(upgraded)))
    }
}

impl Default for DockerConnector {
    fn default() -> Self {
        Self::new(DEFAULT_SOCKET_PATH)
    }
}

#[async_trait]
impl WorkerConnector for DockerConnector {
    async fn open_channel(&self, worker: &WorkerSpec) -> Result<Box<dyn WorkerStream>, TransportError> {
        match self.container_state(worker).await? {
            WorkerState::Running => {}
            WorkerState::Stopped(state) => {
                return Err(TransportError::NotReady {
                    worker: worker.name.clone(),
                    state,
                });
            }
            WorkerState::Missing => {
                return Err(unreachable(
                    worker,
                    format!("no such container: {}", worker.container),
                ));
            }
        }

        let exec_id = self.create_exec(worker).await?;
        tracing::debug!(worker = %worker.name, container = %worker.container, exec_id = %exec_id, "Exec created");
        self.start_exec(worker, &exec_id).await
    }

    async fn inspect(&self, worker: &WorkerSpec) -> Result<WorkerState, TransportError> {
        self.container_state(worker).await
    }
}

fn unreachable(worker: &WorkerSpec, reason: String) -> TransportError {
    TransportError::Unreachable {
        worker: worker.name.clone(),
        reason,
    }
}

/// The engine reports errors as `{"message": "..."}`.
fn engine_message(status: StatusCode, body: &Value) -> String {
    match body.get("message").and_then(Value::as_str) {
        Some(msg) => format!("{status}: {msg}"),
        None => match body {
            Value::String(text) if !text.is_empty() => format!("{status}: {text}"),
            _ => status.to_string(),
        },
    }
}
