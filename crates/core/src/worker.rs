//! Worker trait: how the bridge reaches a worker process.
//!
//! A worker is an independently running process that speaks the tool-call
//! protocol over a framed byte stream. The core only needs a way to open a
//! fresh bidirectional channel to one by name; whether that is a container
//! exec, a remote attach, or an in-memory pipe is up to the connector.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::TransportError;

/// A configured worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSpec {
    /// Selector name shown to the reasoning component (e.g. "Kadaster")
    pub name: String,

    /// Container (or process) that hosts the worker
    pub container: String,

    /// What the worker is good for, shown to the reasoning component
    #[serde(default)]
    pub description: String,

    /// Command that starts the worker's protocol loop inside the container
    #[serde(default = "default_command")]
    pub command: Vec<String>,
}

pub fn default_command() -> Vec<String> {
    vec!["python".into(), "-u".into(), "server.py".into()]
}

impl WorkerSpec {
    pub fn new(
        name: impl Into<String>,
        container: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            container: container.into(),
            description: description.into(),
            command: default_command(),
        }
    }
}

/// A bidirectional byte stream to one worker.
pub trait WorkerStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> WorkerStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Observed run state of a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerState {
    Running,
    /// Exists but is not running; carries the reported state (e.g. "exited")
    Stopped(String),
    Missing,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Stopped(state) => write!(f, "{state}"),
            Self::Missing => write!(f, "missing"),
        }
    }
}

#[async_trait]
pub trait WorkerConnector: Send + Sync {
    /// Open a fresh channel to the named worker.
    ///
    /// Must fail with [`TransportError::NotReady`] or
    /// [`TransportError::Unreachable`] without touching the protocol when
    /// the worker cannot serve a session.
    async fn open_channel(
        &self,
        worker: &WorkerSpec,
    ) -> std::result::Result<Box<dyn WorkerStream>, TransportError>;

    /// Report the worker's run state.
    async fn inspect(&self, worker: &WorkerSpec) -> std::result::Result<WorkerState, TransportError>;
}
