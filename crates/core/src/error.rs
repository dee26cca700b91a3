//! Error types for the RustedBridge domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context (transport, protocol, resolution, reasoning) has its
//! own error enum; the top-level [`Error`] wraps them.
//!
//! Only [`ProviderError`] and configuration failures ever escape to a caller
//! of the orchestration loop. Transport, protocol and resolution errors are
//! turned into structured tool results before they reach the reasoning
//! component.

use thiserror::Error;

/// The top-level error type for all RustedBridge operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Resolution error: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Errors from the reasoning component (the LLM backend).
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// Failures of the byte channel to a worker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Worker {worker} is unreachable: {reason}")]
    Unreachable { worker: String, reason: String },

    #[error("Worker {worker} is not running (state: {state})")]
    NotReady { worker: String, state: String },

    #[error("I/O failure talking to {worker}: {reason}")]
    Io { worker: String, reason: String },

    #[error("Worker {worker} closed the stream before a complete reply")]
    Truncated { worker: String, partial: String },
}

impl TransportError {
    /// Whatever partial reply text was decoded before the failure, if any.
    pub fn partial(&self) -> Option<&str> {
        match self {
            Self::Truncated { partial, .. } if !partial.is_empty() => Some(partial),
            _ => None,
        }
    }
}

/// A reply arrived but is not a usable JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Invalid JSON response: {reason}")]
    InvalidJson { reason: String, raw: String },

    #[error("Response carries neither result nor error")]
    MissingResult { raw: String },

    #[error("Unexpected response shape: {reason}")]
    UnexpectedShape { reason: String },

    #[error("Reply id {found} does not match request id {expected}")]
    MismatchedId { expected: u64, found: String, raw: String },
}

impl ProtocolError {
    /// The raw reply text, kept for diagnostics.
    pub fn raw(&self) -> Option<&str> {
        match self {
            Self::InvalidJson { raw, .. } | Self::MissingResult { raw } | Self::MismatchedId { raw, .. } => {
                Some(raw)
            }
            Self::UnexpectedShape { .. } => None,
        }
    }
}

/// A proposed invocation could not be mapped onto a worker operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    #[error("Unknown worker: {0}")]
    UnknownWorker(String),

    #[error("Unknown operation {operation} on worker {worker}")]
    UnknownOperation { worker: String, operation: String },

    #[error("Missing '{argument}' argument for {operation}")]
    MissingArgument { operation: String, argument: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}
