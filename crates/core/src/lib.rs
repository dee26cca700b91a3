//! # RustedBridge Core
//!
//! Domain types, traits, and error definitions for the RustedBridge worker
//! tool bridge. This crate does no I/O of its own; it defines the domain
//! model that the transport, catalog, provider and agent crates implement
//! against.
//!
//! ## Design Philosophy
//!
//! The two external collaborators are traits here:
//! - [`WorkerConnector`] opens a fresh byte channel to a named worker
//! - [`Provider`] is the reasoning component that proposes tool calls
//!
//! Everything else (framing, sessions, catalog, orchestration) is written
//! against those traits, so tests swap in scripted workers and providers.

pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod rpc;
pub mod worker;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ProtocolError, ProviderError, ResolutionError, Result, TransportError};
pub use event::{DomainEvent, EventBus};
pub use message::{Conversation, Message, MessageToolCall, Role};
pub use provider::{Proposal, Provider, ProviderRequest, ProviderResponse, Usage};
pub use rpc::{ClientInfo, RpcErrorObject, RpcRequest, RpcResponse, ToolSchema};
pub use worker::{WorkerConnector, WorkerSpec, WorkerState, WorkerStream};
