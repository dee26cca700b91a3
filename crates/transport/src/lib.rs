//! Worker transport for RustedBridge.
//!
//! - [`frame`]: demultiplexes the 8-byte-header attach stream into messages
//! - [`session`]: single-use handshake/call/close RPC sessions
//! - [`docker`]: opens worker channels through the Docker Engine API

pub mod docker;
pub mod frame;
pub mod session;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use docker::DockerConnector;
pub use frame::{Channel, DemuxedMessage, FrameHeader, read_message};
pub use session::{CallOutcome, RpcSession, SessionConfig, SessionError, WorkerClient};
