//! The orchestration loop that turns one question into an answer.
//!
//! 1. **Seed** the conversation with the system instruction and the question
//! 2. **Ask** the reasoning component, offering one selector schema per worker
//! 3. **If tool calls**: resolve each to a worker operation, run it over a
//!    fresh RPC session, append the result, and ask again
//! 4. **If text**: that is the answer
//!
//! The round trips are bounded by an iteration budget. [`server`] exposes the
//! loop itself as a line-delimited JSON-RPC worker.

pub mod loop_runner;
pub mod outcome;
pub mod server;

#[cfg(test)]
mod test_helpers;

pub use loop_runner::{DEFAULT_MAX_ITERATIONS, LoopState, OrchestrationLoop, RunState};
pub use outcome::{InvocationRecord, OrchestrationOutcome, Termination};
pub use server::AgentServer;
