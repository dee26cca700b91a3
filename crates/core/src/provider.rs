//! Provider trait, the abstraction over the reasoning component.
//!
//! A Provider receives the conversation so far plus the callable tool
//! schemas and answers with either free text or a list of tool invocations.
//! The orchestration loop never looks behind this trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::{Message, MessageToolCall};
use crate::rpc::ToolSchema;

/// A request to the reasoning component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model (or deployment) to use
    pub model: String,

    /// The conversation turns
    pub messages: Vec<Message>,

    /// Temperature (0.0 = deterministic)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Tools the model may call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSchema>,
}

fn default_temperature() -> f32 {
    0.7
}

/// A complete response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// The generated assistant turn
    pub message: Message,

    /// Token usage statistics
    pub usage: Option<Usage>,

    /// Which model actually responded
    pub model: String,
}

impl ProviderResponse {
    /// Classify the response the way the orchestration loop consumes it.
    pub fn proposal(&self) -> Proposal {
        if !self.message.tool_calls.is_empty() {
            Proposal::ToolCalls(self.message.tool_calls.clone())
        } else if !self.message.content.trim().is_empty() {
            Proposal::FinalAnswer(self.message.content.clone())
        } else {
            Proposal::Nothing
        }
    }
}

/// What the reasoning component wants to do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Proposal {
    FinalAnswer(String),
    ToolCalls(Vec<MessageToolCall>),
    /// Neither text nor tool calls
    Nothing,
}

/// Token usage information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "azure", "openrouter").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError>;

    /// Health check: can we reach the provider?
    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        Ok(true)
    }
}
