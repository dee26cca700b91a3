//! Conversation state for one top-level request.
//!
//! A [`Conversation`] is seeded with a system instruction and the caller's
//! question, then only ever grows: assistant proposals and tool results are
//! appended in order. It is dropped when the orchestration loop returns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The role of a turn in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Fixed instructions for the reasoning component
    System,
    /// The caller's question
    User,
    /// A proposal from the reasoning component
    Assistant,
    /// The outcome of one tool invocation
    Tool,
}

/// A tool invocation proposed by the reasoning component.
///
/// `arguments` is the raw JSON text the model produced; it is only parsed
/// during resolution so that malformed arguments surface as a tool result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// A single turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,

    #[serde(default)]
    pub content: String,

    /// Invocations proposed by an assistant turn
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<MessageToolCall>,

    /// For tool turns, the invocation this result answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// An assistant turn that proposes tool invocations.
    pub fn assistant_tool_calls(tool_calls: Vec<MessageToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::new(Role::Assistant, "")
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::new(Role::Tool, content)
        }
    }
}

/// Append-only ordered turns for one request.
#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    id: Uuid,
    started_at: DateTime<Utc>,
    messages: Vec<Message>,
}

impl Conversation {
    /// Seed a conversation with the system instruction and the question.
    pub fn seeded(system_prompt: impl Into<String>, question: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            messages: vec![Message::system(system_prompt), Message::user(question)],
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Number of tool-result turns recorded so far.
    pub fn tool_results(&self) -> usize {
        self.messages.iter().filter(|m| m.role == Role::Tool).count()
    }
}
