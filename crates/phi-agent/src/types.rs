//! Agent-level types: events, session messages, state, and the tool
//! contract.

use std::sync::Arc;

use async_trait::async_trait;
use phi_llm::{AssistantMessage, ContentPart, Message, Model, Role, StreamEvent, StreamEventType};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::ToolError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingLevel {
    #[default]
    Off,
    Minimal,
    Low,
    Medium,
    High,
    Xhigh,
}

impl ThinkingLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Minimal => "minimal",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Xhigh => "xhigh",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentEventType {
    TurnStart,
    TurnEnd,
    MessageStart,
    MessageUpdate,
    MessageEnd,
    ToolExecutionStart,
    ToolExecutionEnd,
}

/// One entry of the session log: user and tool-result messages use the
/// plain [`Message`] shape, assistant messages carry provider metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SessionMessage {
    Assistant(AssistantMessage),
    Plain(Message),
}

impl SessionMessage {
    pub fn role(&self) -> Role {
        match self {
            Self::Assistant(_) => Role::Assistant,
            Self::Plain(message) => message.role,
        }
    }

    pub fn content(&self) -> &[ContentPart] {
        match self {
            Self::Assistant(message) => &message.content,
            Self::Plain(message) => &message.content,
        }
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            Self::Assistant(message) => message.timestamp,
            Self::Plain(message) => message.timestamp,
        }
    }

    pub fn set_timestamp(&mut self, timestamp: i64) {
        match self {
            Self::Assistant(message) => message.timestamp = timestamp,
            Self::Plain(message) => message.timestamp = timestamp,
        }
    }

    pub fn as_assistant(&self) -> Option<&AssistantMessage> {
        match self {
            Self::Assistant(message) => Some(message),
            Self::Plain(_) => None,
        }
    }

    pub fn as_plain(&self) -> Option<&Message> {
        match self {
            Self::Plain(message) => Some(message),
            Self::Assistant(_) => None,
        }
    }
}

impl From<Message> for SessionMessage {
    fn from(message: Message) -> Self {
        Self::Plain(message)
    }
}

impl From<AssistantMessage> for SessionMessage {
    fn from(message: AssistantMessage) -> Self {
        Self::Assistant(message)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentEvent {
    #[serde(rename = "type")]
    pub event_type: AgentEventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<StreamEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<SessionMessage>,
    #[serde(rename = "toolName", default, skip_serializing_if = "String::is_empty")]
    pub tool_name: String,
    #[serde(rename = "toolCallId", default, skip_serializing_if = "String::is_empty")]
    pub tool_call_id: String,
    #[serde(rename = "isError", default, skip_serializing_if = "is_false")]
    pub is_error: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl AgentEvent {
    fn bare(event_type: AgentEventType) -> Self {
        Self {
            event_type,
            stream: None,
            message: None,
            tool_name: String::new(),
            tool_call_id: String::new(),
            is_error: false,
        }
    }

    pub fn turn_start() -> Self {
        Self::bare(AgentEventType::TurnStart)
    }

    pub fn turn_end() -> Self {
        Self::bare(AgentEventType::TurnEnd)
    }

    /// Map a stream event onto its agent-level counterpart.
    pub fn from_stream(event: &StreamEvent) -> Self {
        let event_type = match event.event_type {
            StreamEventType::Start => AgentEventType::MessageStart,
            StreamEventType::TextDelta | StreamEventType::ThinkingDelta => {
                AgentEventType::MessageUpdate
            }
            StreamEventType::ToolCall => AgentEventType::ToolExecutionStart,
            StreamEventType::Done => AgentEventType::MessageEnd,
            StreamEventType::Error => AgentEventType::ToolExecutionEnd,
        };
        Self {
            stream: Some(event.clone()),
            ..Self::bare(event_type)
        }
    }

    pub fn message_appended(event_type: AgentEventType, message: SessionMessage) -> Self {
        Self {
            message: Some(message),
            ..Self::bare(event_type)
        }
    }

    pub fn message_end(message: SessionMessage) -> Self {
        Self::message_appended(AgentEventType::MessageEnd, message)
    }

    pub fn tool_execution_start(tool_name: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            tool_call_id: tool_call_id.into(),
            ..Self::bare(AgentEventType::ToolExecutionStart)
        }
    }

    pub fn tool_execution_end(
        tool_name: impl Into<String>,
        tool_call_id: impl Into<String>,
        is_error: bool,
        message: SessionMessage,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            tool_call_id: tool_call_id.into(),
            is_error,
            message: Some(message),
            ..Self::bare(AgentEventType::ToolExecutionEnd)
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    #[serde(default)]
    pub content: Vec<ContentPart>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub details: Map<String, Value>,
}

/// A callable tool. Calls are awaited one at a time, in the order the
/// model emitted them; implementations must not assume concurrency.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters(&self) -> Map<String, Value>;
    async fn execute(
        &self,
        tool_call_id: &str,
        args: &Map<String, Value>,
    ) -> Result<ToolResult, ToolError>;
}

#[derive(Clone, Default)]
pub struct AgentState {
    pub system_prompt: String,
    pub model: Option<Model>,
    pub thinking_level: ThinkingLevel,
    pub messages: Vec<SessionMessage>,
    pub is_streaming: bool,
    pub tools: Vec<Arc<dyn Tool>>,
}

impl std::fmt::Debug for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentState")
            .field("system_prompt", &self.system_prompt)
            .field("model", &self.model)
            .field("thinking_level", &self.thinking_level)
            .field("messages", &self.messages.len())
            .field("is_streaming", &self.is_streaming)
            .field("tools", &self.tools.len())
            .finish()
    }
}
