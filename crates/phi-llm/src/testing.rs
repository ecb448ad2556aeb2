//! Test doubles for downstream crates.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::errors::ProviderError;
use crate::provider::{ProviderClient, StreamOptions};
use crate::stream::{EventStream, StaticEventStream, StreamEvent};
use crate::types::{AssistantMessage, ContentPart, Conversation, Model, Role, StopReason, Usage};

pub type MockStreamHandler = Arc<
    dyn Fn(&Model, &Conversation, &StreamOptions) -> Result<Box<dyn EventStream>, ProviderError>
        + Send
        + Sync,
>;

/// Provider client driven by a handler closure.
pub struct MockClient {
    handler: MockStreamHandler,
}

impl MockClient {
    pub fn new(
        handler: impl Fn(&Model, &Conversation, &StreamOptions) -> Result<Box<dyn EventStream>, ProviderError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self {
            handler: Arc::new(handler),
        }
    }
}

#[async_trait]
impl ProviderClient for MockClient {
    async fn stream(
        &self,
        _cancel: CancellationToken,
        model: &Model,
        conversation: Conversation,
        options: StreamOptions,
    ) -> Result<Box<dyn EventStream>, ProviderError> {
        (self.handler)(model, &conversation, &options)
    }
}

/// Canned stream yielding `start`, a single text delta, and `done`, with a
/// matching finalized assistant message.
pub fn text_stream(text: &str, model: &Model) -> Box<dyn EventStream> {
    let assistant = AssistantMessage {
        role: Role::Assistant,
        content: vec![ContentPart::text(text)],
        provider: model.provider.clone(),
        model: model.id.clone(),
        stop_reason: StopReason::Stop,
        error_message: String::new(),
        usage: Usage::default(),
        timestamp: 0,
    };
    Box::new(StaticEventStream::new(
        vec![
            StreamEvent::start(),
            StreamEvent::text_delta(text),
            StreamEvent::done(StopReason::Stop),
        ],
        assistant,
    ))
}

/// Canned stream that finalizes into a single tool call with
/// `stop_reason = tool_use`.
pub fn tool_call_stream(
    call_id: &str,
    name: &str,
    arguments: Map<String, Value>,
    model: &Model,
) -> Box<dyn EventStream> {
    let assistant = AssistantMessage {
        role: Role::Assistant,
        content: vec![ContentPart::tool_call(call_id, name, arguments.clone())],
        provider: model.provider.clone(),
        model: model.id.clone(),
        stop_reason: StopReason::ToolUse,
        error_message: String::new(),
        usage: Usage::default(),
        timestamp: 0,
    };
    Box::new(StaticEventStream::new(
        vec![
            StreamEvent::start(),
            StreamEvent::tool_call(call_id, name, arguments),
            StreamEvent::done(StopReason::ToolUse),
        ],
        assistant,
    ))
}
