//! Normalized event stream shared by both wire adapters.

use std::collections::VecDeque;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::errors::ProviderError;
use crate::types::{AssistantMessage, StopReason};

/// Bounded capacity of the per-turn event channel. Keeps the producer from
/// blocking on slow observers for short bursts.
pub const EVENT_BUFFER: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamEventType {
    Start,
    TextDelta,
    ThinkingDelta,
    ToolCall,
    Done,
    Error,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    #[serde(rename = "type")]
    pub event_type: StreamEventType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub delta: String,
    #[serde(rename = "toolName", default, skip_serializing_if = "String::is_empty")]
    pub tool_name: String,
    #[serde(rename = "toolCallId", default, skip_serializing_if = "String::is_empty")]
    pub tool_call_id: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub arguments: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<StopReason>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

impl StreamEvent {
    fn bare(event_type: StreamEventType) -> Self {
        Self {
            event_type,
            delta: String::new(),
            tool_name: String::new(),
            tool_call_id: String::new(),
            arguments: Map::new(),
            reason: None,
            error: String::new(),
        }
    }

    pub fn start() -> Self {
        Self::bare(StreamEventType::Start)
    }

    pub fn text_delta(delta: impl Into<String>) -> Self {
        Self {
            delta: delta.into(),
            ..Self::bare(StreamEventType::TextDelta)
        }
    }

    pub fn thinking_delta(delta: impl Into<String>) -> Self {
        Self {
            delta: delta.into(),
            ..Self::bare(StreamEventType::ThinkingDelta)
        }
    }

    pub fn tool_call(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: Map<String, Value>,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            arguments,
            ..Self::bare(StreamEventType::ToolCall)
        }
    }

    pub fn done(reason: StopReason) -> Self {
        Self {
            reason: Some(reason),
            ..Self::bare(StreamEventType::Done)
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            ..Self::bare(StreamEventType::Error)
        }
    }
}

/// Single-consumer view of one streaming round.
///
/// `recv` yields events until the stream is exhausted. `result` blocks for
/// (or returns the cached) finalized assistant message. `close` is
/// idempotent and releases the underlying transport; callers must invoke
/// it once they have read the result.
#[async_trait]
pub trait EventStream: Send {
    async fn recv(&mut self) -> Option<StreamEvent>;
    async fn result(&mut self) -> Result<AssistantMessage, ProviderError>;
    fn close(&mut self);
}

/// Event stream backed by a bounded channel fed by a consumer task.
pub struct ChannelEventStream {
    events: mpsc::Receiver<StreamEvent>,
    pending: Option<oneshot::Receiver<Result<AssistantMessage, ProviderError>>>,
    cached: Option<Result<AssistantMessage, ProviderError>>,
    cancel: CancellationToken,
}

impl ChannelEventStream {
    /// Build the stream together with its producer handles. Cancelling the
    /// token (via `close`) stops the producer at its next suspension point.
    pub fn channel(
        cancel: CancellationToken,
    ) -> (
        mpsc::Sender<StreamEvent>,
        oneshot::Sender<Result<AssistantMessage, ProviderError>>,
        Self,
    ) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let (result_tx, result_rx) = oneshot::channel();
        let stream = Self {
            events: events_rx,
            pending: Some(result_rx),
            cached: None,
            cancel,
        };
        (events_tx, result_tx, stream)
    }
}

#[async_trait]
impl EventStream for ChannelEventStream {
    async fn recv(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }

    async fn result(&mut self) -> Result<AssistantMessage, ProviderError> {
        if let Some(cached) = &self.cached {
            return cached.clone();
        }
        let outcome = match self.pending.take() {
            Some(receiver) => match receiver.await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Stream("stream result unavailable".to_string())),
            },
            None => Err(ProviderError::Stream("stream result unavailable".to_string())),
        };
        self.cached = Some(outcome.clone());
        outcome
    }

    fn close(&mut self) {
        self.cancel.cancel();
        self.events.close();
    }
}

/// Pre-baked event stream: used for the non-SSE JSON fallback and in tests.
pub struct StaticEventStream {
    events: VecDeque<StreamEvent>,
    result: Result<AssistantMessage, ProviderError>,
    closed: bool,
}

impl StaticEventStream {
    pub fn new(events: Vec<StreamEvent>, result: AssistantMessage) -> Self {
        Self {
            events: events.into(),
            result: Ok(result),
            closed: false,
        }
    }

    pub fn failed(events: Vec<StreamEvent>, error: ProviderError) -> Self {
        Self {
            events: events.into(),
            result: Err(error),
            closed: false,
        }
    }
}

#[async_trait]
impl EventStream for StaticEventStream {
    async fn recv(&mut self) -> Option<StreamEvent> {
        if self.closed {
            return None;
        }
        self.events.pop_front()
    }

    async fn result(&mut self) -> Result<AssistantMessage, ProviderError> {
        self.result.clone()
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    fn assistant(text: &str) -> AssistantMessage {
        AssistantMessage {
            role: Role::Assistant,
            content: vec![crate::types::ContentPart::text(text)],
            provider: "test".to_string(),
            model: "m1".to_string(),
            stop_reason: StopReason::Stop,
            error_message: String::new(),
            usage: Default::default(),
            timestamp: 0,
        }
    }

    #[tokio::test]
    async fn static_stream_replays_events_then_ends() {
        let mut stream = StaticEventStream::new(
            vec![StreamEvent::start(), StreamEvent::text_delta("hi")],
            assistant("hi"),
        );
        assert_eq!(
            stream.recv().await.map(|event| event.event_type),
            Some(StreamEventType::Start)
        );
        assert_eq!(stream.recv().await.map(|event| event.delta), Some("hi".to_string()));
        assert!(stream.recv().await.is_none());
        assert_eq!(stream.result().await.expect("result").text(), "hi");
    }

    #[tokio::test]
    async fn static_stream_stops_yielding_after_close() {
        let mut stream = StaticEventStream::new(vec![StreamEvent::start()], assistant("x"));
        stream.close();
        assert!(stream.recv().await.is_none());
    }

    #[tokio::test]
    async fn channel_stream_caches_the_result() {
        let cancel = CancellationToken::new();
        let (events, result_tx, mut stream) = ChannelEventStream::channel(cancel);
        drop(events);
        result_tx.send(Ok(assistant("done"))).expect("send result");

        assert!(stream.recv().await.is_none());
        assert_eq!(stream.result().await.expect("first read").text(), "done");
        assert_eq!(stream.result().await.expect("cached read").text(), "done");
    }

    #[tokio::test]
    async fn channel_stream_reports_missing_result_as_stream_error() {
        let cancel = CancellationToken::new();
        let (_events, result_tx, mut stream) = ChannelEventStream::channel(cancel);
        drop(result_tx);
        let error = stream.result().await.expect_err("result should fail");
        assert!(matches!(error, ProviderError::Stream(_)));
    }
}
