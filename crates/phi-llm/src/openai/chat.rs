//! Chat Completions streaming adapter.

use std::collections::HashMap;

use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{DEFAULT_OPENAI_BASE_URL, OpenAIClient, body_excerpt, parse_tool_arguments};
use crate::errors::ProviderError;
use crate::provider::StreamOptions;
use crate::stream::{ChannelEventStream, EventStream, StaticEventStream, StreamEvent};
use crate::types::{
    AssistantMessage, ContentPart, Conversation, Model, Role, StopReason, ToolCallPart, Usage,
    collect_text,
};
use crate::utils::sse::SseParser;

pub(super) async fn stream(
    client: &OpenAIClient,
    cancel: CancellationToken,
    model: &Model,
    conversation: Conversation,
    options: StreamOptions,
) -> Result<Box<dyn EventStream>, ProviderError> {
    let api_key = resolve_api_key(&options)?;
    let request = build_request(model, &conversation, &options);

    let mut base_url = options.base_url.trim().trim_end_matches('/').to_string();
    if base_url.is_empty() {
        base_url = client.base_url().trim().trim_end_matches('/').to_string();
    }
    if base_url.is_empty() {
        base_url = DEFAULT_OPENAI_BASE_URL.to_string();
    }
    let url = format!("{base_url}/chat/completions");
    debug!(url = %url, model = %model.id, "POST chat completions");

    let mut http_request = client
        .http()
        .post(&url)
        .bearer_auth(&api_key)
        .header(CONTENT_TYPE, "application/json")
        .json(&request);
    for (key, value) in &options.headers {
        http_request = http_request.header(key.as_str(), value.as_str());
    }

    let response = tokio::select! {
        _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
        sent = http_request.send() => {
            sent.map_err(|error| ProviderError::Transport(error.to_string()))?
        }
    };

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderError::RemoteStatus {
            status: status.as_u16(),
            body: body_excerpt(&body),
        });
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();
    if !content_type.contains("text/event-stream") {
        return parse_non_streaming_response(response, model).await;
    }

    let stream_cancel = cancel.child_token();
    let (events, result, stream) = ChannelEventStream::channel(stream_cancel.clone());
    tokio::spawn(consume(response, model.clone(), events, result, stream_cancel));
    Ok(Box::new(stream))
}

fn resolve_api_key(options: &StreamOptions) -> Result<String, ProviderError> {
    let explicit = options.api_key.trim();
    if !explicit.is_empty() {
        return Ok(explicit.to_string());
    }
    let from_env = std::env::var("OPENAI_API_KEY").unwrap_or_default();
    let from_env = from_env.trim();
    if !from_env.is_empty() {
        return Ok(from_env.to_string());
    }
    Err(ProviderError::Validation("openai api key is required".to_string()))
}

// -- request shaping ---------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ChatTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    stream: bool,
    stream_options: ChatStreamOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ChatStreamOptions {
    include_usage: bool,
}

#[derive(Debug, Serialize)]
struct ChatTool {
    r#type: &'static str,
    function: ChatToolFunction,
}

#[derive(Debug, Serialize)]
struct ChatToolFunction {
    name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    description: String,
    parameters: Map<String, Value>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ChatToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatToolCall {
    id: String,
    r#type: &'static str,
    function: ChatToolCallFunction,
}

#[derive(Debug, Serialize)]
struct ChatToolCallFunction {
    name: String,
    arguments: String,
}

fn build_request(model: &Model, conversation: &Conversation, options: &StreamOptions) -> ChatRequest {
    let mut request = ChatRequest {
        model: model.id.clone(),
        messages: to_chat_messages(conversation),
        tools: None,
        tool_choice: None,
        stream: true,
        stream_options: ChatStreamOptions { include_usage: true },
        temperature: options.temperature,
        max_completion_tokens: (options.max_tokens > 0).then_some(options.max_tokens),
    };
    if !conversation.tools.is_empty() {
        request.tools = Some(
            conversation
                .tools
                .iter()
                .map(|tool| ChatTool {
                    r#type: "function",
                    function: ChatToolFunction {
                        name: tool.name.clone(),
                        description: tool.description.clone(),
                        parameters: tool.parameters.clone(),
                    },
                })
                .collect(),
        );
        request.tool_choice = Some("auto");
    }
    request
}

fn to_chat_messages(conversation: &Conversation) -> Vec<ChatMessage> {
    let mut out = Vec::new();
    if !conversation.system_prompt.trim().is_empty() {
        out.push(ChatMessage {
            role: "system",
            content: Some(Value::String(conversation.system_prompt.clone())),
            tool_call_id: None,
            tool_calls: None,
            name: None,
        });
    }

    for message in &conversation.messages {
        match message.role {
            Role::User => {
                let Some(content) = user_content(&message.content) else {
                    continue;
                };
                out.push(ChatMessage {
                    role: "user",
                    content: Some(content),
                    tool_call_id: None,
                    tool_calls: None,
                    name: None,
                });
            }
            Role::Assistant => {
                let text = collect_text(&message.content);
                let tool_calls = rebuild_tool_calls(&message.content);
                if text.is_empty() && tool_calls.is_empty() {
                    continue;
                }
                out.push(ChatMessage {
                    role: "assistant",
                    content: (!text.is_empty()).then(|| Value::String(text)),
                    tool_call_id: None,
                    tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                    name: None,
                });
            }
            Role::ToolResult => {
                if message.tool_call_id.trim().is_empty() {
                    continue;
                }
                let mut text = collect_text(&message.content);
                if text.is_empty() {
                    text = "(no content)".to_string();
                }
                out.push(ChatMessage {
                    role: "tool",
                    content: Some(Value::String(text)),
                    tool_call_id: Some(message.tool_call_id.clone()),
                    tool_calls: None,
                    name: (!message.tool_name.is_empty()).then(|| message.tool_name.clone()),
                });
            }
        }
    }

    out
}

/// User content: a plain string when the message is text-only, a structured
/// part array once any image is present.
fn user_content(parts: &[ContentPart]) -> Option<Value> {
    let mut has_image = false;
    let mut structured = Vec::new();
    let mut texts = Vec::new();

    for part in parts {
        match part {
            ContentPart::Text(text) if !text.text.trim().is_empty() => {
                texts.push(text.text.clone());
                structured.push(json!({"type": "text", "text": text.text}));
            }
            ContentPart::Image(image) if !image.data.trim().is_empty() => {
                has_image = true;
                structured.push(json!({
                    "type": "image_url",
                    "image_url": {
                        "url": format!("data:{};base64,{}", image.mime_type, image.data),
                    },
                }));
            }
            _ => {}
        }
    }

    if structured.is_empty() {
        return None;
    }
    if !has_image {
        return Some(Value::String(texts.join("\n")));
    }
    Some(Value::Array(structured))
}

/// Rebuild assistant `tool_calls` entries from tool-call content parts.
/// Defaults are applied per part position: id `call_<1-based-index>`, name
/// `"tool"`, arguments `"{}"`.
fn rebuild_tool_calls(parts: &[ContentPart]) -> Vec<ChatToolCall> {
    let mut out = Vec::new();
    for (index, part) in parts.iter().enumerate() {
        let ContentPart::ToolCall(call) = part else {
            continue;
        };
        let mut id = call.id.trim().to_string();
        if id.is_empty() {
            id = format!("call_{}", index + 1);
        }
        let mut name = call.name.trim().to_string();
        if name.is_empty() {
            name = "tool".to_string();
        }
        let arguments = serde_json::to_string(&Value::Object(call.arguments.clone()))
            .unwrap_or_else(|_| "{}".to_string());
        out.push(ChatToolCall {
            id,
            r#type: "function",
            function: ChatToolCallFunction { name, arguments },
        });
    }
    out
}

// -- SSE consumption ---------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ChatStreamChunk {
    #[serde(default)]
    model: String,
    #[serde(default)]
    choices: Vec<ChatStreamChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatStreamChoice {
    #[serde(default)]
    delta: ChatDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ChatStreamToolCall>,
}

#[derive(Debug, Deserialize)]
struct ChatStreamToolCall {
    #[serde(default)]
    index: u64,
    #[serde(default)]
    id: String,
    #[serde(default)]
    function: ChatStreamToolCallFunction,
}

#[derive(Debug, Default, Deserialize)]
struct ChatStreamToolCallFunction {
    #[serde(default)]
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

async fn consume(
    response: reqwest::Response,
    model: Model,
    events: mpsc::Sender<StreamEvent>,
    result: oneshot::Sender<Result<AssistantMessage, ProviderError>>,
    cancel: CancellationToken,
) {
    let mut aggregation = ChatAggregation::new(model);
    emit(&events, &cancel, StreamEvent::start()).await;

    if let Err(error) = read_sse(response, &mut aggregation, &events, &cancel).await {
        emit(&events, &cancel, StreamEvent::error(error.to_string())).await;
        let _ = result.send(Err(error));
        return;
    }

    let calls = aggregation.finalize_tool_calls();
    for call in &calls {
        emit(
            &events,
            &cancel,
            StreamEvent::tool_call(call.id.clone(), call.name.clone(), call.arguments.clone()),
        )
        .await;
    }
    let assistant = aggregation.build_assistant(calls);
    emit(&events, &cancel, StreamEvent::done(assistant.stop_reason)).await;
    let _ = result.send(Ok(assistant));
}

async fn read_sse(
    response: reqwest::Response,
    aggregation: &mut ChatAggregation,
    events: &mpsc::Sender<StreamEvent>,
    cancel: &CancellationToken,
) -> Result<(), ProviderError> {
    let mut body = response.bytes_stream();
    let mut parser = SseParser::new();

    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            chunk = body.next() => chunk,
        };
        let Some(chunk) = chunk else { break };
        let chunk = chunk.map_err(|error| ProviderError::Transport(error.to_string()))?;
        for payload in parser.push(&chunk) {
            if payload == "[DONE]" {
                return Ok(());
            }
            apply_payload(aggregation, &payload, events, cancel).await?;
        }
    }

    if let Some(payload) = parser.finish() {
        if payload != "[DONE]" {
            apply_payload(aggregation, &payload, events, cancel).await?;
        }
    }
    Ok(())
}

async fn apply_payload(
    aggregation: &mut ChatAggregation,
    payload: &str,
    events: &mpsc::Sender<StreamEvent>,
    cancel: &CancellationToken,
) -> Result<(), ProviderError> {
    let chunk: ChatStreamChunk = serde_json::from_str(payload)
        .map_err(|error| ProviderError::Protocol(format!("invalid SSE chunk: {error}")))?;
    for event in aggregation.apply_chunk(chunk) {
        emit(events, cancel, event).await;
    }
    Ok(())
}

async fn emit(events: &mpsc::Sender<StreamEvent>, cancel: &CancellationToken, event: StreamEvent) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = events.send(event) => {}
    }
}

// -- aggregation -------------------------------------------------------------

#[derive(Debug, Default)]
struct ToolCallBuilder {
    id: String,
    name: String,
    arguments: String,
}

/// Per-turn aggregator: folds SSE chunks into the finalized assistant
/// message while surfacing incremental events.
struct ChatAggregation {
    request_model: Model,
    response_model: String,
    text: String,
    tool_calls: HashMap<u64, ToolCallBuilder>,
    tool_order: Vec<u64>,
    usage: Usage,
    stop_reason: StopReason,
}

impl ChatAggregation {
    fn new(request_model: Model) -> Self {
        Self {
            request_model,
            response_model: String::new(),
            text: String::new(),
            tool_calls: HashMap::new(),
            tool_order: Vec::new(),
            usage: Usage::default(),
            stop_reason: StopReason::Stop,
        }
    }

    fn apply_chunk(&mut self, chunk: ChatStreamChunk) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        if !chunk.model.is_empty() {
            self.response_model = chunk.model;
        }
        if let Some(usage) = chunk.usage {
            self.usage = Usage {
                input: usage.prompt_tokens,
                output: usage.completion_tokens,
                total: usage.total_tokens,
                cost: 0.0,
            };
        }

        for choice in chunk.choices {
            if let Some(content) = choice.delta.content {
                if !content.is_empty() {
                    self.text.push_str(&content);
                    out.push(StreamEvent::text_delta(content));
                }
            }

            for tool_call in choice.delta.tool_calls {
                let builder = self.builder(tool_call.index);
                if !tool_call.id.is_empty() {
                    builder.id = tool_call.id;
                }
                if !tool_call.function.name.is_empty() {
                    builder.name = tool_call.function.name;
                }
                builder.arguments.push_str(&tool_call.function.arguments);
            }

            if let Some(reason) = choice.finish_reason {
                if !reason.is_empty() {
                    self.stop_reason = map_stop_reason(&reason);
                }
            }
        }

        out
    }

    fn builder(&mut self, index: u64) -> &mut ToolCallBuilder {
        if !self.tool_calls.contains_key(&index) {
            self.tool_order.push(index);
        }
        self.tool_calls.entry(index).or_default()
    }

    fn finalize_tool_calls(&self) -> Vec<ToolCallPart> {
        let mut out = Vec::with_capacity(self.tool_order.len());
        for (position, index) in self.tool_order.iter().enumerate() {
            let Some(builder) = self.tool_calls.get(index) else {
                continue;
            };
            let mut id = builder.id.trim().to_string();
            if id.is_empty() {
                id = format!("call_{}", position + 1);
            }
            let mut name = builder.name.trim().to_string();
            if name.is_empty() {
                name = "tool".to_string();
            }
            out.push(ToolCallPart {
                id,
                name,
                arguments: parse_tool_arguments(&builder.arguments),
            });
        }
        out
    }

    fn build_assistant(&self, calls: Vec<ToolCallPart>) -> AssistantMessage {
        let mut content = Vec::new();
        let text = self.text.trim();
        if !text.is_empty() {
            content.push(ContentPart::text(text));
        }
        content.extend(calls.into_iter().map(ContentPart::ToolCall));

        let model = if self.response_model.is_empty() {
            self.request_model.id.clone()
        } else {
            self.response_model.clone()
        };

        AssistantMessage {
            role: Role::Assistant,
            content,
            provider: "openai".to_string(),
            model,
            stop_reason: self.stop_reason,
            error_message: String::new(),
            usage: self.usage,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

fn map_stop_reason(reason: &str) -> StopReason {
    match reason {
        "length" => StopReason::Length,
        "tool_calls" | "function_call" => StopReason::ToolUse,
        "content_filter" => StopReason::Error,
        _ => StopReason::Stop,
    }
}

// -- non-streaming fallback --------------------------------------------------

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: String,
    #[serde(default)]
    choices: Vec<ChatResponseChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatResponseChoice {
    #[serde(default)]
    finish_reason: String,
    #[serde(default)]
    message: ChatResponseMessage,
}

#[derive(Debug, Default, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Value,
    #[serde(default)]
    tool_calls: Vec<ChatResponseToolCall>,
}

#[derive(Debug, Deserialize)]
struct ChatResponseToolCall {
    #[serde(default)]
    id: String,
    #[serde(default)]
    function: ChatStreamToolCallFunction,
}

/// A backend that ignored `stream=true` answered with one JSON body.
/// Synthesize the event sequence the caller would have seen.
async fn parse_non_streaming_response(
    response: reqwest::Response,
    request_model: &Model,
) -> Result<Box<dyn EventStream>, ProviderError> {
    let body = response
        .bytes()
        .await
        .map_err(|error| ProviderError::Transport(error.to_string()))?;
    let parsed: ChatResponse = serde_json::from_slice(&body)
        .map_err(|error| ProviderError::Protocol(format!("invalid JSON response: {error}")))?;
    let Some(choice) = parsed.choices.into_iter().next() else {
        return Err(ProviderError::Protocol("openai response has no choices".to_string()));
    };

    let mut content = Vec::new();
    let text = extract_message_text(&choice.message.content);
    if !text.trim().is_empty() {
        content.push(ContentPart::text(text.clone()));
    }

    let mut tool_calls = Vec::with_capacity(choice.message.tool_calls.len());
    for (position, raw) in choice.message.tool_calls.iter().enumerate() {
        let mut id = raw.id.trim().to_string();
        if id.is_empty() {
            id = format!("call_{}", position + 1);
        }
        let mut name = raw.function.name.trim().to_string();
        if name.is_empty() {
            name = "tool".to_string();
        }
        let call = ToolCallPart {
            id,
            name,
            arguments: parse_tool_arguments(&raw.function.arguments),
        };
        content.push(ContentPart::ToolCall(call.clone()));
        tool_calls.push(call);
    }

    let model = if parsed.model.is_empty() {
        request_model.id.clone()
    } else {
        parsed.model
    };
    let usage = parsed
        .usage
        .map(|usage| Usage {
            input: usage.prompt_tokens,
            output: usage.completion_tokens,
            total: usage.total_tokens,
            cost: 0.0,
        })
        .unwrap_or_default();

    let assistant = AssistantMessage {
        role: Role::Assistant,
        content,
        provider: "openai".to_string(),
        model,
        stop_reason: map_stop_reason(&choice.finish_reason),
        error_message: String::new(),
        usage,
        timestamp: chrono::Utc::now().timestamp_millis(),
    };

    let mut events = vec![StreamEvent::start()];
    if !text.is_empty() {
        events.push(StreamEvent::text_delta(text));
    }
    for call in &tool_calls {
        events.push(StreamEvent::tool_call(call.id.clone(), call.name.clone(), call.arguments.clone()));
    }
    events.push(StreamEvent::done(assistant.stop_reason));

    Ok(Box::new(StaticEventStream::new(events, assistant)))
}

fn extract_message_text(raw: &Value) -> String {
    match raw {
        Value::String(text) => text.clone(),
        Value::Array(items) => {
            let parts: Vec<&str> = items
                .iter()
                .filter(|item| item.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|item| item.get("text").and_then(Value::as_str))
                .filter(|text| !text.trim().is_empty())
                .collect();
            parts.join("\n")
        }
        _ => String::new(),
    }
}
