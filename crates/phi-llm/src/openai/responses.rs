//! ChatGPT-backend `/responses` streaming adapter.

use std::collections::HashSet;

use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{DEFAULT_CHATGPT_BACKEND_BASE_URL, OpenAIClient, body_excerpt, parse_tool_arguments};
use crate::auth::{AuthManager, extract_account_id_from_jwt};
use crate::errors::ProviderError;
use crate::provider::StreamOptions;
use crate::stream::{ChannelEventStream, EventStream, StreamEvent};
use crate::types::{
    AssistantMessage, ContentPart, Conversation, Message, Model, Role, StopReason, ToolCallPart,
    Usage, collect_text,
};
use crate::utils::sse::SseParser;

pub(super) async fn stream(
    client: &OpenAIClient,
    cancel: CancellationToken,
    model: &Model,
    conversation: Conversation,
    options: StreamOptions,
) -> Result<Box<dyn EventStream>, ProviderError> {
    let (access_token, account_id) = resolve_chatgpt_auth(&options).await?;

    let request = build_request(model, &conversation);
    let base_url = normalize_chatgpt_base_url(&options.base_url, client.base_url());
    let endpoint = responses_endpoint(&base_url);
    debug!(url = %endpoint, model = %model.id, "POST chatgpt responses");

    let mut http_request = client
        .http()
        .post(&endpoint)
        .bearer_auth(&access_token)
        .header(CONTENT_TYPE, "application/json")
        .header(ACCEPT, "text/event-stream")
        .json(&request);
    if !account_id.trim().is_empty() {
        http_request = http_request.header("ChatGPT-Account-ID", account_id.trim());
    }
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

    let stream_cancel = cancel.child_token();
    let (events, result, stream) = ChannelEventStream::channel(stream_cancel.clone());
    tokio::spawn(consume(response, model.clone(), events, result, stream_cancel));
    Ok(Box::new(stream))
}

// -- auth resolution ---------------------------------------------------------

/// Resolve `(access_token, account_id)` for a responses request.
///
/// Token order: explicit option, `PHI_CHATGPT_ACCESS_TOKEN`, token store
/// (refreshing when within 30 s of expiry). Account id: explicit option,
/// `PHI_CHATGPT_ACCOUNT_ID`, stored credential, JWT claim.
pub(crate) async fn resolve_chatgpt_auth(
    options: &StreamOptions,
) -> Result<(String, String), ProviderError> {
    let mut access_token = options.access_token.trim().to_string();
    if access_token.is_empty() {
        access_token = std::env::var("PHI_CHATGPT_ACCESS_TOKEN")
            .unwrap_or_default()
            .trim()
            .to_string();
    }
    let mut account_id = options.account_id.trim().to_string();
    if account_id.is_empty() {
        account_id = std::env::var("PHI_CHATGPT_ACCOUNT_ID")
            .unwrap_or_default()
            .trim()
            .to_string();
    }

    if !access_token.is_empty() {
        if account_id.is_empty() {
            account_id = extract_account_id_from_jwt(&access_token);
        }
        return Ok((access_token, account_id));
    }

    let manager = AuthManager::default();
    let loaded = manager.store().load().await.map_err(ProviderError::from)?;

    let mut credentials = loaded;
    if let Some(current) = &credentials {
        if !current.access_token.trim().is_empty()
            && !current.refresh_token.trim().is_empty()
            && current.expires_within_slack(chrono::Utc::now())
        {
            if let Ok(Some(refreshed)) = manager.load_or_refresh().await {
                if !refreshed.access_token.trim().is_empty() {
                    credentials = Some(refreshed);
                }
            }
        }
    }

    let Some(credentials) = credentials.filter(|creds| !creds.access_token.trim().is_empty())
    else {
        return Err(ProviderError::Validation(
            "chatgpt access token is required (set StreamOptions.access_token, \
             PHI_CHATGPT_ACCESS_TOKEN, or login via phi_llm::auth)"
                .to_string(),
        ));
    };

    if account_id.is_empty() {
        account_id = credentials.account_id.trim().to_string();
    }
    if account_id.is_empty() {
        account_id = extract_account_id_from_jwt(&credentials.access_token);
    }
    Ok((credentials.access_token.trim().to_string(), account_id))
}

// -- URL normalization -------------------------------------------------------

pub(crate) fn normalize_chatgpt_base_url(option_base_url: &str, client_base_url: &str) -> String {
    let mut base = option_base_url.trim().to_string();
    if base.is_empty() && is_chatgpt_base_url(client_base_url.trim()) {
        base = client_base_url.trim().to_string();
    }
    if base.is_empty() {
        return DEFAULT_CHATGPT_BACKEND_BASE_URL.to_string();
    }

    let mut base = base.trim_end_matches('/').to_string();
    if (base.starts_with("https://chatgpt.com") || base.starts_with("https://chat.openai.com"))
        && !base.contains("/backend-api")
    {
        base.push_str("/backend-api/codex");
    }
    if base.ends_with("/backend-api") {
        base.push_str("/codex");
    }
    base
}

pub(crate) fn responses_endpoint(base_url: &str) -> String {
    let base = base_url.trim().trim_end_matches('/');
    if base.ends_with("/responses") {
        return base.to_string();
    }
    format!("{base}/responses")
}

fn is_chatgpt_base_url(base_url: &str) -> bool {
    base_url.starts_with("https://chatgpt.com") || base_url.starts_with("https://chat.openai.com")
}

// -- request shaping ---------------------------------------------------------

#[derive(Debug, Serialize)]
struct ResponsesRequest {
    model: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    instructions: String,
    input: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    #[serde(skip_serializing_if = "is_false")]
    parallel_tool_calls: bool,
    store: bool,
    stream: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn build_request(model: &Model, conversation: &Conversation) -> ResponsesRequest {
    let mut request = ResponsesRequest {
        model: model.id.clone(),
        instructions: conversation.system_prompt.trim().to_string(),
        input: responses_input(&conversation.messages),
        tools: None,
        tool_choice: None,
        parallel_tool_calls: false,
        store: false,
        stream: true,
    };
    if !conversation.tools.is_empty() {
        request.tools = Some(
            conversation
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters,
                    })
                })
                .collect(),
        );
        request.tool_choice = Some("auto");
        request.parallel_tool_calls = true;
    }
    request
}

fn responses_input(messages: &[Message]) -> Vec<Value> {
    let mut out = Vec::new();
    for message in messages {
        match message.role {
            Role::User => {
                let mut content = Vec::new();
                for part in &message.content {
                    match part {
                        ContentPart::Text(text) if !text.text.trim().is_empty() => {
                            content.push(json!({"type": "input_text", "text": text.text}));
                        }
                        ContentPart::Image(image) if !image.data.trim().is_empty() => {
                            content.push(json!({
                                "type": "input_image",
                                "image_url": format!(
                                    "data:{};base64,{}",
                                    image.mime_type, image.data
                                ),
                            }));
                        }
                        _ => {}
                    }
                }
                if !content.is_empty() {
                    out.push(json!({"type": "message", "role": "user", "content": content}));
                }
            }
            Role::Assistant => {
                let text = collect_text(&message.content);
                if !text.trim().is_empty() {
                    out.push(json!({
                        "type": "message",
                        "role": "assistant",
                        "content": [{"type": "output_text", "text": text}],
                    }));
                }
                for (index, part) in message.content.iter().enumerate() {
                    let ContentPart::ToolCall(call) = part else {
                        continue;
                    };
                    let mut call_id = call.id.trim().to_string();
                    if call_id.is_empty() {
                        call_id = format!("call_{}", index + 1);
                    }
                    let mut name = call.name.trim().to_string();
                    if name.is_empty() {
                        name = "tool".to_string();
                    }
                    let arguments = serde_json::to_string(&Value::Object(call.arguments.clone()))
                        .unwrap_or_else(|_| "{}".to_string());
                    out.push(json!({
                        "type": "function_call",
                        "call_id": call_id,
                        "name": name,
                        "arguments": arguments,
                    }));
                }
            }
            Role::ToolResult => {
                if message.tool_call_id.trim().is_empty() {
                    continue;
                }
                let mut text = collect_text(&message.content);
                if text.trim().is_empty() {
                    text = "(no content)".to_string();
                }
                out.push(json!({
                    "type": "function_call_output",
                    "call_id": message.tool_call_id,
                    "output": text,
                }));
            }
        }
    }
    out
}

// -- SSE consumption ---------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ResponsesSseEvent {
    #[serde(rename = "type", default)]
    event_type: String,
    #[serde(default)]
    delta: String,
    #[serde(default)]
    item: Map<String, Value>,
    #[serde(default)]
    response: Map<String, Value>,
}

async fn consume(
    response: reqwest::Response,
    model: Model,
    events: mpsc::Sender<StreamEvent>,
    result: oneshot::Sender<Result<AssistantMessage, ProviderError>>,
    cancel: CancellationToken,
) {
    let mut aggregation = ResponsesAggregation::new(model);
    emit(&events, StreamEvent::start()).await;

    let outcome = read_sse(response, &mut aggregation, &events, &cancel).await;
    let outcome = match outcome {
        // any error after the completed marker is ignorable
        Err(_) if aggregation.completed => Ok(()),
        // cancellation with partial output counts as success
        Err(ProviderError::Cancelled) if aggregation.has_output() => {
            aggregation.completed = true;
            Ok(())
        }
        other => other,
    };

    if let Err(error) = outcome {
        emit(&events, StreamEvent::error(error.to_string())).await;
        let _ = result.send(Err(error));
        return;
    }
    if !aggregation.completed {
        let error = ProviderError::Stream("stream closed before response.completed".to_string());
        emit(&events, StreamEvent::error(error.to_string())).await;
        let _ = result.send(Err(error));
        return;
    }

    let assistant = aggregation.build_assistant();
    emit(&events, StreamEvent::done(assistant.stop_reason)).await;
    let _ = result.send(Ok(assistant));
}

async fn read_sse(
    response: reqwest::Response,
    aggregation: &mut ResponsesAggregation,
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
            apply_payload(aggregation, &payload, events).await?;
        }
    }

    if let Some(payload) = parser.finish() {
        if payload != "[DONE]" {
            apply_payload(aggregation, &payload, events).await?;
        }
    }
    Ok(())
}

async fn apply_payload(
    aggregation: &mut ResponsesAggregation,
    payload: &str,
    events: &mpsc::Sender<StreamEvent>,
) -> Result<(), ProviderError> {
    let event: ResponsesSseEvent = serde_json::from_str(payload)
        .map_err(|error| ProviderError::Protocol(format!("invalid SSE event: {error}")))?;
    for out in aggregation.apply_event(event)? {
        emit(events, out).await;
    }
    Ok(())
}

async fn emit(events: &mpsc::Sender<StreamEvent>, event: StreamEvent) {
    let _ = events.send(event).await;
}

// -- aggregation -------------------------------------------------------------

struct ResponsesAggregation {
    request_model: Model,
    response_model: String,
    text: String,
    tool_calls: Vec<ToolCallPart>,
    seen_tool_calls: HashSet<String>,
    usage: Usage,
    stop_reason: StopReason,
    completed: bool,
}

impl ResponsesAggregation {
    fn new(request_model: Model) -> Self {
        Self {
            request_model,
            response_model: String::new(),
            text: String::new(),
            tool_calls: Vec::new(),
            seen_tool_calls: HashSet::new(),
            usage: Usage::default(),
            stop_reason: StopReason::Stop,
            completed: false,
        }
    }

    fn has_output(&self) -> bool {
        !self.text.trim().is_empty() || !self.tool_calls.is_empty()
    }

    fn apply_event(&mut self, event: ResponsesSseEvent) -> Result<Vec<StreamEvent>, ProviderError> {
        let mut out = Vec::new();
        match event.event_type.as_str() {
            "response.output_text.delta" => {
                if !event.delta.trim().is_empty() {
                    self.text.push_str(&event.delta);
                    out.push(StreamEvent::text_delta(event.delta));
                }
            }
            "response.reasoning_text.delta" | "response.reasoning_summary_text.delta" => {
                if !event.delta.trim().is_empty() {
                    out.push(StreamEvent::thinking_delta(event.delta));
                }
            }
            "response.output_item.done" => {
                if let Some(tool_event) = self.ingest_output_item(&event.item) {
                    out.push(tool_event);
                }
            }
            "response.failed" => {
                return Err(ProviderError::Stream(extract_error_message(&event.response)));
            }
            "response.completed" | "response.done" => {
                self.completed = true;
                self.update_from_response(&event.response);
            }
            _ => {}
        }
        Ok(out)
    }

    fn ingest_output_item(&mut self, item: &Map<String, Value>) -> Option<StreamEvent> {
        if item.is_empty() {
            return None;
        }
        if item.get("type").and_then(Value::as_str) != Some("function_call") {
            return None;
        }

        let mut call_id = item
            .get("call_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string();
        if call_id.is_empty() {
            call_id = format!("call_{}", self.tool_calls.len() + 1);
        }
        if !self.seen_tool_calls.insert(call_id.clone()) {
            return None;
        }

        let mut name = item
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string();
        if name.is_empty() {
            name = "tool".to_string();
        }

        let raw_arguments = item
            .get("arguments")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let call = ToolCallPart {
            id: call_id,
            name,
            arguments: parse_tool_arguments(raw_arguments),
        };
        self.tool_calls.push(call.clone());
        self.stop_reason = StopReason::ToolUse;
        Some(StreamEvent::tool_call(call.id.clone(), call.name.clone(), call.arguments))
    }

    fn update_from_response(&mut self, response: &Map<String, Value>) {
        if response.is_empty() {
            return;
        }
        if let Some(model) = response.get("model").and_then(Value::as_str) {
            if !model.trim().is_empty() {
                self.response_model = model.trim().to_string();
            }
        }
        let Some(usage) = response.get("usage").and_then(Value::as_object) else {
            return;
        };
        self.usage = Usage {
            input: u64_from(usage.get("input_tokens")),
            output: u64_from(usage.get("output_tokens")),
            total: u64_from(usage.get("total_tokens")),
            cost: 0.0,
        };
    }

    fn build_assistant(&self) -> AssistantMessage {
        let mut content = Vec::new();
        let text = self.text.trim();
        if !text.is_empty() {
            content.push(ContentPart::text(text));
        }
        content.extend(self.tool_calls.iter().cloned().map(ContentPart::ToolCall));

        let model = if self.response_model.is_empty() {
            self.request_model.id.clone()
        } else {
            self.response_model.clone()
        };
        let stop_reason = if self.tool_calls.is_empty() {
            self.stop_reason
        } else {
            StopReason::ToolUse
        };

        AssistantMessage {
            role: Role::Assistant,
            content,
            provider: "chatgpt".to_string(),
            model,
            stop_reason,
            error_message: String::new(),
            usage: self.usage,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

fn extract_error_message(response: &Map<String, Value>) -> String {
    if response.is_empty() {
        return "chatgpt backend returned response.failed".to_string();
    }
    if let Some(error) = response.get("error").and_then(Value::as_object) {
        if let Some(message) = error.get("message").and_then(Value::as_str) {
            if !message.trim().is_empty() {
                return message.to_string();
            }
        }
        if let Some(code) = error.get("code").and_then(Value::as_str) {
            if !code.trim().is_empty() {
                return format!("chatgpt backend error: {code}");
            }
        }
    }
    "chatgpt backend returned response.failed".to_string()
}

fn u64_from(value: Option<&Value>) -> u64 {
    match value {
        Some(Value::Number(number)) => number
            .as_u64()
            .or_else(|| number.as_f64().map(|float| float as u64))
            .unwrap_or(0),
        _ => 0,
    }
}
