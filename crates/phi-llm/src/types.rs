//! Message data model shared by the adapters and the agent core.
//!
//! Wire names follow the persisted JSON shape: camelCase field names
//! (`toolCallId`, `stopReason`, `mimeType`) and lowerCamel enum values
//! (`toolResult`, `toolUse`).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    User,
    Assistant,
    ToolResult,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TextPart {
    pub text: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ImagePart {
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    pub data: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCallPart {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ThinkingPart {
    pub thinking: String,
}

/// One element of a message's content list.
///
/// Persisted logs may carry untyped mappings; [`normalize_parts`] converts
/// them back into this tagged form so downstream code only ever handles
/// the variants.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ContentPart {
    Text(TextPart),
    Image(ImagePart),
    ToolCall(ToolCallPart),
    Thinking(ThinkingPart),
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(TextPart { text: text.into() })
    }

    pub fn image(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self::Image(ImagePart {
            mime_type: mime_type.into(),
            data: data.into(),
        })
    }

    pub fn tool_call(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: Map<String, Value>,
    ) -> Self {
        Self::ToolCall(ToolCallPart {
            id: id.into(),
            name: name.into(),
            arguments,
        })
    }

    pub fn thinking(text: impl Into<String>) -> Self {
        Self::Thinking(ThinkingPart {
            thinking: text.into(),
        })
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(part) => Some(&part.text),
            _ => None,
        }
    }
}

/// Non-blank text parts joined with newlines. Thinking parts are never
/// included.
pub fn collect_text(parts: &[ContentPart]) -> String {
    let texts: Vec<&str> = parts
        .iter()
        .filter_map(ContentPart::as_text)
        .filter(|text| !text.trim().is_empty())
        .collect();
    texts.join("\n")
}

/// Tool-call parts in content order.
pub fn collect_tool_calls(parts: &[ContentPart]) -> Vec<ToolCallPart> {
    parts
        .iter()
        .filter_map(|part| match part {
            ContentPart::ToolCall(call) => Some(call.clone()),
            _ => None,
        })
        .collect()
}

/// Convert raw JSON values (from persisted logs) into tagged content
/// parts. Values that do not match a known part kind are dropped.
pub fn normalize_parts(values: &[Value]) -> Vec<ContentPart> {
    values
        .iter()
        .filter_map(|value| serde_json::from_value(value.clone()).ok())
        .collect()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: Vec<ContentPart>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tool_call_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tool_name: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub timestamp: i64,
}

impl Message {
    pub fn user(content: Vec<ContentPart>) -> Self {
        Self {
            role: Role::User,
            content,
            tool_call_id: String::new(),
            tool_name: String::new(),
            timestamp: 0,
        }
    }

    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: Vec<ContentPart>,
    ) -> Self {
        Self {
            role: Role::ToolResult,
            content,
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            timestamp: 0,
        }
    }

    pub fn text(&self) -> String {
        collect_text(&self.content)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input: u64,
    pub output: u64,
    pub total: u64,
    pub cost: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StopReason {
    Stop,
    Length,
    ToolUse,
    Error,
    Aborted,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantMessage {
    #[serde(default = "assistant_role")]
    pub role: Role,
    #[serde(default)]
    pub content: Vec<ContentPart>,
    pub provider: String,
    pub model: String,
    pub stop_reason: StopReason,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_message: String,
    #[serde(default)]
    pub usage: Usage,
    #[serde(default)]
    pub timestamp: i64,
}

impl AssistantMessage {
    pub fn text(&self) -> String {
        collect_text(&self.content)
    }

    pub fn tool_calls(&self) -> Vec<ToolCallPart> {
        collect_tool_calls(&self.content)
    }
}

fn assistant_role() -> Role {
    Role::Assistant
}

fn is_zero(value: &i64) -> bool {
    *value == 0
}

/// A tool as presented on the wire: name, description, and a
/// JSON-schema-shaped parameter mapping.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[serde(default)]
    pub provider: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default)]
    pub context_window: u32,
    #[serde(default)]
    pub max_tokens: u32,
    #[serde(default)]
    pub reasoning: bool,
}

/// A full conversation snapshot handed to an adapter for one round.
#[derive(Clone, Debug, Default)]
pub struct Conversation {
    pub system_prompt: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDescriptor>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn content_parts_round_trip_through_tagged_json() {
        let parts = vec![
            ContentPart::text("hello"),
            ContentPart::image("image/png", "aGk="),
            ContentPart::tool_call("call_1", "write", Map::new()),
            ContentPart::thinking("hmm"),
        ];
        let encoded = serde_json::to_value(&parts).expect("content should serialize");
        assert_eq!(encoded[0]["type"], "text");
        assert_eq!(encoded[1]["type"], "image");
        assert_eq!(encoded[1]["mimeType"], "image/png");
        assert_eq!(encoded[2]["type"], "toolCall");
        assert_eq!(encoded[3]["type"], "thinking");

        let decoded: Vec<ContentPart> =
            serde_json::from_value(encoded).expect("content should deserialize");
        assert_eq!(decoded, parts);
    }

    #[test]
    fn normalize_parts_converts_mappings_and_drops_unknown_kinds() {
        let raw = vec![
            json!({"type": "text", "text": "hi"}),
            json!({"type": "toolCall", "id": "c1", "name": "write", "arguments": {"a": 1}}),
            json!({"type": "mystery", "payload": true}),
        ];
        let parts = normalize_parts(&raw);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0], ContentPart::text("hi"));
        match &parts[1] {
            ContentPart::ToolCall(call) => {
                assert_eq!(call.id, "c1");
                assert_eq!(call.arguments.get("a"), Some(&json!(1)));
            }
            other => panic!("expected tool call, got {other:?}"),
        }
    }

    #[test]
    fn collect_text_joins_non_blank_text_and_skips_thinking() {
        let parts = vec![
            ContentPart::text("one"),
            ContentPart::text("   "),
            ContentPart::thinking("internal"),
            ContentPart::text("two"),
        ];
        assert_eq!(collect_text(&parts), "one\ntwo");
    }

    #[test]
    fn message_wire_names_match_persisted_shape() {
        let message = Message::tool_result("call_9", "read", vec![ContentPart::text("ok")]);
        let encoded = serde_json::to_value(&message).expect("message should serialize");
        assert_eq!(encoded["role"], "toolResult");
        assert_eq!(encoded["toolCallId"], "call_9");
        assert_eq!(encoded["toolName"], "read");
        assert!(encoded.get("timestamp").is_none());
    }

    #[test]
    fn stop_reason_uses_lower_camel_values() {
        assert_eq!(
            serde_json::to_string(&StopReason::ToolUse).expect("serialize"),
            "\"toolUse\""
        );
        assert_eq!(
            serde_json::from_str::<StopReason>("\"aborted\"").expect("deserialize"),
            StopReason::Aborted
        );
    }
}
