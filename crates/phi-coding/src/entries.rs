//! Session-log entry shapes, one JSON object per line on disk.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryBase {
    #[serde(rename = "type")]
    pub entry_type: String,
    pub id: String,
    pub parent_id: Option<String>,
    pub timestamp: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageEntry {
    #[serde(flatten)]
    pub base: EntryBase,
    pub message: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelChangeEntry {
    #[serde(flatten)]
    pub base: EntryBase,
    pub provider: String,
    pub model_id: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThinkingLevelChangeEntry {
    #[serde(flatten)]
    pub base: EntryBase,
    pub thinking_level: String,
}

/// Reserved for context compaction. The runtime never produces one; the
/// shape exists so readers of persisted logs can decode it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactionEntry {
    #[serde(flatten)]
    pub base: EntryBase,
    pub summary: String,
    pub first_kept_entry_id: String,
    pub tokens_before: u64,
}

pub(crate) fn entry_id(prefix: &str) -> String {
    format!(
        "{prefix}-{}",
        chrono::Utc::now().format("%Y%m%dT%H%M%S%.9f")
    )
}

pub(crate) fn new_entry_base(entry_type: &str, id: &str) -> EntryBase {
    EntryBase {
        entry_type: entry_type.to_string(),
        id: id.to_string(),
        parent_id: None,
        timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Nanos, true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn entry_ids_carry_their_prefix() {
        let id = entry_id("msg");
        assert!(id.starts_with("msg-"));
        assert!(id.len() > "msg-".len());
    }

    #[test]
    fn message_entries_flatten_the_base_fields() {
        let entry = MessageEntry {
            base: new_entry_base("message", "msg-1"),
            message: json!({"role": "user"}),
        };
        let encoded = serde_json::to_value(&entry).expect("serialize");
        assert_eq!(encoded["type"], "message");
        assert_eq!(encoded["id"], "msg-1");
        assert_eq!(encoded["parentId"], Value::Null);
        assert_eq!(encoded["message"]["role"], "user");
    }

    #[test]
    fn compaction_entries_round_trip() {
        let entry = CompactionEntry {
            base: new_entry_base("compaction", "comp-1"),
            summary: "earlier context".to_string(),
            first_kept_entry_id: "msg-9".to_string(),
            tokens_before: 4096,
        };
        let encoded = serde_json::to_value(&entry).expect("serialize");
        assert_eq!(encoded["firstKeptEntryId"], "msg-9");
        let decoded: CompactionEntry = serde_json::from_value(encoded).expect("deserialize");
        assert_eq!(decoded, entry);
    }
}
