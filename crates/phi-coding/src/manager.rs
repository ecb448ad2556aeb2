//! Session-log managers: in-memory (required) and JSONL file-backed.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use phi_agent::SessionMessage;
use serde_json::Value;

use crate::entries::{
    MessageEntry, ModelChangeEntry, ThinkingLevelChangeEntry, entry_id, new_entry_base,
};
use crate::errors::StoreError;

/// Snapshot of a persisted session.
///
/// `thinking_level`, `provider`, and `model_id` are informational and
/// currently always report `"off"` and empty strings regardless of
/// recorded changes; no caller consumes them.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionContext {
    pub entries: Vec<Value>,
    pub thinking_level: String,
    pub provider: String,
    pub model_id: String,
}

pub trait SessionManager: Send + Sync {
    fn session_id(&self) -> String;
    fn session_file(&self) -> Option<PathBuf>;
    fn append_message(&self, message: &SessionMessage) -> Result<String, StoreError>;
    fn append_model_change(&self, provider: &str, model_id: &str) -> Result<String, StoreError>;
    fn append_thinking_level_change(&self, level: &str) -> Result<String, StoreError>;
    fn build_context(&self) -> SessionContext;
}

pub struct InMemoryManager {
    session_id: String,
    entries: Mutex<Vec<Value>>,
}

impl InMemoryManager {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            entries: Mutex::new(Vec::new()),
        }
    }
}

impl SessionManager for InMemoryManager {
    fn session_id(&self) -> String {
        self.session_id.clone()
    }

    fn session_file(&self) -> Option<PathBuf> {
        None
    }

    fn append_message(&self, message: &SessionMessage) -> Result<String, StoreError> {
        let encoded = serde_json::to_value(message)
            .map_err(|error| StoreError::Serialization(error.to_string()))?;
        self.entries
            .lock()
            .expect("in-memory entries mutex poisoned")
            .push(encoded);
        Ok("in-memory-entry".to_string())
    }

    fn append_model_change(&self, provider: &str, model_id: &str) -> Result<String, StoreError> {
        let entry = ModelChangeEntry {
            base: new_entry_base("model_change", "in-memory-model-change"),
            provider: provider.to_string(),
            model_id: model_id.to_string(),
        };
        let encoded = serde_json::to_value(&entry)
            .map_err(|error| StoreError::Serialization(error.to_string()))?;
        self.entries
            .lock()
            .expect("in-memory entries mutex poisoned")
            .push(encoded);
        Ok("in-memory-model-change".to_string())
    }

    fn append_thinking_level_change(&self, level: &str) -> Result<String, StoreError> {
        let entry = ThinkingLevelChangeEntry {
            base: new_entry_base("thinking_level_change", "in-memory-thinking-change"),
            thinking_level: level.to_string(),
        };
        let encoded = serde_json::to_value(&entry)
            .map_err(|error| StoreError::Serialization(error.to_string()))?;
        self.entries
            .lock()
            .expect("in-memory entries mutex poisoned")
            .push(encoded);
        Ok("in-memory-thinking-change".to_string())
    }

    fn build_context(&self) -> SessionContext {
        SessionContext {
            entries: self
                .entries
                .lock()
                .expect("in-memory entries mutex poisoned")
                .clone(),
            thinking_level: "off".to_string(),
            provider: String::new(),
            model_id: String::new(),
        }
    }
}

/// Appends one JSON object per line. Existing files are replayed on
/// construction; unparsable lines are skipped.
pub struct FileManager {
    session_id: String,
    file_path: PathBuf,
    entries: Mutex<Vec<Value>>,
}

impl FileManager {
    pub fn new(
        session_id: impl Into<String>,
        file_path: impl Into<PathBuf>,
    ) -> Result<Self, StoreError> {
        let session_id = session_id.into();
        if session_id.is_empty() {
            return Err(StoreError::MissingSessionId);
        }
        let file_path = file_path.into();
        if file_path.as_os_str().is_empty() {
            return Err(StoreError::MissingFilePath);
        }

        if let Some(parent) = file_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut entries = Vec::new();
        if let Ok(data) = std::fs::read_to_string(&file_path) {
            for line in data.lines() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if let Ok(value) = serde_json::from_str::<Value>(line) {
                    entries.push(value);
                }
            }
        }

        Ok(Self {
            session_id,
            file_path,
            entries: Mutex::new(entries),
        })
    }

    fn append(&self, entry: Value) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().expect("file entries mutex poisoned");
        let mut line = serde_json::to_vec(&entry)
            .map_err(|error| StoreError::Serialization(error.to_string()))?;
        line.push(b'\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)?;
        file.write_all(&line)?;
        entries.push(entry);
        Ok(())
    }
}

impl SessionManager for FileManager {
    fn session_id(&self) -> String {
        self.session_id.clone()
    }

    fn session_file(&self) -> Option<PathBuf> {
        Some(self.file_path.clone())
    }

    fn append_message(&self, message: &SessionMessage) -> Result<String, StoreError> {
        let id = entry_id("msg");
        let entry = MessageEntry {
            base: new_entry_base("message", &id),
            message: serde_json::to_value(message)
                .map_err(|error| StoreError::Serialization(error.to_string()))?,
        };
        let encoded = serde_json::to_value(&entry)
            .map_err(|error| StoreError::Serialization(error.to_string()))?;
        self.append(encoded)?;
        Ok(id)
    }

    fn append_model_change(&self, provider: &str, model_id: &str) -> Result<String, StoreError> {
        let id = entry_id("model");
        let entry = ModelChangeEntry {
            base: new_entry_base("model_change", &id),
            provider: provider.to_string(),
            model_id: model_id.to_string(),
        };
        let encoded = serde_json::to_value(&entry)
            .map_err(|error| StoreError::Serialization(error.to_string()))?;
        self.append(encoded)?;
        Ok(id)
    }

    fn append_thinking_level_change(&self, level: &str) -> Result<String, StoreError> {
        let id = entry_id("thinking");
        let entry = ThinkingLevelChangeEntry {
            base: new_entry_base("thinking_level_change", &id),
            thinking_level: level.to_string(),
        };
        let encoded = serde_json::to_value(&entry)
            .map_err(|error| StoreError::Serialization(error.to_string()))?;
        self.append(encoded)?;
        Ok(id)
    }

    fn build_context(&self) -> SessionContext {
        SessionContext {
            entries: self
                .entries
                .lock()
                .expect("file entries mutex poisoned")
                .clone(),
            thinking_level: "off".to_string(),
            provider: String::new(),
            model_id: String::new(),
        }
    }
}

/// Path under which [`FileManager`] logs conventionally live:
/// `<root>/<session_id>.jsonl`.
pub fn session_file_path(root: impl AsRef<Path>, session_id: &str) -> PathBuf {
    root.as_ref().join(format!("{session_id}.jsonl"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use phi_llm::{ContentPart, Message};

    fn user_message(text: &str) -> SessionMessage {
        SessionMessage::Plain(Message::user(vec![ContentPart::text(text)]))
    }

    #[test]
    fn in_memory_manager_records_entries_in_order() {
        let manager = InMemoryManager::new("s1");
        assert_eq!(manager.session_id(), "s1");
        assert_eq!(manager.session_file(), None);

        let id = manager
            .append_message(&user_message("hello"))
            .expect("append");
        assert_eq!(id, "in-memory-entry");
        manager
            .append_model_change("openai", "gpt-test")
            .expect("model change");

        let context = manager.build_context();
        assert_eq!(context.entries.len(), 2);
        assert_eq!(context.entries[1]["modelId"], "gpt-test");
    }

    #[test]
    fn build_context_always_reports_thinking_off_and_empty_model() {
        let manager = InMemoryManager::new("s1");
        manager
            .append_thinking_level_change("high")
            .expect("thinking change");
        manager
            .append_model_change("openai", "gpt-test")
            .expect("model change");

        // informational fields intentionally ignore the recorded changes
        let context = manager.build_context();
        assert_eq!(context.thinking_level, "off");
        assert_eq!(context.provider, "");
        assert_eq!(context.model_id, "");
    }

    #[test]
    fn file_manager_appends_jsonl_and_replays_on_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = session_file_path(dir.path().join("sessions"), "s1");

        {
            let manager = FileManager::new("s1", &path).expect("create");
            manager.append_message(&user_message("one")).expect("append");
            manager.append_message(&user_message("two")).expect("append");
            manager
                .append_thinking_level_change("low")
                .expect("thinking change");
        }

        let raw = std::fs::read_to_string(&path).expect("read log");
        assert_eq!(raw.lines().count(), 3);
        for line in raw.lines() {
            serde_json::from_str::<Value>(line).expect("every line is one JSON object");
        }

        let reopened = FileManager::new("s1", &path).expect("reopen");
        let context = reopened.build_context();
        assert_eq!(context.entries.len(), 3);
        assert_eq!(context.entries[0]["type"], "message");
        assert_eq!(context.entries[2]["type"], "thinking_level_change");
        assert_eq!(context.entries[2]["thinkingLevel"], "low");
    }

    #[test]
    fn file_manager_skips_unparsable_lines_on_replay() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("s1.jsonl");
        std::fs::write(&path, "{\"type\":\"message\"}\nnot json\n\n").expect("seed file");

        let manager = FileManager::new("s1", &path).expect("open");
        assert_eq!(manager.build_context().entries.len(), 1);
    }

    #[test]
    fn file_manager_validates_its_inputs() {
        assert!(matches!(
            FileManager::new("", "log.jsonl").err(),
            Some(StoreError::MissingSessionId)
        ));
        assert!(matches!(
            FileManager::new("s1", "").err(),
            Some(StoreError::MissingFilePath)
        ));
    }
}
