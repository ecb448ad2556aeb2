//! Prompt-cycle behavior of `AgentSession`: persistence ordering, tool
//! execution, image prompts, and error paths.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use phi_agent::{SessionMessage, Tool, ToolError, ToolResult};
use phi_coding::{
    AgentSession, CreateSessionOptions, PromptOptions, SessionContext, SessionManager, StoreError,
};
use phi_llm::testing::{MockClient, text_stream, tool_call_stream};
use phi_llm::{ContentPart, Conversation, ImagePart, Model, ProviderError, Role};
use serde_json::{Map, Value, json};

struct RecordingManager {
    id: String,
    appended: Mutex<Vec<SessionMessage>>,
    fail_appends: bool,
}

impl RecordingManager {
    fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            appended: Mutex::new(Vec::new()),
            fail_appends: false,
        })
    }

    fn failing(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            appended: Mutex::new(Vec::new()),
            fail_appends: true,
        })
    }

    fn appended(&self) -> Vec<SessionMessage> {
        self.appended.lock().expect("appended messages").clone()
    }
}

impl SessionManager for RecordingManager {
    fn session_id(&self) -> String {
        self.id.clone()
    }

    fn session_file(&self) -> Option<PathBuf> {
        None
    }

    fn append_message(&self, message: &SessionMessage) -> Result<String, StoreError> {
        if self.fail_appends {
            return Err(StoreError::Serialization("persist failed".to_string()));
        }
        self.appended
            .lock()
            .expect("appended messages")
            .push(message.clone());
        Ok("entry".to_string())
    }

    fn append_model_change(&self, _provider: &str, _model_id: &str) -> Result<String, StoreError> {
        Ok("model".to_string())
    }

    fn append_thinking_level_change(&self, _level: &str) -> Result<String, StoreError> {
        Ok("thinking".to_string())
    }

    fn build_context(&self) -> SessionContext {
        SessionContext {
            thinking_level: "off".to_string(),
            ..SessionContext::default()
        }
    }
}

struct CountingTool {
    calls: AtomicUsize,
}

#[async_trait]
impl Tool for CountingTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "test write tool"
    }

    fn parameters(&self) -> Map<String, Value> {
        json!({"type": "object"}).as_object().cloned().unwrap_or_default()
    }

    async fn execute(
        &self,
        _tool_call_id: &str,
        _args: &Map<String, Value>,
    ) -> Result<ToolResult, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ToolResult {
            content: vec![ContentPart::text("ok")],
            details: Map::new(),
        })
    }
}

fn mock_model() -> Model {
    Model {
        provider: "mock".to_string(),
        id: "m1".to_string(),
        ..Model::default()
    }
}

fn has_tool_result(conversation: &Conversation) -> bool {
    conversation
        .messages
        .iter()
        .any(|message| message.role == Role::ToolResult)
}

#[tokio::test]
async fn prompt_without_a_provider_appends_and_persists_the_user_message() {
    let manager = RecordingManager::new("s1");
    let session = AgentSession::create(CreateSessionOptions {
        system_prompt: "help".to_string(),
        session_manager: Some(manager.clone()),
        ..CreateSessionOptions::default()
    });

    session
        .prompt("hello", PromptOptions::default())
        .await
        .expect("prompt should succeed");

    assert_eq!(session.state().messages.len(), 1);
    assert_eq!(manager.appended().len(), 1);
    assert_eq!(manager.appended()[0].role(), Role::User);
}

#[tokio::test]
async fn prompt_includes_images_after_the_text_part() {
    let manager = RecordingManager::new("s1");
    let session = AgentSession::create(CreateSessionOptions {
        session_manager: Some(manager),
        ..CreateSessionOptions::default()
    });

    session
        .prompt(
            "hello",
            PromptOptions {
                images: vec![ImagePart {
                    mime_type: "image/png".to_string(),
                    data: "abc".to_string(),
                }],
                ..PromptOptions::default()
            },
        )
        .await
        .expect("prompt should succeed");

    let state = session.state();
    let content = state.messages[0].content();
    assert_eq!(content.len(), 2);
    assert!(matches!(content[0], ContentPart::Text(_)));
    assert!(matches!(content[1], ContentPart::Image(_)));
}

#[tokio::test]
async fn prompt_runs_the_turn_and_persists_assistant_messages() {
    let manager = RecordingManager::new("s1");
    let client = Arc::new(MockClient::new(|model, _conversation, _options| {
        Ok(text_stream("ok", model))
    }));
    let session = AgentSession::create(CreateSessionOptions {
        system_prompt: "help".to_string(),
        model: Some(mock_model()),
        session_manager: Some(manager.clone()),
        provider_client: Some(client),
        ..CreateSessionOptions::default()
    });

    session
        .prompt("hello", PromptOptions::default())
        .await
        .expect("prompt should succeed");

    assert_eq!(session.state().messages.len(), 2);
    let appended = manager.appended();
    assert_eq!(appended.len(), 2);
    assert!(appended[1].as_assistant().is_some());
}

#[tokio::test]
async fn prompt_executes_tools_and_persists_the_whole_round() {
    let manager = RecordingManager::new("s2");
    let tool = Arc::new(CountingTool {
        calls: AtomicUsize::new(0),
    });
    let client = Arc::new(MockClient::new(|model, conversation, _options| {
        if has_tool_result(conversation) {
            Ok(text_stream("done", model))
        } else {
            let mut args = Map::new();
            args.insert("path".to_string(), Value::String("a.py".to_string()));
            Ok(tool_call_stream("call_1", "write_file", args, model))
        }
    }));

    let session = AgentSession::create(CreateSessionOptions {
        system_prompt: "help".to_string(),
        model: Some(mock_model()),
        tools: vec![tool.clone()],
        session_manager: Some(manager.clone()),
        provider_client: Some(client),
        ..CreateSessionOptions::default()
    });

    session
        .prompt("hello", PromptOptions::default())
        .await
        .expect("prompt should succeed");

    assert_eq!(tool.calls.load(Ordering::SeqCst), 1);
    assert_eq!(session.state().messages.len(), 4);
    // user, assistant-with-call, tool_result, assistant-final all persisted
    assert_eq!(manager.appended().len(), 4);
}

#[tokio::test]
async fn manager_append_failures_stop_the_prompt_before_the_runner() {
    let manager = RecordingManager::failing("s1");
    let client = Arc::new(MockClient::new(|_model, _conversation, _options| {
        panic!("the runner must not be invoked after a persist failure");
    }));
    let session = AgentSession::create(CreateSessionOptions {
        model: Some(mock_model()),
        session_manager: Some(manager),
        provider_client: Some(client),
        ..CreateSessionOptions::default()
    });

    let error = session
        .prompt("hello", PromptOptions::default())
        .await
        .err()
        .expect("prompt should fail");
    assert!(error.to_string().contains("persist failed"));
}

#[tokio::test]
async fn provider_errors_propagate_with_the_user_message_already_persisted() {
    let manager = RecordingManager::new("s1");
    let client = Arc::new(MockClient::new(|_model, _conversation, _options| {
        Err(ProviderError::Transport("provider failed".to_string()))
    }));
    let session = AgentSession::create(CreateSessionOptions {
        model: Some(mock_model()),
        session_manager: Some(manager.clone()),
        provider_client: Some(client),
        ..CreateSessionOptions::default()
    });

    let error = session
        .prompt("hello", PromptOptions::default())
        .await
        .err()
        .expect("prompt should fail");
    assert!(error.to_string().contains("provider failed"));
    assert_eq!(manager.appended().len(), 1);
}

#[tokio::test]
async fn steer_and_follow_up_enqueue_without_touching_the_log() {
    let session = AgentSession::create(CreateSessionOptions {
        session_manager: Some(RecordingManager::new("s1")),
        ..CreateSessionOptions::default()
    });

    session.steer("be concise");
    session.follow_up("and include tests");

    assert_eq!(session.agent().pending_steer().len(), 1);
    assert_eq!(session.agent().pending_follow_up().len(), 1);
    assert!(session.state().messages.is_empty());
}
