//! Deterministic local tool flow: a scripted provider walks the session
//! through write → read → edit → bash without any network access.
//!
//! ```sh
//! cargo run --example local
//! ```

use std::sync::Arc;

use anyhow::Context;
use phi_coding::tools::coding_tools;
use phi_coding::{AgentSession, CreateSessionOptions, FileManager, PromptOptions, session_file_path};
use phi_llm::testing::{MockClient, text_stream, tool_call_stream};
use phi_llm::{Conversation, Model, Role, collect_text};
use serde_json::json;

fn tool_result_count(conversation: &Conversation) -> usize {
    conversation
        .messages
        .iter()
        .filter(|message| message.role == Role::ToolResult)
        .count()
}

fn args(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
    value.as_object().cloned().unwrap_or_default()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let workdir = std::env::temp_dir().join("phi-local-demo");
    let _ = std::fs::remove_dir_all(&workdir);
    std::fs::create_dir_all(&workdir).context("create demo workdir")?;
    let demo_path = "notes/hello.txt";

    let client = MockClient::new(move |model, conversation, _options| {
        Ok(match tool_result_count(conversation) {
            0 => tool_call_stream(
                "call_write",
                "write",
                args(json!({"path": demo_path, "content": "hello from phi\n"})),
                model,
            ),
            1 => tool_call_stream("call_read", "read", args(json!({"path": demo_path})), model),
            2 => tool_call_stream(
                "call_edit",
                "edit",
                args(json!({
                    "path": demo_path,
                    "oldText": "hello from phi",
                    "newText": "hello from edited phi",
                })),
                model,
            ),
            3 => tool_call_stream(
                "call_bash",
                "bash",
                args(json!({"command": format!("cat {demo_path}")})),
                model,
            ),
            _ => text_stream(
                "Local deterministic demo complete: write, read, edit, bash all executed.",
                model,
            ),
        })
    });

    let manager = FileManager::new(
        "local-demo",
        session_file_path(workdir.join(".phi"), "local-demo"),
    )?;
    let session = AgentSession::create(CreateSessionOptions {
        system_prompt: "Run a deterministic local tool flow.".to_string(),
        model: Some(Model {
            provider: "mock".to_string(),
            id: "deterministic-local".to_string(),
            ..Model::default()
        }),
        tools: coding_tools(&workdir),
        session_manager: Some(Arc::new(manager)),
        provider_client: Some(Arc::new(client)),
        ..CreateSessionOptions::default()
    });

    let subscription = session.subscribe(Arc::new(|event| {
        if !event.tool_name.is_empty() {
            println!(
                "[{:?}] tool={} call_id={}",
                event.event_type, event.tool_name, event.tool_call_id
            );
        }
        if let Some(message) = &event.message {
            if message.role() == Role::ToolResult {
                println!("[tool_result] {}", collect_text(message.content()));
            } else if let Some(assistant) = message.as_assistant() {
                let text = assistant.text();
                if !text.trim().is_empty() {
                    println!("[assistant_final] {text}");
                }
            }
        }
    }));

    session
        .prompt("run local deterministic tool demo", PromptOptions::default())
        .await?;
    subscription.unsubscribe();

    let final_path = workdir.join(demo_path);
    let contents = std::fs::read_to_string(&final_path)
        .with_context(|| format!("read {}", final_path.display()))?;
    println!("\nCreated: {}", final_path.display());
    println!("Final file contents:\n{contents}");
    Ok(())
}
