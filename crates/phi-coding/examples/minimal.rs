//! Minimal single-prompt session against the OpenAI API.
//!
//! ```sh
//! OPENAI_API_KEY=sk-... cargo run --example minimal
//! ```

use std::sync::Arc;

use anyhow::Context;
use phi_agent::AgentEventType;
use phi_coding::{AgentSession, CreateSessionOptions, PromptOptions};
use phi_llm::{Model, OpenAIClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let api_key = std::env::var("OPENAI_API_KEY").context("OPENAI_API_KEY is required")?;

    let session = AgentSession::create(CreateSessionOptions {
        system_prompt: "You are a concise assistant.".to_string(),
        model: Some(Model {
            provider: "openai".to_string(),
            id: "gpt-4o-mini".to_string(),
            ..Model::default()
        }),
        provider_client: Some(Arc::new(OpenAIClient::new())),
        api_key,
        ..CreateSessionOptions::default()
    });

    let subscription = session.subscribe(Arc::new(|event| {
        if event.event_type == AgentEventType::MessageUpdate {
            if let Some(stream) = &event.stream {
                print!("{}", stream.delta);
            }
        }
    }));

    session
        .prompt("Write a haiku about borrow checking.", PromptOptions::default())
        .await?;
    println!();

    subscription.unsubscribe();
    Ok(())
}
