//! The prompt cycle a host program drives.

use std::sync::Arc;

use phi_agent::{
    Agent, AgentState, ObserverHandler, RunnerOptions, Subscription, ThinkingLevel, Tool,
};
use phi_llm::{AuthMode, ContentPart, ImagePart, Message, Model, ProviderClient};
use tokio_util::sync::CancellationToken;

use crate::errors::SdkError;
use crate::manager::{InMemoryManager, SessionManager};

/// What to do with a prompt that arrives while a stream is in flight.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StreamingBehavior {
    /// Append and run a turn as usual.
    #[default]
    Default,
    /// Queue for injection into the current turn.
    Steer,
    /// Queue for a fresh turn after the current one ends.
    FollowUp,
}

#[derive(Clone, Debug, Default)]
pub struct PromptOptions {
    pub images: Vec<ImagePart>,
    pub streaming_behavior: StreamingBehavior,
}

#[derive(Clone, Default)]
pub struct CreateSessionOptions {
    pub system_prompt: String,
    pub model: Option<Model>,
    pub thinking_level: ThinkingLevel,
    pub tools: Vec<Arc<dyn Tool>>,
    pub session_manager: Option<Arc<dyn SessionManager>>,
    pub provider_client: Option<Arc<dyn ProviderClient>>,
    pub auth_mode: AuthMode,
    pub api_key: String,
    pub access_token: String,
    pub account_id: String,
}

/// An agent wired to a session-log manager and, optionally, a provider
/// client. Without a client, `prompt` records the user message and
/// returns; with one, it runs the full turn loop.
pub struct AgentSession {
    agent: Agent,
    manager: Arc<dyn SessionManager>,
    provider_client: Option<Arc<dyn ProviderClient>>,
    auth_mode: AuthMode,
    api_key: String,
    access_token: String,
    account_id: String,
}

impl AgentSession {
    pub fn create(options: CreateSessionOptions) -> Self {
        let manager = options
            .session_manager
            .unwrap_or_else(|| Arc::new(InMemoryManager::new("session")));
        let agent = Agent::new(AgentState {
            system_prompt: options.system_prompt,
            model: options.model,
            thinking_level: options.thinking_level,
            messages: Vec::new(),
            is_streaming: false,
            tools: options.tools,
        });
        Self {
            agent,
            manager,
            provider_client: options.provider_client,
            auth_mode: options.auth_mode,
            api_key: options.api_key,
            access_token: options.access_token,
            account_id: options.account_id,
        }
    }

    /// Submit a user prompt.
    ///
    /// While a stream is in flight, `steer`/`follow_up` behaviors queue
    /// the message and return without touching the log. Otherwise the
    /// user message is appended and persisted before the turn runs, and
    /// every message the turn appends is persisted afterwards.
    pub async fn prompt(&self, text: &str, options: PromptOptions) -> Result<(), SdkError> {
        let message = user_message(text, &options.images);

        if self.agent.state().is_streaming {
            match options.streaming_behavior {
                StreamingBehavior::FollowUp => {
                    self.agent.follow_up(message);
                    return Ok(());
                }
                StreamingBehavior::Steer => {
                    self.agent.steer(message);
                    return Ok(());
                }
                StreamingBehavior::Default => {}
            }
        }

        let appended = self.agent.prompt(message);
        let before_count = self.agent.state().messages.len();
        self.manager.append_message(&appended)?;

        let Some(client) = self.provider_client.clone() else {
            return Ok(());
        };

        self.agent
            .run_turn(
                CancellationToken::new(),
                RunnerOptions {
                    client: Some(client),
                    auth_mode: self.auth_mode,
                    api_key: self.api_key.clone(),
                    access_token: self.access_token.clone(),
                    account_id: self.account_id.clone(),
                    session_id: self.manager.session_id(),
                    ..RunnerOptions::default()
                },
            )
            .await?;

        for message in self.agent.messages_from(before_count) {
            self.manager.append_message(&message)?;
        }
        Ok(())
    }

    pub fn steer(&self, text: &str) {
        self.agent.steer(user_message(text, &[]));
    }

    pub fn follow_up(&self, text: &str) {
        self.agent.follow_up(user_message(text, &[]));
    }

    pub fn subscribe(&self, handler: ObserverHandler) -> Subscription {
        self.agent.subscribe(handler)
    }

    pub fn state(&self) -> AgentState {
        self.agent.state()
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    pub fn manager(&self) -> &Arc<dyn SessionManager> {
        &self.manager
    }
}

fn user_message(text: &str, images: &[ImagePart]) -> Message {
    let mut content = Vec::with_capacity(1 + images.len());
    if !text.trim().is_empty() {
        content.push(ContentPart::text(text));
    }
    for image in images {
        content.push(ContentPart::Image(image.clone()));
    }
    Message::user(content)
}
