//! The turn runner: stream → tool dispatch → resume, until the model
//! stops requesting tools or the round cap is hit.

use std::sync::Arc;

use phi_llm::{
    AuthMode, ContentPart, Conversation, Message, ProviderClient, Role, StopReason, StreamOptions,
    ToolCallPart, ToolDescriptor, collect_tool_calls,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::AgentError;
use crate::session::{Agent, now_millis};
use crate::types::{AgentEvent, SessionMessage, Tool};

pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 8;

#[derive(Clone, Default)]
pub struct RunnerOptions {
    pub client: Option<Arc<dyn ProviderClient>>,
    pub auth_mode: AuthMode,
    pub api_key: String,
    pub access_token: String,
    pub account_id: String,
    pub base_url: String,
    pub session_id: String,
    /// Tool list for this turn; the session's tools when empty.
    pub tools: Vec<Arc<dyn Tool>>,
    /// Round cap; zero means the default of 8.
    pub max_tool_rounds: usize,
}

/// Clears the streaming flag and emits `turn_end` on every exit path.
struct TurnGuard {
    agent: Agent,
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        self.agent.set_streaming(false);
        self.agent.emit(&AgentEvent::turn_end());
    }
}

impl Agent {
    /// Drive one turn. The session must already hold the triggering user
    /// message at the tail of its log.
    pub async fn run_turn(
        &self,
        cancel: CancellationToken,
        options: RunnerOptions,
    ) -> Result<phi_llm::AssistantMessage, AgentError> {
        let Some(client) = options.client.clone() else {
            return Err(AgentError::MissingClient);
        };
        let state = self.state();
        let Some(model) = state.model.clone() else {
            return Err(AgentError::MissingModel);
        };

        let tools = if options.tools.is_empty() {
            state.tools.clone()
        } else {
            options.tools.clone()
        };
        let max_rounds = if options.max_tool_rounds == 0 {
            DEFAULT_MAX_TOOL_ROUNDS
        } else {
            options.max_tool_rounds
        };

        self.emit(&AgentEvent::turn_start());
        self.set_streaming(true);
        let _guard = TurnGuard {
            agent: self.clone(),
        };

        let mut last_assistant: Option<phi_llm::AssistantMessage> = None;
        for round in 0..max_rounds {
            debug!(
                session_id = %options.session_id,
                round,
                message_count = self.message_count(),
                "dispatching stream round"
            );
            let conversation = self.conversation_snapshot(&tools);
            let mut stream = client
                .stream(
                    cancel.clone(),
                    &model,
                    conversation,
                    StreamOptions {
                        auth_mode: options.auth_mode,
                        api_key: options.api_key.clone(),
                        access_token: options.access_token.clone(),
                        account_id: options.account_id.clone(),
                        session_id: options.session_id.clone(),
                        base_url: options.base_url.clone(),
                        ..StreamOptions::default()
                    },
                )
                .await?;

            while let Some(event) = stream.recv().await {
                self.emit(&AgentEvent::from_stream(&event));
            }
            let result = stream.result().await;
            stream.close();
            let mut assistant = result?;

            if assistant.timestamp == 0 {
                assistant.timestamp = now_millis();
            }
            let appended = self.append(SessionMessage::Assistant(assistant.clone()));
            self.emit(&AgentEvent::message_end(appended));

            let tool_calls = collect_tool_calls(&assistant.content);
            if tool_calls.is_empty() || assistant.stop_reason != StopReason::ToolUse {
                return Ok(assistant);
            }
            last_assistant = Some(assistant);

            for call in &tool_calls {
                let (message, is_error) = self.execute_tool_call(&tools, call).await;
                let appended = self.append(SessionMessage::Plain(message));
                self.emit(&AgentEvent::tool_execution_end(
                    call.name.clone(),
                    call.id.clone(),
                    is_error,
                    appended,
                ));
            }
        }

        Err(AgentError::RoundLimit {
            last_assistant: last_assistant.map(Box::new),
        })
    }

    /// Project the session log into the wire shape: assistant entries
    /// collapse to plain messages, tools become descriptors.
    fn conversation_snapshot(&self, tools: &[Arc<dyn Tool>]) -> Conversation {
        let state = self.state();
        let messages = state
            .messages
            .iter()
            .map(|message| match message {
                SessionMessage::Plain(plain) => plain.clone(),
                SessionMessage::Assistant(assistant) => Message {
                    role: Role::Assistant,
                    content: assistant.content.clone(),
                    tool_call_id: String::new(),
                    tool_name: String::new(),
                    timestamp: assistant.timestamp,
                },
            })
            .collect();
        let tools = tools
            .iter()
            .map(|tool| ToolDescriptor {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters(),
            })
            .collect();
        Conversation {
            system_prompt: state.system_prompt,
            messages,
            tools,
        }
    }

    /// Dispatch one tool call. Failures never abort the turn; they become
    /// tool-result messages so the model may recover.
    async fn execute_tool_call(
        &self,
        tools: &[Arc<dyn Tool>],
        call: &ToolCallPart,
    ) -> (Message, bool) {
        self.emit(&AgentEvent::tool_execution_start(call.name.clone(), call.id.clone()));

        let Some(tool) = tools.iter().find(|tool| tool.name() == call.name) else {
            warn!(tool = %call.name, "tool not found");
            return (
                tool_error_message(call, format!("Tool not found: {}", call.name)),
                true,
            );
        };

        match tool.execute(&call.id, &call.arguments).await {
            Err(error) => {
                warn!(tool = %call.name, error = %error, "tool execution failed");
                (
                    tool_error_message(call, format!("Tool execution error: {error}")),
                    true,
                )
            }
            Ok(result) => {
                let mut content = result.content;
                if content.is_empty() {
                    content.push(ContentPart::text("(tool returned no output)"));
                }
                (
                    Message::tool_result(call.id.clone(), call.name.clone(), content),
                    false,
                )
            }
        }
    }
}

fn tool_error_message(call: &ToolCallPart, text: String) -> Message {
    Message::tool_result(call.id.clone(), call.name.clone(), vec![ContentPart::text(text)])
}
