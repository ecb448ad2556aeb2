use phi_llm::{AssistantMessage, ProviderError};
use thiserror::Error;

/// Turn-level failures in the runner and session.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("provider client is required")]
    MissingClient,
    #[error("model is required")]
    MissingModel,
    #[error(transparent)]
    Provider(#[from] ProviderError),
    /// The round cap was hit while the model was still requesting tools.
    /// The most recent assistant message rides along so callers can
    /// inspect it.
    #[error("max tool rounds reached without final assistant response")]
    RoundLimit {
        last_assistant: Option<Box<AssistantMessage>>,
    },
}

/// Tool-level failures in lookup, argument handling, and execution.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("missing required argument: {0}")]
    MissingArgument(String),
    #[error("{0}")]
    Execution(String),
    #[error("path escapes working directory: {0}")]
    PathEscape(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue is already running")]
    AlreadyRunning,
    #[error("queue is not running")]
    NotRunning,
    #[error("queue is full")]
    Full,
}
