use phi_agent::AgentError;
use thiserror::Error;

/// Session-log persistence failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session id is required")]
    MissingSessionId,
    #[error("session file path is required")]
    MissingFilePath,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("entry serialization failed: {0}")]
    Serialization(String),
}

/// Failures surfaced by the embedding SDK.
#[derive(Debug, Error)]
pub enum SdkError {
    #[error(transparent)]
    Agent(#[from] AgentError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("session id is required")]
    MissingSessionId,
    #[error("inbound message text is empty")]
    EmptyInboundText,
    #[error("operation cancelled")]
    Cancelled,
}
