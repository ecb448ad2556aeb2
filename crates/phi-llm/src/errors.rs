use thiserror::Error;

/// Failures surfaced by provider adapters and event streams.
///
/// Cloneable because the finalized result of an event stream is cached and
/// may be read more than once.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("{0}")]
    Validation(String),
    #[error("request send failed: {0}")]
    Transport(String),
    #[error("request failed: status={status} body={body}")]
    RemoteStatus { status: u16, body: String },
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("stream error: {0}")]
    Stream(String),
    #[error("request cancelled")]
    Cancelled,
    #[error("auth error: {0}")]
    Auth(String),
}

/// Failures in the ChatGPT credential store and OAuth device flow.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{context}: status={status} body={body}")]
    Status {
        context: &'static str,
        status: u16,
        body: String,
    },
    #[error("http request failed: {0}")]
    Http(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    InvalidResponse(String),
    #[error("stored credentials are not valid JSON: {0}")]
    Malformed(String),
    #[error("device auth timed out after waiting for approval")]
    DeviceAuthTimeout,
    #[error("refresh token is required")]
    MissingRefreshToken,
}

impl From<AuthError> for ProviderError {
    fn from(error: AuthError) -> Self {
        ProviderError::Auth(error.to_string())
    }
}
