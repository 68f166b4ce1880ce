use std::time::Duration;

use moltslack_protocol::{ErrorCode, SessionId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MoltError {
    #[error("invalid working directory: {0}")]
    InvalidPath(String),

    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("session is not running: {0}")]
    SessionNotRunning(SessionId),

    #[error("unsupported provider: {0}")]
    UnsupportedProvider(String),

    #[error("prompt cannot be empty")]
    EmptyPrompt,

    #[error("{0} CLI not found in PATH")]
    CliNotFound(String),

    #[error("provider timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("{0}")]
    ProviderStderr(String),

    #[error("{provider} exited with code {code}")]
    ProviderExit { provider: String, code: i32 },

    #[error("no summary returned")]
    NoSummary,

    #[error("pty error: {0}")]
    PtyError(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl MoltError {
    /// Convert to protocol error code and sanitized message.
    pub fn to_error_code(&self) -> (ErrorCode, String) {
        match self {
            MoltError::InvalidPath(_) => (ErrorCode::InvalidPath, self.to_string()),
            MoltError::SessionNotFound(_) => (ErrorCode::SessionNotFound, self.to_string()),
            MoltError::SessionNotRunning(_) => (ErrorCode::SessionNotRunning, self.to_string()),
            MoltError::UnsupportedProvider(_) => {
                (ErrorCode::UnsupportedProvider, self.to_string())
            }
            MoltError::EmptyPrompt => (ErrorCode::EmptyPrompt, self.to_string()),
            MoltError::CliNotFound(_) => (ErrorCode::CliNotFound, self.to_string()),
            MoltError::Timeout(_) => (ErrorCode::Timeout, self.to_string()),
            MoltError::ProviderStderr(_)
            | MoltError::ProviderExit { .. }
            | MoltError::NoSummary => (ErrorCode::ProviderFailed, self.to_string()),
            MoltError::PtyError(_) => (ErrorCode::ServerError, self.to_string()),
            MoltError::Io(_) => (ErrorCode::ServerError, "internal I/O error".to_string()),
        }
    }
}
