//! Protocol Errors

use agent_core::AgentError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Transport and protocol failures seen by the tool client
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Server unreachable or health probe failed
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("{operation} timed out after {seconds}s")]
    Timeout {
        operation: &'static str,
        seconds: u64,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success status with the server's error message
    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },
}

impl ProtocolError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(_) | Self::Timeout { .. } => true,
            Self::Http(e) => e.is_connect() || e.is_timeout(),
            Self::Status { status, .. } => *status >= 500,
        }
    }

    /// Whether the connection should be considered lost
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout { .. } | Self::Http(_))
    }
}

impl From<ProtocolError> for AgentError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Timeout { operation, seconds } => Self::Timeout {
                operation: operation.to_string(),
                seconds,
            },
            ProtocolError::Connection(msg) => Self::ProviderUnavailable(msg),
            other => Self::ToolExecution(other.to_string()),
        }
    }
}
