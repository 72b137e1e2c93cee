//! Crate error type and stable error codes.

use crate::transport::TransportError;
use crate::types::SessionId;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("failed to fetch history for session {session}: {reason}")]
    Fetch { session: SessionId, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    pub fn error_code(&self) -> &str {
        match self {
            Self::Transport(_) => "transport",
            Self::Fetch { .. } => "fetch_failed",
            Self::Config(_) => "invalid_config",
        }
    }
}
