use std::error::Error;

use bytes::Bytes;

/// Every failure surfaced by transports, tunnels and sessions.
///
/// Variants are stable identifiers; match on them, not on messages.
/// Timeout, cancellation and prompt failures carry whatever output had
/// accumulated so callers can diagnose the device state.
#[derive(thiserror::Error, Debug)]
pub enum NetexpectError {
    #[error("authentication failed")]
    Auth,

    #[error("endpoint unreachable")]
    Unreachable(#[source] std::io::Error),

    #[error("connection closed")]
    Closed,

    #[error("timed out waiting for a match while running {command:?}")]
    Timeout { command: String, output: Bytes },

    #[error("cancelled while running {command:?}")]
    Cancelled { command: String, output: Bytes },

    #[error("prompt not found")]
    PromptNotFound { output: Bytes },

    #[error("no answer configured for question {question:?}")]
    UnansweredQuestion { command: String, question: String },

    /// Produced only when a caller opts to escalate an error-detected
    /// command result into a failure.
    #[error("device reported an error matching {pattern:?}")]
    Device { pattern: String, output: Bytes },

    #[error("not supported by this transport")]
    NotSupported,

    #[error("control master: {0}")]
    ControlMaster(String),

    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("SSH: {0}")]
    Ssh(#[from] russh::Error),

    #[error("key handling: {0}")]
    SshKeys(#[from] russh::keys::Error),

    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(Box<dyn Error + Send + Sync>),
}

impl NetexpectError {
    pub fn other<E: Error + Send + Sync + 'static>(err: E) -> Self {
        Self::Other(Box::new(err))
    }

    /// True for failures that closing and reopening the session may clear.
    pub fn is_retriable(&self) -> bool {
        !matches!(
            self,
            NetexpectError::Auth
                | NetexpectError::NotSupported
                | NetexpectError::Pattern(_)
                | NetexpectError::UnansweredQuestion { .. }
        )
    }
}
