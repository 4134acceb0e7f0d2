//! Error types for the lumina dialogue engine.

/// Top-level error type for the turn-taking engine.
#[derive(Debug, thiserror::Error)]
pub enum DialogueError {
    /// Retryable upstream failure (brief disconnect, transient vendor hiccup).
    #[error("transient upstream error: {0}")]
    TransientUpstream(String),

    /// Upstream rejected the request; retrying will not help.
    #[error("permanent upstream error: {0}")]
    PermanentUpstream(String),

    /// Malformed message from a vendor or the capture ingress.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A bounded operation did not complete in time.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The operation was cancelled by a cancel token.
    #[error("cancelled")]
    Cancelled,

    /// Internal invariant violation (a bug).
    #[error("internal error: {0}")]
    Internal(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DialogueError {
    /// Whether the recognition session manager may retry after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientUpstream(_))
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, DialogueError>;
