//! Error types for the embedding capability.

/// Result type for embedding operations.
pub type Result<T> = std::result::Result<T, EmbedError>;

/// Error type for embedding providers.
///
/// The indexing layer retries [`EmbedError::Transient`] failures with
/// backoff; every other variant is terminal for the current attempt.
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    /// Temporary failure (rate limit, timeout, connection loss); safe to retry.
    #[error("transient embedding failure: {message}")]
    Transient { message: String },

    /// The input cannot be embedded at all.
    #[error("invalid embedding input: {message}")]
    InvalidInput { message: String },

    /// IO errors from providers backed by local files.
    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Async task join errors.
    #[error("async task failed: {source}")]
    AsyncTask {
        #[from]
        source: tokio::task::JoinError,
    },

    /// Generic errors from provider internals.
    #[error("embedding provider error: {source}")]
    External {
        #[from]
        source: anyhow::Error,
    },
}

impl EmbedError {
    /// Create a transient error with a custom message.
    pub fn transient<S: Into<String>>(message: S) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Create an invalid-input error with a custom message.
    pub fn invalid_input<S: Into<String>>(message: S) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Whether retrying this operation could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}
