//! Error types for the multi-hop reasoning system.

use thiserror::Error;

/// Result type alias using HopError.
pub type Result<T> = std::result::Result<T, HopError>;

/// Errors that can occur while answering or evaluating questions.
#[derive(Error, Debug)]
pub enum HopError {
    /// The retrieval service failed or is unreachable.
    #[error("Retrieval unavailable: {message}")]
    RetrievalUnavailable { message: String },

    /// The reasoning (completion) service failed or is unreachable.
    #[error("Reasoning unavailable: {message}")]
    ReasoningUnavailable { message: String },

    /// A completion could not be parsed into the expected structure.
    #[error("Malformed {mode} completion: {message}")]
    MalformedCompletion { mode: String, message: String },

    /// The reasoning service rejected our credentials.
    #[error("Unauthenticated: {message}")]
    Unauthenticated { message: String },

    /// A port call exceeded its time budget.
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Experiment not found in the store.
    #[error("Experiment not found: {id}")]
    ExperimentNotFound { id: String },

    /// Failed to persist or read an experiment record.
    #[error("Persistence error: {message}")]
    Persistence { message: String },

    /// Invalid argument provided.
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error (unexpected).
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl HopError {
    /// Create a retrieval-unavailable error.
    pub fn retrieval(message: impl Into<String>) -> Self {
        Self::RetrievalUnavailable {
            message: message.into(),
        }
    }

    /// Create a reasoning-unavailable error.
    pub fn reasoning(message: impl Into<String>) -> Self {
        Self::ReasoningUnavailable {
            message: message.into(),
        }
    }

    /// Create a malformed-completion error for the given prompt mode.
    pub fn malformed(mode: impl std::fmt::Display, message: impl Into<String>) -> Self {
        Self::MalformedCompletion {
            mode: mode.to_string(),
            message: message.into(),
        }
    }

    /// Create an unauthenticated error.
    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::Unauthenticated {
            message: message.into(),
        }
    }

    /// Create a persistence error.
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence {
            message: message.into(),
        }
    }

    /// Create an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether a port call that failed with this error is worth one more try.
    ///
    /// Malformed completions and timeouts count as the service being
    /// unavailable for that call.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RetrievalUnavailable { .. }
                | Self::ReasoningUnavailable { .. }
                | Self::MalformedCompletion { .. }
                | Self::Timeout { .. }
        )
    }

    /// Whether this error blocks all further progress on a question.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Unauthenticated { .. })
    }

    /// Get a stable error code for reports and CLI output.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::RetrievalUnavailable { .. } => "RETRIEVAL_UNAVAILABLE",
            Self::ReasoningUnavailable { .. } => "REASONING_UNAVAILABLE",
            Self::MalformedCompletion { .. } => "MALFORMED_COMPLETION",
            Self::Unauthenticated { .. } => "UNAUTHENTICATED",
            Self::Timeout { .. } => "TIMEOUT",
            Self::ExperimentNotFound { .. } => "EXPERIMENT_NOT_FOUND",
            Self::Persistence { .. } => "PERSISTENCE_ERROR",
            Self::InvalidArgument { .. } => "INVALID_ARGUMENT",
            Self::Config { .. } => "CONFIG_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}
