//! Error types for the virtual audio device

use thiserror::Error;

/// Result type for virtual audio operations
pub type AudioResult<T> = Result<T, AudioError>;

/// Errors that can occur in the virtual audio device
#[derive(Debug, Error)]
pub enum AudioError {
    /// The host has no usable audio engine
    #[error("Audio engine unavailable: {reason}")]
    EngineUnavailable { reason: String },

    /// A PCM chunk was rejected before it reached the playback queue
    #[error("Invalid PCM chunk: {reason}")]
    InvalidChunk { reason: String },

    /// Configuration error
    #[error("Configuration error: {message}")]
    InvalidConfig { message: String },

    /// Operation not valid in the current state
    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    /// A source could not be wired into the graph
    #[error("Source unavailable: {reason}")]
    SourceUnavailable { reason: String },

    /// An operation that spawns timers was called outside a tokio runtime
    #[error("No async runtime available for {operation}")]
    NoRuntime { operation: String },

    /// The underlying capture mechanism failed
    #[error("Capture failed: {message}")]
    Capture { message: String },

    /// A track constraint could not be satisfied
    #[error("Constraint '{constraint}' cannot be satisfied: {reason}")]
    Constraint { constraint: String, reason: String },
}

impl AudioError {
    /// Create an engine unavailable error
    pub fn engine_unavailable(reason: impl Into<String>) -> Self {
        Self::EngineUnavailable {
            reason: reason.into(),
        }
    }

    /// Create an invalid chunk error
    pub fn invalid_chunk(reason: impl Into<String>) -> Self {
        Self::InvalidChunk {
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Create a source unavailable error
    pub fn source_unavailable(reason: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            reason: reason.into(),
        }
    }

    /// Create a missing runtime error
    pub fn no_runtime(operation: impl Into<String>) -> Self {
        Self::NoRuntime {
            operation: operation.into(),
        }
    }

    /// Create a capture error
    pub fn capture(message: impl Into<String>) -> Self {
        Self::Capture {
            message: message.into(),
        }
    }

    /// Create a constraint error
    pub fn constraint(constraint: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Constraint {
            constraint: constraint.into(),
            reason: reason.into(),
        }
    }
}
