//! Error types for the signaling client

use botmic_audio_core::AudioError;
use thiserror::Error;

/// Result type for signaling operations
pub type SignalingResult<T> = Result<T, SignalingError>;

/// Errors that can occur while negotiating a receive-only session
#[derive(Debug, Error)]
pub enum SignalingError {
    /// The HTTP exchange itself failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The exchange completed but its payload was unusable
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// The signaling endpoint answered with a non-success status
    #[error("{status} {body}")]
    Rejected { status: u16, body: String },

    /// No answer arrived in time
    #[error("Negotiation timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    /// A session description could not be used
    #[error("Invalid session description: {reason}")]
    InvalidDescription { reason: String },

    /// Operation not valid in the current negotiation state
    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    /// The peer connection failed
    #[error("Peer connection error: {message}")]
    Peer { message: String },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// The virtual audio device refused the remote track
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),
}

impl SignalingError {
    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a rejection error
    pub fn rejected(status: u16, body: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            body: body.into(),
        }
    }

    /// Create an invalid description error
    pub fn invalid_description(reason: impl Into<String>) -> Self {
        Self::InvalidDescription {
            reason: reason.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Create a peer error
    pub fn peer(message: impl Into<String>) -> Self {
        Self::Peer {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Whether the endpoint simply has no upstream audio to offer yet
    pub fn is_no_upstream(&self) -> bool {
        matches!(self, Self::Rejected { status: 409, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejected_displays_status_and_body() {
        let err = SignalingError::rejected(409, "No upstream audio has been published yet.");
        assert_eq!(err.to_string(), "409 No upstream audio has been published yet.");
        assert!(err.is_no_upstream());
        assert!(!SignalingError::rejected(500, "boom").is_no_upstream());
    }

    #[test]
    fn test_audio_errors_convert() {
        let err: SignalingError = AudioError::source_unavailable("ended").into();
        assert!(matches!(err, SignalingError::Audio(_)));
    }
}
