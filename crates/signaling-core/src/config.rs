//! Signaling client configuration

use crate::error::{SignalingError, SignalingResult};
use crate::types::AudioFeed;
use serde::Deserialize;
use std::time::Duration;

/// Signaling client configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    /// Base URL of the signaling endpoint
    pub base_url: String,
    /// Path answering offers for the bridged meeting audio
    pub meeting_audio_path: String,
    /// Path answering offers for the independent server audio feed
    pub server_audio_path: String,
    /// Upper bound on one offer/answer exchange
    pub negotiation_timeout_ms: u64,
    /// Delay before the startup negotiation
    pub startup_delay_ms: u64,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            meeting_audio_path: "/offer_meeting_audio".to_string(),
            server_audio_path: "/offer".to_string(),
            negotiation_timeout_ms: 10_000,
            startup_delay_ms: 1_000,
        }
    }
}

impl SignalingConfig {
    /// Configuration pointing at another endpoint
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Load configuration from environment
    pub fn from_env() -> SignalingResult<Self> {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("BOTMIC_SIGNALING_URL") {
            config.base_url = url;
        }
        if let Ok(ms) = std::env::var("BOTMIC_NEGOTIATION_TIMEOUT_MS") {
            config.negotiation_timeout_ms = ms.parse().map_err(|_| {
                SignalingError::config(format!("invalid negotiation timeout: {}", ms))
            })?;
        }
        if let Ok(ms) = std::env::var("BOTMIC_STARTUP_DELAY_MS") {
            config.startup_delay_ms = ms
                .parse()
                .map_err(|_| SignalingError::config(format!("invalid startup delay: {}", ms)))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> SignalingResult<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(SignalingError::config(format!(
                "base URL must be http(s): {}",
                self.base_url
            )));
        }
        for path in [&self.meeting_audio_path, &self.server_audio_path] {
            if !path.starts_with('/') {
                return Err(SignalingError::config(format!("path must start with '/': {}", path)));
            }
        }
        if self.negotiation_timeout_ms == 0 {
            return Err(SignalingError::config("negotiation timeout must be positive"));
        }
        Ok(())
    }

    pub fn negotiation_timeout(&self) -> Duration {
        Duration::from_millis(self.negotiation_timeout_ms)
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_delay_ms)
    }

    /// Endpoint path for a feed
    pub fn path_for(&self, feed: AudioFeed) -> &str {
        match feed {
            AudioFeed::MeetingAudio => &self.meeting_audio_path,
            AudioFeed::ServerAudio => &self.server_audio_path,
        }
    }

    /// Full endpoint URL for a feed
    pub fn url_for(&self, feed: AudioFeed) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.path_for(feed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SignalingConfig::default();
        config.validate().unwrap();
        assert_eq!(
            config.url_for(AudioFeed::MeetingAudio),
            "http://localhost:8000/offer_meeting_audio"
        );
        assert_eq!(config.url_for(AudioFeed::ServerAudio), "http://localhost:8000/offer");
        assert_eq!(config.negotiation_timeout(), Duration::from_secs(10));
        assert_eq!(config.startup_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_trailing_slash_is_tolerated() {
        let config = SignalingConfig::with_base_url("http://127.0.0.1:9000/");
        assert_eq!(
            config.url_for(AudioFeed::MeetingAudio),
            "http://127.0.0.1:9000/offer_meeting_audio"
        );
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(SignalingConfig::with_base_url("localhost:8000").validate().is_err());

        let mut config = SignalingConfig::default();
        config.server_audio_path = "offer".to_string();
        assert!(config.validate().is_err());

        let mut config = SignalingConfig::default();
        config.negotiation_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json() {
        let config: SignalingConfig =
            serde_json::from_str(r#"{ "negotiation_timeout_ms": 2500 }"#).unwrap();
        assert_eq!(config.negotiation_timeout_ms, 2_500);
        assert_eq!(config.meeting_audio_path, "/offer_meeting_audio");
    }
}
