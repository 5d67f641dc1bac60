//! Configuration for the virtual audio device
//!
//! Every section has defaults matching what meeting pages expect from a
//! quiet, always-present microphone. Values can be loaded from JSON or
//! overlaid from `BOTMIC_*` environment variables.

use crate::error::{AudioError, AudioResult};
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;

/// Lowest sample rate a playable buffer may declare
pub const MIN_SAMPLE_RATE: u32 = 3_000;

/// Highest sample rate a playable buffer may declare
pub const MAX_SAMPLE_RATE: u32 = 768_000;

/// Audio constraint fields the virtual microphone can never honor
pub const DEFAULT_IGNORED_AUDIO_CONSTRAINTS: &[&str] = &[
    "deviceId",
    "sampleRate",
    "channelCount",
    "autoGainControl",
    "echoCancellation",
    "noiseSuppression",
];

/// Main configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct VirtualAudioConfig {
    pub context: ContextConfig,
    pub tone: ToneConfig,
    pub playback: PlaybackConfig,
    pub capture: CaptureConfig,
}

/// Latency preference passed to the audio engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LatencyHint {
    Interactive,
    Balanced,
    Playback,
}

/// Audio processing context configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub sample_rate: u32,
    pub latency_hint: LatencyHint,
    /// Open the context suspended; the first activation resumes it
    pub start_suspended: bool,
}

/// Fallback tone generator configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToneConfig {
    pub frequency_hz: f32,
    pub gain: f32,
}

/// Playback scheduler configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// How long the device stays live after the queue drains
    pub grace_period_ms: u64,
    /// Fraction of the remaining scheduled audio to sleep before the next drain step
    pub lead_fraction: f64,
    /// How much already played audio is retained for late readers
    pub history_ms: u64,
}

/// Capture interception configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub ignored_audio_constraints: Vec<String>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            latency_hint: LatencyHint::Interactive,
            start_suspended: false,
        }
    }
}

impl Default for ToneConfig {
    fn default() -> Self {
        Self {
            frequency_hz: 150.0,
            gain: 0.02,
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: 2_000,
            lead_fraction: 0.8,
            history_ms: 1_000,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            ignored_audio_constraints: DEFAULT_IGNORED_AUDIO_CONSTRAINTS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl PlaybackConfig {
    /// Grace period as a duration
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    /// Grace period in audio clock seconds
    pub fn grace_period_secs(&self) -> f64 {
        self.grace_period_ms as f64 / 1000.0
    }

    /// Retained history in audio clock seconds
    pub fn history_secs(&self) -> f64 {
        self.history_ms as f64 / 1000.0
    }
}

impl VirtualAudioConfig {
    /// Load configuration from environment
    pub fn from_env() -> AudioResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Parse configuration from a JSON document; missing fields keep their defaults
    pub fn from_json_str(json: &str) -> AudioResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| AudioError::config(format!("invalid JSON configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> AudioResult<Self> {
        let mut config = Self::default();
        overlay(&lookup, "BOTMIC_SAMPLE_RATE", &mut config.context.sample_rate)?;
        overlay(&lookup, "BOTMIC_TONE_FREQUENCY_HZ", &mut config.tone.frequency_hz)?;
        overlay(&lookup, "BOTMIC_TONE_GAIN", &mut config.tone.gain)?;
        overlay(&lookup, "BOTMIC_GRACE_PERIOD_MS", &mut config.playback.grace_period_ms)?;
        overlay(&lookup, "BOTMIC_LEAD_FRACTION", &mut config.playback.lead_fraction)?;
        overlay(&lookup, "BOTMIC_START_SUSPENDED", &mut config.context.start_suspended)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> AudioResult<()> {
        if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&self.context.sample_rate) {
            return Err(AudioError::config(format!(
                "sample rate {} outside {}..={}",
                self.context.sample_rate, MIN_SAMPLE_RATE, MAX_SAMPLE_RATE
            )));
        }

        if !(self.tone.frequency_hz > 0.0 && self.tone.frequency_hz.is_finite()) {
            return Err(AudioError::config("tone frequency must be positive"));
        }

        if !(0.0..=1.0).contains(&self.tone.gain) {
            return Err(AudioError::config("tone gain must be within 0.0..=1.0"));
        }

        if !(self.playback.lead_fraction > 0.0 && self.playback.lead_fraction <= 1.0) {
            return Err(AudioError::config("lead fraction must be within (0.0, 1.0]"));
        }

        Ok(())
    }
}

fn overlay<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) -> AudioResult<()> {
    if let Some(raw) = lookup(key) {
        *target = raw
            .trim()
            .parse()
            .map_err(|_| AudioError::config(format!("{} has an invalid value: {}", key, raw)))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = VirtualAudioConfig::default();
        config.validate().unwrap();
        assert_eq!(config.context.sample_rate, 48_000);
        assert_eq!(config.tone.frequency_hz, 150.0);
        assert_eq!(config.playback.grace_period(), Duration::from_secs(2));
        assert_eq!(config.capture.ignored_audio_constraints.len(), 6);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = VirtualAudioConfig::from_json_str(
            r#"{ "tone": { "gain": 0.1 }, "context": { "latency_hint": "playback" } }"#,
        )
        .unwrap();

        assert_eq!(config.tone.gain, 0.1);
        assert_eq!(config.tone.frequency_hz, 150.0);
        assert_eq!(config.context.latency_hint, LatencyHint::Playback);
        assert_eq!(config.playback.lead_fraction, 0.8);
    }

    #[test]
    fn test_env_overlay() {
        let vars: HashMap<&str, &str> = [
            ("BOTMIC_SAMPLE_RATE", "16000"),
            ("BOTMIC_GRACE_PERIOD_MS", " 500 "),
        ]
        .into_iter()
        .collect();

        let config =
            VirtualAudioConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap();
        assert_eq!(config.context.sample_rate, 16_000);
        assert_eq!(config.playback.grace_period_ms, 500);
    }

    #[test]
    fn test_env_overlay_rejects_garbage() {
        let err = VirtualAudioConfig::from_lookup(|key| {
            (key == "BOTMIC_TONE_GAIN").then(|| "loud".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, AudioError::InvalidConfig { .. }));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = VirtualAudioConfig::default();
        config.playback.lead_fraction = 1.5;
        assert!(config.validate().is_err());

        let mut config = VirtualAudioConfig::default();
        config.context.sample_rate = 0;
        assert!(config.validate().is_err());
    }
}
