//! Capture interception
//!
//! [`CaptureInterceptor`] stands in for the host's capture entry point.
//! Audio is always served from the virtual microphone; video still comes
//! from the real device. Legacy callback-style entry points are thin
//! adapters over the same interceptor.

use crate::config::CaptureConfig;
use crate::error::{AudioError, AudioResult};
use crate::events::{EventEmitter, VirtualAudioEvent};
use crate::graph::VirtualSourceGraph;
use crate::track::{MediaStream, TrackKind};
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Per-kind constraint as callers write it: `false`, `true` or an object
#[derive(Debug, Clone, Default, PartialEq)]
pub enum TrackConstraint {
    #[default]
    Disabled,
    Enabled,
    Constrained(Map<String, Value>),
}

impl TrackConstraint {
    pub fn is_requested(&self) -> bool {
        !matches!(self, TrackConstraint::Disabled)
    }

    pub fn to_value(&self) -> Value {
        match self {
            TrackConstraint::Disabled => Value::Bool(false),
            TrackConstraint::Enabled => Value::Bool(true),
            TrackConstraint::Constrained(map) => Value::Object(map.clone()),
        }
    }

    fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::Null | Value::Bool(false) => Ok(TrackConstraint::Disabled),
            Value::Bool(true) => Ok(TrackConstraint::Enabled),
            Value::Object(map) => Ok(TrackConstraint::Constrained(map)),
            other => Err(format!("expected a boolean or an object, got {}", other)),
        }
    }
}

impl Serialize for TrackConstraint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TrackConstraint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        TrackConstraint::from_value(value).map_err(serde::de::Error::custom)
    }
}

/// Constraints passed to a capture call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConstraints {
    pub audio: TrackConstraint,
    pub video: TrackConstraint,
}

impl MediaConstraints {
    pub fn audio_only() -> Self {
        Self {
            audio: TrackConstraint::Enabled,
            video: TrackConstraint::Disabled,
        }
    }

    pub fn video_only() -> Self {
        Self {
            audio: TrackConstraint::Disabled,
            video: TrackConstraint::Enabled,
        }
    }

    /// Parse the host JSON shape, e.g. `{"audio": true, "video": {"width": 640}}`
    pub fn from_value(value: Value) -> AudioResult<Self> {
        serde_json::from_value(value)
            .map_err(|e| AudioError::constraint("constraints", e.to_string()))
    }

    pub fn request(&self) -> CaptureRequest {
        CaptureRequest {
            wants_audio: self.audio.is_requested(),
            wants_video: self.video.is_requested(),
            raw: self.clone(),
        }
    }
}

/// What a capture call asks for
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub wants_audio: bool,
    pub wants_video: bool,
    pub raw: MediaConstraints,
}

/// Device capture entry point
#[async_trait]
pub trait MediaCapture: Send + Sync {
    async fn get_user_media(&self, constraints: MediaConstraints) -> AudioResult<MediaStream>;
}

/// Capture override serving audio from the virtual microphone
pub struct CaptureInterceptor {
    original: Arc<dyn MediaCapture>,
    graph: VirtualSourceGraph,
    ignored: Vec<String>,
    events: EventEmitter<VirtualAudioEvent>,
}

impl CaptureInterceptor {
    pub fn new(
        original: Arc<dyn MediaCapture>,
        graph: VirtualSourceGraph,
        config: &CaptureConfig,
        events: EventEmitter<VirtualAudioEvent>,
    ) -> Self {
        Self {
            original,
            graph,
            ignored: config.ignored_audio_constraints.clone(),
            events,
        }
    }

    /// Wrap `original`, or hand it back untouched when audio cannot work at all
    pub fn install(
        original: Arc<dyn MediaCapture>,
        graph: VirtualSourceGraph,
        config: &CaptureConfig,
        events: EventEmitter<VirtualAudioEvent>,
    ) -> Arc<dyn MediaCapture> {
        if let Err(e) = graph.context() {
            warn!("Audio engine unavailable, capture left untouched: {}", e);
            events.emit(VirtualAudioEvent::AudioUnavailable {
                reason: e.to_string(),
            });
            return original;
        }
        info!("Capture interception installed");
        Arc::new(Self::new(original, graph, config, events))
    }

    /// Drop audio fields the virtual microphone can never honor
    fn strip_ignored(&self, constraints: &Map<String, Value>) -> Map<String, Value> {
        constraints
            .iter()
            .filter(|(name, _)| !self.ignored.iter().any(|ignored| ignored == *name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }
}

#[async_trait]
impl MediaCapture for CaptureInterceptor {
    async fn get_user_media(&self, constraints: MediaConstraints) -> AudioResult<MediaStream> {
        let request = constraints.request();
        if !request.wants_audio {
            debug!("No audio requested, passing capture through");
            return self.original.get_user_media(constraints).await;
        }

        let audio = match self.graph.clone_for_capture() {
            Ok(track) => track,
            Err(e) => {
                warn!("Virtual microphone unavailable, passing capture through: {}", e);
                self.events.emit(VirtualAudioEvent::AudioUnavailable {
                    reason: e.to_string(),
                });
                return self.original.get_user_media(constraints).await;
            }
        };

        if let TrackConstraint::Constrained(requested) = &request.raw.audio {
            let remaining = self.strip_ignored(requested);
            if let Err(e) = audio.apply_constraints(&Value::Object(remaining)) {
                debug!("Ignoring audio constraints the virtual microphone cannot meet: {}", e);
            }
        }

        let mut stream = MediaStream::with_tracks(vec![audio.clone()]);
        let mut video_tracks = 0;
        if request.wants_video {
            let video_request = MediaConstraints {
                audio: TrackConstraint::Disabled,
                video: request.raw.video.clone(),
            };
            match self.original.get_user_media(video_request).await {
                Ok(real) => {
                    for track in real.tracks() {
                        if track.kind() == TrackKind::Video {
                            stream.add_track(track.clone());
                            video_tracks += 1;
                        } else {
                            track.stop();
                        }
                    }
                }
                Err(e) => {
                    audio.stop();
                    return Err(e);
                }
            }
        }

        debug!(
            "Served capture with virtual track {} and {} video track(s)",
            audio.id(),
            video_tracks
        );
        self.events.emit(VirtualAudioEvent::CaptureServed {
            audio_track: audio.id(),
            video_tracks,
        });
        Ok(stream)
    }
}

/// Historical names of the capture entry point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyAlias {
    Standard,
    Webkit,
    Moz,
}

impl LegacyAlias {
    pub const ALL: [LegacyAlias; 3] =
        [LegacyAlias::Standard, LegacyAlias::Webkit, LegacyAlias::Moz];

    pub fn name(&self) -> &'static str {
        match self {
            LegacyAlias::Standard => "getUserMedia",
            LegacyAlias::Webkit => "webkitGetUserMedia",
            LegacyAlias::Moz => "mozGetUserMedia",
        }
    }
}

/// Callback-style capture entry point delegating to one capture implementation
#[derive(Clone)]
pub struct LegacyCapture {
    capture: Arc<dyn MediaCapture>,
    alias: LegacyAlias,
}

impl LegacyCapture {
    pub fn new(capture: Arc<dyn MediaCapture>, alias: LegacyAlias) -> Self {
        Self { capture, alias }
    }

    /// One adapter per legacy name, all sharing `capture`
    pub fn aliases(capture: Arc<dyn MediaCapture>) -> Vec<LegacyCapture> {
        LegacyAlias::ALL
            .into_iter()
            .map(|alias| LegacyCapture::new(capture.clone(), alias))
            .collect()
    }

    pub fn alias(&self) -> LegacyAlias {
        self.alias
    }

    pub async fn call<S, F>(&self, constraints: MediaConstraints, on_success: S, on_failure: F)
    where
        S: FnOnce(MediaStream) + Send,
        F: FnOnce(AudioError) + Send,
    {
        match self.capture.get_user_media(constraints).await {
            Ok(stream) => on_success(stream),
            Err(e) => on_failure(e),
        }
    }
}

impl std::fmt::Debug for LegacyCapture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LegacyCapture")
            .field("alias", &self.alias.name())
            .finish()
    }
}
