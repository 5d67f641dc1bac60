//! # Botmic Audio Core - Virtual Microphone for Meeting Bots
//!
//! This crate gives an automated meeting participant a microphone that is
//! indistinguishable from real hardware to the page using it:
//! - **Virtual source graph**: one live output track fed by a low hum, a
//!   bridged upstream track, queued PCM or silence, hot-swapped without overlap
//! - **Playback scheduler**: gapless scheduling of arbitrary PCM chunks on a
//!   monotonic audio clock
//! - **Activation gate**: presents the device as live while playback runs,
//!   with a grace window that absorbs pauses
//! - **Capture interception**: every capture request gets a clone of the
//!   virtual track, whatever constraints it asked for
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use botmic_audio_core::{VirtualAudioConfig, VirtualAudioDevice};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let device = VirtualAudioDevice::new(VirtualAudioConfig::from_env()?)?;
//!     device.boot()?;
//!
//!     // 20ms of 48kHz mono audio
//!     device.play_pcm(vec![0.0f32; 960], 48_000, 1)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! All sources feed one shared mix bus inside a lazily opened audio context.
//! Switching sources releases the previous one before the next is wired, and
//! a generation counter keeps callbacks of replaced sources from acting.
//! Lock order is scheduler queue, then activation gate, then graph.

pub mod activation;
pub mod capture;
pub mod clock;
pub mod config;
pub mod context;
pub mod device;
pub mod error;
pub mod events;
pub mod graph;
pub mod logging;
pub mod scheduler;
pub mod track;

// Re-export main types
pub use activation::{
    ActivationGate, ActivationObserver, ActivationState, DeviceVisibility, NoopVisibility,
};
pub use capture::{
    CaptureInterceptor, CaptureRequest, LegacyAlias, LegacyCapture, MediaCapture, MediaConstraints,
    TrackConstraint,
};
pub use clock::AudioClock;
pub use config::{
    CaptureConfig, ContextConfig, LatencyHint, PlaybackConfig, ToneConfig, VirtualAudioConfig,
};
pub use context::{
    AudioContext, AudioEngine, ContextState, SharedContext, SoftwareEngine, UnavailableEngine,
};
pub use device::{VirtualAudioDevice, VirtualAudioDeviceBuilder};
pub use error::{AudioError, AudioResult};
pub use events::{EventEmitter, EventIterator, EventStream, VirtualAudioEvent};
pub use graph::{SourceKind, VirtualSource, VirtualSourceGraph};
pub use logging::{LogFormat, LoggingConfig, setup_logging};
pub use scheduler::{PcmChunk, PlaybackScheduler, SampleData, ScheduledPlayback};
pub use track::{
    AudioFrame, EndedObserver, MediaStream, MediaTrack, TrackId, TrackKind, TrackProducer,
    TrackState,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
