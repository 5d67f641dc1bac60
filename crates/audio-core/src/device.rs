//! Virtual audio device facade
//!
//! The device owns the shared context, the source graph, the playback
//! scheduler and the activation gate, and is the explicit handle through
//! which everything else reaches them.

use crate::activation::{
    ActivationGate, ActivationObserver, ActivationState, DeviceVisibility, NoopVisibility,
};
use crate::capture::{CaptureInterceptor, MediaCapture};
use crate::config::VirtualAudioConfig;
use crate::context::{AudioEngine, SharedContext, SoftwareEngine};
use crate::error::AudioResult;
use crate::events::{EventEmitter, EventIterator, EventStream, VirtualAudioEvent};
use crate::graph::VirtualSourceGraph;
use crate::scheduler::{PcmChunk, PlaybackScheduler, SampleData};
use crate::track::MediaTrack;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Default capacity of the device event channel
pub const DEFAULT_EVENT_CAPACITY: usize = 1000;

/// Connects gate transitions to the graph and the visibility hooks
struct PlaybackActivation {
    graph: VirtualSourceGraph,
    visibility: Arc<dyn DeviceVisibility>,
}

impl ActivationObserver for PlaybackActivation {
    fn on_activate(&self) {
        if let Err(e) = self.graph.engage_queue() {
            warn!("Could not switch the microphone to playback: {}", e);
        }
        self.visibility.turn_on_mic_and_camera();
    }

    fn on_deactivate(&self) {
        if let Err(e) = self.graph.release_queue() {
            warn!("Could not restore the microphone after playback: {}", e);
        }
        self.visibility.turn_off_mic_and_camera();
    }
}

/// Builder for [`VirtualAudioDevice`]
pub struct VirtualAudioDeviceBuilder {
    config: VirtualAudioConfig,
    engine: Arc<dyn AudioEngine>,
    visibility: Arc<dyn DeviceVisibility>,
    event_capacity: usize,
}

impl VirtualAudioDeviceBuilder {
    pub fn new() -> Self {
        Self {
            config: VirtualAudioConfig::default(),
            engine: Arc::new(SoftwareEngine),
            visibility: Arc::new(NoopVisibility),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    pub fn config(mut self, config: VirtualAudioConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a specific audio engine
    pub fn engine(mut self, engine: Arc<dyn AudioEngine>) -> Self {
        self.engine = engine;
        self
    }

    /// Hooks toggling mic and camera visibility
    pub fn visibility(mut self, visibility: Arc<dyn DeviceVisibility>) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Build the device. The audio context is not opened until first use.
    pub fn build(self) -> AudioResult<VirtualAudioDevice> {
        self.config.validate()?;

        let events = EventEmitter::new(self.event_capacity);
        let context = Arc::new(SharedContext::new(self.engine, self.config.context.clone()));
        let graph = VirtualSourceGraph::new(
            context.clone(),
            self.config.tone.clone(),
            self.config.playback.history_secs(),
            events.clone(),
        );
        let gate = ActivationGate::new(
            Arc::new(PlaybackActivation {
                graph: graph.clone(),
                visibility: self.visibility.clone(),
            }),
            events.clone(),
        );
        let scheduler = PlaybackScheduler::new(
            self.config.playback.clone(),
            graph.clone(),
            gate,
            events.clone(),
        );

        Ok(VirtualAudioDevice {
            config: self.config,
            context,
            graph,
            scheduler,
            visibility: self.visibility,
            events,
        })
    }
}

impl Default for VirtualAudioDeviceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The bot's virtual microphone
#[derive(Clone)]
pub struct VirtualAudioDevice {
    config: VirtualAudioConfig,
    context: Arc<SharedContext>,
    graph: VirtualSourceGraph,
    scheduler: PlaybackScheduler,
    visibility: Arc<dyn DeviceVisibility>,
    events: EventEmitter<VirtualAudioEvent>,
}

impl VirtualAudioDevice {
    pub fn builder() -> VirtualAudioDeviceBuilder {
        VirtualAudioDeviceBuilder::new()
    }

    /// Device with the software engine and no visibility hooks
    pub fn new(config: VirtualAudioConfig) -> AudioResult<Self> {
        Self::builder().config(config).build()
    }

    /// Bring up the tone so the first capture request finds a ready device.
    ///
    /// On hosts without audio the error is reported and the device stays inert.
    pub fn boot(&self) -> AudioResult<MediaTrack> {
        match self.graph.ensure_track() {
            Ok(track) => {
                info!(
                    "Virtual microphone ready on {} engine: {}",
                    self.context.engine_name(),
                    track.label()
                );
                Ok(track)
            }
            Err(e) => {
                warn!("Virtual microphone disabled: {}", e);
                self.events.emit(VirtualAudioEvent::AudioUnavailable {
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Whether the audio context could be opened
    pub fn is_available(&self) -> bool {
        self.context.get().is_ok()
    }

    /// PCM ingestion entry point; callable before anything else is initialized
    pub fn play_pcm(
        &self,
        samples: impl Into<SampleData>,
        sample_rate: u32,
        channels: u16,
    ) -> AudioResult<()> {
        let chunk = PcmChunk::new(samples, sample_rate, channels)?;
        self.scheduler.enqueue(chunk)
    }

    /// Make a live upstream track the microphone
    pub fn bridge_stream(&self, upstream: MediaTrack) -> AudioResult<MediaTrack> {
        self.graph.bridge(upstream)
    }

    /// Wrap the host capture entry point
    pub fn intercept(&self, original: Arc<dyn MediaCapture>) -> Arc<dyn MediaCapture> {
        CaptureInterceptor::install(
            original,
            self.graph.clone(),
            &self.config.capture,
            self.events.clone(),
        )
    }

    /// Surface a message to whoever watches the bot
    pub fn notify(&self, message: impl Into<String>) {
        let message = message.into();
        warn!("{}", message);
        self.events.emit(VirtualAudioEvent::Notice { message });
    }

    /// Image display path: only the camera is switched on
    pub fn show_image(&self) {
        self.visibility.turn_on_camera();
    }

    pub fn graph(&self) -> &VirtualSourceGraph {
        &self.graph
    }

    pub fn scheduler(&self) -> &PlaybackScheduler {
        &self.scheduler
    }

    pub fn activation_state(&self) -> ActivationState {
        self.scheduler.gate().state()
    }

    pub fn config(&self) -> &VirtualAudioConfig {
        &self.config
    }

    pub fn events(&self) -> &EventEmitter<VirtualAudioEvent> {
        &self.events
    }

    pub fn subscribe(&self) -> EventStream<VirtualAudioEvent> {
        self.events.subscribe()
    }

    pub fn subscribe_simple(&self) -> EventIterator<VirtualAudioEvent> {
        self.events.subscribe_simple()
    }

    /// Raw receiver for polling with `try_recv`
    pub fn receiver(&self) -> broadcast::Receiver<VirtualAudioEvent> {
        self.events.receiver()
    }
}

impl std::fmt::Debug for VirtualAudioDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualAudioDevice")
            .field("graph", &self.graph)
            .field("scheduler", &self.scheduler)
            .finish()
    }
}
