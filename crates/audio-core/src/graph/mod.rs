//! Virtual source graph
//!
//! The graph owns the one active source feeding the shared mix bus and the
//! output track callers clone. Switching sources is a critical section:
//! the previous source is released completely before the next is wired,
//! and every activation bumps a generation counter so callbacks belonging
//! to a replaced source can recognize themselves as stale.

mod nodes;
mod teardown;

pub use nodes::{BridgeNode, QueueNode, SilenceNode, SourceNode, ToneNode};

use crate::config::ToneConfig;
use crate::context::{AudioContext, SharedContext};
use crate::error::{AudioError, AudioResult};
use crate::events::{EventEmitter, VirtualAudioEvent};
use crate::scheduler::PlaybackSink;
use crate::track::{EndedObserver, MediaTrack, TrackKind};
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use teardown::Teardown;
use tracing::{debug, error, info, warn};

pub const TONE_LABEL: &str = "Virtual Microphone (Hum)";
pub const BRIDGE_LABEL: &str = "Virtual Microphone (Bridged)";
pub const QUEUE_LABEL: &str = "Virtual Microphone (Playback)";
pub const SILENCE_LABEL: &str = "Virtual Microphone (Silence)";

/// Source that can be wired into the graph
#[derive(Debug, Clone)]
pub enum VirtualSource {
    /// Low-level sine hum, the default and fallback
    Tone { frequency: f32, gain: f32 },
    /// A live external audio track
    Bridge { upstream: MediaTrack },
    /// Audio scheduled by the playback scheduler
    Queue,
    Silence,
}

impl VirtualSource {
    pub fn kind(&self) -> SourceKind {
        match self {
            VirtualSource::Tone { .. } => SourceKind::Tone,
            VirtualSource::Bridge { .. } => SourceKind::Bridge,
            VirtualSource::Queue => SourceKind::Queue,
            VirtualSource::Silence => SourceKind::Silence,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Tone,
    Bridge,
    Queue,
    Silence,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceKind::Tone => "tone",
            SourceKind::Bridge => "bridge",
            SourceKind::Queue => "queue",
            SourceKind::Silence => "silence",
        };
        f.write_str(name)
    }
}

struct ActiveSource {
    generation: u64,
    source: VirtualSource,
    track: MediaTrack,
    /// Dropping this detaches the bridge end-of-track callback
    ended_observer: Option<EndedObserver>,
}

/// Source waiting behind playback, with the label it will be wired under
struct Pending {
    source: VirtualSource,
    label: String,
}

#[derive(Default)]
struct GraphState {
    generation: u64,
    active: Option<ActiveSource>,
    /// Set while the playback scheduler holds the microphone
    engaged: bool,
    /// Source to wire in when playback goes idle
    preempted: Option<Pending>,
}

struct GraphInner {
    context: Arc<SharedContext>,
    tone: ToneConfig,
    bridge_history_secs: f64,
    sink: Arc<PlaybackSink>,
    events: EventEmitter<VirtualAudioEvent>,
    state: Mutex<GraphState>,
}

/// Handle to the virtual source graph
#[derive(Clone)]
pub struct VirtualSourceGraph {
    inner: Arc<GraphInner>,
}

impl VirtualSourceGraph {
    pub fn new(
        context: Arc<SharedContext>,
        tone: ToneConfig,
        history_secs: f64,
        events: EventEmitter<VirtualAudioEvent>,
    ) -> Self {
        Self {
            inner: Arc::new(GraphInner {
                context,
                tone,
                bridge_history_secs: history_secs,
                sink: Arc::new(PlaybackSink::new(history_secs)),
                events,
                state: Mutex::new(GraphState::default()),
            }),
        }
    }

    /// The shared context, opened on first use
    pub fn context(&self) -> AudioResult<Arc<AudioContext>> {
        self.inner.context.get()
    }

    /// Sink the queue source plays from
    pub fn sink(&self) -> Arc<PlaybackSink> {
        self.inner.sink.clone()
    }

    /// Replace the active source and return the new output track.
    ///
    /// The previous output track is stopped and never returned again. While
    /// playback holds the microphone the source is validated and queued up
    /// behind it instead, and the playback output track is returned.
    pub fn activate(
        &self,
        source: VirtualSource,
        label: impl Into<String>,
    ) -> AudioResult<MediaTrack> {
        let label = label.into();
        let (track, generation) = {
            let mut state = self.inner.state.lock();
            if state.engaged && source.kind() != SourceKind::Queue {
                return self.inner.defer(&mut state, source, label);
            }
            if !state.engaged {
                state.preempted = None;
            }
            self.inner.install(&mut state, source, label)?
        };
        self.inner.check_upstream(generation);
        Ok(track)
    }

    /// Activate the configured tone
    pub fn activate_default(&self) -> AudioResult<MediaTrack> {
        self.activate(self.inner.default_tone(), TONE_LABEL)
    }

    /// Route a live upstream audio track into the microphone
    pub fn bridge(&self, upstream: MediaTrack) -> AudioResult<MediaTrack> {
        self.activate(VirtualSource::Bridge { upstream }, BRIDGE_LABEL)
    }

    /// Current output track, activating the tone if nothing is active yet
    pub fn ensure_track(&self) -> AudioResult<MediaTrack> {
        let mut state = self.inner.state.lock();
        self.inner.ensure_active(&mut state)
    }

    /// Independent clone of the output track for one capture caller
    pub fn clone_for_capture(&self) -> AudioResult<MediaTrack> {
        let mut state = self.inner.state.lock();
        let track = self.inner.ensure_active(&mut state)?;
        Ok(track.clone_track())
    }

    pub fn current_track(&self) -> Option<MediaTrack> {
        self.inner
            .state
            .lock()
            .active
            .as_ref()
            .map(|active| active.track.clone())
    }

    pub fn active_kind(&self) -> Option<SourceKind> {
        self.inner
            .state
            .lock()
            .active
            .as_ref()
            .map(|active| active.source.kind())
    }

    pub fn active_source(&self) -> Option<VirtualSource> {
        self.inner
            .state
            .lock()
            .active
            .as_ref()
            .map(|active| active.source.clone())
    }

    /// Number of activations so far
    pub fn generation(&self) -> u64 {
        self.inner.state.lock().generation
    }

    /// Switch to the queue source, remembering what it replaced
    pub(crate) fn engage_queue(&self) -> AudioResult<()> {
        let mut state = self.inner.state.lock();
        let queue_active = state
            .active
            .as_ref()
            .is_some_and(|active| active.source.kind() == SourceKind::Queue);
        if queue_active {
            state.engaged = true;
            return Ok(());
        }
        let preempted = state.active.as_ref().map(|active| Pending {
            source: active.source.clone(),
            label: active.track.label().to_string(),
        });
        self.inner
            .install(&mut state, VirtualSource::Queue, QUEUE_LABEL.to_string())?;
        state.engaged = true;
        state.preempted = preempted;
        Ok(())
    }

    /// Whether playback currently holds the microphone
    pub fn playback_engaged(&self) -> bool {
        self.inner.state.lock().engaged
    }

    /// Leave the queue source and restore what it replaced.
    ///
    /// A bridge that ended meanwhile is not restored; the tone is used instead.
    pub(crate) fn release_queue(&self) -> AudioResult<()> {
        let generation = {
            let mut state = self.inner.state.lock();
            state.engaged = false;
            let preempted = state.preempted.take();
            let queue_active = state
                .active
                .as_ref()
                .is_some_and(|active| active.source.kind() == SourceKind::Queue);
            if !queue_active {
                return Ok(());
            }

            let tone = || (self.inner.default_tone(), TONE_LABEL.to_string());
            let (source, label) = match preempted {
                Some(Pending {
                    source: VirtualSource::Bridge { upstream },
                    label,
                }) => {
                    if upstream.is_live() {
                        (VirtualSource::Bridge { upstream }, label)
                    } else {
                        tone()
                    }
                }
                Some(Pending {
                    source: VirtualSource::Queue,
                    ..
                })
                | None => tone(),
                Some(Pending { source, label }) => (source, label),
            };
            debug!("Playback idle, restoring {} source", source.kind());
            self.inner.install(&mut state, source, label)?.1
        };
        self.inner.check_upstream(generation);
        Ok(())
    }

    pub(crate) fn events(&self) -> &EventEmitter<VirtualAudioEvent> {
        &self.inner.events
    }
}

impl GraphInner {
    fn default_tone(&self) -> VirtualSource {
        VirtualSource::Tone {
            frequency: self.tone.frequency_hz,
            gain: self.tone.gain,
        }
    }

    fn ensure_active(self: &Arc<Self>, state: &mut GraphState) -> AudioResult<MediaTrack> {
        if let Some(active) = &state.active {
            return Ok(active.track.clone());
        }
        let (track, _) = self.install(state, self.default_tone(), TONE_LABEL.to_string())?;
        Ok(track)
    }

    fn build_node(&self, source: &VirtualSource) -> Box<dyn SourceNode> {
        match source {
            VirtualSource::Tone { frequency, gain } => Box::new(ToneNode::new(*frequency, *gain)),
            VirtualSource::Bridge { upstream } => {
                Box::new(BridgeNode::new(upstream.clone(), self.bridge_history_secs))
            }
            VirtualSource::Queue => Box::new(QueueNode::new(self.sink.clone())),
            VirtualSource::Silence => Box::new(SilenceNode::new()),
        }
    }

    fn check_bridge(&self, upstream: &MediaTrack, context: &Arc<AudioContext>) -> AudioResult<()> {
        if upstream.kind() != TrackKind::Audio {
            return Err(AudioError::source_unavailable("bridged track carries no audio"));
        }
        if !upstream.is_live() {
            return Err(AudioError::source_unavailable(format!(
                "bridged track {} has already ended",
                upstream.id()
            )));
        }
        if upstream.reads_context(context) {
            return Err(AudioError::source_unavailable(
                "cannot bridge the virtual microphone into itself",
            ));
        }
        Ok(())
    }

    /// Remember `source` behind the engaged playback queue.
    ///
    /// Must be called with the state lock held.
    fn defer(
        &self,
        state: &mut GraphState,
        source: VirtualSource,
        label: String,
    ) -> AudioResult<MediaTrack> {
        let context = self.context.get()?;
        if let VirtualSource::Bridge { upstream } = &source {
            self.check_bridge(upstream, &context)?;
        }
        let Some(active) = &state.active else {
            return Err(AudioError::invalid_state("playback engaged without an active source"));
        };
        let track = active.track.clone();

        let kind = source.kind();
        info!("Playback in progress, {} source '{}' will follow it", kind, label);
        self.events.emit(VirtualAudioEvent::SourceDeferred {
            kind,
            label: label.clone(),
        });
        state.preempted = Some(Pending { source, label });
        Ok(track)
    }

    /// Release the active source and wire `source` in its place.
    ///
    /// Must be called with the state lock held.
    fn install(
        self: &Arc<Self>,
        state: &mut GraphState,
        source: VirtualSource,
        label: String,
    ) -> AudioResult<(MediaTrack, u64)> {
        let context = self.context.get()?;
        if let VirtualSource::Bridge { upstream } = &source {
            self.check_bridge(upstream, &context)?;
        }

        self.release(state, &context);

        state.generation += 1;
        let generation = state.generation;
        context.connect(generation, self.build_node(&source))?;

        let track = MediaTrack::virtual_output(context.clone(), label.clone());
        let ended_observer = match &source {
            VirtualSource::Bridge { upstream } => {
                let graph: Weak<GraphInner> = Arc::downgrade(self);
                Some(upstream.on_ended(move |_| {
                    if let Some(graph) = graph.upgrade() {
                        graph.handle_upstream_ended(generation);
                    }
                }))
            }
            _ => None,
        };

        context.resume();

        let kind = source.kind();
        state.active = Some(ActiveSource {
            generation,
            source,
            track: track.clone(),
            ended_observer,
        });

        info!("Activated {} source as '{}' (generation {})", kind, label, generation);
        self.events.emit(VirtualAudioEvent::SourceActivated {
            kind,
            label,
            track_id: track.id(),
            generation,
        });
        Ok((track, generation))
    }

    fn release(&self, state: &mut GraphState, context: &AudioContext) {
        let Some(active) = state.active.take() else {
            return;
        };

        let kind = active.source.kind();
        let mut teardown =
            Teardown::new(format!("{} source (generation {})", kind, active.generation));

        teardown.step("detach ended observer", || {
            drop(active.ended_observer);
            Ok(())
        });
        teardown.step("disconnect node", || match context.disconnect() {
            Some((generation, mut node)) => {
                if generation != active.generation {
                    warn!(
                        "Bus was fed by generation {} while {} was active",
                        generation, active.generation
                    );
                }
                node.stop()
            }
            None => Err(AudioError::invalid_state("no node connected to the bus")),
        });
        teardown.step("stop output track", || {
            active.track.stop();
            Ok(())
        });

        let failed_steps = teardown.finish();
        self.events.emit(VirtualAudioEvent::SourceReleased {
            kind,
            generation: active.generation,
            failed_steps,
        });
    }

    /// End-of-track transition for a bridged upstream
    fn handle_upstream_ended(self: &Arc<Self>, generation: u64) {
        let mut state = self.state.lock();
        let still_active = state.active.as_ref().is_some_and(|active| {
            active.generation == generation && active.source.kind() == SourceKind::Bridge
        });
        if !still_active {
            debug!("Ignoring end of stale bridge (generation {})", generation);
            return;
        }

        warn!("Bridged upstream ended, falling back to tone");
        self.events.emit(VirtualAudioEvent::SourceFallback {
            from: SourceKind::Bridge,
            reason: "upstream track ended".to_string(),
        });
        if let Err(e) = self.install(&mut state, self.default_tone(), TONE_LABEL.to_string()) {
            error!("Failed to fall back to tone: {}", e);
        }
    }

    /// Catch an upstream that ended between validation and observer registration
    fn check_upstream(self: &Arc<Self>, generation: u64) {
        let ended = {
            let state = self.state.lock();
            match &state.active {
                Some(ActiveSource {
                    generation: active,
                    source: VirtualSource::Bridge { upstream },
                    ..
                }) if *active == generation => !upstream.is_live(),
                _ => false,
            }
        };
        if ended {
            self.handle_upstream_ended(generation);
        }
    }
}

impl fmt::Debug for VirtualSourceGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("VirtualSourceGraph")
            .field("generation", &state.generation)
            .field("active", &state.active.as_ref().map(|a| a.source.kind()))
            .finish()
    }
}
