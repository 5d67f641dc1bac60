//! Audio processing context and the engines that open it
//!
//! A device owns exactly one context. It is opened lazily the first time
//! anything needs audio and lives as long as the device; there is no
//! explicit teardown. All sources feed one shared mix bus.

use crate::clock::AudioClock;
use crate::config::{ContextConfig, LatencyHint, MAX_SAMPLE_RATE, MIN_SAMPLE_RATE};
use crate::error::{AudioError, AudioResult};
use crate::graph::SourceNode;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

/// Host audio engine able to open a processing context
pub trait AudioEngine: Send + Sync {
    /// Engine name for diagnostics
    fn name(&self) -> &str;

    /// Open a new processing context
    fn open_context(&self, config: &ContextConfig) -> AudioResult<AudioContext>;
}

/// In-process software engine rendering on the tokio clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SoftwareEngine;

impl AudioEngine for SoftwareEngine {
    fn name(&self) -> &str {
        "software"
    }

    fn open_context(&self, config: &ContextConfig) -> AudioResult<AudioContext> {
        AudioContext::new(config)
    }
}

/// Engine for hosts that expose no audio API at all
#[derive(Debug, Clone)]
pub struct UnavailableEngine {
    reason: String,
}

impl UnavailableEngine {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl AudioEngine for UnavailableEngine {
    fn name(&self) -> &str {
        "unavailable"
    }

    fn open_context(&self, _config: &ContextConfig) -> AudioResult<AudioContext> {
        Err(AudioError::engine_unavailable(self.reason.clone()))
    }
}

/// Running state of a context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Running,
    Suspended,
}

struct BusInput {
    generation: u64,
    node: Box<dyn SourceNode>,
}

/// The shared gain point every source connects to
struct MixBus {
    gain: f32,
    input: Option<BusInput>,
}

/// Audio processing context
pub struct AudioContext {
    clock: AudioClock,
    sample_rate: u32,
    latency_hint: LatencyHint,
    state: Mutex<ContextState>,
    bus: Mutex<MixBus>,
}

impl AudioContext {
    /// Open a context with the given configuration
    pub fn new(config: &ContextConfig) -> AudioResult<Self> {
        if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&config.sample_rate) {
            return Err(AudioError::config(format!(
                "unsupported context sample rate {}",
                config.sample_rate
            )));
        }

        let state = if config.start_suspended {
            ContextState::Suspended
        } else {
            ContextState::Running
        };

        Ok(Self {
            clock: AudioClock::start(),
            sample_rate: config.sample_rate,
            latency_hint: config.latency_hint,
            state: Mutex::new(state),
            bus: Mutex::new(MixBus {
                gain: 1.0,
                input: None,
            }),
        })
    }

    pub fn clock(&self) -> AudioClock {
        self.clock
    }

    /// Current audio clock time in seconds
    pub fn current_time(&self) -> f64 {
        self.clock.current_time()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn latency_hint(&self) -> LatencyHint {
        self.latency_hint
    }

    pub fn state(&self) -> ContextState {
        *self.state.lock()
    }

    /// Resume a suspended context; no-op when already running
    pub fn resume(&self) {
        let mut state = self.state.lock();
        if *state == ContextState::Suspended {
            *state = ContextState::Running;
            debug!("Audio context resumed");
        }
    }

    pub fn suspend(&self) {
        *self.state.lock() = ContextState::Suspended;
    }

    pub fn master_gain(&self) -> f32 {
        self.bus.lock().gain
    }

    pub fn set_master_gain(&self, gain: f32) {
        self.bus.lock().gain = gain.clamp(0.0, 1.0);
    }

    /// Generation of the node currently feeding the bus
    pub fn connected_generation(&self) -> Option<u64> {
        self.bus.lock().input.as_ref().map(|input| input.generation)
    }

    /// Wire a node into the bus. The bus must have been disconnected first.
    pub(crate) fn connect(&self, generation: u64, node: Box<dyn SourceNode>) -> AudioResult<()> {
        let mut bus = self.bus.lock();
        if let Some(existing) = &bus.input {
            return Err(AudioError::invalid_state(format!(
                "mix bus still fed by generation {}",
                existing.generation
            )));
        }
        bus.input = Some(BusInput { generation, node });
        Ok(())
    }

    /// Detach whatever node feeds the bus and hand it back for teardown
    pub(crate) fn disconnect(&self) -> Option<(u64, Box<dyn SourceNode>)> {
        self.bus
            .lock()
            .input
            .take()
            .map(|input| (input.generation, input.node))
    }

    /// Render `frames` mono samples of the bus output starting at audio clock time `at`
    pub fn render(&self, at: f64, frames: usize) -> Vec<f32> {
        let mut out = vec![0.0f32; frames];
        if self.state() == ContextState::Suspended {
            return out;
        }

        let mut bus = self.bus.lock();
        let gain = bus.gain;
        if let Some(input) = bus.input.as_mut() {
            input.node.render(at, self.sample_rate, &mut out);
        }
        for sample in out.iter_mut() {
            *sample = (*sample * gain).clamp(-1.0, 1.0);
        }
        out
    }
}

impl std::fmt::Debug for AudioContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioContext")
            .field("sample_rate", &self.sample_rate)
            .field("state", &self.state())
            .field("connected_generation", &self.connected_generation())
            .finish()
    }
}

/// Lazily opened, device-wide audio context
pub struct SharedContext {
    engine: Arc<dyn AudioEngine>,
    config: ContextConfig,
    cell: OnceCell<Arc<AudioContext>>,
}

impl SharedContext {
    pub fn new(engine: Arc<dyn AudioEngine>, config: ContextConfig) -> Self {
        Self {
            engine,
            config,
            cell: OnceCell::new(),
        }
    }

    /// Get the context, opening it on first use.
    ///
    /// A failed open is not cached; every caller sees the engine error.
    pub fn get(&self) -> AudioResult<Arc<AudioContext>> {
        self.cell
            .get_or_try_init(|| {
                let context = self.engine.open_context(&self.config)?;
                info!(
                    "Opened audio context on {} engine at {} Hz",
                    self.engine.name(),
                    context.sample_rate()
                );
                Ok(Arc::new(context))
            })
            .map(Arc::clone)
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.get().is_some()
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{SilenceNode, ToneNode};

    #[tokio::test]
    async fn test_shared_context_opens_once() {
        let shared = SharedContext::new(Arc::new(SoftwareEngine), ContextConfig::default());
        assert!(!shared.is_initialized());

        let first = shared.get().unwrap();
        let second = shared.get().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(shared.is_initialized());
    }

    #[test]
    fn test_unavailable_engine_reports_every_time() {
        let shared = SharedContext::new(
            Arc::new(UnavailableEngine::new("no audio API")),
            ContextConfig::default(),
        );
        assert!(matches!(shared.get(), Err(AudioError::EngineUnavailable { .. })));
        assert!(shared.get().is_err());
        assert!(!shared.is_initialized());
    }

    #[tokio::test]
    async fn test_bus_accepts_one_input() {
        let context = AudioContext::new(&ContextConfig::default()).unwrap();
        context.connect(1, Box::new(SilenceNode::new())).unwrap();
        assert!(context.connect(2, Box::new(SilenceNode::new())).is_err());

        let (generation, _node) = context.disconnect().unwrap();
        assert_eq!(generation, 1);
        assert_eq!(context.connected_generation(), None);
        context.connect(2, Box::new(SilenceNode::new())).unwrap();
        assert_eq!(context.connected_generation(), Some(2));
    }

    #[tokio::test]
    async fn test_suspended_context_renders_silence() {
        let config = ContextConfig {
            start_suspended: true,
            ..ContextConfig::default()
        };
        let context = AudioContext::new(&config).unwrap();
        context.connect(1, Box::new(ToneNode::new(440.0, 0.5))).unwrap();

        assert!(context.render(0.0, 256).iter().all(|s| *s == 0.0));
        context.resume();
        assert_eq!(context.state(), ContextState::Running);
        assert!(context.render(0.0, 256).iter().any(|s| s.abs() > 0.1));
    }
}
