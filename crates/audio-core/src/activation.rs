//! Activation gate deciding whether the virtual device presents as live
//!
//! The gate follows playback queue occupancy. The first chunk makes the
//! device live; an empty queue starts a grace window and the device only
//! goes idle if nothing arrives before it closes.

use crate::clock::AudioClock;
use crate::events::{EventEmitter, VirtualAudioEvent};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Presence of the virtual device
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ActivationState {
    Idle,
    Active,
    /// Goes idle at `deadline` (audio clock seconds) unless audio arrives
    PendingDeactivation { deadline: f64 },
}

/// Receives gate transitions
pub trait ActivationObserver: Send + Sync {
    fn on_activate(&self);
    fn on_deactivate(&self);
}

/// Device visibility hooks owned by the video side of the bot.
///
/// Calls are idempotent and fire-and-forget.
pub trait DeviceVisibility: Send + Sync {
    fn turn_on_mic_and_camera(&self);
    fn turn_off_mic_and_camera(&self);

    /// Show the camera for image display
    fn turn_on_camera(&self) {}
}

/// Visibility hooks that do nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopVisibility;

impl DeviceVisibility for NoopVisibility {
    fn turn_on_mic_and_camera(&self) {}
    fn turn_off_mic_and_camera(&self) {}
}

struct GateState {
    state: ActivationState,
    /// Bumped whenever a pending timer becomes obsolete
    epoch: u64,
    timer: Option<JoinHandle<()>>,
}

struct GateInner {
    observer: Arc<dyn ActivationObserver>,
    events: EventEmitter<VirtualAudioEvent>,
    state: Mutex<GateState>,
}

/// Activation gate handle
#[derive(Clone)]
pub struct ActivationGate {
    inner: Arc<GateInner>,
}

impl ActivationGate {
    pub fn new(
        observer: Arc<dyn ActivationObserver>,
        events: EventEmitter<VirtualAudioEvent>,
    ) -> Self {
        Self {
            inner: Arc::new(GateInner {
                observer,
                events,
                state: Mutex::new(GateState {
                    state: ActivationState::Idle,
                    epoch: 0,
                    timer: None,
                }),
            }),
        }
    }

    pub fn state(&self) -> ActivationState {
        self.inner.state.lock().state
    }

    /// Whether the device currently presents as live
    pub fn is_active(&self) -> bool {
        !matches!(self.state(), ActivationState::Idle)
    }

    /// A chunk was enqueued
    pub fn on_chunk_arrival(&self) {
        let mut gate = self.inner.state.lock();
        match gate.state {
            ActivationState::Idle => {
                gate.state = ActivationState::Active;
                info!("Playback started, activating virtual device");
                self.inner.observer.on_activate();
                self.inner.events.emit(VirtualAudioEvent::DeviceActivated);
            }
            ActivationState::PendingDeactivation { deadline } => {
                gate.epoch += 1;
                if let Some(timer) = gate.timer.take() {
                    timer.abort();
                }
                gate.state = ActivationState::Active;
                debug!("Audio arrived before {:.3}, deactivation cancelled", deadline);
                self.inner.events.emit(VirtualAudioEvent::DeactivationCancelled);
            }
            ActivationState::Active => {}
        }
    }

    /// The queue drained; deactivate at `deadline` unless audio arrives first
    pub fn begin_grace(&self, clock: AudioClock, deadline: f64) {
        let mut gate = self.inner.state.lock();
        if gate.state != ActivationState::Active {
            return;
        }

        gate.epoch += 1;
        let epoch = gate.epoch;
        gate.state = ActivationState::PendingDeactivation { deadline };
        debug!("Queue drained, deactivating at {:.3} unless audio arrives", deadline);
        self.inner
            .events
            .emit(VirtualAudioEvent::DeactivationScheduled { deadline });

        match Handle::try_current() {
            Ok(handle) => {
                let gate_ref: Weak<GateInner> = Arc::downgrade(&self.inner);
                let at = clock.instant_at(deadline);
                gate.timer = Some(handle.spawn(async move {
                    tokio::time::sleep_until(at).await;
                    if let Some(inner) = gate_ref.upgrade() {
                        inner.expire(epoch);
                    }
                }));
            }
            Err(_) => {
                warn!("No runtime for the grace timer, deactivating immediately");
                self.inner.deactivate(&mut gate);
            }
        }
    }
}

impl GateInner {
    fn expire(&self, epoch: u64) {
        let mut gate = self.state.lock();
        if gate.epoch != epoch {
            return;
        }
        if let ActivationState::PendingDeactivation { .. } = gate.state {
            gate.timer = None;
            self.deactivate(&mut gate);
        }
    }

    fn deactivate(&self, gate: &mut GateState) {
        gate.state = ActivationState::Idle;
        info!("Grace period over, deactivating virtual device");
        self.observer.on_deactivate();
        self.events.emit(VirtualAudioEvent::DeviceDeactivated);
    }
}

impl std::fmt::Debug for ActivationGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivationGate")
            .field("state", &self.state())
            .finish()
    }
}
