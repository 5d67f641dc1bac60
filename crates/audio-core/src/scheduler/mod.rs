//! Playback scheduler
//!
//! Chunks are placed back to back on the audio clock by a cooperative drain
//! task. Each step schedules one chunk at `max(now, next_play_deadline)` and
//! sleeps for a fraction of the audio still ahead, so the next chunk is
//! always queued before the current one finishes.

mod chunk;
mod sink;

pub use chunk::{MAX_CHANNELS, PcmChunk, PlayableBuffer, SampleData};
pub use sink::{PlaybackSink, ScheduledPlayback};

use crate::activation::ActivationGate;
use crate::clock::seconds;
use crate::config::PlaybackConfig;
use crate::context::AudioContext;
use crate::error::{AudioError, AudioResult};
use crate::events::{EventEmitter, VirtualAudioEvent};
use crate::graph::VirtualSourceGraph;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::time::Duration;
use tracing::{debug, trace};

#[derive(Debug, Default)]
struct PlaybackQueue {
    chunks: VecDeque<PcmChunk>,
    /// Audio clock time the last scheduled chunk ends; never decreases
    next_play_deadline: f64,
    draining: bool,
    sequence: u64,
}

struct SchedulerInner {
    config: PlaybackConfig,
    graph: VirtualSourceGraph,
    gate: ActivationGate,
    queue: Mutex<PlaybackQueue>,
    events: EventEmitter<VirtualAudioEvent>,
}

/// Gapless PCM playback scheduler
#[derive(Clone)]
pub struct PlaybackScheduler {
    inner: Arc<SchedulerInner>,
}

impl PlaybackScheduler {
    pub fn new(
        config: PlaybackConfig,
        graph: VirtualSourceGraph,
        gate: ActivationGate,
        events: EventEmitter<VirtualAudioEvent>,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                config,
                graph,
                gate,
                queue: Mutex::new(PlaybackQueue::default()),
                events,
            }),
        }
    }

    /// Queue a chunk for playback after everything already queued.
    ///
    /// Opens the audio context on first use. Must be called inside a tokio
    /// runtime, which drives the drain task.
    pub fn enqueue(&self, chunk: PcmChunk) -> AudioResult<()> {
        let handle =
            Handle::try_current().map_err(|_| AudioError::no_runtime("playback scheduling"))?;
        let context = self.inner.graph.context()?;

        let mut queue = self.inner.queue.lock();
        trace!(
            "Enqueued {} frames at {} Hz x{} ({} waiting)",
            chunk.frames(),
            chunk.sample_rate(),
            chunk.channels(),
            queue.chunks.len()
        );
        queue.chunks.push_back(chunk);
        self.inner.gate.on_chunk_arrival();

        if !queue.draining {
            queue.draining = true;
            handle.spawn(drain(self.inner.clone(), context));
        }
        Ok(())
    }

    /// Chunks waiting to be scheduled
    pub fn queued(&self) -> usize {
        self.inner.queue.lock().chunks.len()
    }

    pub fn next_play_deadline(&self) -> f64 {
        self.inner.queue.lock().next_play_deadline
    }

    pub fn is_draining(&self) -> bool {
        self.inner.queue.lock().draining
    }

    pub fn gate(&self) -> &ActivationGate {
        &self.inner.gate
    }

    /// Everything placed on the clock and still retained by the sink
    pub fn scheduled(&self) -> Vec<ScheduledPlayback> {
        self.inner.graph.sink().scheduled()
    }
}

impl SchedulerInner {
    /// Schedule one chunk and return how long to sleep, or `None` once the queue is empty
    fn schedule_next(&self, context: &AudioContext) -> Option<Duration> {
        let mut queue = self.queue.lock();
        let now = context.current_time();

        let Some(chunk) = queue.chunks.pop_front() else {
            queue.draining = false;
            let deadline = now.max(queue.next_play_deadline) + self.config.grace_period_secs();
            self.gate.begin_grace(context.clock(), deadline);
            return None;
        };

        let start = now.max(queue.next_play_deadline);
        let duration = chunk.duration();
        queue.next_play_deadline = start + duration;
        queue.sequence += 1;
        let sequence = queue.sequence;

        self.graph
            .sink()
            .schedule(sequence, start, chunk.to_buffer(), now);
        debug!(
            "Scheduled chunk {} at {:.4}s for {:.4}s",
            sequence, start, duration
        );
        self.events.emit(VirtualAudioEvent::PlaybackScheduled {
            sequence,
            start,
            duration,
            sample_rate: chunk.sample_rate(),
            channels: chunk.channels(),
        });

        let ahead = queue.next_play_deadline - now;
        Some(seconds(ahead * self.config.lead_fraction))
    }
}

async fn drain(inner: Arc<SchedulerInner>, context: Arc<AudioContext>) {
    while let Some(wake) = inner.schedule_next(&context) {
        tokio::time::sleep(wake).await;
    }
}

impl std::fmt::Debug for PlaybackScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let queue = self.inner.queue.lock();
        f.debug_struct("PlaybackScheduler")
            .field("queued", &queue.chunks.len())
            .field("next_play_deadline", &queue.next_play_deadline)
            .field("draining", &queue.draining)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::ActivationObserver;
    use crate::config::{ContextConfig, ToneConfig};
    use crate::context::SharedContext;
    use crate::context::SoftwareEngine;

    struct Quiet;

    impl ActivationObserver for Quiet {
        fn on_activate(&self) {}
        fn on_deactivate(&self) {}
    }

    fn scheduler() -> PlaybackScheduler {
        let events = EventEmitter::new(64);
        let context = SharedContext::new(Arc::new(SoftwareEngine), ContextConfig::default());
        let graph =
            VirtualSourceGraph::new(Arc::new(context), ToneConfig::default(), 1.0, events.clone());
        let gate = ActivationGate::new(Arc::new(Quiet), events.clone());
        PlaybackScheduler::new(PlaybackConfig::default(), graph, gate, events)
    }

    #[test]
    fn test_enqueue_requires_runtime() {
        let scheduler = scheduler();
        let chunk = PcmChunk::new(vec![0.0f32; 480], 48_000, 1).unwrap();
        assert!(matches!(
            scheduler.enqueue(chunk),
            Err(AudioError::NoRuntime { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mixed_formats_play_back_to_back() {
        let scheduler = scheduler();
        scheduler
            .enqueue(PcmChunk::new(vec![0.1f32; 480], 48_000, 1).unwrap())
            .unwrap();
        scheduler
            .enqueue(PcmChunk::new(vec![100i16; 1_764], 44_100, 2).unwrap())
            .unwrap();
        scheduler
            .enqueue(PcmChunk::new(vec![0.1f32; 1_600], 16_000, 1).unwrap())
            .unwrap();
        assert!(scheduler.is_draining());

        tokio::time::sleep(Duration::from_millis(200)).await;

        let scheduled = scheduler.scheduled();
        assert_eq!(scheduled.len(), 3);
        assert!((scheduled[0].duration - 0.01).abs() < 1e-9);
        assert!((scheduled[1].duration - 0.02).abs() < 1e-9);
        assert!((scheduled[2].duration - 0.1).abs() < 1e-9);
        assert_eq!(scheduled[1].channels, 2);
        for pair in scheduled.windows(2) {
            assert!((pair[1].start - pair[0].end()).abs() < 1e-9);
        }
        assert!((scheduler.next_play_deadline() - 0.13).abs() < 1e-9);
        assert!(!scheduler.is_draining());
        assert_eq!(scheduler.queued(), 0);
    }
}
