//! Output sink holding buffers placed on the audio clock

use super::chunk::PlayableBuffer;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Public record of one scheduled buffer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledPlayback {
    pub sequence: u64,
    /// Audio clock start time in seconds
    pub start: f64,
    pub duration: f64,
    pub sample_rate: u32,
    pub channels: u16,
}

impl ScheduledPlayback {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

#[derive(Debug)]
struct ScheduledBuffer {
    sequence: u64,
    start: f64,
    buffer: PlayableBuffer,
}

impl ScheduledBuffer {
    fn end(&self) -> f64 {
        self.start + self.buffer.duration()
    }
}

/// Buffers scheduled by the playback scheduler and rendered by the queue source
#[derive(Debug)]
pub struct PlaybackSink {
    buffers: Mutex<VecDeque<ScheduledBuffer>>,
    history_secs: f64,
}

impl PlaybackSink {
    /// Create a sink keeping finished buffers for `history_secs`
    pub fn new(history_secs: f64) -> Self {
        Self {
            buffers: Mutex::new(VecDeque::new()),
            history_secs: history_secs.max(0.0),
        }
    }

    /// Place a buffer on the clock, pruning buffers that finished long before `now`
    pub fn schedule(&self, sequence: u64, start: f64, buffer: PlayableBuffer, now: f64) {
        let mut buffers = self.buffers.lock();
        let horizon = now - self.history_secs;
        while buffers.front().is_some_and(|front| front.end() < horizon) {
            buffers.pop_front();
        }
        buffers.push_back(ScheduledBuffer {
            sequence,
            start,
            buffer,
        });
    }

    /// Everything currently retained, in scheduling order
    pub fn scheduled(&self) -> Vec<ScheduledPlayback> {
        self.buffers
            .lock()
            .iter()
            .map(|scheduled| ScheduledPlayback {
                sequence: scheduled.sequence,
                start: scheduled.start,
                duration: scheduled.buffer.duration(),
                sample_rate: scheduled.buffer.sample_rate(),
                channels: scheduled.buffer.channel_count() as u16,
            })
            .collect()
    }

    /// Whether any buffer covers audio clock time `at`
    pub fn is_playing(&self, at: f64) -> bool {
        self.buffers
            .lock()
            .iter()
            .any(|scheduled| scheduled.start <= at && at < scheduled.end())
    }

    /// Render mono output for `out.len()` frames starting at `at`
    pub fn render_into(&self, at: f64, sample_rate: u32, out: &mut [f32]) {
        let rate = sample_rate as f64;
        let window_end = at + out.len() as f64 / rate;
        let buffers = self.buffers.lock();

        for scheduled in buffers.iter() {
            if scheduled.end() <= at || scheduled.start >= window_end {
                continue;
            }
            let source_rate = scheduled.buffer.sample_rate() as f64;
            for (index, slot) in out.iter_mut().enumerate() {
                let offset = at + index as f64 / rate - scheduled.start;
                if offset < 0.0 {
                    continue;
                }
                // nudge so exact boundaries don't truncate to the previous frame
                let frame = (offset * source_rate + 1e-9) as usize;
                if frame >= scheduled.buffer.frames() {
                    break;
                }
                *slot += scheduled.buffer.mono_at(frame);
            }
        }
    }

    pub fn clear(&self) {
        self.buffers.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::PcmChunk;

    fn constant(value: f32, frames: usize, rate: u32) -> PlayableBuffer {
        PcmChunk::new(vec![value; frames], rate, 1).unwrap().to_buffer()
    }

    #[test]
    fn test_render_places_buffers_on_clock() {
        let sink = PlaybackSink::new(1.0);
        sink.schedule(1, 0.0, constant(0.25, 8, 8_000), 0.0);
        sink.schedule(2, 0.001, constant(0.5, 8, 8_000), 0.0);

        let mut out = vec![0.0f32; 20];
        sink.render_into(0.0, 8_000, &mut out);
        assert!(out[..8].iter().all(|s| (*s - 0.25).abs() < 1e-6));
        assert!(out[8..16].iter().all(|s| (*s - 0.5).abs() < 1e-6));
        assert!(out[16..].iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_schedule_prunes_old_buffers() {
        let sink = PlaybackSink::new(0.5);
        sink.schedule(1, 0.0, constant(0.1, 80, 8_000), 0.0);
        sink.schedule(2, 2.0, constant(0.1, 80, 8_000), 2.0);

        let scheduled = sink.scheduled();
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].sequence, 2);
        assert!(sink.is_playing(2.005));
        assert!(!sink.is_playing(1.0));
    }
}
