//! Signal nodes that can feed the mix bus

use super::SourceKind;
use crate::error::{AudioError, AudioResult};
use crate::scheduler::PlaybackSink;
use crate::track::MediaTrack;
use std::collections::VecDeque;
use std::f64::consts::TAU;
use std::sync::Arc;

/// A node producing mono samples on the audio clock
pub trait SourceNode: Send {
    fn kind(&self) -> SourceKind;

    /// Fill `out` with the node's output starting at audio clock time `at`
    fn render(&mut self, at: f64, sample_rate: u32, out: &mut [f32]);

    /// Stop producing output. Stopping twice is an error.
    fn stop(&mut self) -> AudioResult<()>;
}

fn stop_once(stopped: &mut bool, kind: SourceKind) -> AudioResult<()> {
    if *stopped {
        return Err(AudioError::invalid_state(format!("{} node already stopped", kind)));
    }
    *stopped = true;
    Ok(())
}

/// Continuous sine generator
#[derive(Debug)]
pub struct ToneNode {
    frequency: f32,
    gain: f32,
    stopped: bool,
}

impl ToneNode {
    pub fn new(frequency: f32, gain: f32) -> Self {
        Self {
            frequency,
            gain,
            stopped: false,
        }
    }
}

impl SourceNode for ToneNode {
    fn kind(&self) -> SourceKind {
        SourceKind::Tone
    }

    fn render(&mut self, at: f64, sample_rate: u32, out: &mut [f32]) {
        if self.stopped {
            out.fill(0.0);
            return;
        }
        let rate = sample_rate as f64;
        let frequency = self.frequency as f64;
        for (index, slot) in out.iter_mut().enumerate() {
            let t = at + index as f64 / rate;
            *slot = self.gain * (TAU * frequency * t).sin() as f32;
        }
    }

    fn stop(&mut self) -> AudioResult<()> {
        stop_once(&mut self.stopped, SourceKind::Tone)
    }
}

/// Mirrors an upstream track into the bus.
///
/// Pulled samples are kept in a short time-indexed history so every reader
/// rendering the same clock range hears the same audio.
#[derive(Debug)]
pub struct BridgeNode {
    upstream: MediaTrack,
    history: VecDeque<f32>,
    history_start: f64,
    history_secs: f64,
    stopped: bool,
}

impl BridgeNode {
    pub fn new(upstream: MediaTrack, history_secs: f64) -> Self {
        Self {
            upstream,
            history: VecDeque::new(),
            history_start: 0.0,
            history_secs: history_secs.max(0.0),
            stopped: false,
        }
    }

    pub fn upstream(&self) -> &MediaTrack {
        &self.upstream
    }

    fn history_end(&self, rate: f64) -> f64 {
        self.history_start + self.history.len() as f64 / rate
    }

    fn extend_to(&mut self, until: f64, rate: f64) {
        let missing = ((until - self.history_end(rate)) * rate).round();
        if missing >= 1.0 {
            let mut pulled = vec![0.0f32; missing as usize];
            self.upstream.pull_samples(&mut pulled);
            self.history.extend(pulled);
        }
    }

    fn trim_before(&mut self, horizon: f64, rate: f64) {
        let stale = ((horizon - self.history_start) * rate).floor();
        if stale >= 1.0 {
            let stale = (stale as usize).min(self.history.len());
            self.history.drain(..stale);
            self.history_start += stale as f64 / rate;
        }
    }
}

impl SourceNode for BridgeNode {
    fn kind(&self) -> SourceKind {
        SourceKind::Bridge
    }

    fn render(&mut self, at: f64, sample_rate: u32, out: &mut [f32]) {
        out.fill(0.0);
        if self.stopped {
            return;
        }

        let rate = sample_rate as f64;
        let window_end = at + out.len() as f64 / rate;

        // nobody read for a while: restart the history at the reader
        if self.history.is_empty() || at > self.history_end(rate) + 0.5 / rate {
            self.history.clear();
            self.history_start = at;
        }

        self.extend_to(window_end, rate);

        let offset = ((at - self.history_start) * rate).round() as i64;
        for (index, slot) in out.iter_mut().enumerate() {
            let position = offset + index as i64;
            if position >= 0 {
                if let Some(sample) = self.history.get(position as usize) {
                    *slot = *sample;
                }
            }
        }

        self.trim_before(window_end - self.history_secs, rate);
    }

    fn stop(&mut self) -> AudioResult<()> {
        stop_once(&mut self.stopped, SourceKind::Bridge)?;
        self.history.clear();
        Ok(())
    }
}

/// Plays whatever the playback scheduler placed in the sink
#[derive(Debug)]
pub struct QueueNode {
    sink: Arc<PlaybackSink>,
    stopped: bool,
}

impl QueueNode {
    pub fn new(sink: Arc<PlaybackSink>) -> Self {
        Self {
            sink,
            stopped: false,
        }
    }
}

impl SourceNode for QueueNode {
    fn kind(&self) -> SourceKind {
        SourceKind::Queue
    }

    fn render(&mut self, at: f64, sample_rate: u32, out: &mut [f32]) {
        out.fill(0.0);
        if !self.stopped {
            self.sink.render_into(at, sample_rate, out);
        }
    }

    fn stop(&mut self) -> AudioResult<()> {
        stop_once(&mut self.stopped, SourceKind::Queue)
    }
}

#[derive(Debug, Default)]
pub struct SilenceNode {
    stopped: bool,
}

impl SilenceNode {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SourceNode for SilenceNode {
    fn kind(&self) -> SourceKind {
        SourceKind::Silence
    }

    fn render(&mut self, _at: f64, _sample_rate: u32, out: &mut [f32]) {
        out.fill(0.0);
    }

    fn stop(&mut self) -> AudioResult<()> {
        stop_once(&mut self.stopped, SourceKind::Silence)
    }
}
