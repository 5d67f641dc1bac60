//! PCM chunk validation and conversion to playable buffers

use crate::config::{MAX_SAMPLE_RATE, MIN_SAMPLE_RATE};
use crate::error::{AudioError, AudioResult};
use std::sync::Arc;

/// Highest channel count a chunk may declare
pub const MAX_CHANNELS: u16 = 32;

/// Full-scale divisor for 16-bit integer PCM
const I16_FULL_SCALE: f32 = 32_768.0;

/// Raw sample representation accepted at the ingestion boundary
#[derive(Debug, Clone, PartialEq)]
pub enum SampleData {
    /// Normalized floats, nominally in [-1, 1]
    F32(Vec<f32>),
    /// Signed 16-bit integer PCM
    I16(Vec<i16>),
}

impl SampleData {
    pub fn len(&self) -> usize {
        match self {
            SampleData::F32(samples) => samples.len(),
            SampleData::I16(samples) => samples.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Convert into canonical floats clamped to [-1, 1]
    fn normalize(self) -> Vec<f32> {
        match self {
            SampleData::F32(samples) => samples
                .into_iter()
                .map(|s| if s.is_finite() { s.clamp(-1.0, 1.0) } else { 0.0 })
                .collect(),
            SampleData::I16(samples) => samples
                .into_iter()
                .map(|s| s as f32 / I16_FULL_SCALE)
                .collect(),
        }
    }
}

impl From<Vec<f32>> for SampleData {
    fn from(samples: Vec<f32>) -> Self {
        SampleData::F32(samples)
    }
}

impl From<&[f32]> for SampleData {
    fn from(samples: &[f32]) -> Self {
        SampleData::F32(samples.to_vec())
    }
}

impl From<Vec<i16>> for SampleData {
    fn from(samples: Vec<i16>) -> Self {
        SampleData::I16(samples)
    }
}

impl From<&[i16]> for SampleData {
    fn from(samples: &[i16]) -> Self {
        SampleData::I16(samples.to_vec())
    }
}

/// Immutable block of interleaved PCM samples with its own format
#[derive(Debug, Clone)]
pub struct PcmChunk {
    samples: Arc<[f32]>,
    sample_rate: u32,
    channels: u16,
}

impl PcmChunk {
    /// Validate and normalize a chunk
    pub fn new(
        samples: impl Into<SampleData>,
        sample_rate: u32,
        channels: u16,
    ) -> AudioResult<Self> {
        let samples = samples.into();

        if samples.is_empty() {
            return Err(AudioError::invalid_chunk("no samples"));
        }
        if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&sample_rate) {
            return Err(AudioError::invalid_chunk(format!(
                "sample rate {} outside {}..={}",
                sample_rate, MIN_SAMPLE_RATE, MAX_SAMPLE_RATE
            )));
        }
        if channels == 0 || channels > MAX_CHANNELS {
            return Err(AudioError::invalid_chunk(format!(
                "channel count {} outside 1..={}",
                channels, MAX_CHANNELS
            )));
        }
        if samples.len() % channels as usize != 0 {
            return Err(AudioError::invalid_chunk(format!(
                "{} samples do not split into {} channels",
                samples.len(),
                channels
            )));
        }

        Ok(Self {
            samples: samples.normalize().into(),
            sample_rate,
            channels,
        })
    }

    /// Interleaved samples
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Samples per channel
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// Playback duration in seconds
    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// De-interleave into a playable buffer
    pub fn to_buffer(&self) -> PlayableBuffer {
        let channels = self.channels as usize;
        let planes = (0..channels)
            .map(|channel| {
                self.samples
                    .iter()
                    .skip(channel)
                    .step_by(channels)
                    .copied()
                    .collect()
            })
            .collect();

        PlayableBuffer {
            planes,
            sample_rate: self.sample_rate,
            frames: self.frames(),
        }
    }
}

/// Planar buffer ready to be placed on the audio clock
#[derive(Debug, Clone)]
pub struct PlayableBuffer {
    planes: Vec<Vec<f32>>,
    sample_rate: u32,
    frames: usize,
}

impl PlayableBuffer {
    pub fn channel_count(&self) -> usize {
        self.planes.len()
    }

    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.planes.get(index).map(Vec::as_slice)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn duration(&self) -> f64 {
        self.frames as f64 / self.sample_rate as f64
    }

    /// Downmixed sample at `frame`, silence past the end
    pub fn mono_at(&self, frame: usize) -> f32 {
        if frame >= self.frames || self.planes.is_empty() {
            return 0.0;
        }
        let sum: f32 = self.planes.iter().map(|plane| plane[frame]).sum();
        sum / self.planes.len() as f32
    }
}
