//! Media tracks and streams
//!
//! A [`MediaTrack`] is a cheap handle: cloning the handle keeps the same
//! identity, while [`MediaTrack::clone_track`] mints an independent track
//! over the same feed, the way capture APIs clone tracks for each caller.

use crate::context::AudioContext;
use crate::error::{AudioError, AudioResult};
use parking_lot::Mutex;
use serde_json::{Map, Value, json};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, trace};
use uuid::Uuid;

/// Device id reported by every virtual microphone track
pub const VIRTUAL_DEVICE_ID: &str = "virtual-microphone";

/// Seconds of audio a remote feed buffers before dropping the oldest samples
const REMOTE_BUFFER_SECS: usize = 10;

/// Unique track identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackId(Uuid);

impl TrackId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TrackId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    Live,
    Ended,
}

/// Block of mono or interleaved samples read from a track
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
    /// Stream time of the first sample in seconds
    pub timestamp: f64,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16, timestamp: f64) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
            timestamp,
        }
    }

    /// Number of samples per channel
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }

    /// Average all channels into one
    pub fn to_mono(&self) -> Vec<f32> {
        let channels = self.channels.max(1) as usize;
        self.samples
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    }
}

/// Samples pushed into a track from outside, e.g. a received peer track
#[derive(Debug)]
pub(crate) struct RemoteFeed {
    sample_rate: u32,
    samples: Mutex<VecDeque<f32>>,
}

impl RemoteFeed {
    fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            samples: Mutex::new(VecDeque::new()),
        }
    }

    fn capacity(&self) -> usize {
        self.sample_rate as usize * REMOTE_BUFFER_SECS
    }

    fn push(&self, samples: &[f32]) {
        let mut buffer = self.samples.lock();
        buffer.extend(samples.iter().copied());
        let overflow = buffer.len().saturating_sub(self.capacity());
        if overflow > 0 {
            buffer.drain(..overflow);
        }
    }

    /// Pop samples into `out`, returning how many were available
    fn pop_into(&self, out: &mut [f32]) -> usize {
        let mut buffer = self.samples.lock();
        let available = buffer.len().min(out.len());
        for (slot, sample) in out.iter_mut().zip(buffer.drain(..available)) {
            *slot = sample;
        }
        available
    }

    fn len(&self) -> usize {
        self.samples.lock().len()
    }
}

/// Where a track's media comes from
#[derive(Debug, Clone)]
pub(crate) enum TrackFeed {
    /// Output of a context's shared mix bus
    Mix(Arc<AudioContext>),
    /// Samples pushed by a [`TrackProducer`]
    Remote(Arc<RemoteFeed>),
    /// Opaque hardware or video track
    Device,
}

type EndedCallback = Box<dyn FnOnce(TrackId) + Send>;

#[derive(Default)]
struct Observers {
    next_id: u64,
    callbacks: HashMap<u64, EndedCallback>,
}

#[derive(Debug, Clone)]
struct TrackStatus {
    state: TrackState,
    enabled: bool,
    constraints: Map<String, Value>,
    /// Read position in stream time; starts on first read
    cursor: Option<f64>,
}

impl TrackStatus {
    fn live() -> Self {
        Self {
            state: TrackState::Live,
            enabled: true,
            constraints: Map::new(),
            cursor: None,
        }
    }
}

struct TrackInner {
    id: TrackId,
    kind: TrackKind,
    label: String,
    feed: TrackFeed,
    status: Mutex<TrackStatus>,
    observers: Mutex<Observers>,
}

/// Handle to a media track
#[derive(Clone)]
pub struct MediaTrack {
    inner: Arc<TrackInner>,
}

impl MediaTrack {
    fn with_feed(kind: TrackKind, label: impl Into<String>, feed: TrackFeed) -> Self {
        Self {
            inner: Arc::new(TrackInner {
                id: TrackId::new(),
                kind,
                label: label.into(),
                feed,
                status: Mutex::new(TrackStatus::live()),
                observers: Mutex::new(Observers::default()),
            }),
        }
    }

    /// Opaque track handed out by a real capture device
    pub fn device(kind: TrackKind, label: impl Into<String>) -> Self {
        Self::with_feed(kind, label, TrackFeed::Device)
    }

    /// Audio track fed by pushed samples, plus the producer that feeds it
    pub fn remote(label: impl Into<String>, sample_rate: u32) -> (Self, TrackProducer) {
        let track = Self::with_feed(
            TrackKind::Audio,
            label,
            TrackFeed::Remote(Arc::new(RemoteFeed::new(sample_rate))),
        );
        let producer = TrackProducer {
            track: track.clone(),
        };
        (track, producer)
    }

    /// Output track reading the shared mix bus of a context
    pub(crate) fn virtual_output(context: Arc<AudioContext>, label: impl Into<String>) -> Self {
        Self::with_feed(TrackKind::Audio, label, TrackFeed::Mix(context))
    }

    pub fn id(&self) -> TrackId {
        self.inner.id
    }

    pub fn kind(&self) -> TrackKind {
        self.inner.kind
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn state(&self) -> TrackState {
        self.inner.status.lock().state
    }

    pub fn is_live(&self) -> bool {
        self.state() == TrackState::Live
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.status.lock().enabled
    }

    /// Disabled tracks stay live but produce silence
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.status.lock().enabled = enabled;
    }

    /// Whether the track reads the mix bus of `context`
    pub(crate) fn reads_context(&self, context: &Arc<AudioContext>) -> bool {
        matches!(&self.inner.feed, TrackFeed::Mix(own) if Arc::ptr_eq(own, context))
    }

    /// Whether both handles point at the same track
    pub fn same_track(&self, other: &MediaTrack) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Mint an independent track over the same feed.
    ///
    /// The clone has its own id, state and read position; stopping either
    /// one never affects the other. Ended observers are not copied.
    pub fn clone_track(&self) -> MediaTrack {
        let status = self.inner.status.lock().clone();
        Self {
            inner: Arc::new(TrackInner {
                id: TrackId::new(),
                kind: self.inner.kind,
                label: self.inner.label.clone(),
                feed: self.inner.feed.clone(),
                status: Mutex::new(TrackStatus {
                    cursor: None,
                    ..status
                }),
                observers: Mutex::new(Observers::default()),
            }),
        }
    }

    /// Stop the track locally. Ended observers do not fire.
    pub fn stop(&self) {
        let mut status = self.inner.status.lock();
        if status.state == TrackState::Live {
            status.state = TrackState::Ended;
            debug!("Track {} ({}) stopped", self.inner.id, self.inner.label);
        }
        drop(status);
        self.inner.observers.lock().callbacks.clear();
    }

    /// The source side ended the track. Ended observers fire exactly once.
    pub fn end(&self) {
        {
            let mut status = self.inner.status.lock();
            if status.state == TrackState::Ended {
                return;
            }
            status.state = TrackState::Ended;
        }

        let callbacks: Vec<EndedCallback> = self
            .inner
            .observers
            .lock()
            .callbacks
            .drain()
            .map(|(_, callback)| callback)
            .collect();

        debug!(
            "Track {} ({}) ended, notifying {} observer(s)",
            self.inner.id,
            self.inner.label,
            callbacks.len()
        );
        for callback in callbacks {
            callback(self.inner.id);
        }
    }

    /// Register a callback for when the source ends the track.
    ///
    /// The returned guard detaches the callback when dropped. Registering on
    /// a track that already ended yields an inert guard.
    pub fn on_ended<F>(&self, callback: F) -> EndedObserver
    where
        F: FnOnce(TrackId) + Send + 'static,
    {
        let status = self.inner.status.lock();
        if status.state == TrackState::Ended {
            return EndedObserver {
                track: Weak::new(),
                id: None,
            };
        }

        let mut observers = self.inner.observers.lock();
        let id = observers.next_id;
        observers.next_id += 1;
        observers.callbacks.insert(id, Box::new(callback));
        EndedObserver {
            track: Arc::downgrade(&self.inner),
            id: Some(id),
        }
    }

    /// Number of attached ended observers
    pub fn observer_count(&self) -> usize {
        self.inner.observers.lock().callbacks.len()
    }

    /// Current settings of the track
    pub fn settings(&self) -> Map<String, Value> {
        let value = match &self.inner.feed {
            TrackFeed::Mix(context) => json!({
                "deviceId": VIRTUAL_DEVICE_ID,
                "sampleRate": context.sample_rate(),
                "channelCount": 1,
                "echoCancellation": false,
                "noiseSuppression": false,
                "autoGainControl": false,
            }),
            TrackFeed::Remote(feed) => json!({
                "deviceId": self.inner.id.to_string(),
                "sampleRate": feed.sample_rate,
                "channelCount": 1,
            }),
            TrackFeed::Device => json!({
                "deviceId": self.inner.label,
            }),
        };
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    /// Constraints accepted by the last successful `apply_constraints`
    pub fn constraints(&self) -> Map<String, Value> {
        self.inner.status.lock().constraints.clone()
    }

    /// Apply caller constraints.
    ///
    /// Unknown fields are ignored. An `{ "exact": .. }` requirement that
    /// differs from the current setting is rejected.
    pub fn apply_constraints(&self, constraints: &Value) -> AudioResult<()> {
        let requested = match constraints {
            Value::Bool(_) => return Ok(()),
            Value::Object(map) => map,
            other => {
                return Err(AudioError::constraint(
                    "constraints",
                    format!("expected an object, got {}", other),
                ));
            }
        };

        let settings = self.settings();
        for (name, value) in requested {
            let exact = value.as_object().and_then(|spec| spec.get("exact"));
            if let (Some(exact), Some(current)) = (exact, settings.get(name)) {
                if exact != current {
                    return Err(AudioError::constraint(
                        name.clone(),
                        format!("requires {} but track has {}", exact, current),
                    ));
                }
            }
        }

        self.inner.status.lock().constraints = requested.clone();
        Ok(())
    }

    /// Read the next `frames` mono samples from the track.
    ///
    /// Returns `None` for ended tracks and tracks with no readable media.
    pub fn read_frame(&self, frames: usize) -> Option<AudioFrame> {
        let mut status = self.inner.status.lock();
        if status.state == TrackState::Ended {
            return None;
        }

        let (sample_rate, at, mut samples) = match &self.inner.feed {
            TrackFeed::Mix(context) => {
                let at = *status.cursor.get_or_insert_with(|| context.current_time());
                (context.sample_rate(), at, context.render(at, frames))
            }
            TrackFeed::Remote(feed) => {
                let at = *status.cursor.get_or_insert(0.0);
                let mut samples = vec![0.0f32; frames];
                feed.pop_into(&mut samples);
                (feed.sample_rate, at, samples)
            }
            TrackFeed::Device => return None,
        };

        status.cursor = Some(at + frames as f64 / sample_rate as f64);
        if !status.enabled {
            samples.iter_mut().for_each(|s| *s = 0.0);
        }
        trace!("Read {} frames from track {} at {:.4}", frames, self.inner.id, at);

        Some(AudioFrame::new(samples, sample_rate, 1, at))
    }

    /// Pull the next samples of the feed for a bridge, zero-filling gaps.
    ///
    /// Returns how many samples the feed actually delivered.
    pub(crate) fn pull_samples(&self, out: &mut [f32]) -> usize {
        out.iter_mut().for_each(|s| *s = 0.0);
        let status = self.inner.status.lock();
        if status.state == TrackState::Ended {
            return 0;
        }
        let enabled = status.enabled;
        drop(status);

        let delivered = match &self.inner.feed {
            TrackFeed::Remote(feed) => feed.pop_into(out),
            TrackFeed::Mix(_) => match self.read_frame(out.len()) {
                Some(frame) => {
                    out.copy_from_slice(&frame.samples);
                    out.len()
                }
                None => 0,
            },
            TrackFeed::Device => 0,
        };

        if !enabled {
            out.iter_mut().for_each(|s| *s = 0.0);
        }
        delivered
    }
}

impl fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("label", &self.inner.label)
            .field("state", &self.state())
            .finish()
    }
}

/// Registration of an ended callback; dropping it detaches the callback
#[must_use = "dropping the guard detaches the callback"]
pub struct EndedObserver {
    track: Weak<TrackInner>,
    id: Option<u64>,
}

impl EndedObserver {
    /// Whether the callback is still waiting to fire
    pub fn is_attached(&self) -> bool {
        match (self.track.upgrade(), self.id) {
            (Some(inner), Some(id)) => inner.observers.lock().callbacks.contains_key(&id),
            _ => false,
        }
    }
}

impl Drop for EndedObserver {
    fn drop(&mut self) {
        if let (Some(inner), Some(id)) = (self.track.upgrade(), self.id.take()) {
            inner.observers.lock().callbacks.remove(&id);
        }
    }
}

impl fmt::Debug for EndedObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndedObserver").field("id", &self.id).finish()
    }
}

/// Writing side of a remote track
#[derive(Debug, Clone)]
pub struct TrackProducer {
    track: MediaTrack,
}

impl TrackProducer {
    fn feed(&self) -> Option<&Arc<RemoteFeed>> {
        match &self.track.inner.feed {
            TrackFeed::Remote(feed) => Some(feed),
            _ => None,
        }
    }

    /// Push mono samples at the track's sample rate
    pub fn push_samples(&self, samples: &[f32]) -> AudioResult<()> {
        if !self.track.is_live() {
            return Err(AudioError::invalid_state(format!(
                "track {} has ended",
                self.track.id()
            )));
        }
        let feed = self
            .feed()
            .ok_or_else(|| AudioError::invalid_state("track is not fed by a producer"))?;
        feed.push(samples);
        Ok(())
    }

    /// Push a frame, averaging its channels down to mono
    pub fn push_frame(&self, frame: &AudioFrame) -> AudioResult<()> {
        self.push_samples(&frame.to_mono())
    }

    /// Samples waiting to be read
    pub fn buffered(&self) -> usize {
        self.feed().map(|feed| feed.len()).unwrap_or(0)
    }

    pub fn track(&self) -> &MediaTrack {
        &self.track
    }

    /// End the remote track
    pub fn finish(&self) {
        self.track.end();
    }
}

/// Ordered set of tracks returned by a capture request
#[derive(Debug, Clone)]
pub struct MediaStream {
    id: Uuid,
    tracks: Vec<MediaTrack>,
}

impl MediaStream {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            tracks: Vec::new(),
        }
    }

    pub fn with_tracks(tracks: Vec<MediaTrack>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tracks,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn add_track(&mut self, track: MediaTrack) {
        self.tracks.push(track);
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn audio_tracks(&self) -> Vec<MediaTrack> {
        self.tracks_of(TrackKind::Audio)
    }

    pub fn video_tracks(&self) -> Vec<MediaTrack> {
        self.tracks_of(TrackKind::Video)
    }

    fn tracks_of(&self, kind: TrackKind) -> Vec<MediaTrack> {
        self.tracks
            .iter()
            .filter(|track| track.kind() == kind)
            .cloned()
            .collect()
    }

    /// Stop every track in the stream
    pub fn stop_all(&self) {
        self.tracks.iter().for_each(MediaTrack::stop);
    }
}

impl Default for MediaStream {
    fn default() -> Self {
        Self::new()
    }
}
