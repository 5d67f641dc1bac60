//! Event system for the virtual audio device

use crate::graph::SourceKind;
use crate::track::TrackId;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

/// Events emitted by the virtual audio device
#[derive(Debug, Clone)]
pub enum VirtualAudioEvent {
    // Source events
    /// A new source was wired into the graph
    SourceActivated {
        /// Kind of the new source
        kind: SourceKind,
        /// Label carried by the new output track
        label: String,
        /// Identity of the new output track
        track_id: TrackId,
        /// Activation generation
        generation: u64,
    },

    /// The previous source was torn down
    SourceReleased {
        /// Kind of the released source
        kind: SourceKind,
        /// Generation that was released
        generation: u64,
        /// Number of teardown steps that failed and were skipped
        failed_steps: usize,
    },

    /// A source was requested while playback held the microphone; it is
    /// wired in once playback goes idle
    SourceDeferred {
        kind: SourceKind,
        label: String,
    },

    /// The active source ended on its own and the tone took over
    SourceFallback {
        /// Kind of the source that ended
        from: SourceKind,
        /// Why the fallback happened
        reason: String,
    },

    // Device visibility events
    /// Queued audio made the device live
    DeviceActivated,

    /// The queue drained; the device goes idle at `deadline` unless audio arrives
    DeactivationScheduled {
        /// Audio clock time of the pending deactivation
        deadline: f64,
    },

    /// New audio arrived during the grace window
    DeactivationCancelled,

    /// The grace window elapsed with no new audio
    DeviceDeactivated,

    // Playback events
    /// A PCM chunk was placed on the audio clock
    PlaybackScheduled {
        /// Position of the chunk in enqueue order, starting at 1
        sequence: u64,
        /// Audio clock start time in seconds
        start: f64,
        /// Chunk duration in seconds
        duration: f64,
        /// Declared sample rate of the chunk
        sample_rate: u32,
        /// Declared channel count of the chunk
        channels: u16,
    },

    // Capture events
    /// A capture request was answered with the virtual microphone
    CaptureServed {
        /// The cloned audio track handed to the caller
        audio_track: TrackId,
        /// Number of real video tracks merged into the result
        video_tracks: usize,
    },

    /// The audio engine could not be used
    AudioUnavailable {
        /// Error message
        reason: String,
    },

    /// Message meant for the operator watching the session
    Notice {
        /// Notice text
        message: String,
    },
}

/// Event stream type
pub type EventStream<E> = BroadcastStream<E>;

/// Simple event iterator that doesn't require StreamExt
pub struct EventIterator<E> {
    stream: EventStream<E>,
}

impl<E: Clone + Send + 'static> EventIterator<E> {
    /// Create a new event iterator from a stream
    pub fn new(stream: EventStream<E>) -> Self {
        Self { stream }
    }

    /// Get the next event (async)
    pub async fn next(&mut self) -> Option<E> {
        use tokio_stream::StreamExt;
        loop {
            match self.stream.next().await {
                Some(Ok(event)) => return Some(event),
                // Lagged receivers skip what they missed
                Some(Err(_)) => continue,
                None => return None,
            }
        }
    }
}

/// Broadcast event emitter
#[derive(Debug)]
pub struct EventEmitter<E> {
    sender: broadcast::Sender<E>,
}

impl<E> Clone for EventEmitter<E> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<E: Clone + Send + 'static> EventEmitter<E> {
    /// Create a new event emitter with the specified capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Emit an event
    pub fn emit(&self, event: E) {
        // Ignore send errors (no receivers)
        let _ = self.sender.send(event);
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> EventStream<E> {
        BroadcastStream::new(self.sender.subscribe())
    }

    /// Subscribe to events with a simple iterator
    pub fn subscribe_simple(&self) -> EventIterator<E> {
        EventIterator::new(self.subscribe())
    }

    /// Subscribe with a raw receiver, for consumers that poll with `try_recv`
    pub fn receiver(&self) -> broadcast::Receiver<E> {
        self.sender.subscribe()
    }

    /// Get the number of active receivers
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<E: Clone + Send + 'static> Default for EventEmitter<E> {
    fn default() -> Self {
        Self::new(1000)
    }
}

/// Drain every event currently buffered in a raw receiver
pub fn drain_events<E: Clone>(receiver: &mut broadcast::Receiver<E>) -> Vec<E> {
    let mut events = Vec::new();
    loop {
        match receiver.try_recv() {
            Ok(event) => events.push(event),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_and_iterate() {
        let emitter: EventEmitter<VirtualAudioEvent> = EventEmitter::new(16);
        let mut events = emitter.subscribe_simple();

        emitter.emit(VirtualAudioEvent::DeviceActivated);
        emitter.emit(VirtualAudioEvent::Notice {
            message: "hello".to_string(),
        });

        assert!(matches!(events.next().await, Some(VirtualAudioEvent::DeviceActivated)));
        match events.next().await {
            Some(VirtualAudioEvent::Notice { message }) => assert_eq!(message, "hello"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_emit_without_receivers_is_ignored() {
        let emitter: EventEmitter<VirtualAudioEvent> = EventEmitter::default();
        assert_eq!(emitter.receiver_count(), 0);
        emitter.emit(VirtualAudioEvent::DeviceDeactivated);
    }

    #[test]
    fn test_drain_events() {
        let emitter: EventEmitter<u32> = EventEmitter::new(8);
        let mut receiver = emitter.receiver();
        emitter.emit(1);
        emitter.emit(2);
        assert_eq!(drain_events(&mut receiver), vec![1, 2]);
        assert!(drain_events(&mut receiver).is_empty());
    }
}
