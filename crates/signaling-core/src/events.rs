//! Signaling events

use botmic_audio_core::TrackId;
use crate::types::{AudioFeed, NegotiationState, SessionId};

pub use botmic_audio_core::{EventEmitter, EventIterator, EventStream};

/// Events emitted by the signaling client
#[derive(Debug, Clone)]
pub enum SignalingEvent {
    /// A negotiation moved to a new state
    StateChanged {
        session_id: SessionId,
        feed: AudioFeed,
        state: NegotiationState,
    },

    /// The first inbound track of a session arrived
    RemoteTrack {
        session_id: SessionId,
        feed: AudioFeed,
        track_id: TrackId,
        /// Whether the track became the microphone
        bridged: bool,
    },
}
