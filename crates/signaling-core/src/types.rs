//! Core signaling types

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Type of a session description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SdpType::Offer => "offer",
            SdpType::Answer => "answer",
            SdpType::Pranswer => "pranswer",
            SdpType::Rollback => "rollback",
        };
        f.write_str(name)
    }
}

/// Session description exchanged with the signaling endpoint, `{sdp, type}` on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub sdp: String,
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            sdp_type: SdpType::Offer,
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            sdp_type: SdpType::Answer,
        }
    }
}

/// Media direction of a transceiver, as seen from the local side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransceiverDirection {
    SendRecv,
    SendOnly,
    RecvOnly,
    Inactive,
}

impl TransceiverDirection {
    /// SDP attribute name
    pub fn as_attribute(&self) -> &'static str {
        match self {
            TransceiverDirection::SendRecv => "sendrecv",
            TransceiverDirection::SendOnly => "sendonly",
            TransceiverDirection::RecvOnly => "recvonly",
            TransceiverDirection::Inactive => "inactive",
        }
    }

    pub fn from_attribute(attribute: &str) -> Option<Self> {
        match attribute {
            "sendrecv" => Some(TransceiverDirection::SendRecv),
            "sendonly" => Some(TransceiverDirection::SendOnly),
            "recvonly" => Some(TransceiverDirection::RecvOnly),
            "inactive" => Some(TransceiverDirection::Inactive),
            _ => None,
        }
    }

    /// Whether the side using this direction sends media
    pub fn sends(&self) -> bool {
        matches!(self, TransceiverDirection::SendRecv | TransceiverDirection::SendOnly)
    }
}

/// Independently negotiated audio feeds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioFeed {
    /// Upstream meeting audio that becomes the microphone
    MeetingAudio,
    /// Second feed served by the streamer, surfaced as a remote track only
    ServerAudio,
}

impl AudioFeed {
    /// Whether received audio is bridged into the virtual microphone
    pub fn bridges_microphone(&self) -> bool {
        matches!(self, AudioFeed::MeetingAudio)
    }
}

impl fmt::Display for AudioFeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioFeed::MeetingAudio => f.write_str("meeting audio"),
            AudioFeed::ServerAudio => f.write_str("server audio"),
        }
    }
}

/// Negotiation state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Idle,
    OfferCreated,
    AwaitingAnswer,
    Connected,
    Failed,
}

impl NegotiationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, NegotiationState::Connected | NegotiationState::Failed)
    }

    /// An offer is out and the exchange has not settled
    pub fn in_progress(&self) -> bool {
        matches!(self, NegotiationState::OfferCreated | NegotiationState::AwaitingAnswer)
    }
}

/// Unique session identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_description_wire_format() {
        let offer = SessionDescription::offer("v=0\r\n");
        assert_eq!(
            serde_json::to_value(&offer).unwrap(),
            json!({ "sdp": "v=0\r\n", "type": "offer" })
        );

        let answer: SessionDescription =
            serde_json::from_value(json!({ "sdp": "v=0\r\n", "type": "answer" })).unwrap();
        assert_eq!(answer.sdp_type, SdpType::Answer);

        let unknown = json!({ "sdp": "", "type": "hello" });
        assert!(serde_json::from_value::<SessionDescription>(unknown).is_err());
    }

    #[test]
    fn test_direction_attributes() {
        assert_eq!(
            TransceiverDirection::from_attribute("recvonly"),
            Some(TransceiverDirection::RecvOnly)
        );
        assert_eq!(TransceiverDirection::from_attribute("a=recvonly"), None);
        assert!(!TransceiverDirection::RecvOnly.sends());
        assert!(TransceiverDirection::SendOnly.sends());
    }
}
