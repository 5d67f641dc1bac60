//! Minimal SDP handling for receive-only audio sessions

use crate::error::{SignalingError, SignalingResult};
use crate::types::TransceiverDirection;

/// Opus payload type offered for audio
pub const OPUS_PAYLOAD_TYPE: u8 = 111;

/// One `m=` section of a session description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSection {
    pub kind: String,
    pub port: u16,
    pub protocol: String,
    pub formats: Vec<String>,
    pub direction: TransceiverDirection,
    pub mid: Option<String>,
}

/// Parse the media sections of a session description.
///
/// Sections without a direction attribute inherit the session-level one,
/// which itself defaults to `sendrecv`.
pub fn parse_media_sections(sdp: &str) -> SignalingResult<Vec<MediaSection>> {
    let mut lines = sdp.lines().map(str::trim).filter(|line| !line.is_empty());
    if lines.next() != Some("v=0") {
        return Err(SignalingError::invalid_description("missing v=0 line"));
    }

    let mut session_direction = TransceiverDirection::SendRecv;
    let mut sections: Vec<MediaSection> = Vec::new();
    let mut explicit: Vec<bool> = Vec::new();

    for line in lines {
        if let Some(media) = line.strip_prefix("m=") {
            sections.push(parse_media_line(media)?);
            explicit.push(false);
        } else if let Some(attribute) = line.strip_prefix("a=") {
            let direction = TransceiverDirection::from_attribute(attribute);
            match (sections.last_mut(), direction) {
                (Some(section), Some(direction)) => {
                    section.direction = direction;
                    if let Some(flag) = explicit.last_mut() {
                        *flag = true;
                    }
                }
                (None, Some(direction)) => session_direction = direction,
                (Some(section), None) => {
                    if let Some(mid) = attribute.strip_prefix("mid:") {
                        section.mid = Some(mid.to_string());
                    }
                }
                (None, None) => {}
            }
        }
    }

    for (section, explicit) in sections.iter_mut().zip(explicit) {
        if !explicit {
            section.direction = session_direction;
        }
    }
    Ok(sections)
}

fn parse_media_line(media: &str) -> SignalingResult<MediaSection> {
    let mut fields = media.split_whitespace();
    let (Some(kind), Some(port), Some(protocol)) = (fields.next(), fields.next(), fields.next())
    else {
        return Err(SignalingError::invalid_description(format!(
            "malformed media line: m={}",
            media
        )));
    };
    let port = port.parse().map_err(|_| {
        SignalingError::invalid_description(format!("invalid media port: {}", port))
    })?;

    Ok(MediaSection {
        kind: kind.to_string(),
        port,
        protocol: protocol.to_string(),
        formats: fields.map(str::to_string).collect(),
        direction: TransceiverDirection::SendRecv,
        mid: None,
    })
}

/// Offer for one receive-only opus audio section
pub fn recvonly_audio_offer(origin_id: u64) -> String {
    [
        "v=0".to_string(),
        format!("o=- {} 2 IN IP4 127.0.0.1", origin_id),
        "s=-".to_string(),
        "t=0 0".to_string(),
        "a=group:BUNDLE 0".to_string(),
        format!("m=audio 9 UDP/TLS/RTP/SAVPF {}", OPUS_PAYLOAD_TYPE),
        "c=IN IP4 0.0.0.0".to_string(),
        "a=mid:0".to_string(),
        format!("a={}", TransceiverDirection::RecvOnly.as_attribute()),
        format!("a=rtpmap:{} opus/48000/2", OPUS_PAYLOAD_TYPE),
    ]
    .iter()
    .map(|line| format!("{}\r\n", line))
    .collect()
}
