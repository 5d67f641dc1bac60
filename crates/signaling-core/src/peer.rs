//! Peer connection abstraction and the built-in receive-only peer

use async_trait::async_trait;
use botmic_audio_core::{MediaTrack, TrackKind};
use crate::error::{SignalingError, SignalingResult};
use crate::sdp::{parse_media_sections, recvonly_audio_offer};
use crate::types::{SdpType, SessionDescription, TransceiverDirection};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Media session negotiated through an offer/answer exchange
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Add a logical media channel
    fn add_transceiver(
        &mut self,
        kind: TrackKind,
        direction: TransceiverDirection,
    ) -> SignalingResult<()>;

    /// Produce the local offer
    async fn create_offer(&mut self) -> SignalingResult<SessionDescription>;

    async fn set_local_description(
        &mut self,
        description: SessionDescription,
    ) -> SignalingResult<()>;

    async fn set_remote_description(
        &mut self,
        description: SessionDescription,
    ) -> SignalingResult<()>;

    /// Inbound tracks, in arrival order. Can be taken once.
    fn take_remote_tracks(&mut self) -> Option<mpsc::UnboundedReceiver<MediaTrack>>;

    fn local_description(&self) -> Option<&SessionDescription>;

    fn remote_description(&self) -> Option<&SessionDescription>;

    /// Tear the session down. Idempotent.
    fn close(&mut self);
}

/// Announces tracks received by the media transport behind a peer
#[derive(Debug, Clone)]
pub struct RemoteTrackSender {
    sender: mpsc::UnboundedSender<MediaTrack>,
}

impl RemoteTrackSender {
    pub fn deliver(&self, track: MediaTrack) -> SignalingResult<()> {
        self.sender
            .send(track)
            .map_err(|_| SignalingError::peer("peer connection no longer accepts tracks"))
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Peer that only ever receives one audio channel
pub struct RecvOnlyPeer {
    origin_id: u64,
    transceivers: Vec<(TrackKind, TransceiverDirection)>,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    remote_tracks: Option<mpsc::UnboundedReceiver<MediaTrack>>,
    closed: bool,
}

impl RecvOnlyPeer {
    pub fn new() -> (Self, RemoteTrackSender) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let peer = Self {
            origin_id: (Uuid::new_v4().as_u128() as u64) >> 1,
            transceivers: Vec::new(),
            local: None,
            remote: None,
            remote_tracks: Some(receiver),
            closed: false,
        };
        (peer, RemoteTrackSender { sender })
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> SignalingResult<()> {
        if self.closed {
            return Err(SignalingError::invalid_state("peer connection is closed"));
        }
        Ok(())
    }
}

#[async_trait]
impl PeerConnection for RecvOnlyPeer {
    fn add_transceiver(
        &mut self,
        kind: TrackKind,
        direction: TransceiverDirection,
    ) -> SignalingResult<()> {
        self.ensure_open()?;
        if kind != TrackKind::Audio || direction != TransceiverDirection::RecvOnly {
            return Err(SignalingError::peer(format!(
                "only receive-only audio is supported, got {:?} {}",
                kind,
                direction.as_attribute()
            )));
        }
        if !self.transceivers.is_empty() {
            return Err(SignalingError::peer("audio transceiver already added"));
        }
        self.transceivers.push((kind, direction));
        Ok(())
    }

    async fn create_offer(&mut self) -> SignalingResult<SessionDescription> {
        self.ensure_open()?;
        if self.transceivers.is_empty() {
            return Err(SignalingError::invalid_state("no transceiver to offer"));
        }
        Ok(SessionDescription::offer(recvonly_audio_offer(self.origin_id)))
    }

    async fn set_local_description(
        &mut self,
        description: SessionDescription,
    ) -> SignalingResult<()> {
        self.ensure_open()?;
        if description.sdp_type != SdpType::Offer {
            return Err(SignalingError::invalid_description(format!(
                "expected a local offer, got {}",
                description.sdp_type
            )));
        }
        parse_media_sections(&description.sdp)?;
        self.local = Some(description);
        Ok(())
    }

    async fn set_remote_description(
        &mut self,
        description: SessionDescription,
    ) -> SignalingResult<()> {
        self.ensure_open()?;
        if self.local.is_none() {
            return Err(SignalingError::invalid_state("remote answer before local offer"));
        }
        if description.sdp_type != SdpType::Answer {
            return Err(SignalingError::invalid_description(format!(
                "expected an answer, got {}",
                description.sdp_type
            )));
        }

        let sections = parse_media_sections(&description.sdp)?;
        let audio = sections
            .iter()
            .find(|section| section.kind == "audio")
            .ok_or_else(|| SignalingError::invalid_description("answer has no audio section"))?;
        if !audio.direction.sends() {
            return Err(SignalingError::invalid_description(format!(
                "answer audio is {}, nothing would be received",
                audio.direction.as_attribute()
            )));
        }

        debug!("Remote answer accepted, audio {}", audio.direction.as_attribute());
        self.remote = Some(description);
        Ok(())
    }

    fn take_remote_tracks(&mut self) -> Option<mpsc::UnboundedReceiver<MediaTrack>> {
        self.remote_tracks.take()
    }

    fn local_description(&self) -> Option<&SessionDescription> {
        self.local.as_ref()
    }

    fn remote_description(&self) -> Option<&SessionDescription> {
        self.remote.as_ref()
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.remote_tracks = None;
        }
    }
}
