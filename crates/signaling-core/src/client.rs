//! Signaling client: receive-only negotiation and remote track hand-off

use botmic_audio_core::{MediaTrack, TrackKind, VirtualAudioDevice};
use crate::config::SignalingConfig;
use crate::error::{SignalingError, SignalingResult};
use crate::events::{EventEmitter, EventStream, SignalingEvent};
use crate::peer::PeerConnection;
use crate::transport::{HttpSignalingTransport, SignalingTransport};
use crate::types::{
    AudioFeed, NegotiationState, SessionDescription, SessionId, TransceiverDirection,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Prefix of the notice shown when a negotiation fails
pub const NEGOTIATION_FAILED_NOTICE: &str = "No upstream audio yet (or error)";

/// Negotiates receive-only sessions and hands remote audio to the virtual microphone
#[derive(Clone)]
pub struct SignalingClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: SignalingConfig,
    transport: Arc<dyn SignalingTransport>,
    device: VirtualAudioDevice,
    states: Mutex<HashMap<AudioFeed, NegotiationState>>,
    events: EventEmitter<SignalingEvent>,
}

impl SignalingClient {
    /// Client posting offers over HTTP
    pub fn new(config: SignalingConfig, device: VirtualAudioDevice) -> SignalingResult<Self> {
        let transport = Arc::new(HttpSignalingTransport::new()?);
        Self::with_transport(config, device, transport)
    }

    pub fn with_transport(
        config: SignalingConfig,
        device: VirtualAudioDevice,
        transport: Arc<dyn SignalingTransport>,
    ) -> SignalingResult<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                transport,
                device,
                states: Mutex::new(HashMap::new()),
                events: EventEmitter::default(),
            }),
        })
    }

    pub fn config(&self) -> &SignalingConfig {
        &self.inner.config
    }

    pub fn device(&self) -> &VirtualAudioDevice {
        &self.inner.device
    }

    /// Negotiation state of a feed; `Idle` until first attempted
    pub fn state(&self, feed: AudioFeed) -> NegotiationState {
        self.inner
            .states
            .lock()
            .get(&feed)
            .copied()
            .unwrap_or(NegotiationState::Idle)
    }

    pub fn events(&self) -> &EventEmitter<SignalingEvent> {
        &self.inner.events
    }

    pub fn subscribe(&self) -> EventStream<SignalingEvent> {
        self.inner.events.subscribe()
    }

    /// Run one offer/answer exchange for `feed` over `peer`.
    ///
    /// On failure the peer is closed, a notice is shown on the device and the
    /// microphone keeps its current source. Nothing is retried. Dropping the
    /// returned future before it settles leaves the feed `Failed`, so it can
    /// be negotiated again.
    pub async fn negotiate(
        &self,
        feed: AudioFeed,
        mut peer: Box<dyn PeerConnection>,
    ) -> SignalingResult<SignalingSession> {
        let session_id = SessionId::new();
        {
            let mut states = self.inner.states.lock();
            let current = states.get(&feed).copied().unwrap_or(NegotiationState::Idle);
            if current.in_progress() {
                drop(states);
                peer.close();
                return Err(SignalingError::invalid_state(format!(
                    "{} negotiation already in progress",
                    feed
                )));
            }
            states.insert(feed, NegotiationState::Idle);
        }

        let mut attempt = Attempt {
            client: self,
            session_id,
            feed,
            settled: false,
        };

        info!("Negotiating {} session {}", feed, session_id);
        match self.exchange(session_id, feed, peer.as_mut()).await {
            Ok((local, remote)) => {
                attempt.settle(NegotiationState::Connected);
                info!("{} session {} connected", feed, session_id);
                Ok(self.open_session(session_id, feed, peer, local, remote))
            }
            Err(e) => {
                attempt.settle(NegotiationState::Failed);
                peer.close();
                warn!("{} negotiation failed: {}", feed, e);
                self.inner
                    .device
                    .notify(format!("{}: {}", NEGOTIATION_FAILED_NOTICE, e));
                Err(e)
            }
        }
    }

    async fn exchange(
        &self,
        session_id: SessionId,
        feed: AudioFeed,
        peer: &mut dyn PeerConnection,
    ) -> SignalingResult<(SessionDescription, SessionDescription)> {
        peer.add_transceiver(TrackKind::Audio, TransceiverDirection::RecvOnly)?;
        let offer = peer.create_offer().await?;
        peer.set_local_description(offer.clone()).await?;
        self.set_state(session_id, feed, NegotiationState::OfferCreated);

        let url = self.inner.config.url_for(feed);
        self.set_state(session_id, feed, NegotiationState::AwaitingAnswer);
        let timeout = self.inner.config.negotiation_timeout();
        let answer = tokio::time::timeout(timeout, self.inner.transport.exchange(&url, &offer))
            .await
            .map_err(|_| SignalingError::Timeout {
                after_ms: self.inner.config.negotiation_timeout_ms,
            })??;

        peer.set_remote_description(answer.clone()).await?;
        Ok((offer, answer))
    }

    fn set_state(&self, session_id: SessionId, feed: AudioFeed, state: NegotiationState) {
        self.inner.states.lock().insert(feed, state);
        debug!("{} session {} -> {:?}", feed, session_id, state);
        self.inner.events.emit(SignalingEvent::StateChanged {
            session_id,
            feed,
            state,
        });
    }

    fn open_session(
        &self,
        id: SessionId,
        feed: AudioFeed,
        mut peer: Box<dyn PeerConnection>,
        local: SessionDescription,
        remote: SessionDescription,
    ) -> SignalingSession {
        let (slot, remote_track) = watch::channel(None);
        let forwarder = match peer.take_remote_tracks() {
            Some(tracks) => Some(tokio::spawn(forward_first_track(
                tracks,
                id,
                feed,
                self.inner.device.clone(),
                self.inner.events.clone(),
                slot,
            ))),
            None => {
                warn!("{} session {} has no remote track channel", feed, id);
                None
            }
        };

        SignalingSession {
            id,
            feed,
            local,
            remote,
            remote_track,
            peer: Mutex::new(peer),
            forwarder,
        }
    }
}

/// One negotiation in flight; marks its feed failed if abandoned unsettled
struct Attempt<'a> {
    client: &'a SignalingClient,
    session_id: SessionId,
    feed: AudioFeed,
    settled: bool,
}

impl Attempt<'_> {
    fn settle(&mut self, state: NegotiationState) {
        self.settled = true;
        self.client.set_state(self.session_id, self.feed, state);
    }
}

impl Drop for Attempt<'_> {
    fn drop(&mut self) {
        if !self.settled {
            warn!(
                "{} negotiation {} abandoned before an answer was applied",
                self.feed, self.session_id
            );
            self.client
                .set_state(self.session_id, self.feed, NegotiationState::Failed);
        }
    }
}

impl std::fmt::Debug for SignalingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingClient")
            .field("base_url", &self.inner.config.base_url)
            .finish()
    }
}

/// Hands the first inbound audio track over, bridging it for meeting audio
async fn forward_first_track(
    mut tracks: mpsc::UnboundedReceiver<MediaTrack>,
    session_id: SessionId,
    feed: AudioFeed,
    device: VirtualAudioDevice,
    events: EventEmitter<SignalingEvent>,
    slot: watch::Sender<Option<MediaTrack>>,
) {
    while let Some(track) = tracks.recv().await {
        if track.kind() != TrackKind::Audio {
            debug!("Ignoring {:?} track on {} session", track.kind(), feed);
            continue;
        }
        if slot.borrow().is_some() {
            debug!("Ignoring additional remote track on {} session", feed);
            continue;
        }

        let bridged = feed.bridges_microphone()
            && match device.bridge_stream(track.clone()) {
                Ok(output) => {
                    info!("Remote {} now feeds {}", feed, output.label());
                    true
                }
                Err(e) => {
                    device.notify(format!("Could not bridge remote audio: {}", e));
                    false
                }
            };

        events.emit(SignalingEvent::RemoteTrack {
            session_id,
            feed,
            track_id: track.id(),
            bridged,
        });
        slot.send_replace(Some(track));
    }
}

/// A connected receive-only session
pub struct SignalingSession {
    id: SessionId,
    feed: AudioFeed,
    local: SessionDescription,
    remote: SessionDescription,
    remote_track: watch::Receiver<Option<MediaTrack>>,
    peer: Mutex<Box<dyn PeerConnection>>,
    forwarder: Option<JoinHandle<()>>,
}

impl SignalingSession {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn feed(&self) -> AudioFeed {
        self.feed
    }

    pub fn local_description(&self) -> &SessionDescription {
        &self.local
    }

    pub fn remote_description(&self) -> &SessionDescription {
        &self.remote
    }

    /// The first inbound audio track, once it arrived
    pub fn remote_track(&self) -> Option<MediaTrack> {
        self.remote_track.borrow().clone()
    }

    /// Wait for the first inbound audio track; `None` if the session ends first
    pub async fn wait_for_remote_track(&self) -> Option<MediaTrack> {
        let mut receiver = self.remote_track.clone();
        loop {
            if let Some(track) = receiver.borrow_and_update().clone() {
                return Some(track);
            }
            if receiver.changed().await.is_err() {
                return receiver.borrow().clone();
            }
        }
    }

    /// Close the peer and stop forwarding. The microphone keeps whatever it plays.
    pub fn close(&self) {
        self.peer.lock().close();
        if let Some(forwarder) = &self.forwarder {
            forwarder.abort();
        }
    }
}

impl std::fmt::Debug for SignalingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingSession")
            .field("id", &self.id)
            .field("feed", &self.feed)
            .finish()
    }
}

/// Negotiate meeting audio once the configured startup delay has passed
pub fn spawn_startup_negotiation(
    client: SignalingClient,
    peer: Box<dyn PeerConnection>,
) -> SignalingResult<JoinHandle<SignalingResult<SignalingSession>>> {
    let handle = Handle::try_current()
        .map_err(|_| SignalingError::invalid_state("startup negotiation needs a tokio runtime"))?;
    Ok(handle.spawn(async move {
        tokio::time::sleep(client.config().startup_delay()).await;
        client.negotiate(AudioFeed::MeetingAudio, peer).await
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::RecvOnlyPeer;
    use async_trait::async_trait;
    use botmic_audio_core::events::drain_events;
    use botmic_audio_core::{SourceKind, VirtualAudioConfig, VirtualAudioEvent};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const ANSWER: &str = "v=0\r\no=- 7 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n\
                          m=audio 9 UDP/TLS/RTP/SAVPF 111\r\na=sendonly\r\n";

    struct PendingTransport;

    #[async_trait]
    impl SignalingTransport for PendingTransport {
        async fn exchange(
            &self,
            _url: &str,
            _offer: &SessionDescription,
        ) -> SignalingResult<SessionDescription> {
            std::future::pending().await
        }
    }

    /// Never answers the first offer, answers every later one
    #[derive(Default)]
    struct StallFirstTransport {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SignalingTransport for StallFirstTransport {
        async fn exchange(
            &self,
            _url: &str,
            _offer: &SessionDescription,
        ) -> SignalingResult<SessionDescription> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                std::future::pending::<()>().await;
            }
            Ok(SessionDescription::answer(ANSWER))
        }
    }

    struct FixedTransport {
        reply: Result<SessionDescription, (u16, String)>,
        urls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SignalingTransport for FixedTransport {
        async fn exchange(
            &self,
            url: &str,
            _offer: &SessionDescription,
        ) -> SignalingResult<SessionDescription> {
            self.urls.lock().push(url.to_string());
            match &self.reply {
                Ok(answer) => Ok(answer.clone()),
                Err((status, body)) => Err(SignalingError::rejected(*status, body.clone())),
            }
        }
    }

    fn client(transport: Arc<dyn SignalingTransport>) -> SignalingClient {
        let device = VirtualAudioDevice::new(VirtualAudioConfig::default()).unwrap();
        SignalingClient::with_transport(SignalingConfig::default(), device, transport).unwrap()
    }

    fn notices(receiver: &mut tokio::sync::broadcast::Receiver<VirtualAudioEvent>) -> Vec<String> {
        drain_events(receiver)
            .into_iter()
            .filter_map(|event| match event {
                VirtualAudioEvent::Notice { message } => Some(message),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_offer_times_out() {
        let client = client(Arc::new(PendingTransport));
        let mut device_events = client.device().receiver();
        let (peer, sender) = RecvOnlyPeer::new();

        let started = tokio::time::Instant::now();
        let err = client
            .negotiate(AudioFeed::MeetingAudio, Box::new(peer))
            .await
            .unwrap_err();

        assert!(matches!(err, SignalingError::Timeout { after_ms: 10_000 }));
        assert_eq!(started.elapsed(), Duration::from_secs(10));
        assert_eq!(client.state(AudioFeed::MeetingAudio), NegotiationState::Failed);
        assert!(sender.is_closed());
        assert_eq!(
            notices(&mut device_events),
            vec![
                "No upstream audio yet (or error): Negotiation timed out after 10000ms".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_rejection_surfaces_notice_and_keeps_source() {
        let transport = Arc::new(FixedTransport {
            reply: Err((409, "No upstream audio has been published yet.".to_string())),
            urls: Mutex::new(Vec::new()),
        });
        let client = client(transport.clone());
        client.device().boot().unwrap();
        let generation = client.device().graph().generation();
        let mut device_events = client.device().receiver();
        let mut events = client.events().receiver();

        let (peer, _sender) = RecvOnlyPeer::new();
        let err = client
            .negotiate(AudioFeed::MeetingAudio, Box::new(peer))
            .await
            .unwrap_err();

        assert!(err.is_no_upstream());
        assert_eq!(
            notices(&mut device_events),
            vec![
                "No upstream audio yet (or error): 409 No upstream audio has been published yet."
                    .to_string()
            ]
        );
        assert_eq!(client.device().graph().active_kind(), Some(SourceKind::Tone));
        assert_eq!(client.device().graph().generation(), generation);
        assert_eq!(
            *transport.urls.lock(),
            vec!["http://localhost:8000/offer_meeting_audio".to_string()]
        );

        let states: Vec<NegotiationState> = drain_events(&mut events)
            .into_iter()
            .filter_map(|event| match event {
                SignalingEvent::StateChanged { state, .. } => Some(state),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![
                NegotiationState::OfferCreated,
                NegotiationState::AwaitingAnswer,
                NegotiationState::Failed
            ]
        );
    }

    #[tokio::test]
    async fn test_overlapping_negotiation_is_refused() {
        let client = client(Arc::new(PendingTransport));
        let (peer, _sender) = RecvOnlyPeer::new();
        let first = {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .negotiate(AudioFeed::MeetingAudio, Box::new(peer))
                    .await
            })
        };
        while client.state(AudioFeed::MeetingAudio) != NegotiationState::AwaitingAnswer {
            tokio::task::yield_now().await;
        }

        let (peer, _sender) = RecvOnlyPeer::new();
        let err = client
            .negotiate(AudioFeed::MeetingAudio, Box::new(peer))
            .await
            .unwrap_err();
        assert!(matches!(err, SignalingError::InvalidState { .. }));
        assert_eq!(client.state(AudioFeed::MeetingAudio), NegotiationState::AwaitingAnswer);
        assert_eq!(client.state(AudioFeed::ServerAudio), NegotiationState::Idle);

        first.abort();
        assert!(first.await.unwrap_err().is_cancelled());
        assert_eq!(client.state(AudioFeed::MeetingAudio), NegotiationState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_negotiation_can_be_retried() {
        let client = client(Arc::new(StallFirstTransport::default()));
        let mut events = client.events().receiver();

        let (peer, sender) = RecvOnlyPeer::new();
        let abandoned = tokio::time::timeout(
            Duration::from_secs(1),
            client.negotiate(AudioFeed::MeetingAudio, Box::new(peer)),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(client.state(AudioFeed::MeetingAudio), NegotiationState::Failed);
        assert!(sender.is_closed());

        let last = drain_events(&mut events).into_iter().last();
        assert!(matches!(
            last,
            Some(SignalingEvent::StateChanged {
                feed: AudioFeed::MeetingAudio,
                state: NegotiationState::Failed,
                ..
            })
        ));

        let (peer, _sender) = RecvOnlyPeer::new();
        let session = client
            .negotiate(AudioFeed::MeetingAudio, Box::new(peer))
            .await
            .unwrap();
        assert_eq!(client.state(AudioFeed::MeetingAudio), NegotiationState::Connected);
        session.close();
    }

    #[tokio::test]
    async fn test_server_audio_track_is_surfaced_not_bridged() {
        let transport = Arc::new(FixedTransport {
            reply: Ok(SessionDescription::answer(ANSWER)),
            urls: Mutex::new(Vec::new()),
        });
        let client = client(transport.clone());
        client.device().boot().unwrap();

        let (peer, sender) = RecvOnlyPeer::new();
        let session = client
            .negotiate(AudioFeed::ServerAudio, Box::new(peer))
            .await
            .unwrap();
        assert_eq!(client.state(AudioFeed::ServerAudio), NegotiationState::Connected);
        assert_eq!(*transport.urls.lock(), vec!["http://localhost:8000/offer".to_string()]);

        let (track, _producer) = MediaTrack::remote("server audio", 48_000);
        sender.deliver(track.clone()).unwrap();
        let received = session.wait_for_remote_track().await.unwrap();

        assert!(received.same_track(&track));
        assert_eq!(client.device().graph().active_kind(), Some(SourceKind::Tone));
        session.close();
    }

    #[tokio::test(start_paused = true)]
    async fn test_startup_negotiation_waits_for_delay() {
        let transport = Arc::new(FixedTransport {
            reply: Ok(SessionDescription::answer(ANSWER)),
            urls: Mutex::new(Vec::new()),
        });
        let client = client(transport.clone());
        let (peer, _sender) = RecvOnlyPeer::new();

        let started = tokio::time::Instant::now();
        let handle = spawn_startup_negotiation(client.clone(), Box::new(peer)).unwrap();
        let session = handle.await.unwrap().unwrap();

        assert!(started.elapsed() >= Duration::from_secs(1));
        assert_eq!(session.feed(), AudioFeed::MeetingAudio);
        assert_eq!(transport.urls.lock().len(), 1);
    }
}
