//! Negotiation against a local HTTP signaling endpoint

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use botmic_audio_core::events::drain_events;
use botmic_audio_core::{
    MediaTrack, SourceKind, VirtualAudioConfig, VirtualAudioDevice, VirtualAudioEvent,
};
use botmic_signaling_core::{
    AudioFeed, NegotiationState, RecvOnlyPeer, SessionDescription, SignalingClient,
    SignalingConfig, SignalingError,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::net::TcpListener;

const ANSWER: &str = "v=0\r\no=- 11 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n\
                      m=audio 9 UDP/TLS/RTP/SAVPF 111\r\na=mid:0\r\na=sendonly\r\n\
                      a=rtpmap:111 opus/48000/2\r\n";

#[derive(Clone)]
struct Endpoint {
    offers: Arc<Mutex<Vec<SessionDescription>>>,
    meeting_audio: Option<(StatusCode, &'static str)>,
}

async fn answer(
    State(endpoint): State<Endpoint>,
    Json(offer): Json<SessionDescription>,
) -> Response {
    endpoint.offers.lock().push(offer);
    Json(SessionDescription::answer(ANSWER)).into_response()
}

async fn answer_meeting_audio(
    State(endpoint): State<Endpoint>,
    Json(offer): Json<SessionDescription>,
) -> Response {
    endpoint.offers.lock().push(offer);
    match endpoint.meeting_audio {
        Some((status, body)) => (status, body).into_response(),
        None => Json(SessionDescription::answer(ANSWER)).into_response(),
    }
}

/// Start a stub endpoint on an ephemeral port and return its base URL
async fn start_endpoint(endpoint: Endpoint) -> anyhow::Result<String> {
    let app = Router::new()
        .route("/offer_meeting_audio", post(answer_meeting_audio))
        .route("/offer", post(answer))
        .with_state(endpoint);

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let url = format!("http://{}", listener.local_addr()?);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            eprintln!("stub endpoint error: {}", e);
        }
    });
    Ok(url)
}

fn endpoint(meeting_audio: Option<(StatusCode, &'static str)>) -> Endpoint {
    Endpoint {
        offers: Arc::new(Mutex::new(Vec::new())),
        meeting_audio,
    }
}

fn booted_client(base_url: String) -> anyhow::Result<SignalingClient> {
    let device = VirtualAudioDevice::new(VirtualAudioConfig::default())?;
    device.boot()?;
    Ok(SignalingClient::new(SignalingConfig::with_base_url(base_url), device)?)
}

fn notices(device: &mut tokio::sync::broadcast::Receiver<VirtualAudioEvent>) -> Vec<String> {
    drain_events(device)
        .into_iter()
        .filter_map(|event| match event {
            VirtualAudioEvent::Notice { message } => Some(message),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_answered_offer_bridges_remote_audio() -> anyhow::Result<()> {
    let endpoint = endpoint(None);
    let client = booted_client(start_endpoint(endpoint.clone()).await?)?;

    let (peer, tracks) = RecvOnlyPeer::new();
    let session = client.negotiate(AudioFeed::MeetingAudio, Box::new(peer)).await?;
    assert_eq!(client.state(AudioFeed::MeetingAudio), NegotiationState::Connected);
    assert_eq!(session.remote_description().sdp, ANSWER);

    let offers = endpoint.offers.lock().clone();
    assert_eq!(offers.len(), 1);
    assert!(offers[0].sdp.contains("m=audio"));
    assert!(offers[0].sdp.contains("a=recvonly"));
    assert!(!offers[0].sdp.contains("m=video"));

    let (upstream, producer) = MediaTrack::remote("meeting audio", 48_000);
    producer.push_samples(&vec![0.25f32; 960])?;
    tracks.deliver(upstream.clone())?;

    let received = session.wait_for_remote_track().await.expect("remote track");
    assert!(received.same_track(&upstream));
    assert_eq!(client.device().graph().active_kind(), Some(SourceKind::Bridge));

    session.close();
    Ok(())
}

#[tokio::test]
async fn test_server_error_keeps_tone_and_notifies() -> anyhow::Result<()> {
    let client = booted_client(
        start_endpoint(endpoint(Some((StatusCode::INTERNAL_SERVER_ERROR, "boom")))).await?,
    )?;
    let generation = client.device().graph().generation();
    let mut device_events = client.device().receiver();

    let (peer, tracks) = RecvOnlyPeer::new();
    let err = client
        .negotiate(AudioFeed::MeetingAudio, Box::new(peer))
        .await
        .unwrap_err();

    assert!(matches!(err, SignalingError::Rejected { status: 500, .. }));
    assert_eq!(client.state(AudioFeed::MeetingAudio), NegotiationState::Failed);
    assert_eq!(client.device().graph().active_kind(), Some(SourceKind::Tone));
    assert_eq!(client.device().graph().generation(), generation);
    assert_eq!(
        notices(&mut device_events),
        vec!["No upstream audio yet (or error): 500 boom".to_string()]
    );
    assert!(tracks.is_closed());
    Ok(())
}

#[tokio::test]
async fn test_feeds_negotiate_independently() -> anyhow::Result<()> {
    let endpoint = endpoint(Some((
        StatusCode::CONFLICT,
        "No upstream audio has been published yet.",
    )));
    let client = booted_client(start_endpoint(endpoint.clone()).await?)?;

    let (peer, _tracks) = RecvOnlyPeer::new();
    let err = client
        .negotiate(AudioFeed::MeetingAudio, Box::new(peer))
        .await
        .unwrap_err();
    assert!(err.is_no_upstream());

    let (peer, _tracks) = RecvOnlyPeer::new();
    client.negotiate(AudioFeed::ServerAudio, Box::new(peer)).await?;

    assert_eq!(client.state(AudioFeed::MeetingAudio), NegotiationState::Failed);
    assert_eq!(client.state(AudioFeed::ServerAudio), NegotiationState::Connected);
    assert_eq!(endpoint.offers.lock().len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_unreachable_endpoint_fails_without_retry() -> anyhow::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let url = format!("http://{}", listener.local_addr()?);
    drop(listener);

    let client = booted_client(url)?;
    let (peer, _tracks) = RecvOnlyPeer::new();
    let err = client
        .negotiate(AudioFeed::MeetingAudio, Box::new(peer))
        .await
        .unwrap_err();

    assert!(matches!(err, SignalingError::Http(_)));
    assert_eq!(client.state(AudioFeed::MeetingAudio), NegotiationState::Failed);
    assert_eq!(client.device().graph().active_kind(), Some(SourceKind::Tone));
    Ok(())
}

#[tokio::test]
async fn test_unreadable_answer_is_a_transport_error() -> anyhow::Result<()> {
    let endpoint = endpoint(Some((StatusCode::OK, "<html>gateway login</html>")));
    let client = booted_client(start_endpoint(endpoint.clone()).await?)?;
    let mut device_events = client.device().receiver();

    let (peer, tracks) = RecvOnlyPeer::new();
    let err = client
        .negotiate(AudioFeed::MeetingAudio, Box::new(peer))
        .await
        .unwrap_err();

    assert!(matches!(err, SignalingError::Transport { .. }), "got {:?}", err);
    assert_eq!(client.state(AudioFeed::MeetingAudio), NegotiationState::Failed);
    assert_eq!(client.device().graph().active_kind(), Some(SourceKind::Tone));
    assert!(tracks.is_closed());

    let notices = notices(&mut device_events);
    assert_eq!(notices.len(), 1);
    assert!(notices[0].starts_with("No upstream audio yet (or error): Transport error:"));
    Ok(())
}
