//! # Botmic Signaling Core
//!
//! Receive-only offer/answer signaling for the bot's virtual microphone.
//!
//! A [`SignalingClient`] posts a receive-only audio offer as `{sdp, type}`
//! JSON to the streamer, applies the answer, and hands the first inbound
//! audio track to the [`VirtualAudioDevice`](botmic_audio_core::VirtualAudioDevice)
//! as its bridged source. Two feeds are negotiated independently:
//!
//! - **Meeting audio** (`/offer_meeting_audio`): becomes the microphone
//! - **Server audio** (`/offer`): surfaced as a remote track only
//!
//! A failed negotiation shows a notice and leaves the microphone on its
//! current source. Retrying is left to the caller.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use botmic_audio_core::{VirtualAudioConfig, VirtualAudioDevice};
//! use botmic_signaling_core::{
//!     RecvOnlyPeer, SignalingClient, SignalingConfig, spawn_startup_negotiation,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let device = VirtualAudioDevice::new(VirtualAudioConfig::default())?;
//!     device.boot()?;
//!
//!     let client = SignalingClient::new(SignalingConfig::from_env()?, device)?;
//!     let (peer, _tracks) = RecvOnlyPeer::new();
//!     let session = spawn_startup_negotiation(client, Box::new(peer))?.await??;
//!     println!("connected: {}", session.id());
//!     Ok(())
//! }
//! ```
//!
//! The `botmic` binary does the same with logging and every setting taken
//! from the environment.

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod peer;
pub mod sdp;
pub mod transport;
pub mod types;

pub use client::{
    NEGOTIATION_FAILED_NOTICE, SignalingClient, SignalingSession, spawn_startup_negotiation,
};
pub use config::SignalingConfig;
pub use error::{SignalingError, SignalingResult};
pub use events::SignalingEvent;
pub use peer::{PeerConnection, RecvOnlyPeer, RemoteTrackSender};
pub use sdp::{MediaSection, parse_media_sections, recvonly_audio_offer};
pub use transport::{HttpSignalingTransport, SignalingTransport};
pub use types::{
    AudioFeed, NegotiationState, SdpType, SessionDescription, SessionId, TransceiverDirection,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
