//! Meeting bot microphone
//!
//! Boots the virtual microphone, negotiates meeting audio after the startup
//! delay and keeps running until interrupted. Every setting comes from
//! `BOTMIC_*` environment variables.

use botmic_audio_core::{LoggingConfig, VirtualAudioConfig, VirtualAudioDevice, setup_logging};
use botmic_signaling_core::{
    RecvOnlyPeer, SignalingClient, SignalingConfig, spawn_startup_negotiation,
};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_logging(&LoggingConfig::from_env()?)?;

    let device = VirtualAudioDevice::new(VirtualAudioConfig::from_env()?)?;
    if device.boot().is_err() {
        warn!("Continuing without audio; capture requests pass through untouched");
    }

    let client = SignalingClient::new(SignalingConfig::from_env()?, device)?;
    let (peer, _tracks) = RecvOnlyPeer::new();
    let session = match spawn_startup_negotiation(client, Box::new(peer))?.await? {
        Ok(session) => Some(session),
        Err(e) => {
            warn!("Meeting audio not bridged: {}", e);
            None
        }
    };

    tokio::signal::ctrl_c().await?;
    info!("Interrupted, shutting down");
    if let Some(session) = session {
        session.close();
    }
    Ok(())
}
