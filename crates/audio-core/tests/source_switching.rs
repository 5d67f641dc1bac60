//! Source switching integration tests

use botmic_audio_core::{
    MediaTrack, SourceKind, VirtualAudioConfig, VirtualAudioDevice, VirtualAudioEvent,
    VirtualSource, events::drain_events, graph::SILENCE_LABEL,
};
use tokio::time::{Duration, sleep};

fn device() -> VirtualAudioDevice {
    VirtualAudioDevice::new(VirtualAudioConfig::default()).unwrap()
}

#[tokio::test]
async fn test_stale_bridge_end_after_switch_is_ignored() {
    let device = device();
    let mut events = device.receiver();
    let (upstream, producer) = MediaTrack::remote("meeting audio", 48_000);

    device.bridge_stream(upstream).unwrap();
    let tone = device.graph().activate_default().unwrap();
    let generation = device.graph().generation();

    producer.finish();

    assert_eq!(device.graph().generation(), generation);
    assert_eq!(device.graph().active_kind(), Some(SourceKind::Tone));
    assert!(device.graph().current_track().unwrap().same_track(&tone));
    assert!(tone.is_live());
    assert!(
        !drain_events(&mut events)
            .iter()
            .any(|e| matches!(e, VirtualAudioEvent::SourceFallback { .. }))
    );
}

#[tokio::test]
async fn test_upstream_end_falls_back_to_tone() {
    let device = device();
    let mut events = device.receiver();
    let (upstream, producer) = MediaTrack::remote("meeting audio", 48_000);

    let bridged = device.bridge_stream(upstream).unwrap();
    assert_eq!(bridged.label(), "Virtual Microphone (Bridged)");
    let caller = device.graph().clone_for_capture().unwrap();

    producer.finish();

    assert_eq!(device.graph().active_kind(), Some(SourceKind::Tone));
    assert!(!bridged.is_live());
    // clones handed out earlier keep hearing the shared bus
    assert!(caller.is_live());
    let frame = caller.read_frame(960).unwrap();
    assert!(frame.samples.iter().any(|s| s.abs() > 1e-4));

    let fallbacks = drain_events(&mut events)
        .into_iter()
        .filter(|e| matches!(e, VirtualAudioEvent::SourceFallback { from: SourceKind::Bridge, .. }))
        .count();
    assert_eq!(fallbacks, 1);
}

#[tokio::test(start_paused = true)]
async fn test_bridged_audio_reaches_capture_clones() {
    let device = device();
    let (upstream, producer) = MediaTrack::remote("meeting audio", 48_000);
    producer.push_samples(&vec![0.5f32; 4_800]).unwrap();

    device.bridge_stream(upstream).unwrap();
    let first = device.graph().clone_for_capture().unwrap();
    let second = device.graph().clone_for_capture().unwrap();

    let heard = first.read_frame(480).unwrap();
    assert!(heard.samples.iter().all(|s| (s - 0.5).abs() < 1e-6));

    // a second reader over the same clock range hears the same audio
    let echoed = second.read_frame(480).unwrap();
    assert_eq!(echoed.timestamp, heard.timestamp);
    assert_eq!(echoed.samples, heard.samples);
}

#[tokio::test]
async fn test_switch_stops_previous_track_and_keeps_clones() {
    let device = device();
    let original = device.boot().unwrap();
    let first = device.graph().clone_for_capture().unwrap();
    let second = device.graph().clone_for_capture().unwrap();

    first.stop();
    assert!(second.is_live());
    assert!(original.is_live());

    let silence = device.graph().activate(VirtualSource::Silence, SILENCE_LABEL).unwrap();
    assert!(!original.is_live());
    assert_ne!(silence.id(), original.id());
    assert!(second.is_live());
    assert!(second.read_frame(480).unwrap().samples.iter().all(|s| *s == 0.0));
}

#[tokio::test(start_paused = true)]
async fn test_playback_preempts_bridge_and_restores_it() {
    let device = device();
    let (upstream, _producer) = MediaTrack::remote("meeting audio", 48_000);
    device.bridge_stream(upstream.clone()).unwrap();

    device.play_pcm(vec![0.1f32; 960], 48_000, 1).unwrap();
    assert_eq!(device.graph().active_kind(), Some(SourceKind::Queue));

    sleep(Duration::from_secs(3)).await;
    match device.graph().active_source() {
        Some(VirtualSource::Bridge { upstream: restored }) => {
            assert!(restored.same_track(&upstream))
        }
        other => panic!("expected the bridge back, got {:?}", other),
    }
    assert_eq!(upstream.observer_count(), 1);
}

#[tokio::test]
async fn test_failed_bridge_keeps_current_source() {
    let device = device();
    device.boot().unwrap();
    let generation = device.graph().generation();

    let (ended, producer) = MediaTrack::remote("meeting audio", 48_000);
    producer.finish();
    assert!(device.bridge_stream(ended).is_err());

    assert_eq!(device.graph().generation(), generation);
    assert_eq!(device.graph().active_kind(), Some(SourceKind::Tone));
}

#[tokio::test(start_paused = true)]
async fn test_bridge_mid_playback_keeps_later_chunks_audible() {
    let device = device();
    let mut events = device.receiver();
    device.play_pcm(vec![0.1f32; 960], 48_000, 1).unwrap();

    sleep(Duration::from_millis(10)).await;
    let (upstream, _producer) = MediaTrack::remote("meeting audio", 48_000);
    device.bridge_stream(upstream.clone()).unwrap();
    assert_eq!(device.graph().active_kind(), Some(SourceKind::Queue));

    for _ in 0..50 {
        device.play_pcm(vec![0.7f32; 960], 48_000, 1).unwrap();
        sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(device.graph().active_kind(), Some(SourceKind::Queue));

    let scheduled = device.scheduler().scheduled();
    let last = scheduled.last().unwrap();
    assert_eq!(last.sequence, 51);
    let end = last.end();
    let context = device.graph().context().unwrap();
    let rendered = context.render(end - 0.5, 24_000);
    let audible = rendered.iter().filter(|s| (**s - 0.7).abs() < 1e-6).count();
    assert!(audible > 23_000, "only {} of 24000 samples audible", audible);

    assert!(drain_events(&mut events).iter().any(|e| matches!(
        e,
        VirtualAudioEvent::SourceDeferred { kind: SourceKind::Bridge, .. }
    )));

    // the bridge takes over once the grace window closes
    sleep(Duration::from_secs(3)).await;
    assert!(!device.graph().playback_engaged());
    match device.graph().active_source() {
        Some(VirtualSource::Bridge { upstream: wired }) => assert!(wired.same_track(&upstream)),
        other => panic!("expected the bridge, got {:?}", other),
    }
}
