// Integration tests for the voice session state machine
//
// Devices and the live link are test doubles (tests/common) that count every
// acquisition and release.

mod common;

use common::{speech_chunk, wait_until, Counters, Harness, LinkBehavior};
use std::time::Duration;
use voice_live::audio::{decode_blob, AudioFrame};
use voice_live::session::ServerEvent;
use voice_live::{Role, SessionError, SessionState, TranscriptLog};

#[tokio::test]
async fn test_missing_credential_fails_before_any_device() {
    let mut h = Harness::builder().api_key(None).build();

    let result = h.session.connect().await;

    assert!(matches!(result, Err(SessionError::MissingCredential)));
    assert_eq!(h.drain_states(), vec![SessionState::Error]);
    assert_eq!(h.session.state(), SessionState::Error);
    assert!(h.counters.untouched(), "no device or network call expected");
}

#[tokio::test]
async fn test_blank_credential_counts_as_missing() {
    let mut h = Harness::builder().api_key(Some("  ")).build();

    assert!(matches!(
        h.session.connect().await,
        Err(SessionError::MissingCredential)
    ));
    assert_eq!(h.drain_states(), vec![SessionState::Error]);
    assert!(h.counters.untouched());
}

#[tokio::test]
async fn test_connect_then_disconnect_releases_everything() {
    let mut h = Harness::builder().build();

    h.session.connect().await.unwrap();
    assert_eq!(
        h.drain_states(),
        vec![SessionState::Connecting, SessionState::Connected]
    );
    assert_eq!(Counters::get(&h.counters.outputs_opened), 1);
    assert_eq!(Counters::get(&h.counters.captures_started), 1);
    assert_eq!(Counters::get(&h.counters.links_opened), 1);

    let remote = h.connector.take_remote().unwrap();
    assert_eq!(remote.api_key, "test-key");
    assert_eq!(remote.setup.voice, "Kore");
    assert!(remote.setup.transcription);

    h.session.disconnect().await;

    assert_eq!(h.drain_states(), vec![SessionState::Disconnected]);
    assert!(h.fully_released());
}

#[tokio::test]
async fn test_double_disconnect_is_idempotent() {
    let mut h = Harness::builder().build();
    h.session.connect().await.unwrap();

    h.session.disconnect().await;
    h.session.disconnect().await;

    assert_eq!(
        h.drain_states(),
        vec![
            SessionState::Connecting,
            SessionState::Connected,
            SessionState::Disconnected,
            SessionState::Disconnected,
        ]
    );
    assert_eq!(Counters::get(&h.counters.links_closed), 1);
    assert_eq!(Counters::get(&h.counters.captures_stopped), 1);
    assert!(h.fully_released());
}

#[tokio::test]
async fn test_disconnect_when_never_connected() {
    let mut h = Harness::builder().build();

    h.session.disconnect().await;

    assert_eq!(h.drain_states(), vec![SessionState::Disconnected]);
    assert!(h.counters.untouched());
}

#[tokio::test]
async fn test_disconnect_from_error_state() {
    let mut h = Harness::builder().api_key(None).build();
    let _ = h.session.connect().await;

    h.session.disconnect().await;

    assert_eq!(
        h.drain_states(),
        vec![SessionState::Error, SessionState::Disconnected]
    );
    assert_eq!(h.session.state(), SessionState::Disconnected);
}

#[tokio::test]
async fn test_second_connect_is_rejected() {
    let mut h = Harness::builder().build();
    h.session.connect().await.unwrap();
    h.drain_states();

    let result = h.session.connect().await;

    assert!(matches!(result, Err(SessionError::AlreadyActive)));
    assert!(h.drain_states().is_empty());
    assert_eq!(Counters::get(&h.counters.outputs_opened), 1);
    assert_eq!(Counters::get(&h.counters.connect_calls), 1);

    h.session.disconnect().await;
}

#[tokio::test]
async fn test_microphone_failure_releases_output() {
    let mut h = Harness::builder().fail_capture().build();

    let result = h.session.connect().await;

    assert!(matches!(result, Err(SessionError::Device(_))));
    assert_eq!(
        h.drain_states(),
        vec![
            SessionState::Connecting,
            SessionState::Error,
            SessionState::Disconnected
        ]
    );
    assert_eq!(Counters::get(&h.counters.outputs_opened), 1);
    assert_eq!(Counters::get(&h.counters.connect_calls), 0);
    assert!(h.fully_released());
    assert!(h.session.last_error().unwrap().contains("permission denied"));
}

#[tokio::test]
async fn test_output_failure_acquires_nothing_else() {
    let mut h = Harness::builder().fail_output().build();

    assert!(matches!(
        h.session.connect().await,
        Err(SessionError::Device(_))
    ));
    assert_eq!(h.drain_states().last(), Some(&SessionState::Disconnected));
    assert_eq!(Counters::get(&h.counters.captures_opened), 0);
}

#[tokio::test]
async fn test_refused_link_tears_down_devices() {
    let mut h = Harness::builder().link(LinkBehavior::Refuse).build();

    let result = h.session.connect().await;

    assert!(matches!(result, Err(SessionError::Transport(_))));
    assert_eq!(
        h.drain_states(),
        vec![
            SessionState::Connecting,
            SessionState::Error,
            SessionState::Disconnected
        ]
    );
    assert_eq!(Counters::get(&h.counters.captures_stopped), 1);
    assert!(h.fully_released());
}

#[tokio::test]
async fn test_disconnect_mid_connect_cancels() {
    let mut h = Harness::builder().link(LinkBehavior::Hang).build();

    let connecting = {
        let session = h.session.clone();
        tokio::spawn(async move { session.connect().await })
    };

    let counters = h.counters.clone();
    assert!(wait_until(|| Counters::get(&counters.connect_calls) == 1).await);
    assert_eq!(h.session.state(), SessionState::Connecting);

    h.session.disconnect().await;
    let result = connecting.await.unwrap();

    assert!(matches!(result, Err(SessionError::Cancelled)));
    assert_eq!(
        h.drain_states(),
        vec![SessionState::Connecting, SessionState::Disconnected]
    );
    assert_eq!(Counters::get(&h.counters.captures_stopped), 1);
    assert!(h.fully_released());

    // The session is usable again
    assert!(h.session.state() == SessionState::Disconnected);
}

#[tokio::test]
async fn test_toggle_connects_and_disconnects() {
    let mut h = Harness::builder().build();

    h.session.toggle_connection().await.unwrap();
    assert_eq!(h.session.state(), SessionState::Connected);

    h.session.toggle_connection().await.unwrap();
    assert_eq!(h.session.state(), SessionState::Disconnected);

    assert_eq!(
        h.drain_states(),
        vec![
            SessionState::Connecting,
            SessionState::Connected,
            SessionState::Disconnected
        ]
    );
    assert!(h.fully_released());
}

#[tokio::test]
async fn test_toggle_after_failure_reconnects() {
    let mut h = Harness::builder().link(LinkBehavior::Refuse).build();
    let _ = h.session.connect().await;
    assert_eq!(h.session.state(), SessionState::Disconnected);
    assert!(h.session.last_error().is_some());

    let _ = h.session.toggle_connection().await;

    assert_eq!(Counters::get(&h.counters.connect_calls), 2);
    assert_eq!(h.drain_states().len(), 6);
}

#[tokio::test]
async fn test_microphone_frames_reach_the_link() {
    let h = Harness::builder().build();
    h.session.connect().await.unwrap();
    let mut remote = h.connector.take_remote().unwrap();

    let microphone = h.devices.microphone().unwrap();
    microphone
        .send(AudioFrame {
            samples: vec![0.5; 4096],
            sample_rate: 16000,
            timestamp_ms: 0,
            sequence: 0,
        })
        .await
        .unwrap();

    let blob = remote.audio.recv().await.unwrap();
    assert_eq!(blob.mime_type, "audio/pcm;rate=16000");
    let decoded = decode_blob(&blob, 16000).unwrap();
    assert_eq!(decoded.frame_count(), 4096);

    // 0.5 * gain 5.0
    assert!(wait_until(|| (*h.events.level.borrow() - 2.5).abs() < 1e-3).await);

    h.session.disconnect().await;
    assert!(h.fully_released());
}

fn mic_frame(value: f32, sequence: u64) -> AudioFrame {
    AudioFrame {
        samples: vec![value; 4096],
        sample_rate: 16000,
        timestamp_ms: sequence * 256,
        sequence,
    }
}

#[tokio::test]
async fn test_audio_captured_during_handshake_is_discarded() {
    let h = Harness::builder()
        .link(LinkBehavior::SlowOpen(Duration::from_millis(200)))
        .build();

    let connecting = {
        let session = h.session.clone();
        tokio::spawn(async move { session.connect().await })
    };

    // The microphone runs while the link is still opening
    let devices = h.devices.clone();
    assert!(wait_until(|| devices.microphone().is_some()).await);
    let microphone = h.devices.microphone().unwrap();
    for sequence in 0..5 {
        microphone.send(mic_frame(0.1, sequence)).await.unwrap();
    }
    assert_eq!(h.session.state(), SessionState::Connecting);

    connecting.await.unwrap().unwrap();
    let mut remote = h.connector.take_remote().unwrap();

    microphone.send(mic_frame(0.5, 5)).await.unwrap();

    let blob = tokio::time::timeout(Duration::from_secs(1), remote.audio.recv())
        .await
        .unwrap()
        .unwrap();
    let decoded = decode_blob(&blob, 16000).unwrap();
    assert!((decoded.samples[0] - 0.5).abs() < 1e-3, "stale frame was sent");
    assert!(remote.audio.try_recv().is_err());

    let stats = h.session.get_stats().await;
    assert_eq!(stats.frames_sent, 1);
    assert_eq!(stats.frames_dropped, 5);

    h.session.disconnect().await;
    assert!(h.fully_released());
}

#[tokio::test]
async fn test_disconnect_during_capture_start_stops_capture() {
    let mut h = Harness::builder().hang_capture_start().build();

    let connecting = {
        let session = h.session.clone();
        tokio::spawn(async move { session.connect().await })
    };

    let counters = h.counters.clone();
    assert!(wait_until(|| Counters::get(&counters.captures_opened) == 1).await);

    h.session.disconnect().await;
    let result = connecting.await.unwrap();

    assert!(matches!(result, Err(SessionError::Cancelled)));
    assert_eq!(Counters::get(&h.counters.capture_stop_calls), 1);
    assert_eq!(Counters::get(&h.counters.connect_calls), 0);
    assert!(h.devices.all_sinks_closed());
    assert_eq!(
        h.drain_states(),
        vec![SessionState::Connecting, SessionState::Disconnected]
    );
}

#[tokio::test]
async fn test_inbound_audio_is_scheduled_back_to_back() {
    let h = Harness::builder().build();
    h.session.connect().await.unwrap();
    let remote = h.connector.take_remote().unwrap();

    remote
        .events
        .send(ServerEvent::AudioChunk(speech_chunk(0.5)))
        .await
        .unwrap();
    remote
        .events
        .send(ServerEvent::AudioChunk(speech_chunk(0.5)))
        .await
        .unwrap();

    let log = h.devices.sink_logs()[0].clone();
    assert!(wait_until(|| log.scheduled().len() == 2).await);

    let scheduled = log.scheduled();
    assert_eq!(scheduled[0].start_at, 0.0);
    assert!((scheduled[1].start_at - 0.5).abs() < 1e-9);

    let stats = h.session.get_stats().await;
    assert_eq!(stats.active_units, 2);

    h.session.disconnect().await;
    assert!(log.is_closed());
}

#[tokio::test]
async fn test_interruption_stops_queued_speech() {
    let h = Harness::builder().build();
    h.session.connect().await.unwrap();
    let remote = h.connector.take_remote().unwrap();
    let log = h.devices.sink_logs()[0].clone();

    for _ in 0..3 {
        remote
            .events
            .send(ServerEvent::AudioChunk(speech_chunk(0.5)))
            .await
            .unwrap();
    }
    assert!(wait_until(|| log.scheduled().len() == 3).await);

    h.devices.clock.set(0.2);
    remote.events.send(ServerEvent::Interrupted).await.unwrap();
    assert!(wait_until(|| log.stopped().len() == 3).await);

    // New speech starts at the interruption time, not after the old queue
    remote
        .events
        .send(ServerEvent::AudioChunk(speech_chunk(0.5)))
        .await
        .unwrap();
    assert!(wait_until(|| log.scheduled().len() == 4).await);
    assert!((log.scheduled()[3].start_at - 0.2).abs() < 1e-9);

    h.session.disconnect().await;
}

#[tokio::test]
async fn test_bad_chunk_is_skipped_without_state_change() {
    let mut h = Harness::builder().build();
    h.session.connect().await.unwrap();
    h.drain_states();
    let remote = h.connector.take_remote().unwrap();

    let mut bad = speech_chunk(0.1);
    bad.data = "AAEC".to_string();
    remote.events.send(ServerEvent::AudioChunk(bad)).await.unwrap();
    remote
        .events
        .send(ServerEvent::AudioChunk(speech_chunk(0.1)))
        .await
        .unwrap();

    let log = h.devices.sink_logs()[0].clone();
    assert!(wait_until(|| log.scheduled().len() == 1).await);

    let stats = h.session.get_stats().await;
    assert_eq!(stats.chunks_dropped, 1);
    assert_eq!(h.session.state(), SessionState::Connected);
    assert!(h.drain_states().is_empty());

    h.session.disconnect().await;
}

#[tokio::test]
async fn test_transcripts_flow_and_finalize() {
    let mut h = Harness::builder().build();
    h.session.connect().await.unwrap();
    let remote = h.connector.take_remote().unwrap();

    let events = [
        ServerEvent::Transcript {
            role: Role::User,
            text: "What's".to_string(),
            partial: true,
        },
        ServerEvent::Transcript {
            role: Role::User,
            text: " up?".to_string(),
            partial: true,
        },
        ServerEvent::Transcript {
            role: Role::Model,
            text: "Not".to_string(),
            partial: true,
        },
        ServerEvent::Transcript {
            role: Role::Model,
            text: " much.".to_string(),
            partial: true,
        },
        ServerEvent::TurnComplete,
    ];
    for event in events {
        remote.events.send(event).await.unwrap();
    }

    let mut log = TranscriptLog::new();
    let mut fragments = 0;
    while fragments < 5 {
        let fragment = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            h.events.transcript.recv(),
        )
        .await
        .unwrap()
        .unwrap();
        log.apply(fragment);
        fragments += 1;
    }

    let messages = log.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[0].text, "What's up?");
    assert!(messages[0].is_partial);
    assert_eq!(messages[1].role, Role::Model);
    assert_eq!(messages[1].text, "Not much.");
    assert!(!messages[1].is_partial);

    h.session.disconnect().await;
}

#[tokio::test]
async fn test_remote_error_runs_full_teardown() {
    let mut h = Harness::builder().build();
    h.session.connect().await.unwrap();
    let remote = h.connector.take_remote().unwrap();

    remote
        .events
        .send(ServerEvent::Error("Internal error".to_string()))
        .await
        .unwrap();

    let session = h.session.clone();
    assert!(wait_until(|| session.state() == SessionState::Disconnected).await);

    assert_eq!(
        h.drain_states(),
        vec![
            SessionState::Connecting,
            SessionState::Connected,
            SessionState::Error,
            SessionState::Disconnected
        ]
    );
    assert!(h.fully_released());
    assert_eq!(h.session.last_error().as_deref(), Some("Internal error"));
}

#[tokio::test]
async fn test_remote_close_disconnects_without_error() {
    let mut h = Harness::builder().build();
    h.session.connect().await.unwrap();
    let remote = h.connector.take_remote().unwrap();

    remote.events.send(ServerEvent::Closed(None)).await.unwrap();

    let session = h.session.clone();
    assert!(wait_until(|| session.state() == SessionState::Disconnected).await);
    assert!(!h.drain_states().contains(&SessionState::Error));
    assert!(h.fully_released());
    assert!(h.session.last_error().is_none());

    // A later disconnect finds nothing left to release
    h.session.disconnect().await;
    assert_eq!(Counters::get(&h.counters.links_closed), 1);
}
