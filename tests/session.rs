//! Session lifecycle integration tests

mod common;

use common::{FakeCapture, FakePlayback, FakeTransport, controller, speech_chunk};
use live_voice::protocol::{ClientMessage, InboundEvent};
use live_voice::{Command, Notice, SessionStatus};
use tokio::sync::mpsc;

use SessionStatus::{Connecting, Idle, Listening, Speaking};

fn fakes() -> (FakeCapture, FakeTransport, FakePlayback) {
    (
        FakeCapture::default(),
        FakeTransport::default(),
        FakePlayback::default(),
    )
}

#[tokio::test]
async fn test_full_conversation_turn() {
    let (capture, transport, playback) = fakes();
    let mut session = controller(&capture, &transport, &playback);

    session.start().await;
    assert_eq!(session.status(), Listening);
    assert!(session.is_connected());
    assert_eq!(transport.opened(), 1);

    // microphone audio goes out as realtime input
    capture.emit(vec![0.25; 4096]);
    session.drain_events();
    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    let ClientMessage::RealtimeInput(input) = &sent[0] else {
        panic!("expected realtime input, got {:?}", sent[0]);
    };
    assert_eq!(input.media.mime_type, "audio/pcm;rate=16000");

    // assistant speech plays and the session reports speaking
    transport.deliver_audio(&speech_chunk());
    session.drain_events();
    assert_eq!(session.status(), Speaking);
    assert_eq!(session.in_flight(), 1);

    let (id, at) = playback.started()[0];
    assert!(at.abs() < f64::EPSILON);
    playback.finish(id);
    session.drain_events();
    assert_eq!(session.status(), Listening);
    assert_eq!(session.in_flight(), 0);

    session.stop();
    assert_eq!(session.status(), Idle);
    assert_eq!(capture.released(), 1);
    assert_eq!(transport.closed(), 1);
    assert_eq!(playback.released(), 1);

    assert_eq!(
        session.observer().statuses,
        vec![Connecting, Listening, Speaking, Listening, Idle]
    );
    assert!(session.observer().notices.is_empty());
}

#[tokio::test]
async fn test_burst_plays_back_to_back() {
    let (capture, transport, playback) = fakes();
    let mut session = controller(&capture, &transport, &playback);
    session.start().await;

    playback.set_now(1.0);
    for _ in 0..3 {
        transport.deliver_audio(&speech_chunk());
    }
    session.drain_events();

    let starts: Vec<f64> = playback.started().iter().map(|(_, at)| *at).collect();
    assert_eq!(starts.len(), 3);
    assert!((starts[0] - 1.0).abs() < 1e-9);
    assert!((starts[1] - 1.1).abs() < 1e-9);
    assert!((starts[2] - 1.2).abs() < 1e-9);
    assert!((session.cursor() - 1.3).abs() < 1e-9);

    // still speaking until the last buffer ends
    let ids: Vec<_> = playback.started().iter().map(|(id, _)| *id).collect();
    playback.finish(ids[0]);
    playback.finish(ids[1]);
    session.drain_events();
    assert_eq!(session.status(), Speaking);

    playback.finish(ids[2]);
    session.drain_events();
    assert_eq!(session.status(), Listening);
}

#[tokio::test]
async fn test_permission_denied_never_connects() {
    let capture = FakeCapture::denying();
    let transport = FakeTransport::default();
    let playback = FakePlayback::default();
    let mut session = controller(&capture, &transport, &playback);

    session.start().await;

    assert_eq!(session.status(), Idle);
    assert_eq!(session.observer().statuses, vec![Connecting, Idle]);
    assert_eq!(transport.opened(), 0);
    assert_eq!(playback.opened(), 0);

    let notices = &session.observer().notices;
    assert_eq!(notices.len(), 1);
    assert!(matches!(notices[0], Notice::StartFailed { .. }));
    assert_eq!(
        notices[0].message(),
        "Failed to start voice chat. Check microphone permissions."
    );
}

#[tokio::test]
async fn test_connection_failure_releases_devices() {
    let capture = FakeCapture::default();
    let transport = FakeTransport::failing("relay unreachable");
    let playback = FakePlayback::default();
    let mut session = controller(&capture, &transport, &playback);

    session.start().await;

    assert_eq!(session.status(), Idle);
    assert_eq!(capture.acquired(), 1);
    assert_eq!(capture.released(), 1);
    assert_eq!(playback.released(), 1);
    assert_eq!(session.observer().notices.len(), 1);
    assert!(!session.is_connected());
}

#[tokio::test]
async fn test_barge_in_silences_queued_speech() {
    let (capture, transport, playback) = fakes();
    let mut session = controller(&capture, &transport, &playback);
    session.start().await;

    transport.deliver_audio(&speech_chunk());
    transport.deliver_audio(&speech_chunk());
    session.drain_events();
    assert_eq!(session.in_flight(), 2);
    assert_eq!(session.status(), Speaking);

    transport.deliver(InboundEvent::Interrupted);
    session.drain_events();

    assert_eq!(session.status(), Listening);
    assert_eq!(session.in_flight(), 0);
    assert!(session.cursor().abs() < f64::EPSILON);

    let started: Vec<_> = playback.started().iter().map(|(id, _)| *id).collect();
    assert_eq!(playback.stopped(), started);

    // a late end notification for a stopped buffer changes nothing
    playback.finish(started[0]);
    session.drain_events();
    assert_eq!(session.status(), Listening);
    assert_eq!(
        session.observer().statuses,
        vec![Connecting, Listening, Speaking, Listening]
    );
}

#[tokio::test]
async fn test_speech_after_barge_in_starts_now() {
    let (capture, transport, playback) = fakes();
    let mut session = controller(&capture, &transport, &playback);
    session.start().await;

    transport.deliver_audio(&speech_chunk());
    transport.deliver(InboundEvent::Interrupted);
    session.drain_events();

    playback.set_now(4.0);
    transport.deliver_audio(&speech_chunk());
    session.drain_events();

    let (_, at) = *playback.started().last().unwrap();
    assert!((at - 4.0).abs() < 1e-9);
    assert_eq!(session.status(), Speaking);
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let (capture, transport, playback) = fakes();
    let mut session = controller(&capture, &transport, &playback);

    // nothing to tear down yet
    session.stop();
    assert!(session.observer().statuses.is_empty());

    session.start().await;
    session.stop();
    session.stop();

    assert_eq!(session.status(), Idle);
    assert_eq!(capture.released(), 1);
    assert_eq!(transport.closed(), 1);
    assert_eq!(playback.released(), 1);
    assert_eq!(session.observer().statuses, vec![Connecting, Listening, Idle]);
}

#[test]
fn test_dropping_controller_ends_session() {
    let (capture, transport, playback) = fakes();
    let mut session = controller(&capture, &transport, &playback);

    tokio_test::block_on(session.start());
    assert_eq!(session.status(), Listening);

    drop(session);
    assert_eq!(capture.released(), 1);
    assert_eq!(transport.closed(), 1);
    assert_eq!(playback.released(), 1);
}

#[tokio::test]
async fn test_second_start_is_ignored() {
    let (capture, transport, playback) = fakes();
    let mut session = controller(&capture, &transport, &playback);

    session.start().await;
    session.start().await;

    assert_eq!(capture.acquired(), 1);
    assert_eq!(transport.opened(), 1);
    assert_eq!(session.status(), Listening);
}

#[tokio::test]
async fn test_undecodable_audio_is_skipped() {
    let (capture, transport, playback) = fakes();
    let mut session = controller(&capture, &transport, &playback);
    session.start().await;

    transport.deliver(InboundEvent::Audio {
        data: "not*base64".to_string(),
    });
    transport.deliver(InboundEvent::Audio {
        data: String::new(),
    });
    session.drain_events();
    assert_eq!(session.status(), Listening);
    assert!(playback.started().is_empty());

    transport.deliver_audio(&speech_chunk());
    session.drain_events();
    assert_eq!(session.status(), Speaking);
    assert!(session.observer().notices.is_empty());
}

#[tokio::test]
async fn test_remote_close_tears_down_once() {
    let (capture, transport, playback) = fakes();
    let mut session = controller(&capture, &transport, &playback);
    session.start().await;
    transport.deliver_audio(&speech_chunk());

    transport.remote_error("upstream went away");
    transport.remote_close();
    session.drain_events();

    assert_eq!(session.status(), Idle);
    assert_eq!(capture.released(), 1);
    assert_eq!(playback.released(), 1);
    assert_eq!(session.in_flight(), 0);

    let notices = &session.observer().notices;
    assert_eq!(notices.len(), 1);
    assert_eq!(
        notices[0],
        Notice::ConnectionLost {
            reason: "connection error: upstream went away".to_string()
        }
    );
}

#[tokio::test]
async fn test_relay_error_message_ends_session() {
    let (capture, transport, playback) = fakes();
    let mut session = controller(&capture, &transport, &playback);
    session.start().await;

    transport.deliver(InboundEvent::Error {
        message: "quota exceeded".to_string(),
    });
    session.drain_events();

    assert_eq!(session.status(), Idle);
    assert_eq!(session.observer().notices.len(), 1);
    assert_eq!(
        session.observer().notices[0].message(),
        "Voice chat connection error. Please try again."
    );
    assert_eq!(
        session.observer().notices[0].reason(),
        "remote error: quota exceeded"
    );
}

#[tokio::test]
async fn test_frames_after_stop_are_not_sent() {
    let (capture, transport, playback) = fakes();
    let mut session = controller(&capture, &transport, &playback);
    session.start().await;

    capture.emit(vec![0.1; 4096]);
    session.stop();
    session.drain_events();

    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn test_stale_events_do_not_reach_next_session() {
    let (capture, transport, playback) = fakes();
    let mut session = controller(&capture, &transport, &playback);
    session.start().await;

    // queued by the first session, handled after the second has started
    transport.deliver_audio(&speech_chunk());
    transport.deliver(InboundEvent::Interrupted);
    session.stop();
    session.start().await;
    session.drain_events();

    assert_eq!(session.status(), Listening);
    assert_eq!(session.in_flight(), 0);
    assert!(playback.started().is_empty());
    assert_eq!(transport.opened(), 2);
}

#[tokio::test]
async fn test_stop_during_pending_start_releases_capture() {
    let capture = FakeCapture::default();
    let (transport, _gate) = FakeTransport::gated();
    let playback = FakePlayback::default();
    let mut session = controller(&capture, &transport, &playback);

    let (commands, rx) = mpsc::unbounded_channel();
    commands.send(Command::Start).unwrap();

    let driver = async {
        // wait until the start is parked on the relay handshake
        while transport.opened() == 0 {
            tokio::task::yield_now().await;
        }
        commands.send(Command::Stop).unwrap();
        drop(commands);
    };

    tokio::join!(session.run(rx), driver);

    assert_eq!(session.status(), Idle);
    assert_eq!(capture.acquired(), 1);
    assert_eq!(capture.released(), 1);
    assert_eq!(playback.released(), 1);
    assert_eq!(transport.closed(), 0);
    assert_eq!(session.observer().statuses, vec![Connecting, Idle]);
    assert!(session.observer().notices.is_empty());
}

#[tokio::test]
async fn test_toggle_starts_and_stops() {
    let (capture, transport, playback) = fakes();
    let mut session = controller(&capture, &transport, &playback);

    let (commands, rx) = mpsc::unbounded_channel();
    commands.send(Command::Toggle).unwrap();
    commands.send(Command::Toggle).unwrap();
    drop(commands);

    session.run(rx).await;

    assert_eq!(session.observer().statuses, vec![Connecting, Listening, Idle]);
    assert_eq!(capture.released(), 1);
    assert_eq!(transport.closed(), 1);
}

#[tokio::test]
async fn test_queued_stop_waits_for_ready_start() {
    let (capture, transport, playback) = fakes();
    let mut session = controller(&capture, &transport, &playback);

    let (commands, rx) = mpsc::unbounded_channel();
    commands.send(Command::Start).unwrap();
    commands.send(Command::Stop).unwrap();
    drop(commands);

    session.run(rx).await;

    // acquisition finishes before the queued stop is read
    assert_eq!(session.observer().statuses, vec![Connecting, Listening, Idle]);
    assert!(session.observer().notices.is_empty());
    assert_eq!(capture.released(), 1);
    assert_eq!(transport.opened(), 1);
    assert_eq!(transport.closed(), 1);
}

#[tokio::test]
async fn test_run_handles_session_events() {
    let (capture, transport, playback) = fakes();
    let mut session = controller(&capture, &transport, &playback);

    let (commands, rx) = mpsc::unbounded_channel();
    commands.send(Command::Start).unwrap();

    let driver = async {
        while transport.opened() == 0 {
            tokio::task::yield_now().await;
        }
        transport.deliver_audio(&speech_chunk());
        while playback.started().is_empty() {
            tokio::task::yield_now().await;
        }
        drop(commands);
    };

    tokio::join!(session.run(rx), driver);

    assert_eq!(
        session.observer().statuses,
        vec![Connecting, Listening, Speaking, Idle]
    );
    assert_eq!(playback.stopped().len(), 1);
}
