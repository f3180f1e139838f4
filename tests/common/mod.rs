//! Shared test utilities: in-memory stand-ins for the microphone, the relay
//! connection, and the speaker

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use live_voice::protocol::{ClientMessage, InboundEvent};
use live_voice::transport::{
    Connection, EndpointRef, EventCallback, EventDispatch, StreamTransport,
};
use live_voice::voice::{
    AudioBuffer, CaptureDevice, CaptureFrame, CaptureHandle, EndedCallback, FrameCallback,
    PlaybackDevice, PlaybackId, PlaybackOutput,
};
use live_voice::{Error, Notice, Result, SessionController, SessionObserver, SessionStatus};
use tokio::sync::Notify;
use url::Url;

// ---------------------------------------------------------------------------
// capture

#[derive(Default)]
pub struct CaptureState {
    on_frame: Option<FrameCallback>,
    pub acquired: usize,
    pub released: usize,
}

/// Microphone that grants or denies access on demand
#[derive(Clone, Default)]
pub struct FakeCapture {
    pub state: Arc<Mutex<CaptureState>>,
    deny: bool,
}

impl FakeCapture {
    pub fn denying() -> Self {
        Self {
            deny: true,
            ..Self::default()
        }
    }

    /// Deliver one frame as the audio thread would
    pub fn emit(&self, frame: CaptureFrame) {
        if let Some(on_frame) = self.state.lock().unwrap().on_frame.as_mut() {
            on_frame(frame);
        }
    }

    pub fn acquired(&self) -> usize {
        self.state.lock().unwrap().acquired
    }

    pub fn released(&self) -> usize {
        self.state.lock().unwrap().released
    }
}

#[async_trait(?Send)]
impl CaptureDevice for FakeCapture {
    type Handle = FakeCaptureHandle;

    async fn acquire(&self, on_frame: FrameCallback) -> Result<FakeCaptureHandle> {
        if self.deny {
            return Err(Error::PermissionDenied("user refused".to_string()));
        }
        let mut state = self.state.lock().unwrap();
        state.on_frame = Some(on_frame);
        state.acquired += 1;
        Ok(FakeCaptureHandle {
            state: Arc::clone(&self.state),
            live: true,
        })
    }
}

pub struct FakeCaptureHandle {
    state: Arc<Mutex<CaptureState>>,
    live: bool,
}

impl CaptureHandle for FakeCaptureHandle {
    fn release(&mut self) {
        if self.live {
            self.live = false;
            let mut state = self.state.lock().unwrap();
            state.on_frame = None;
            state.released += 1;
        }
    }

    fn is_live(&self) -> bool {
        self.live
    }
}

impl Drop for FakeCaptureHandle {
    fn drop(&mut self) {
        self.release();
    }
}

// ---------------------------------------------------------------------------
// transport

#[derive(Default)]
pub struct TransportState {
    dispatch: Option<Arc<EventDispatch>>,
    pub opened: usize,
    pub closed: usize,
    pub sent: Vec<ClientMessage>,
    pub endpoints: Vec<Url>,
}

/// Relay stand-in; tests push inbound traffic through it
#[derive(Clone, Default)]
pub struct FakeTransport {
    pub state: Arc<Mutex<TransportState>>,
    fail: Option<String>,
    gate: Option<Arc<Notify>>,
}

impl FakeTransport {
    pub fn failing(message: &str) -> Self {
        Self {
            fail: Some(message.to_string()),
            ..Self::default()
        }
    }

    /// Open never completes until the returned gate is notified
    pub fn gated() -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        (
            Self {
                gate: Some(Arc::clone(&gate)),
                ..Self::default()
            },
            gate,
        )
    }

    fn dispatch(&self) -> Arc<EventDispatch> {
        self.state
            .lock()
            .unwrap()
            .dispatch
            .clone()
            .expect("no connection opened")
    }

    pub fn deliver(&self, event: InboundEvent) {
        self.dispatch().message(event);
    }

    pub fn deliver_audio(&self, samples: &[f32]) {
        self.deliver(InboundEvent::Audio {
            data: live_voice::voice::codec::encode(samples),
        });
    }

    pub fn remote_error(&self, message: &str) {
        self.dispatch().error(message);
    }

    pub fn remote_close(&self) {
        self.dispatch().closed();
    }

    pub fn opened(&self) -> usize {
        self.state.lock().unwrap().opened
    }

    pub fn closed(&self) -> usize {
        self.state.lock().unwrap().closed
    }

    pub fn sent(&self) -> Vec<ClientMessage> {
        self.state.lock().unwrap().sent.clone()
    }
}

#[async_trait(?Send)]
impl StreamTransport for FakeTransport {
    type Connection = FakeConnection;

    async fn open(&self, endpoint: &EndpointRef, on_event: EventCallback) -> Result<FakeConnection> {
        {
            let mut state = self.state.lock().unwrap();
            state.opened += 1;
            state.endpoints.push(endpoint.url.clone());
        }

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if let Some(message) = &self.fail {
            return Err(Error::Connection(message.clone()));
        }

        let dispatch = Arc::new(EventDispatch::new(on_event));
        self.state.lock().unwrap().dispatch = Some(Arc::clone(&dispatch));
        Ok(FakeConnection {
            state: Arc::clone(&self.state),
            dispatch,
        })
    }
}

pub struct FakeConnection {
    state: Arc<Mutex<TransportState>>,
    dispatch: Arc<EventDispatch>,
}

impl Connection for FakeConnection {
    fn send(&self, message: &ClientMessage) {
        if self.is_open() {
            self.state.lock().unwrap().sent.push(message.clone());
        }
    }

    fn close(&mut self) {
        if self.dispatch.closed() {
            self.state.lock().unwrap().closed += 1;
        }
    }

    fn is_open(&self) -> bool {
        !self.dispatch.is_closed()
    }
}

// ---------------------------------------------------------------------------
// playback

#[derive(Default)]
pub struct OutputState {
    pub now: f64,
    pub started: Vec<(PlaybackId, f64)>,
    pub stopped: Vec<PlaybackId>,
    on_ended: Option<EndedCallback>,
    pub opened: usize,
    pub released: usize,
}

/// Speaker with a hand-driven clock
#[derive(Clone, Default)]
pub struct FakePlayback {
    pub state: Arc<Mutex<OutputState>>,
}

impl FakePlayback {
    pub fn set_now(&self, now: f64) {
        self.state.lock().unwrap().now = now;
    }

    /// Report a started buffer as played to the end
    pub fn finish(&self, id: PlaybackId) {
        let on_ended = self.state.lock().unwrap().on_ended.clone();
        if let Some(on_ended) = on_ended {
            on_ended(id);
        }
    }

    pub fn started(&self) -> Vec<(PlaybackId, f64)> {
        self.state.lock().unwrap().started.clone()
    }

    pub fn stopped(&self) -> Vec<PlaybackId> {
        self.state.lock().unwrap().stopped.clone()
    }

    pub fn opened(&self) -> usize {
        self.state.lock().unwrap().opened
    }

    pub fn released(&self) -> usize {
        self.state.lock().unwrap().released
    }
}

impl PlaybackDevice for FakePlayback {
    type Output = FakeOutput;

    fn open(&self, on_ended: EndedCallback) -> Result<FakeOutput> {
        let mut state = self.state.lock().unwrap();
        state.on_ended = Some(on_ended);
        state.opened += 1;
        Ok(FakeOutput {
            state: Arc::clone(&self.state),
        })
    }
}

pub struct FakeOutput {
    state: Arc<Mutex<OutputState>>,
}

impl PlaybackOutput for FakeOutput {
    fn now(&self) -> f64 {
        self.state.lock().unwrap().now
    }

    fn start(&mut self, id: PlaybackId, _buffer: &AudioBuffer, at: f64) {
        self.state.lock().unwrap().started.push((id, at));
    }

    fn stop(&mut self, id: PlaybackId) {
        self.state.lock().unwrap().stopped.push(id);
    }
}

impl Drop for FakeOutput {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.on_ended = None;
        state.released += 1;
    }
}

// ---------------------------------------------------------------------------
// observer

#[derive(Debug, Default)]
pub struct RecordingObserver {
    pub statuses: Vec<SessionStatus>,
    pub notices: Vec<Notice>,
}

impl SessionObserver for RecordingObserver {
    fn status_changed(&mut self, status: SessionStatus) {
        self.statuses.push(status);
    }

    fn notify(&mut self, notice: &Notice) {
        self.notices.push(notice.clone());
    }
}

pub type TestController =
    SessionController<FakeCapture, FakeTransport, FakePlayback, RecordingObserver>;

pub fn test_endpoint() -> EndpointRef {
    let url = Url::parse("ws://relay.test/api/ai/live").expect("valid url");
    EndpointRef::new(url, live_voice::protocol::SessionSetup::default())
}

/// Controller wired to the given fakes
pub fn controller(
    capture: &FakeCapture,
    transport: &FakeTransport,
    playback: &FakePlayback,
) -> TestController {
    SessionController::new(
        capture.clone(),
        transport.clone(),
        playback.clone(),
        RecordingObserver::default(),
        test_endpoint(),
    )
}

/// 0.1s of 24kHz speech-like audio
#[allow(clippy::cast_precision_loss)]
pub fn speech_chunk() -> Vec<f32> {
    (0..2400).map(|i| ((i as f32) * 0.05).sin() * 0.4).collect()
}
