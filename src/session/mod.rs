//! Voice session lifecycle
//!
//! The controller owns at most one live session: a capture handle, a relay
//! connection, and a playback scheduler. Audio threads and transport tasks
//! never touch that state directly; they post events into a single-consumer
//! queue that the controller drains on its own task. Each event is stamped
//! with the epoch of the session that produced it, so anything still in
//! flight when a session is torn down is discarded instead of acting on the
//! next one.
//!
//! ```text
//! Idle ──start──▶ Connecting ──ready──▶ Listening ◀──drained/interrupted── Speaking
//!  ▲                  │                    │  └──────────inbound audio──────────▶│
//!  └──failure─────────┘                    └──stop / error / close──▶ Idle ◀─────┘
//! ```

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::Error;
use crate::protocol::{ClientMessage, InboundEvent};
use crate::transport::{Connection, EndpointRef, StreamTransport, TransportEvent};
use crate::voice::{
    CaptureDevice, CaptureFrame, CaptureHandle, PLAYBACK_SAMPLE_RATE, PlaybackDevice, PlaybackId,
    PlaybackScheduler, codec,
};

/// Observable session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Connecting,
    Listening,
    Speaking,
}

impl SessionStatus {
    /// Listening or Speaking
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Listening | Self::Speaking)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Listening => "listening",
            Self::Speaking => "speaking",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User-facing notification for a terminal failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Capture, playback, or connection setup failed
    StartFailed { reason: String },
    /// A live session ended because of a remote error or close
    ConnectionLost { reason: String },
}

impl Notice {
    /// Short text suitable for a toast
    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self {
            Self::StartFailed { .. } => "Failed to start voice chat. Check microphone permissions.",
            Self::ConnectionLost { .. } => "Voice chat connection error. Please try again.",
        }
    }

    #[must_use]
    pub fn reason(&self) -> &str {
        match self {
            Self::StartFailed { reason } | Self::ConnectionLost { reason } => reason,
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Receives state changes and notices from the controller
pub trait SessionObserver {
    fn status_changed(&mut self, status: SessionStatus);

    fn notify(&mut self, notice: &Notice);
}

/// Observer that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl SessionObserver for LogObserver {
    fn status_changed(&mut self, status: SessionStatus) {
        tracing::info!(%status, "voice session status");
    }

    fn notify(&mut self, notice: &Notice) {
        tracing::warn!(reason = notice.reason(), "{}", notice.message());
    }
}

/// Control input for [`SessionController::run`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    /// Start when idle, stop otherwise
    Toggle,
}

/// Event posted by a capture, transport, or playback callback
#[derive(Debug)]
enum SessionEvent {
    Frame(CaptureFrame),
    Transport(TransportEvent),
    PlaybackEnded(PlaybackId),
}

#[derive(Debug)]
struct Envelope {
    epoch: u64,
    event: SessionEvent,
}

/// Resources owned by one live session
struct ActiveSession<H, N, O> {
    capture: H,
    connection: N,
    scheduler: PlaybackScheduler<O>,
}

type Active<C, T, P> = ActiveSession<
    <C as CaptureDevice>::Handle,
    <T as StreamTransport>::Connection,
    <P as PlaybackDevice>::Output,
>;

/// Drives one voice session at a time through its lifecycle
pub struct SessionController<C, T, P, O = LogObserver>
where
    C: CaptureDevice,
    T: StreamTransport,
    P: PlaybackDevice,
    O: SessionObserver,
{
    capture: C,
    transport: T,
    playback: P,
    observer: O,
    endpoint: EndpointRef,
    status: SessionStatus,
    epoch: u64,
    events_tx: mpsc::UnboundedSender<Envelope>,
    events_rx: mpsc::UnboundedReceiver<Envelope>,
    session: Option<Active<C, T, P>>,
}

impl<C, T, P, O> SessionController<C, T, P, O>
where
    C: CaptureDevice,
    T: StreamTransport,
    P: PlaybackDevice,
    O: SessionObserver,
{
    pub fn new(capture: C, transport: T, playback: P, observer: O, endpoint: EndpointRef) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            capture,
            transport,
            playback,
            observer,
            endpoint,
            status: SessionStatus::Idle,
            epoch: 0,
            events_tx,
            events_rx,
            session: None,
        }
    }

    #[must_use]
    pub const fn status(&self) -> SessionStatus {
        self.status
    }

    #[must_use]
    pub const fn observer(&self) -> &O {
        &self.observer
    }

    /// Buffers currently scheduled or playing
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.scheduler.in_flight())
    }

    /// Playback cursor of the live session, zero when idle
    #[must_use]
    pub fn cursor(&self) -> f64 {
        self.session.as_ref().map_or(0.0, |s| s.scheduler.cursor())
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.connection.is_open())
    }

    /// Start a session
    ///
    /// Failures never escape: they produce one notice and leave the
    /// controller idle with nothing held.
    pub async fn start(&mut self) {
        let Some(epoch) = self.begin_start() else {
            return;
        };
        let result = self.acquire(epoch).await;
        self.finish_start(result);
    }

    /// Tear down the live session, if any
    ///
    /// Safe from any state, any number of times.
    pub fn stop(&mut self) {
        // stale callbacks from the old session must not reach the next one
        self.epoch += 1;

        if let Some(mut session) = self.session.take() {
            session.scheduler.reset();
            session.connection.close();
            session.capture.release();
            drop(session);
            tracing::debug!("voice session torn down");
        }

        self.set_status(SessionStatus::Idle);
    }

    /// Handle every event already queued, without waiting
    pub fn drain_events(&mut self) {
        while let Ok(envelope) = self.events_rx.try_recv() {
            self.dispatch(envelope);
        }
    }

    /// Wait for the next event and handle it
    pub async fn process_next(&mut self) {
        if let Some(envelope) = self.events_rx.recv().await {
            self.dispatch(envelope);
        }
    }

    /// Process commands and session events until the command channel closes
    ///
    /// A `Stop` that arrives while a start is still waiting on the
    /// microphone or the relay abandons that start and releases whatever it
    /// had acquired.
    pub async fn run(&mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Start) => self.start_cancellable(&mut commands).await,
                    Some(Command::Toggle) if self.status == SessionStatus::Idle => {
                        self.start_cancellable(&mut commands).await;
                    }
                    Some(Command::Stop | Command::Toggle) => self.stop(),
                    None => break,
                },
                Some(envelope) = self.events_rx.recv() => self.dispatch(envelope),
            }
        }

        self.stop();
    }

    async fn start_cancellable(&mut self, commands: &mut mpsc::UnboundedReceiver<Command>) {
        let Some(epoch) = self.begin_start() else {
            return;
        };

        let result = {
            let acquire = self.acquire(epoch);
            tokio::pin!(acquire);
            loop {
                tokio::select! {
                    biased;

                    result = &mut acquire => break Some(result),
                    command = commands.recv() => match command {
                        Some(Command::Start) => tracing::debug!("start already in progress"),
                        Some(Command::Stop | Command::Toggle) | None => break None,
                    },
                }
            }
        };

        match result {
            Some(result) => self.finish_start(result),
            None => {
                tracing::debug!("start cancelled");
                self.stop();
            }
        }
    }

    /// Enter `Connecting` for a fresh epoch; `None` if a session exists
    fn begin_start(&mut self) -> Option<u64> {
        if self.status != SessionStatus::Idle || self.session.is_some() {
            tracing::warn!(status = %self.status, "voice session already running, ignoring start");
            return None;
        }

        self.epoch += 1;
        self.set_status(SessionStatus::Connecting);
        Some(self.epoch)
    }

    fn finish_start(&mut self, result: crate::Result<Active<C, T, P>>) {
        match result {
            Ok(session) => {
                self.session = Some(session);
                self.set_status(SessionStatus::Listening);
            }
            Err(e) => {
                tracing::warn!(error = %e, "voice session failed to start");
                self.epoch += 1;
                self.set_status(SessionStatus::Idle);
                self.observer.notify(&Notice::StartFailed {
                    reason: e.to_string(),
                });
            }
        }
    }

    /// Acquire capture, then playback, then the relay connection
    ///
    /// Anything acquired before a failure is released before returning.
    /// If the future is dropped mid-way, held resources release on drop.
    async fn acquire(&self, epoch: u64) -> crate::Result<Active<C, T, P>> {
        let frames = self.events_tx.clone();
        let mut capture = self
            .capture
            .acquire(Box::new(move |frame| {
                let _ = frames.send(Envelope {
                    epoch,
                    event: SessionEvent::Frame(frame),
                });
            }))
            .await?;

        let ended = self.events_tx.clone();
        let output = match self.playback.open(Arc::new(move |id| {
            let _ = ended.send(Envelope {
                epoch,
                event: SessionEvent::PlaybackEnded(id),
            });
        })) {
            Ok(output) => output,
            Err(e) => {
                capture.release();
                return Err(e);
            }
        };

        let inbound = self.events_tx.clone();
        let connection = match self
            .transport
            .open(
                &self.endpoint,
                Box::new(move |event| {
                    let _ = inbound.send(Envelope {
                        epoch,
                        event: SessionEvent::Transport(event),
                    });
                }),
            )
            .await
        {
            Ok(connection) => connection,
            Err(e) => {
                drop(output);
                capture.release();
                return Err(e);
            }
        };

        Ok(ActiveSession {
            capture,
            connection,
            scheduler: PlaybackScheduler::new(output),
        })
    }

    fn dispatch(&mut self, envelope: Envelope) {
        if envelope.epoch != self.epoch || self.session.is_none() {
            tracing::trace!(epoch = envelope.epoch, "dropping stale session event");
            return;
        }

        match envelope.event {
            SessionEvent::Frame(frame) => self.on_frame(&frame),
            SessionEvent::Transport(TransportEvent::Message(event)) => self.on_inbound(event),
            SessionEvent::Transport(TransportEvent::Error(reason)) => {
                self.fail(&Error::Connection(reason));
            }
            SessionEvent::Transport(TransportEvent::Closed) => {
                self.fail(&Error::Connection("relay closed the connection".to_string()));
            }
            SessionEvent::PlaybackEnded(id) => {
                let drained = self
                    .session
                    .as_mut()
                    .is_some_and(|s| s.scheduler.complete(id));
                if drained && self.status == SessionStatus::Speaking {
                    self.set_status(SessionStatus::Listening);
                }
            }
        }
    }

    fn on_frame(&self, frame: &[f32]) {
        if !self.status.is_active() {
            return;
        }
        if let Some(session) = &self.session {
            session.connection.send(&ClientMessage::audio(frame));
        }
    }

    fn on_inbound(&mut self, event: InboundEvent) {
        match event {
            InboundEvent::Audio { data } => {
                let buffer = match codec::decode(&data, PLAYBACK_SAMPLE_RATE, 1) {
                    Ok(buffer) if buffer.frames() > 0 => buffer,
                    Ok(_) => return,
                    Err(e) => {
                        tracing::warn!(error = %e, "dropping undecodable audio chunk");
                        return;
                    }
                };
                if let Some(session) = self.session.as_mut() {
                    session.scheduler.schedule(&buffer);
                    self.set_status(SessionStatus::Speaking);
                }
            }
            InboundEvent::Interrupted => {
                if let Some(session) = self.session.as_mut() {
                    session.scheduler.interrupt();
                }
                self.set_status(SessionStatus::Listening);
            }
            InboundEvent::TurnComplete => tracing::debug!("assistant turn complete"),
            InboundEvent::Error { message } => self.fail(&Error::Remote(message)),
        }
    }

    /// Mid-session failure: tear down and tell the user once
    fn fail(&mut self, error: &Error) {
        tracing::warn!(error = %error, "voice session lost");
        self.stop();
        self.observer.notify(&Notice::ConnectionLost {
            reason: error.to_string(),
        });
    }

    fn set_status(&mut self, status: SessionStatus) {
        if self.status != status {
            self.status = status;
            self.observer.status_changed(status);
        }
    }
}

impl<C, T, P, O> Drop for SessionController<C, T, P, O>
where
    C: CaptureDevice,
    T: StreamTransport,
    P: PlaybackDevice,
    O: SessionObserver,
{
    fn drop(&mut self) {
        self.stop();
    }
}
