//! Persistent bidirectional channel between the voice client and the relay
//!
//! A transport opens one [`Connection`] per session. Inbound traffic is
//! pushed to an event callback in receipt order; outbound traffic goes
//! through [`Connection::send`]. Every connection reports
//! [`TransportEvent::Closed`] exactly once, after every other event.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::Result;
use crate::protocol::{ClientMessage, InboundEvent, SessionSetup};

pub mod ws;

pub use ws::{WsConnection, WsTransport};

/// Default bound on connect plus setup acknowledgement
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Where to connect and how to configure the remote session
#[derive(Debug, Clone)]
pub struct EndpointRef {
    pub url: Url,
    pub setup: SessionSetup,
    pub handshake_timeout: Duration,
}

impl EndpointRef {
    #[must_use]
    pub const fn new(url: Url, setup: SessionSetup) -> Self {
        Self {
            url,
            setup,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}

/// Lifecycle and data notifications from an open connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One decoded inbound event, in receipt order
    Message(InboundEvent),
    /// Transport-level failure; at most once per connection
    Error(String),
    /// Connection ended; exactly once per connection and always last
    Closed,
}

/// Receives transport events, called from the transport's own tasks
pub type EventCallback = Box<dyn Fn(TransportEvent) + Send + Sync>;

/// Something that can open connections to the relay
#[async_trait(?Send)]
pub trait StreamTransport {
    type Connection: Connection;

    /// Connect and complete the setup handshake
    ///
    /// # Errors
    ///
    /// Returns `Error::Connection` if the endpoint is unreachable, rejects
    /// the setup, closes during the handshake, or does not answer in time
    async fn open(&self, endpoint: &EndpointRef, on_event: EventCallback)
    -> Result<Self::Connection>;
}

/// An open session channel
pub trait Connection {
    /// Send a message; silently dropped once the connection is not open
    fn send(&self, message: &ClientMessage);

    /// Close gracefully; calling again is a no-op
    fn close(&mut self);

    fn is_open(&self) -> bool;
}

#[derive(Debug, Default)]
struct DispatchState {
    errored: bool,
    closed: bool,
}

/// Serializes event delivery so nothing is delivered after `Closed`
///
/// Transport implementations route every callback through this.
pub struct EventDispatch {
    on_event: EventCallback,
    state: Mutex<DispatchState>,
}

impl EventDispatch {
    #[must_use]
    pub fn new(on_event: EventCallback) -> Self {
        Self {
            on_event,
            state: Mutex::new(DispatchState::default()),
        }
    }

    /// Deliver an inbound event unless the connection already closed
    pub fn message(&self, event: InboundEvent) {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.closed {
            (self.on_event)(TransportEvent::Message(event));
        }
    }

    /// Deliver the first transport error; later ones are dropped
    pub fn error(&self, message: impl Into<String>) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.closed || state.errored {
            return;
        }
        state.errored = true;
        (self.on_event)(TransportEvent::Error(message.into()));
    }

    /// Deliver `Closed` once; returns false if it was already delivered
    pub fn closed(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.closed {
            return false;
        }
        state.closed = true;
        (self.on_event)(TransportEvent::Closed);
        true
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .closed
    }
}
