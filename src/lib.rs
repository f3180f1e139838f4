//! Live Voice - real-time voice assistant audio pipeline
//!
//! This library provides both halves of a streaming voice assistant:
//! - A voice client: microphone capture, PCM frame encoding, a WebSocket
//!   transport, gapless playback scheduling, and a session state machine
//! - A relay server that keeps the upstream AI credential server-side and
//!   forwards live sessions between clients and the upstream endpoint
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                Voice client                   │
//! │  Capture → Encode → Transport → Scheduler     │
//! │        └──── SessionController ────┘         │
//! └──────────────────────┬───────────────────────┘
//!                        │ WebSocket /api/ai/live
//! ┌──────────────────────▼───────────────────────┐
//! │                 Relay server                  │
//! │   health  │  CORS  │  rate limit  │  bridge   │
//! └──────────────────────┬───────────────────────┘
//!                        │ WebSocket + credential header
//! ┌──────────────────────▼───────────────────────┐
//! │            Upstream live AI endpoint          │
//! └──────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod protocol;
pub mod relay;
pub mod session;
pub mod transport;
pub mod voice;

pub use config::Config;
pub use error::{Error, Result};
pub use relay::LiveRelay;
pub use session::{Command, Notice, SessionController, SessionObserver, SessionStatus};
pub use transport::{Connection, EndpointRef, StreamTransport, TransportEvent, WsTransport};
