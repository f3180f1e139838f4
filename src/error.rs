//! Error types for the live voice pipeline

use thiserror::Error;

/// Result type alias for live voice operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice client or the relay
#[derive(Debug, Error)]
pub enum Error {
    /// Microphone access was refused by the user or the platform
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    /// No usable audio input or output hardware
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Relay unreachable, handshake rejected, or upstream credential missing
    #[error("connection error: {0}")]
    Connection(String),

    /// Relay or upstream reported a runtime error mid-session
    #[error("remote error: {0}")]
    Remote(String),

    /// Malformed inbound payload
    #[error("decode error: {0}")]
    Decode(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio error
    #[error("audio error: {0}")]
    Audio(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
