//! Wire protocol between the voice client and the relay
//!
//! Every frame is a JSON text message. The client opens with a `setup`
//! message, then streams `realtimeInput` audio blocks. The relay answers with
//! `setupComplete` once the upstream session is ready, then forwards upstream
//! `serverContent` messages verbatim.

use serde::{Deserialize, Serialize};

use crate::voice::codec;

/// MIME tag for outbound microphone audio
pub const AUDIO_INPUT_MIME: &str = "audio/pcm;rate=16000";

/// Message sent from the client to the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    /// One-time session setup, always the first message on a connection
    Setup(SessionSetup),
    /// One block of microphone audio
    RealtimeInput(RealtimeInput),
}

impl ClientMessage {
    /// Build an audio message from one capture frame
    #[must_use]
    pub fn audio(frame: &[f32]) -> Self {
        Self::RealtimeInput(RealtimeInput {
            media: MediaBlob {
                data: codec::encode(frame),
                mime_type: AUDIO_INPUT_MIME.to_string(),
            },
        })
    }
}

/// Session setup payload
///
/// Every field is optional; the relay fills the gaps from its own
/// configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSetup {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub config: SetupConfig,
}

/// Generation settings carried by the setup message
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_modalities: Option<Vec<Modality>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<String>,
}

/// Response modality requested from the model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Modality {
    Audio,
    Text,
}

/// Speech synthesis settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceSelection,
}

impl SpeechConfig {
    /// Select one of the upstream's prebuilt voices
    #[must_use]
    pub fn prebuilt(voice_name: impl Into<String>) -> Self {
        Self {
            voice_config: VoiceSelection {
                prebuilt_voice_config: PrebuiltVoice {
                    voice_name: voice_name.into(),
                },
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceSelection {
    pub prebuilt_voice_config: PrebuiltVoice,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoice {
    pub voice_name: String,
}

/// Realtime input envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealtimeInput {
    pub media: MediaBlob,
}

/// Base64 payload plus its format tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaBlob {
    pub data: String,
    pub mime_type: String,
}

/// Message the relay originates itself (as opposed to forwarded upstream
/// traffic)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelayReply {
    /// Upstream session is ready; audio may flow
    SetupComplete {},
    /// Relay-side failure, sent right before the relay closes
    Error(ErrorBody),
}

impl RelayReply {
    #[must_use]
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error(ErrorBody {
            code: code.to_string(),
            message: message.into(),
        })
    }
}

/// Structured error body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub code: String,
    pub message: String,
}

/// Any message received by the client from the relay
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub error: Option<ErrorBody>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<ModelTurn>,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub turn_complete: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default)]
    pub inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub data: String,
    #[serde(default)]
    pub mime_type: Option<String>,
}

/// Inbound event extracted from a relay message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// Base64 PCM16LE audio at 24 kHz mono
    Audio { data: String },
    /// The remote side detected barge-in; queued speech must stop
    Interrupted,
    /// The assistant finished its turn
    TurnComplete,
    /// The relay or upstream reported a failure
    Error { message: String },
}

impl ServerMessage {
    /// Parse one text frame
    ///
    /// # Errors
    ///
    /// Returns error if the frame is not a JSON object of the expected shape
    pub fn parse(text: &str) -> crate::Result<Self> {
        serde_json::from_str(text).map_err(|e| crate::Error::Decode(e.to_string()))
    }

    /// Whether this is the handshake acknowledgement
    #[must_use]
    pub const fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }

    /// Flatten into events, in the order they must be handled
    ///
    /// Audio parts come first, then interruption, then turn completion.
    #[must_use]
    pub fn into_events(self) -> Vec<InboundEvent> {
        let mut events = Vec::new();

        if let Some(error) = self.error {
            events.push(InboundEvent::Error {
                message: error.message,
            });
        }

        if let Some(content) = self.server_content {
            if let Some(turn) = content.model_turn {
                events.extend(
                    turn.parts
                        .into_iter()
                        .filter_map(|part| part.inline_data)
                        .map(|inline| InboundEvent::Audio { data: inline.data }),
                );
            }
            if content.interrupted {
                events.push(InboundEvent::Interrupted);
            }
            if content.turn_complete {
                events.push(InboundEvent::TurnComplete);
            }
        }

        events
    }
}
