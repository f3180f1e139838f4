//! Messages in the upstream live API's own shape
//!
//! The client protocol is deliberately flatter than the upstream one; the
//! relay rewrites setup and audio on the way through and forwards upstream
//! replies untouched.

use serde::Serialize;

use crate::config::AssistantConfig;
use crate::protocol::{MediaBlob, Modality, RealtimeInput, SessionSetup, SpeechConfig};

/// Outbound message to the upstream endpoint
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum UpstreamMessage {
    Setup(UpstreamSetup),
    RealtimeInput(UpstreamAudio),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamSetup {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<Modality>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

#[derive(Debug, Serialize)]
pub struct Content {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Serialize)]
pub struct TextPart {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct UpstreamAudio {
    pub audio: MediaBlob,
}

/// Qualify a bare model id with the `models/` prefix
fn model_resource(model: &str) -> String {
    if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{model}")
    }
}

impl UpstreamMessage {
    /// Translate a client setup, filling unset fields from the assistant defaults
    #[must_use]
    pub fn setup(setup: SessionSetup, defaults: &AssistantConfig) -> Self {
        let config = setup.config;
        let model = setup.model.unwrap_or_else(|| defaults.model.clone());
        let instruction = config
            .system_instruction
            .unwrap_or_else(|| defaults.system_instruction.clone());

        Self::Setup(UpstreamSetup {
            model: model_resource(&model),
            generation_config: GenerationConfig {
                response_modalities: config
                    .response_modalities
                    .unwrap_or_else(|| vec![Modality::Audio]),
                speech_config: Some(
                    config
                        .speech_config
                        .unwrap_or_else(|| SpeechConfig::prebuilt(&defaults.voice)),
                ),
            },
            system_instruction: (!instruction.is_empty()).then(|| Content {
                parts: vec![TextPart { text: instruction }],
            }),
        })
    }

    /// Translate one block of client audio
    #[must_use]
    pub fn audio(input: RealtimeInput) -> Self {
        Self::RealtimeInput(UpstreamAudio { audio: input.media })
    }
}
