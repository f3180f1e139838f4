//! TOML configuration file loading
//!
//! Supports `~/.config/live-voice/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct LiveVoiceConfigFile {
    /// Relay HTTP server
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Upstream streaming AI endpoint
    #[serde(default)]
    pub upstream: UpstreamFileConfig,

    /// Assistant persona and voice
    #[serde(default)]
    pub assistant: AssistantFileConfig,

    /// Voice client settings
    #[serde(default)]
    pub client: ClientFileConfig,
}

/// Relay server configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    pub port: Option<u16>,

    /// Address to bind (e.g. "0.0.0.0")
    pub bind: Option<String>,

    /// Origins allowed by CORS
    pub allowed_origins: Option<Vec<String>>,

    /// New live sessions accepted per minute
    pub sessions_per_minute: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpstreamFileConfig {
    /// WebSocket URL of the upstream live endpoint
    pub url: Option<String>,

    /// Upstream credential; prefer the `GEMINI_API_KEY` environment variable
    pub api_key: Option<String>,

    pub handshake_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AssistantFileConfig {
    pub model: Option<String>,
    pub voice: Option<String>,
    pub system_instruction: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ClientFileConfig {
    /// Relay WebSocket URL the voice client connects to
    pub relay_url: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `LiveVoiceConfigFile::default()` if the file doesn't exist or can't be parsed.
#[must_use]
pub fn load_config_file() -> LiveVoiceConfigFile {
    config_file_path().map_or_else(LiveVoiceConfigFile::default, |path| {
        load_config_file_from(&path)
    })
}

/// Load a TOML config file from an explicit path
///
/// Missing or unparseable files fall back to defaults with a warning.
#[must_use]
pub fn load_config_file_from(path: &Path) -> LiveVoiceConfigFile {
    if !path.exists() {
        return LiveVoiceConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                LiveVoiceConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            LiveVoiceConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/live-voice/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("live-voice").join("config.toml"))
}
