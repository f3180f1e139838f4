//! Configuration management for the live voice relay and client
//!
//! Values resolve with precedence env > TOML file > default. The environment
//! lookup is passed in, so callers can load from the process environment or
//! from a fixed map.

pub mod file;

use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use crate::protocol::{Modality, SessionSetup, SetupConfig, SpeechConfig};
use crate::transport::EndpointRef;
use crate::{Error, Result};

use file::LiveVoiceConfigFile;

/// Default upstream live endpoint (Gemini `BidiGenerateContent`)
pub const DEFAULT_UPSTREAM_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-native-audio-preview-12-2025";

pub const DEFAULT_VOICE: &str = "Kore";

pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are Chef Amara, the master chef of Dakshin Delights. You are friendly, knowledgeable about South Indian cuisine, and helpful. You suggest dishes based on user preferences and explain cultural traditions.";

pub const DEFAULT_RELAY_URL: &str = "ws://localhost:3001/api/ai/live";

/// Full configuration
#[derive(Debug)]
pub struct Config {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub assistant: AssistantConfig,
    pub client: ClientConfig,
}

/// Relay HTTP server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind
    pub bind: IpAddr,

    /// Port to listen on
    pub port: u16,

    /// Origins allowed by CORS, with credentials
    pub allowed_origins: Vec<String>,

    /// New live sessions accepted per minute across all clients
    pub sessions_per_minute: u32,
}

impl ServerConfig {
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::from([0, 0, 0, 0]),
            port: 3001,
            allowed_origins: vec!["http://localhost:3000".to_string()],
            sessions_per_minute: 30,
        }
    }
}

/// Upstream streaming endpoint, only used by the relay
#[derive(Debug)]
pub struct UpstreamConfig {
    pub url: Url,

    /// Credential for the upstream; never sent to clients
    pub api_key: Option<SecretString>,

    pub handshake_timeout: Duration,
}

/// Assistant defaults applied to every live session
#[derive(Debug, Clone)]
pub struct AssistantConfig {
    pub model: String,
    pub voice: String,
    pub system_instruction: String,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
        }
    }
}

impl AssistantConfig {
    /// Setup message describing this assistant
    #[must_use]
    pub fn session_setup(&self) -> SessionSetup {
        SessionSetup {
            model: Some(self.model.clone()),
            config: SetupConfig {
                response_modalities: Some(vec![Modality::Audio]),
                speech_config: Some(SpeechConfig::prebuilt(&self.voice)),
                system_instruction: Some(self.system_instruction.clone()),
            },
        }
    }
}

/// Voice client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub relay_url: Url,
    pub handshake_timeout: Duration,
}

impl Config {
    /// Load from the process environment and the standard config file
    ///
    /// # Errors
    ///
    /// Returns error if a configured URL or address is invalid
    pub fn load() -> Result<Self> {
        Self::from_sources(file::load_config_file(), |key| std::env::var(key).ok())
    }

    /// Load from the process environment and an explicit config file
    ///
    /// # Errors
    ///
    /// Returns error if a configured URL or address is invalid
    pub fn load_from(path: &Path) -> Result<Self> {
        Self::from_sources(file::load_config_file_from(path), |key| {
            std::env::var(key).ok()
        })
    }

    /// Resolve configuration from a file overlay and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a configured URL or address is invalid
    pub fn from_sources(
        fc: LiveVoiceConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let defaults = ServerConfig::default();

        // Server config (env > toml > default)
        let bind = match env("LIVE_VOICE_BIND").or(fc.server.bind) {
            Some(raw) => raw
                .parse()
                .map_err(|e| Error::Config(format!("invalid bind address {raw:?}: {e}")))?,
            None => defaults.bind,
        };
        let port = env("LIVE_VOICE_PORT")
            .or_else(|| env("PORT"))
            .and_then(|s| s.parse().ok())
            .or(fc.server.port)
            .unwrap_or(defaults.port);
        let allowed_origins = env("LIVE_VOICE_ALLOWED_ORIGINS")
            .map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|o| !o.is_empty())
                    .map(String::from)
                    .collect()
            })
            .or(fc.server.allowed_origins)
            .unwrap_or(defaults.allowed_origins);
        let sessions_per_minute = env("LIVE_VOICE_SESSIONS_PER_MINUTE")
            .and_then(|s| s.parse().ok())
            .or(fc.server.sessions_per_minute)
            .unwrap_or(defaults.sessions_per_minute);

        let server = ServerConfig {
            bind,
            port,
            allowed_origins,
            sessions_per_minute,
        };

        // Upstream config (env > toml > default)
        let handshake_timeout = Duration::from_secs(
            env("LIVE_VOICE_HANDSHAKE_TIMEOUT_SECS")
                .and_then(|s| s.parse().ok())
                .or(fc.upstream.handshake_timeout_secs)
                .unwrap_or(10),
        );
        let upstream = UpstreamConfig {
            url: parse_url(
                "upstream url",
                &env("LIVE_VOICE_UPSTREAM_URL")
                    .or(fc.upstream.url)
                    .unwrap_or_else(|| DEFAULT_UPSTREAM_URL.to_string()),
            )?,
            api_key: env("GEMINI_API_KEY")
                .or(fc.upstream.api_key)
                .filter(|k| !k.trim().is_empty())
                .map(SecretString::from),
            handshake_timeout,
        };

        // Assistant config (env > toml > default)
        let assistant_defaults = AssistantConfig::default();
        let assistant = AssistantConfig {
            model: env("LIVE_VOICE_MODEL")
                .or(fc.assistant.model)
                .unwrap_or(assistant_defaults.model),
            voice: env("LIVE_VOICE_VOICE")
                .or(fc.assistant.voice)
                .unwrap_or(assistant_defaults.voice),
            system_instruction: fc
                .assistant
                .system_instruction
                .unwrap_or(assistant_defaults.system_instruction),
        };

        let client = ClientConfig {
            relay_url: parse_url(
                "relay url",
                &env("LIVE_VOICE_RELAY_URL")
                    .or(fc.client.relay_url)
                    .unwrap_or_else(|| DEFAULT_RELAY_URL.to_string()),
            )?,
            handshake_timeout,
        };

        Ok(Self {
            server,
            upstream,
            assistant,
            client,
        })
    }

    /// Endpoint the voice client connects to
    #[must_use]
    pub fn endpoint(&self) -> EndpointRef {
        EndpointRef::new(self.client.relay_url.clone(), self.assistant.session_setup())
            .with_handshake_timeout(self.client.handshake_timeout)
    }
}

fn parse_url(what: &str, raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|e| Error::Config(format!("invalid {what}: {e}")))?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(Error::Config(format!(
            "{what} must use ws or wss, got {other}"
        ))),
    }
}
