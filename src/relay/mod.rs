//! Server-side relay between voice clients and the upstream live API
//!
//! Each client WebSocket gets its own upstream connection. The relay holds
//! the upstream credential and attaches it as a request header; clients only
//! ever see `setupComplete`, forwarded upstream traffic, or a generic error.

pub mod upstream;

use std::time::Duration;

use axum::extract::ws::{Message as ClientFrame, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as UpstreamFrame;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;
use uuid::Uuid;

use crate::config::{AssistantConfig, UpstreamConfig};
use crate::protocol::{ClientMessage, RelayReply, ServerMessage, SessionSetup};
use crate::{Error, Result};

use upstream::UpstreamMessage;

/// Header carrying the upstream credential
pub const API_KEY_HEADER: &str = "x-goog-api-key";

type UpstreamStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Why a live session could not be opened
///
/// `code` and `message` go to the client; `detail` is only logged.
#[derive(Debug)]
struct Rejection {
    code: &'static str,
    message: &'static str,
    detail: String,
}

impl Rejection {
    fn bad_request(detail: impl Into<String>) -> Self {
        Self {
            code: "bad_request",
            message: "The first message must be a session setup.",
            detail: detail.into(),
        }
    }

    fn not_configured() -> Self {
        Self {
            code: "not_configured",
            message: "The voice assistant is not configured on this server.",
            detail: "upstream api key is not set".to_string(),
        }
    }

    fn unavailable(detail: impl Into<String>) -> Self {
        Self {
            code: "upstream_unavailable",
            message: "The voice assistant is unavailable. Please try again.",
            detail: detail.into(),
        }
    }
}

/// Build the upstream handshake request with the credential attached
///
/// # Errors
///
/// Returns `Error::Config` if the URL or the key cannot form a valid request
pub fn upstream_request(url: &Url, api_key: &SecretString) -> Result<Request> {
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| Error::Config(format!("invalid upstream url: {e}")))?;

    let mut value = HeaderValue::from_str(api_key.expose_secret())
        .map_err(|_| Error::Config("upstream api key is not a valid header value".to_string()))?;
    value.set_sensitive(true);
    request.headers_mut().insert(API_KEY_HEADER, value);

    Ok(request)
}

fn upstream_text(frame: &UpstreamFrame) -> Option<&str> {
    match frame {
        UpstreamFrame::Text(text) => Some(text.as_str()),
        UpstreamFrame::Binary(data) => std::str::from_utf8(data).ok(),
        _ => None,
    }
}

/// Forwards live sessions to the upstream endpoint
#[derive(Debug)]
pub struct LiveRelay {
    upstream_url: Url,
    api_key: Option<SecretString>,
    handshake_timeout: Duration,
    assistant: AssistantConfig,
}

impl LiveRelay {
    #[must_use]
    pub fn new(upstream: UpstreamConfig, assistant: AssistantConfig) -> Self {
        Self {
            upstream_url: upstream.url,
            api_key: upstream.api_key,
            handshake_timeout: upstream.handshake_timeout,
            assistant,
        }
    }

    /// Whether an upstream credential is available
    #[must_use]
    pub const fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// Serve one client connection until either side closes
    pub async fn serve(&self, socket: WebSocket) {
        let session_id = Uuid::new_v4();
        let (mut client_tx, mut client_rx) = socket.split();

        let upstream = match self.open_session(&mut client_rx).await {
            Ok(upstream) => upstream,
            Err(rejection) => {
                tracing::warn!(
                    %session_id,
                    code = rejection.code,
                    detail = %rejection.detail,
                    "live session rejected"
                );
                let reply = RelayReply::error(rejection.code, rejection.message);
                if let Ok(text) = serde_json::to_string(&reply) {
                    let _ = client_tx.send(ClientFrame::Text(text.into())).await;
                }
                let _ = client_tx.send(ClientFrame::Close(None)).await;
                return;
            }
        };

        let Ok(ready) = serde_json::to_string(&RelayReply::SetupComplete {}) else {
            return;
        };
        if client_tx.send(ClientFrame::Text(ready.into())).await.is_err() {
            tracing::debug!(%session_id, "client left before setup completed");
            return;
        }

        tracing::info!(%session_id, "live session started");
        Self::bridge(client_tx, client_rx, upstream).await;
        tracing::info!(%session_id, "live session ended");
    }

    /// Read the client setup, then hand off to the upstream handshake
    ///
    /// Each phase is bounded by one `handshake_timeout`.
    async fn open_session(
        &self,
        client_rx: &mut SplitStream<WebSocket>,
    ) -> std::result::Result<UpstreamStream, Rejection> {
        let setup = tokio::time::timeout(self.handshake_timeout, read_setup(client_rx))
            .await
            .map_err(|_| Rejection::bad_request("client sent no setup in time"))??;

        let Some(api_key) = &self.api_key else {
            return Err(Rejection::not_configured());
        };

        tokio::time::timeout(self.handshake_timeout, self.connect_upstream(setup, api_key))
            .await
            .map_err(|_| Rejection::unavailable("upstream handshake timed out"))?
    }

    /// Connect upstream, send the translated setup, and wait for it to be ready
    async fn connect_upstream(
        &self,
        setup: SessionSetup,
        api_key: &SecretString,
    ) -> std::result::Result<UpstreamStream, Rejection> {
        let request = upstream_request(&self.upstream_url, api_key)
            .map_err(|e| Rejection::unavailable(e.to_string()))?;

        let (mut upstream, _) = connect_async(request)
            .await
            .map_err(|e| Rejection::unavailable(format!("upstream connect failed: {e}")))?;

        let setup = serde_json::to_string(&UpstreamMessage::setup(setup, &self.assistant))
            .map_err(|e| Rejection::unavailable(e.to_string()))?;
        upstream
            .send(UpstreamFrame::Text(setup.into()))
            .await
            .map_err(|e| Rejection::unavailable(format!("upstream setup send failed: {e}")))?;

        await_upstream_ready(&mut upstream).await?;

        Ok(upstream)
    }

    /// Pump frames both ways; the first side to finish ends the session
    async fn bridge(
        mut client_tx: SplitSink<WebSocket, ClientFrame>,
        mut client_rx: SplitStream<WebSocket>,
        upstream: UpstreamStream,
    ) {
        let (mut upstream_tx, mut upstream_rx) = upstream.split();

        let mut to_upstream = tokio::spawn(async move {
            let mut sent = 0_u64;
            while let Some(Ok(frame)) = client_rx.next().await {
                match frame {
                    ClientFrame::Text(text) => match serde_json::from_str(text.as_str()) {
                        Ok(ClientMessage::RealtimeInput(input)) => {
                            let Ok(out) = serde_json::to_string(&UpstreamMessage::audio(input))
                            else {
                                continue;
                            };
                            if upstream_tx.send(UpstreamFrame::Text(out.into())).await.is_err() {
                                break;
                            }
                            sent += 1;
                        }
                        Ok(ClientMessage::Setup(_)) => {
                            tracing::debug!("ignoring repeated setup");
                        }
                        Err(e) => tracing::debug!(error = %e, "ignoring malformed client frame"),
                    },
                    ClientFrame::Close(_) => break,
                    _ => {}
                }
            }
            tracing::debug!(frames = sent, "client stream finished");
            let _ = upstream_tx.send(UpstreamFrame::Close(None)).await;
        });

        let mut to_client = tokio::spawn(async move {
            let mut forwarded = 0_u64;
            while let Some(frame) = upstream_rx.next().await {
                let frame = match frame {
                    Ok(UpstreamFrame::Close(close)) => {
                        tracing::debug!(
                            reason = close.as_ref().map(|c| c.reason.as_str()).unwrap_or_default(),
                            "upstream closed"
                        );
                        break;
                    }
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::warn!(error = %e, "upstream stream failed");
                        break;
                    }
                };
                let Some(text) = upstream_text(&frame) else {
                    continue;
                };
                if client_tx.send(ClientFrame::Text(text.into())).await.is_err() {
                    break;
                }
                forwarded += 1;
            }
            tracing::debug!(frames = forwarded, "upstream stream finished");
            let _ = client_tx.send(ClientFrame::Close(None)).await;
        });

        tokio::select! {
            _ = &mut to_upstream => to_client.abort(),
            _ = &mut to_client => to_upstream.abort(),
        }
    }
}

/// Wait for the client's opening setup message
async fn read_setup(
    client_rx: &mut SplitStream<WebSocket>,
) -> std::result::Result<SessionSetup, Rejection> {
    while let Some(frame) = client_rx.next().await {
        match frame {
            Ok(ClientFrame::Text(text)) => {
                return match serde_json::from_str(text.as_str()) {
                    Ok(ClientMessage::Setup(setup)) => Ok(setup),
                    Ok(ClientMessage::RealtimeInput(_)) => {
                        Err(Rejection::bad_request("audio before setup"))
                    }
                    Err(e) => Err(Rejection::bad_request(format!("invalid setup: {e}"))),
                };
            }
            Ok(ClientFrame::Close(_)) => break,
            Ok(_) => {}
            Err(e) => return Err(Rejection::bad_request(format!("client socket failed: {e}"))),
        }
    }
    Err(Rejection::bad_request("client closed before setup"))
}

/// Wait for upstream `setupComplete`
async fn await_upstream_ready(upstream: &mut UpstreamStream) -> std::result::Result<(), Rejection> {
    while let Some(frame) = upstream.next().await {
        let frame = frame.map_err(|e| Rejection::unavailable(format!("upstream handshake: {e}")))?;

        if let UpstreamFrame::Close(close) = &frame {
            let reason = close
                .as_ref()
                .map(|c| c.reason.as_str().to_owned())
                .unwrap_or_default();
            return Err(Rejection::unavailable(format!(
                "upstream closed during setup: {reason}"
            )));
        }

        let Some(text) = upstream_text(&frame) else {
            continue;
        };
        match ServerMessage::parse(text) {
            Ok(msg) if msg.is_setup_complete() => return Ok(()),
            Ok(ServerMessage {
                error: Some(error), ..
            }) => return Err(Rejection::unavailable(error.message)),
            Ok(_) => tracing::debug!("ignoring upstream message before setup completed"),
            Err(e) => tracing::debug!(error = %e, "ignoring malformed upstream frame"),
        }
    }
    Err(Rejection::unavailable("upstream closed during setup"))
}
