//! WebSocket transport to the relay

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::{Connection, EndpointRef, EventCallback, EventDispatch, StreamTransport};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::{Error, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsHalves = (SplitSink<WsStream, Message>, SplitStream<WsStream>);

/// Extract the JSON text carried by a data frame
fn frame_text(message: &Message) -> Option<&str> {
    match message {
        Message::Text(text) => Some(text.as_str()),
        Message::Binary(data) => std::str::from_utf8(data).ok(),
        _ => None,
    }
}

/// Connects to the relay over tokio-tungstenite
#[derive(Debug, Default, Clone, Copy)]
pub struct WsTransport;

impl WsTransport {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Connect, send setup, and wait for the acknowledgement
    async fn handshake(endpoint: &EndpointRef) -> Result<WsHalves> {
        let (stream, _) = connect_async(endpoint.url.as_str())
            .await
            .map_err(|e| Error::Connection(format!("cannot reach relay: {e}")))?;

        let (mut write, mut read) = stream.split();

        let setup = serde_json::to_string(&ClientMessage::Setup(endpoint.setup.clone()))?;
        write
            .send(Message::Text(setup.into()))
            .await
            .map_err(|e| Error::Connection(format!("sending setup failed: {e}")))?;

        Self::await_setup_complete(&mut read).await?;
        Ok((write, read))
    }

    /// Read until the relay acknowledges setup or refuses it
    async fn await_setup_complete(read: &mut SplitStream<WsStream>) -> Result<()> {
        while let Some(frame) = read.next().await {
            let frame = frame.map_err(|e| Error::Connection(format!("relay handshake failed: {e}")))?;

            if let Message::Close(close) = &frame {
                let reason = close
                    .as_ref()
                    .map(|c| c.reason.as_str().to_owned())
                    .unwrap_or_default();
                return Err(Error::Connection(format!(
                    "relay closed during handshake {reason}"
                )));
            }

            let Some(text) = frame_text(&frame) else {
                continue;
            };

            match ServerMessage::parse(text) {
                Ok(msg) if msg.is_setup_complete() => return Ok(()),
                Ok(ServerMessage {
                    error: Some(error), ..
                }) => {
                    return Err(Error::Connection(error.message));
                }
                Ok(_) => tracing::debug!("ignoring message before setup completed"),
                Err(e) => tracing::warn!(error = %e, "malformed handshake frame"),
            }
        }

        Err(Error::Connection(
            "relay closed during handshake".to_string(),
        ))
    }
}

#[async_trait(?Send)]
impl StreamTransport for WsTransport {
    type Connection = WsConnection;

    async fn open(&self, endpoint: &EndpointRef, on_event: EventCallback) -> Result<WsConnection> {
        // one bound covers connect and setup acknowledgement together
        let (mut write, mut read) =
            tokio::time::timeout(endpoint.handshake_timeout, Self::handshake(endpoint))
                .await
                .map_err(|_| Error::Connection("relay handshake timed out".to_string()))??;

        tracing::debug!(url = %endpoint.url, "relay connection ready");

        let dispatch = Arc::new(EventDispatch::new(on_event));
        let open = Arc::new(AtomicBool::new(true));
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let writer = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if write.send(message).await.is_err() || closing {
                    break;
                }
            }
            let _ = write.close().await;
        });

        let reader = {
            let dispatch = Arc::clone(&dispatch);
            let open = Arc::clone(&open);
            tokio::spawn(async move {
                loop {
                    let frame = tokio::select! {
                        _ = &mut shutdown_rx => return,
                        frame = read.next() => frame,
                    };

                    match frame {
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(frame)) => {
                            let Some(text) = frame_text(&frame) else {
                                continue;
                            };
                            match ServerMessage::parse(text) {
                                Ok(msg) => {
                                    for event in msg.into_events() {
                                        dispatch.message(event);
                                    }
                                }
                                Err(e) => tracing::warn!(error = %e, "skipping malformed frame"),
                            }
                        }
                        Some(Err(e)) => {
                            dispatch.error(e.to_string());
                            break;
                        }
                    }
                }

                open.store(false, Ordering::Release);
                if dispatch.closed() {
                    tracing::debug!("relay connection closed by remote");
                }
            })
        };

        Ok(WsConnection {
            dispatch,
            open,
            outbound: Some(outbound_tx),
            shutdown: Some(shutdown_tx),
            writer: Some(writer),
            reader: Some(reader),
        })
    }
}

/// Open WebSocket session; closed on drop
pub struct WsConnection {
    dispatch: Arc<EventDispatch>,
    open: Arc<AtomicBool>,
    outbound: Option<mpsc::UnboundedSender<Message>>,
    shutdown: Option<oneshot::Sender<()>>,
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
}

impl Connection for WsConnection {
    fn send(&self, message: &ClientMessage) {
        if !self.is_open() {
            return;
        }
        let Some(outbound) = &self.outbound else {
            return;
        };

        match serde_json::to_string(message) {
            Ok(text) => {
                let _ = outbound.send(Message::Text(text.into()));
            }
            Err(e) => tracing::warn!(error = %e, "failed to serialize outbound message"),
        }
    }

    fn close(&mut self) {
        self.open.store(false, Ordering::Release);

        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(outbound) = self.outbound.take() {
            let _ = outbound.send(Message::Close(None));
        }
        // writer drains the close frame on its own; reader is not needed anymore
        self.writer.take();
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }

        if self.dispatch.closed() {
            tracing::debug!("relay connection closed");
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.dispatch.is_closed()
    }
}

impl Drop for WsConnection {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_frames_carry_text() {
        let frame = Message::Binary(br#"{"setupComplete":{}}"#.to_vec().into());
        assert_eq!(frame_text(&frame), Some(r#"{"setupComplete":{}}"#));

        let invalid = Message::Binary(vec![0xff_u8, 0xfe].into());
        assert_eq!(frame_text(&invalid), None);
        assert_eq!(frame_text(&Message::Ping(Vec::new().into())), None);
    }
}
