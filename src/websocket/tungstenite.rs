use super::transport::{OutboundFrame, Transport, TransportEvent, TransportLink};
use crate::config::redact_token;
use crate::error::{RealtimeError, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use log::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};
use url::Url;

/// Production transport backed by `tokio-tungstenite`.
///
/// Each opened socket is split into a writer task fed by the link's outbound
/// channel and a reader task that forwards inbound frames as
/// [`TransportEvent`]s. Protocol-level pings are answered by tungstenite
/// itself while the reader is polling.
#[derive(Debug, Clone, Default)]
pub struct TungsteniteTransport;

impl TungsteniteTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for TungsteniteTransport {
    async fn open(&self, url: &Url) -> Result<TransportLink> {
        info!("Connecting to WebSocket: {}", redact_token(url));
        let (ws_stream, response) = connect_async(url.as_str())
            .await
            .map_err(|e| RealtimeError::WebsocketError(format!("WebSocket connection failed: {}", e)))?;
        info!(
            "WebSocket connected successfully. Response: {:?}",
            response.status()
        );

        let (mut write, mut read) = ws_stream.split();
        let open = Arc::new(AtomicBool::new(true));

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<OutboundFrame>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<TransportEvent>();

        // --- Writer Task ---
        tokio::spawn({
            let open = Arc::clone(&open);
            async move {
                while let Some(frame) = out_rx.recv().await {
                    let (message, closing) = match frame {
                        OutboundFrame::Text(text) => (Message::Text(text), false),
                        OutboundFrame::Close { code, reason } => (
                            Message::Close(Some(CloseFrame {
                                code: CloseCode::from(code),
                                reason: reason.into(),
                            })),
                            true,
                        ),
                    };
                    if let Err(e) = write.send(message).await {
                        error!("WebSocket send error: {}. Stopping writer task.", e);
                        break;
                    }
                    if closing {
                        break;
                    }
                }
                open.store(false, Ordering::SeqCst);
                debug!("WebSocket writer task finished.");
            }
        });

        // --- Reader Task ---
        tokio::spawn({
            let open = Arc::clone(&open);
            async move {
                loop {
                    let next = tokio::select! {
                        next = read.next() => next,
                        // The client dropped its link; nobody is listening anymore.
                        _ = event_tx.closed() => break,
                    };
                    let event = match next {
                        Some(Ok(Message::Text(text))) => TransportEvent::Text(text),
                        Some(Ok(Message::Binary(bin))) => {
                            trace!("Ignoring WS Binary frame ({} bytes)", bin.len());
                            continue;
                        }
                        Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                            trace!("Received WS control frame");
                            continue;
                        }
                        Some(Ok(Message::Frame(_))) => continue,
                        Some(Ok(Message::Close(frame))) => {
                            warn!("Received WS Close frame: {:?}", frame);
                            let (code, reason) = match frame {
                                Some(frame) => (Some(u16::from(frame.code)), frame.reason.into_owned()),
                                None => (None, String::new()),
                            };
                            TransportEvent::Closed { code, reason }
                        }
                        Some(Err(e)) => {
                            error!("WebSocket read error: {}", e);
                            TransportEvent::Error(e.to_string())
                        }
                        None => TransportEvent::Closed {
                            code: None,
                            reason: "stream ended".to_string(),
                        },
                    };
                    let terminal = !matches!(event, TransportEvent::Text(_));
                    if terminal {
                        open.store(false, Ordering::SeqCst);
                    }
                    if event_tx.send(event).is_err() || terminal {
                        break;
                    }
                }
                open.store(false, Ordering::SeqCst);
                debug!("WebSocket reader task finished.");
            }
        });

        Ok(TransportLink::new(out_tx, event_rx, open))
    }
}
