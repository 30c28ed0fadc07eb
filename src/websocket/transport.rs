//! Transport abstraction.
//!
//! A [`Transport`] opens one physical socket and hands back a
//! [`TransportLink`]: a sender for outbound frames, a receiver for inbound
//! events and a flag mirroring whether the socket is still open. The client
//! never touches the socket directly, which keeps the connection state machine
//! testable with the in-memory `MockTransport` (feature `testing`).

use crate::error::{RealtimeError, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use url::Url;

/// Graceful, caller-initiated close.
pub const CLOSE_NORMAL: u16 = 1000;
pub const CLOSE_NORMAL_REASON: &str = "Client disconnect";
/// Close forced after the heartbeat declared the connection dead.
pub const CLOSE_HEARTBEAT_TIMEOUT: u16 = 4000;
pub const CLOSE_HEARTBEAT_TIMEOUT_REASON: &str = "Heartbeat timeout";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Text(String),
    Close { code: u16, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Text(String),
    Closed { code: Option<u16>, reason: String },
    Error(String),
}

/// Cloneable sending half of a link.
#[derive(Debug, Clone)]
pub struct LinkHandle {
    outbound: mpsc::UnboundedSender<OutboundFrame>,
    open: Arc<AtomicBool>,
}

impl LinkHandle {
    pub fn send_text(&self, text: String) -> Result<()> {
        if !self.is_open() {
            return Err(RealtimeError::NotConnected);
        }
        self.outbound
            .send(OutboundFrame::Text(text))
            .map_err(|_| RealtimeError::NotConnected)
    }

    /// Requests a close with the given code. Safe to call more than once.
    pub fn close(&self, code: u16, reason: &str) {
        if self.open.swap(false, Ordering::SeqCst) {
            let _ = self.outbound.send(OutboundFrame::Close {
                code,
                reason: reason.to_string(),
            });
        }
    }

    /// Whether the underlying socket still reports an open transport.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.outbound.is_closed()
    }
}

/// One open socket as seen by the client.
#[derive(Debug)]
pub struct TransportLink {
    handle: LinkHandle,
    events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl TransportLink {
    pub fn new(
        outbound: mpsc::UnboundedSender<OutboundFrame>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
        open: Arc<AtomicBool>,
    ) -> Self {
        Self {
            handle: LinkHandle { outbound, open },
            events,
        }
    }

    pub fn handle(&self) -> LinkHandle {
        self.handle.clone()
    }

    pub fn send_text(&self, text: String) -> Result<()> {
        self.handle.send_text(text)
    }

    pub fn close(&self, code: u16, reason: &str) {
        self.handle.close(code, reason)
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_open()
    }

    /// Next inbound event; `None` once the transport side has gone away.
    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Opens a socket to `url`. Resolves once the socket is open, or fails if
    /// it could not be opened.
    async fn open(&self, url: &Url) -> Result<TransportLink>;
}
