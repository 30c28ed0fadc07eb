//! In-memory transport for tests.
//!
//! Every successful `open` creates a [`MockSocket`], the server-side view of
//! that connection: it records what the client sent and lets the test push
//! inbound frames, close the socket or raise an error.

use super::transport::{OutboundFrame, Transport, TransportEvent, TransportLink};
use crate::error::{RealtimeError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use url::Url;

#[derive(Debug, Default)]
struct MockState {
    urls: Vec<String>,
    sockets: Vec<MockSocket>,
    scripted_failures: VecDeque<String>,
    refuse_all: bool,
    open_delay: Duration,
}

/// Scriptable [`Transport`] that never touches the network.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The next `open` fails with `reason`. Failures queue up in order.
    pub fn fail_next_open(&self, reason: &str) {
        self.lock().scripted_failures.push_back(reason.to_string());
    }

    /// Makes every `open` fail until switched off again.
    pub fn refuse_connections(&self, refuse: bool) {
        self.lock().refuse_all = refuse;
    }

    /// Delays every `open` by `delay` (driven by tokio time).
    pub fn set_open_delay(&self, delay: Duration) {
        self.lock().open_delay = delay;
    }

    /// Number of `open` calls so far, successful or not.
    pub fn open_attempts(&self) -> usize {
        self.lock().urls.len()
    }

    /// URLs passed to `open`, in call order.
    pub fn urls(&self) -> Vec<String> {
        self.lock().urls.clone()
    }

    /// Number of sockets successfully opened.
    pub fn socket_count(&self) -> usize {
        self.lock().sockets.len()
    }

    /// Server-side handle of the `index`-th opened socket.
    pub fn socket(&self, index: usize) -> Option<MockSocket> {
        self.lock().sockets.get(index).cloned()
    }

    /// Server-side handle of the most recently opened socket.
    pub fn last_socket(&self) -> Option<MockSocket> {
        self.lock().sockets.last().cloned()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, url: &Url) -> Result<TransportLink> {
        let delay = {
            let mut state = self.lock();
            state.urls.push(url.to_string());
            state.open_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        if let Some(reason) = state.scripted_failures.pop_front() {
            return Err(RealtimeError::WebsocketError(reason));
        }
        if state.refuse_all {
            return Err(RealtimeError::WebsocketError(
                "connection refused".to_string(),
            ));
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));
        state.sockets.push(MockSocket {
            url: url.to_string(),
            outbound: Arc::new(Mutex::new(out_rx)),
            sent: Arc::new(Mutex::new(Vec::new())),
            events: event_tx,
            open: Arc::clone(&open),
        });
        Ok(TransportLink::new(out_tx, event_rx, open))
    }
}

/// Server side of one mock connection.
#[derive(Debug, Clone)]
pub struct MockSocket {
    url: String,
    outbound: Arc<Mutex<mpsc::UnboundedReceiver<OutboundFrame>>>,
    sent: Arc<Mutex<Vec<OutboundFrame>>>,
    events: mpsc::UnboundedSender<TransportEvent>,
    open: Arc<AtomicBool>,
}

impl MockSocket {
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Every frame the client has sent on this socket so far.
    pub fn sent(&self) -> Vec<OutboundFrame> {
        let mut sent = self.sent.lock().unwrap_or_else(PoisonError::into_inner);
        let mut outbound = self
            .outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while let Ok(frame) = outbound.try_recv() {
            sent.push(frame);
        }
        sent.clone()
    }

    /// Text frames sent by the client, parsed as JSON. Non-JSON text is skipped.
    pub fn sent_json(&self) -> Vec<Value> {
        self.sent()
            .into_iter()
            .filter_map(|frame| match frame {
                OutboundFrame::Text(text) => serde_json::from_str(&text).ok(),
                OutboundFrame::Close { .. } => None,
            })
            .collect()
    }

    /// Sent JSON frames whose `type` equals `kind`.
    pub fn sent_of_type(&self, kind: &str) -> Vec<Value> {
        self.sent_json()
            .into_iter()
            .filter(|v| v["type"] == kind)
            .collect()
    }

    /// The close frame sent by the client, if any.
    pub fn close_frame(&self) -> Option<(u16, String)> {
        self.sent().into_iter().find_map(|frame| match frame {
            OutboundFrame::Close { code, reason } => Some((code, reason)),
            OutboundFrame::Text(_) => None,
        })
    }

    pub fn push_text(&self, text: &str) {
        let _ = self.events.send(TransportEvent::Text(text.to_string()));
    }

    pub fn push_json(&self, value: &Value) {
        self.push_text(&value.to_string());
    }

    /// Simulates the server closing the socket.
    pub fn close(&self, code: u16, reason: &str) {
        self.open.store(false, Ordering::SeqCst);
        let _ = self.events.send(TransportEvent::Closed {
            code: Some(code),
            reason: reason.to_string(),
        });
    }

    /// Simulates a transport error on an established socket.
    pub fn fail(&self, error: &str) {
        self.open.store(false, Ordering::SeqCst);
        let _ = self.events.send(TransportEvent::Error(error.to_string()));
    }

    /// Flips the transport-level open flag without notifying the client.
    pub fn set_transport_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}
