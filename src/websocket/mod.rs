//! WebSocket client implementation for the orchestrator's real-time channel.
//!
//! [`RealtimeClient`] owns exactly one physical connection and multiplexes any
//! number of logical channel subscriptions over it.
//!
//! # Architecture
//!
//! - [`backoff`]: exponential reconnect delays and the attempt counter
//! - [`heartbeat`]: ping/pong liveness detection while connected
//! - [`router`]: envelope parsing and dispatch to typed and catch-all handlers
//! - [`subscriptions`]: channels re-announced after every (re)connection
//! - [`queue`]: messages sent while offline, flushed in order on connect
//! - [`transport`]: the socket seam, with [`TungsteniteTransport`] for real
//!   connections and `MockTransport` (feature `testing`) for tests
//!
//! # Usage
//!
//! ```no_run
//! use orchestrator_realtime::config::ClientConfig;
//! use orchestrator_realtime::websocket::RealtimeClient;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = RealtimeClient::new(ClientConfig::default().with_url("wss://orchestrator.example.com/ws"));
//!
//!     // Handlers and subscriptions can be set up before connecting.
//!     let _unregister = client.on("task:update", |payload, envelope| {
//!         println!("[{:?}] task update: {}", envelope.channel, payload);
//!     });
//!     client.subscribe("tasks");
//!
//!     // Queued until the socket is open.
//!     client.send(&json!({"type": "task:list"})).expect("Failed to encode");
//!
//!     if let Err(e) = client.connect(Some("token")).await {
//!         eprintln!("Initial connection failed, retrying in background: {}", e);
//!     }
//!
//!     tokio::signal::ctrl_c().await.expect("Failed to listen for ctrl+c");
//!     client.disconnect();
//! }
//! ```
//!
//! # Reconnection Behavior
//!
//! - Delay before attempt `n`: `min(initial * 2^(n-1), max)`, 1s/30s by default
//! - Gives up after 15 failed retries and settles in `Disconnected`
//!   ([`DisconnectReason::RetriesExhausted`](crate::types::DisconnectReason))
//! - Every channel is re-subscribed after a reconnection, then queued
//!   messages are flushed
//! - A heartbeat silent for `interval + timeout` forces a close with code 4000
//!
//! # Message Handling
//!
//! Handlers run on the connection task, in registration order. A handler that
//! panics is logged and does not affect the other handlers. Handlers should be
//! quick to avoid delaying the read loop.

pub mod backoff;
pub mod client;
pub mod heartbeat;
#[cfg(any(test, feature = "testing"))]
pub mod mock;
pub mod queue;
pub mod router;
pub mod subscriptions;
pub mod transport;
pub mod tungstenite;

// Re-export the client types for easier access
pub use client::{RealtimeClient, Unregister};
#[cfg(any(test, feature = "testing"))]
pub use mock::{MockSocket, MockTransport};
pub use transport::{Transport, TransportEvent, TransportLink};
pub use tungstenite::TungsteniteTransport;
