pub mod config;
pub mod error;
pub mod types;
pub mod websocket;
pub use config::ClientConfig;
pub use error::{RealtimeError, Result};
pub use types::{ConnectionState, DisconnectReason, Envelope};
pub use websocket::RealtimeClient;
