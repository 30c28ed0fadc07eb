use thiserror::Error;
use url::ParseError;

pub type Result<T, E = RealtimeError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum RealtimeError {
    #[error("WebSocket Error: {0}")]
    WebsocketError(String),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Connection attempt cancelled by disconnect()")]
    Cancelled,

    #[error("JSON Serialization/Deserialization Error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("URL Parsing Error: {0}")]
    UrlParseError(#[from] ParseError),
}
