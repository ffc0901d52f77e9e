//! Transport error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Stream closed")]
    Closed,

    #[error("Protocol error: {0}")]
    Protocol(#[from] serde_json::Error),
}

impl TransportError {
    /// Whether the stream is unusable after this error
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TransportError::Protocol(_))
    }
}
