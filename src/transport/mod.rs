//! Duplex stream transport
//!
//! The session manager only talks to the remote shell through these
//! capability traits. A `StreamConnector` performs the handshake and hands
//! back the write half (`DuplexStream`) together with a channel of inbound
//! events; the manager owns both for the lifetime of one connection.

pub mod error;
pub mod protocol;
#[cfg(feature = "websocket")]
pub mod websocket;

use async_trait::async_trait;
use tokio::sync::mpsc;

pub use error::TransportError;
pub use protocol::{Frame, OutputPayload, SubscribePayload};
#[cfg(feature = "websocket")]
pub use websocket::WebSocketConnector;

/// Inbound events delivered by a connected stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A decoded frame from the server
    Frame(Frame),
    /// The stream is gone; no further events follow
    Closed { reason: Option<String> },
}

/// Write half of a connected stream
pub trait DuplexStream: Send + Sync {
    /// Queue a frame for sending. Never blocks.
    fn send(&self, frame: &Frame) -> Result<(), TransportError>;

    /// Close the stream. Idempotent.
    fn disconnect(&mut self);

    /// Whether the underlying socket is still open
    fn is_open(&self) -> bool;
}

/// Result of a successful handshake
pub struct StreamConnection {
    pub stream: Box<dyn DuplexStream>,
    pub events: mpsc::Receiver<StreamEvent>,
}

impl std::fmt::Debug for StreamConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamConnection")
            .field("open", &self.stream.is_open())
            .finish_non_exhaustive()
    }
}

/// Opens one stream per session connection attempt
#[async_trait]
pub trait StreamConnector: Send + Sync {
    /// Establish a stream for `session_id`. Has no timeout of its own.
    async fn connect(&self, session_id: &str) -> Result<StreamConnection, TransportError>;
}
