//! WebSocket stream transport
//!
//! Client side of the dashboard's terminal endpoint. Each `connect` opens a
//! dedicated socket (terminal streams are never shared between sessions),
//! then splits it into a writer task fed by an unbounded queue and a reader
//! task that decodes text frames into `StreamEvent`s.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use super::{DuplexStream, Frame, StreamConnection, StreamConnector, StreamEvent, TransportError};

/// Inbound event channel capacity
const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Connector for `ws://` / `wss://` terminal endpoints
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
    event_capacity: usize,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Override the inbound event channel capacity
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl StreamConnector for WebSocketConnector {
    async fn connect(&self, session_id: &str) -> Result<StreamConnection, TransportError> {
        debug!("Session {} opening WebSocket {}", session_id, self.url);

        let (socket, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        let (mut sink, mut source) = socket.split();

        let open = Arc::new(AtomicBool::new(true));
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        let (event_tx, event_rx) = mpsc::channel::<StreamEvent>(self.event_capacity);

        // Write pump (session -> server)
        let open_write = open.clone();
        let write_id = session_id.to_string();
        tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if let Err(e) = sink.send(message).await {
                    warn!("Session {} WebSocket write failed: {}", write_id, e);
                    break;
                }
                if closing {
                    break;
                }
            }
            open_write.store(false, Ordering::SeqCst);
            let _ = sink.close().await;
            debug!("Session {} write pump terminated", write_id);
        });

        // Read pump (server -> session)
        let open_read = open.clone();
        let read_id = session_id.to_string();
        tokio::spawn(async move {
            let reason = loop {
                match source.next().await {
                    Some(Ok(Message::Text(text))) => match Frame::decode(&text) {
                        Ok(frame) => {
                            if event_tx.send(StreamEvent::Frame(frame)).await.is_err() {
                                // Session side dropped the receiver
                                break None;
                            }
                        }
                        Err(e) => warn!("Session {} dropped undecodable frame: {}", read_id, e),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        break frame.map(|f| f.reason.to_string()).filter(|r| !r.is_empty());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break Some(e.to_string()),
                    None => break None,
                }
            };
            open_read.store(false, Ordering::SeqCst);
            debug!("Session {} read pump terminated: {:?}", read_id, reason);
            let _ = event_tx.send(StreamEvent::Closed { reason }).await;
        });

        info!("Session {} WebSocket connected", session_id);

        Ok(StreamConnection {
            stream: Box::new(WebSocketDuplex { out_tx, open }),
            events: event_rx,
        })
    }
}

/// Write half handed to the connection controller
struct WebSocketDuplex {
    out_tx: mpsc::UnboundedSender<Message>,
    open: Arc<AtomicBool>,
}

impl DuplexStream for WebSocketDuplex {
    fn send(&self, frame: &Frame) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        let text = frame.encode()?;
        self.out_tx
            .send(Message::Text(text))
            .map_err(|_| TransportError::Closed)
    }

    fn disconnect(&mut self) {
        if self.open.swap(false, Ordering::SeqCst) {
            let _ = self.out_tx.send(Message::Close(None));
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}
