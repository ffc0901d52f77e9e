//! Terminal wire protocol
//!
//! Frames are JSON objects discriminated by `type`, exchanged as WebSocket
//! text messages with the dashboard's `/ws/terminal` endpoint:
//!
//! ```text
//! {"type":"input","data":"ls\r"}
//! {"type":"resize","payload":{"cols":120,"rows":40}}
//! {"type":"subscribe","payload":{"cols":80,"rows":24,"shell":"/bin/bash"}}
//! {"type":"output","payload":{"data":"total 0\r\n"}}
//! {"type":"error","error":"pty closed"}
//! ```

use serde::{Deserialize, Serialize};

use super::error::TransportError;
use crate::session::Geometry;

/// Payload of a `subscribe` frame (sent once per connection)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribePayload {
    pub cols: u16,
    pub rows: u16,
    pub shell: String,
}

/// Payload of an `output` frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputPayload {
    pub data: String,
}

/// A single protocol frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Keystrokes / pasted text (client -> server)
    Input { data: String },
    /// Terminal grid changed (client -> server)
    Resize { payload: Geometry },
    /// Start a shell with the given geometry (client -> server)
    Subscribe { payload: SubscribePayload },
    /// Shell output (server -> client)
    Output { payload: OutputPayload },
    /// Server-side failure (server -> client)
    Error { error: String },
}

impl Frame {
    pub fn input(data: impl Into<String>) -> Self {
        Frame::Input { data: data.into() }
    }

    pub fn resize(geometry: Geometry) -> Self {
        Frame::Resize { payload: geometry }
    }

    pub fn subscribe(geometry: Geometry, shell: impl Into<String>) -> Self {
        Frame::Subscribe {
            payload: SubscribePayload {
                cols: geometry.cols,
                rows: geometry.rows,
                shell: shell.into(),
            },
        }
    }

    pub fn output(data: impl Into<String>) -> Self {
        Frame::Output {
            payload: OutputPayload { data: data.into() },
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Frame::Error {
            error: error.into(),
        }
    }

    /// Frame type name as it appears on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Input { .. } => "input",
            Frame::Resize { .. } => "resize",
            Frame::Subscribe { .. } => "subscribe",
            Frame::Output { .. } => "output",
            Frame::Error { .. } => "error",
        }
    }

    pub fn encode(&self) -> Result<String, TransportError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self, TransportError> {
        Ok(serde_json::from_str(text)?)
    }
}
