//! Per-session connection controller
//!
//! Owns the session's stream handle and its status state machine. All
//! methods are synchronous and run under the registry lock; the awaiting
//! part of a connect (the transport handshake) happens between
//! `begin_connect` and `complete_connect`.
//!
//! Every connect attempt and every explicit disconnect bumps the
//! controller's epoch. Stream events and handshake results carry the epoch
//! they were started with, so anything arriving from a superseded
//! connection is ignored.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::state::{ConnectionStateMachine, ConnectionStatus};
use crate::transport::{DuplexStream, Frame};

/// Live stream plus the task draining its events
struct ConnectionHandle {
    stream: Box<dyn DuplexStream>,
    pump: Option<JoinHandle<()>>,
}

impl ConnectionHandle {
    fn close(mut self) {
        self.stream.disconnect();
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

pub struct ConnectionController {
    state: ConnectionStateMachine,
    epoch: u64,
    handle: Option<ConnectionHandle>,
}

impl ConnectionController {
    pub fn new() -> Self {
        Self {
            state: ConnectionStateMachine::new(),
            epoch: 0,
            handle: None,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state.status()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn last_error(&self) -> Option<&str> {
        self.state.error()
    }

    /// How long the current status has held
    pub fn time_in_state(&self) -> Duration {
        self.state.time_in_state()
    }

    /// Whether a stream handle is held, open or not
    pub fn has_connection(&self) -> bool {
        self.handle.is_some()
    }

    pub fn is_stream_open(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| handle.stream.is_open())
            .unwrap_or(false)
    }

    /// Start a connect attempt.
    ///
    /// Returns the attempt's epoch, or `None` when the session is already
    /// connecting or connected. A leftover handle (a stream that outlived
    /// its status) is closed first.
    pub fn begin_connect(&mut self) -> Option<u64> {
        if self.state.is_active() {
            return None;
        }
        if let Some(stale) = self.handle.take() {
            debug!("Closing leftover stream before reconnect");
            stale.close();
        }
        self.state.start_connecting().ok()?;
        self.epoch += 1;
        Some(self.epoch)
    }

    /// Finish attempt `epoch` with a subscribed stream.
    ///
    /// `spawn_pump` is only called when the stream is accepted. A stream
    /// for a superseded attempt is disconnected immediately.
    pub fn complete_connect<F>(
        &mut self,
        epoch: u64,
        mut stream: Box<dyn DuplexStream>,
        spawn_pump: F,
    ) -> bool
    where
        F: FnOnce() -> JoinHandle<()>,
    {
        if epoch != self.epoch || self.status() != ConnectionStatus::Connecting {
            debug!(
                "Discarding stream for superseded attempt {} (current {})",
                epoch, self.epoch
            );
            stream.disconnect();
            return false;
        }
        if self.state.connect_success().is_err() {
            stream.disconnect();
            return false;
        }
        self.handle = Some(ConnectionHandle {
            stream,
            pump: Some(spawn_pump()),
        });
        true
    }

    /// Record a failed handshake for attempt `epoch`
    pub fn fail_connect(&mut self, epoch: u64, error: String) -> bool {
        if epoch != self.epoch {
            return false;
        }
        match self.state.connect_failed(error) {
            Ok(()) => true,
            Err(e) => {
                debug!("Ignoring connect failure: {}", e);
                false
            }
        }
    }

    /// Server reported an error. The stream stays open.
    pub fn on_error_frame(&mut self, message: String) -> bool {
        if !self.state.is_active() {
            return false;
        }
        self.state.disconnect(Some(message)).is_ok()
    }

    /// The stream is gone. Drops the handle.
    pub fn on_stream_closed(&mut self, reason: Option<String>) -> bool {
        if let Some(mut handle) = self.handle.take() {
            handle.stream.disconnect();
            // The pump is the caller; let it finish on its own
            handle.pump.take();
        }
        if !self.state.is_active() {
            return false;
        }
        self.state.disconnect(reason).is_ok()
    }

    /// Explicit disconnect. Invalidates any in-flight attempt and events.
    ///
    /// Returns whether anything was released or changed.
    pub fn disconnect(&mut self, reason: Option<String>) -> bool {
        self.epoch += 1;
        let had_handle = match self.handle.take() {
            Some(handle) => {
                handle.close();
                true
            }
            None => false,
        };
        let was_active = self.state.is_active() && self.state.disconnect(reason).is_ok();
        had_handle || was_active
    }

    /// Send a frame while connected.
    ///
    /// Fatal transport errors drop the session to disconnected; nothing is
    /// raised to the caller.
    pub fn send(&mut self, frame: &Frame) -> bool {
        if self.status() != ConnectionStatus::Connected {
            return false;
        }
        let Some(handle) = self.handle.as_ref() else {
            return false;
        };
        match handle.stream.send(frame) {
            Ok(()) => true,
            Err(e) if e.is_fatal() => {
                warn!("Failed to send {} frame: {}", frame.kind(), e);
                self.disconnect(Some(e.to_string()));
                false
            }
            Err(e) => {
                warn!("Dropped {} frame: {}", frame.kind(), e);
                false
            }
        }
    }
}

impl Default for ConnectionController {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionController {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            info!("Closing stream of dropped session");
            handle.close();
        }
    }
}
