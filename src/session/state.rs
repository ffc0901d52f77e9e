//! Connection status state machine
//!
//! ```text
//!                connect()
//!  Disconnected ───────────▶ Connecting
//!       ▲  ▲                    │
//!       │  └── failure/error ───┤
//!       │                       │ subscribed
//!       │                       ▼
//!       └── close/error/─── Connected
//!            disconnect()
//! ```
//!
//! `Disconnected → Connected` is never legal; there is no automatic retry
//! edge either, every reconnect starts from an explicit `connect()`.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Recorded connection status of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
        }
    }

    /// Whether the edge `self -> to` is allowed
    pub fn can_transition_to(&self, to: ConnectionStatus) -> bool {
        use ConnectionStatus::*;
        matches!(
            (self, to),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connected, Disconnected)
        )
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("Invalid state transition: {from} -> {to}")]
pub struct StateError {
    pub from: ConnectionStatus,
    pub to: ConnectionStatus,
}

/// Guards every status change of one session
#[derive(Debug)]
pub struct ConnectionStateMachine {
    status: ConnectionStatus,
    entered_at: Instant,
    /// Reason for the last drop to `Disconnected`, cleared on connect
    error: Option<String>,
}

impl ConnectionStateMachine {
    pub fn new() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            entered_at: Instant::now(),
            error: None,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn time_in_state(&self) -> Duration {
        self.entered_at.elapsed()
    }

    /// Connecting or connected
    pub fn is_active(&self) -> bool {
        self.status != ConnectionStatus::Disconnected
    }

    pub fn start_connecting(&mut self) -> Result<(), StateError> {
        self.transition(ConnectionStatus::Connecting)?;
        self.error = None;
        Ok(())
    }

    pub fn connect_success(&mut self) -> Result<(), StateError> {
        self.transition(ConnectionStatus::Connected)
    }

    pub fn connect_failed(&mut self, error: String) -> Result<(), StateError> {
        if self.status != ConnectionStatus::Connecting {
            return Err(StateError {
                from: self.status,
                to: ConnectionStatus::Disconnected,
            });
        }
        self.transition(ConnectionStatus::Disconnected)?;
        self.error = Some(error);
        Ok(())
    }

    /// Drop to `Disconnected` from either active state
    pub fn disconnect(&mut self, reason: Option<String>) -> Result<(), StateError> {
        self.transition(ConnectionStatus::Disconnected)?;
        self.error = reason;
        Ok(())
    }

    fn transition(&mut self, to: ConnectionStatus) -> Result<(), StateError> {
        if !self.status.can_transition_to(to) {
            return Err(StateError {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.entered_at = Instant::now();
        Ok(())
    }
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut sm = ConnectionStateMachine::new();
        assert_eq!(sm.status(), ConnectionStatus::Disconnected);
        assert!(!sm.is_active());

        sm.start_connecting().unwrap();
        assert_eq!(sm.status(), ConnectionStatus::Connecting);
        assert!(sm.is_active());

        sm.connect_success().unwrap();
        assert_eq!(sm.status(), ConnectionStatus::Connected);

        sm.disconnect(Some("stream closed".to_string())).unwrap();
        assert_eq!(sm.status(), ConnectionStatus::Disconnected);
        assert_eq!(sm.error(), Some("stream closed"));
    }

    #[test]
    fn test_never_disconnected_to_connected() {
        let mut sm = ConnectionStateMachine::new();
        let err = sm.connect_success().unwrap_err();
        assert_eq!(err.from, ConnectionStatus::Disconnected);
        assert_eq!(err.to, ConnectionStatus::Connected);
        assert_eq!(sm.status(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn test_connect_failed_records_error() {
        let mut sm = ConnectionStateMachine::new();
        sm.start_connecting().unwrap();
        sm.connect_failed("refused".to_string()).unwrap();
        assert_eq!(sm.status(), ConnectionStatus::Disconnected);
        assert_eq!(sm.error(), Some("refused"));

        // A new attempt clears the old error
        sm.start_connecting().unwrap();
        assert_eq!(sm.error(), None);
    }

    #[test]
    fn test_connect_failed_only_from_connecting() {
        let mut sm = ConnectionStateMachine::new();
        sm.start_connecting().unwrap();
        sm.connect_success().unwrap();
        assert!(sm.connect_failed("late".to_string()).is_err());
        assert_eq!(sm.status(), ConnectionStatus::Connected);
    }

    #[test]
    fn test_no_self_transitions() {
        for status in [
            ConnectionStatus::Disconnected,
            ConnectionStatus::Connecting,
            ConnectionStatus::Connected,
        ] {
            assert!(!status.can_transition_to(status));
        }
    }
}
