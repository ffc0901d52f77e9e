//! Configuration Types

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::session::{Geometry, RegistryOptions, DEFAULT_FRAME_INTERVAL, DEFAULT_MAX_CHUNKS};

/// Current config file format version
pub const CONFIG_VERSION: u32 = 1;

/// Terminal subsystem configuration (`terminal.json`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    /// Output chunks kept per session for replay
    #[serde(default = "default_scrollback_limit")]
    pub scrollback_limit: usize,
    #[serde(default = "default_cols")]
    pub default_cols: u16,
    #[serde(default = "default_rows")]
    pub default_rows: u16,
    /// Shell requested in the subscribe handshake
    #[serde(default = "default_shell")]
    pub shell: String,
    /// Resize coalescing window
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
    /// Cap on open sessions; unbounded when absent
    #[serde(default)]
    pub max_sessions: Option<usize>,
    /// Inbound stream event buffer per connection
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
    #[serde(default)]
    pub monitor: MonitorConfig,
}

fn default_version() -> u32 {
    CONFIG_VERSION
}

fn default_scrollback_limit() -> usize {
    DEFAULT_MAX_CHUNKS
}

fn default_cols() -> u16 {
    Geometry::default().cols
}

fn default_rows() -> u16 {
    Geometry::default().rows
}

fn default_shell() -> String {
    "/bin/bash".to_string()
}

fn default_frame_interval_ms() -> u64 {
    DEFAULT_FRAME_INTERVAL.as_millis() as u64
}

fn default_event_channel_capacity() -> usize {
    256
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            scrollback_limit: default_scrollback_limit(),
            default_cols: default_cols(),
            default_rows: default_rows(),
            shell: default_shell(),
            frame_interval_ms: default_frame_interval_ms(),
            max_sessions: None,
            event_channel_capacity: default_event_channel_capacity(),
            monitor: MonitorConfig::default(),
        }
    }
}

impl TerminalConfig {
    pub fn default_geometry(&self) -> Geometry {
        Geometry::new(self.default_cols, self.default_rows)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn registry_options(&self) -> RegistryOptions {
        RegistryOptions {
            scrollback_limit: self.scrollback_limit,
            default_geometry: self.default_geometry(),
            max_sessions: self.max_sessions,
        }
    }
}

/// Leak monitor thresholds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorConfig {
    /// Sweep interval for `start_monitoring`
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Inactivity before a disconnected session holding resources is flagged
    #[serde(default = "default_stale_warning_secs")]
    pub stale_warning_secs: u64,
    /// Inactivity before `cleanup_stale` closes a disconnected session
    #[serde(default = "default_stale_cleanup_secs")]
    pub stale_cleanup_secs: u64,
    /// Validation summaries kept in history
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

fn default_interval_ms() -> u64 {
    5000
}

fn default_stale_warning_secs() -> u64 {
    5 * 60
}

fn default_stale_cleanup_secs() -> u64 {
    10 * 60
}

fn default_history_limit() -> usize {
    100
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            stale_warning_secs: default_stale_warning_secs(),
            stale_cleanup_secs: default_stale_cleanup_secs(),
            history_limit: default_history_limit(),
        }
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn stale_warning(&self) -> Duration {
        Duration::from_secs(self.stale_warning_secs)
    }

    pub fn stale_cleanup(&self) -> Duration {
        Duration::from_secs(self.stale_cleanup_secs)
    }
}
