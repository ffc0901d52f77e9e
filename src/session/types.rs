//! Session Types and Data Structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::connection::ConnectionController;
use super::resize::ResizeCoordinator;
use super::scroll_buffer::ScrollBuffer;
use super::state::ConnectionStatus;
use crate::widget::{Container, TerminalWidget};

/// Terminal grid size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Geometry {
    pub cols: u16,
    pub rows: u16,
}

impl Geometry {
    pub const fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }
}

impl Default for Geometry {
    fn default() -> Self {
        Self::new(80, 24)
    }
}

impl std::fmt::Display for Geometry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.cols, self.rows)
    }
}

/// A widget mounted in a container, plus the tasks that serve it
pub struct WidgetBinding {
    pub widget: Box<dyn TerminalWidget>,
    pub container: Arc<dyn Container>,
    /// Binding generation; widget events tagged with an older one are dropped
    pub epoch: u64,
    /// Drains the widget's event channel
    pub events: JoinHandle<()>,
    pub resize: ResizeCoordinator,
}

impl WidgetBinding {
    pub fn container_key(&self) -> &str {
        self.container.key()
    }

    /// Tear down the binding. Disposal failures are logged, never propagated.
    pub fn release(mut self, session_id: &str) {
        self.resize.stop();
        self.events.abort();
        if let Err(e) = self.widget.dispose() {
            warn!("Session {} widget dispose failed: {}", session_id, e);
        }
        debug!(
            "Session {} released widget from container {}",
            session_id,
            self.container.key()
        );
    }
}

/// A session entry in the registry
pub struct SessionEntry {
    /// Unique session ID
    pub id: String,
    /// Display name
    pub name: String,
    /// Creation sequence (iteration order)
    pub order: u64,
    /// Current terminal geometry
    pub geometry: Geometry,
    /// Output history replayed on attach
    pub buffer: ScrollBuffer,
    /// Connection state and stream handle
    pub controller: ConnectionController,
    /// Bound widget, if attached
    pub binding: Option<WidgetBinding>,
    /// Incremented on every bind
    pub binding_epoch: u64,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

impl SessionEntry {
    pub fn new(id: String, name: String, order: u64, geometry: Geometry, scrollback: usize) -> Self {
        let now = Utc::now();
        Self {
            id,
            name,
            order,
            geometry,
            buffer: ScrollBuffer::with_capacity(scrollback),
            controller: ConnectionController::new(),
            binding: None,
            binding_epoch: 0,
            created_at: now,
            last_active_at: now,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.controller.status()
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    /// Record user or stream activity
    pub fn touch(&mut self) {
        self.last_active_at = Utc::now();
    }

    /// The bound widget, if its binding is still `epoch`
    pub fn widget_for(&mut self, epoch: u64) -> Option<&mut Box<dyn TerminalWidget>> {
        self.binding
            .as_mut()
            .filter(|binding| binding.epoch == epoch)
            .map(|binding| &mut binding.widget)
    }

    /// Drop the connection and the widget. Used once the entry has left the registry.
    pub fn release_resources(mut self) {
        self.controller.disconnect(None);
        if let Some(binding) = self.binding.take() {
            binding.release(&self.id);
        }
    }
}

/// Serializable session info for subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub name: String,
    pub status: ConnectionStatus,
    pub geometry: Geometry,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub order: u64,
    /// Whether a widget is bound
    pub attached: bool,
    pub container_key: Option<String>,
    pub stream_open: bool,
    pub buffered_chunks: usize,
    /// Reason for the last drop to disconnected
    pub last_error: Option<String>,
}

impl From<&SessionEntry> for SessionInfo {
    fn from(entry: &SessionEntry) -> Self {
        Self {
            id: entry.id.clone(),
            name: entry.name.clone(),
            status: entry.status(),
            geometry: entry.geometry,
            created_at: entry.created_at,
            last_active_at: entry.last_active_at,
            order: entry.order,
            attached: entry.binding.is_some(),
            container_key: entry
                .binding
                .as_ref()
                .map(|binding| binding.container_key().to_string()),
            stream_open: entry.controller.is_stream_open(),
            buffered_chunks: entry.buffer.len(),
            last_error: entry.controller.last_error().map(String::from),
        }
    }
}

/// Registry state published to subscribers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySnapshot {
    /// Bumped on every publish
    pub revision: u64,
    /// Sessions in creation order
    pub sessions: Vec<SessionInfo>,
    pub active_session_id: Option<String>,
    pub connected_count: usize,
}

impl RegistrySnapshot {
    pub fn session(&self, id: &str) -> Option<&SessionInfo> {
        self.sessions.iter().find(|s| s.id == id)
    }

    pub fn names(&self) -> Vec<&str> {
        self.sessions.iter().map(|s| s.name.as_str()).collect()
    }
}
