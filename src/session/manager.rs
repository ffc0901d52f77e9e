//! Session Lifecycle Manager
//!
//! Orchestrates create / attach / detach / close on top of the registry and
//! owns the widget binding rules:
//! - A session has at most one widget, bound to exactly one container
//! - Attaching to a different container releases the previous binding first
//! - Detach releases only the widget; connection and scrollback survive
//! - Close releases everything and repairs the active session pointer
//!
//! Stream and widget events arrive on per-session channels. A pump task per
//! channel hands each message to the manager, which applies it under the
//! registry lock. Pumps hold a `Weak` reference so they never keep the
//! manager alive.

use std::sync::{Arc, Weak};

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

use super::registry::{RegistryError, SessionRegistry};
use super::resize::ResizeCoordinator;
use super::types::{Geometry, RegistrySnapshot, SessionEntry, SessionInfo, WidgetBinding};
use super::ConnectionStatus;
use crate::config::TerminalConfig;
use crate::transport::{Frame, StreamConnection, StreamConnector, StreamEvent};
use crate::widget::{
    Clipboard, ClipboardError, Container, TerminalWidget, WidgetEvent, WidgetFactory,
};

struct ManagerInner {
    registry: SessionRegistry,
    connector: Arc<dyn StreamConnector>,
    widgets: Arc<dyn WidgetFactory>,
    config: TerminalConfig,
}

/// Cheaply clonable handle to the session store and its lifecycle rules
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

enum AttachPlan {
    /// Same container; keep the binding
    Keep,
    /// Bind a fresh widget, releasing this one first
    Rebind(Option<WidgetBinding>),
}

impl SessionManager {
    pub fn new(
        config: TerminalConfig,
        connector: Arc<dyn StreamConnector>,
        widgets: Arc<dyn WidgetFactory>,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                registry: SessionRegistry::new(config.registry_options()),
                connector,
                widgets,
                config,
            }),
        }
    }

    pub fn config(&self) -> &TerminalConfig {
        &self.inner.config
    }

    pub(crate) fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }

    fn downgrade(&self) -> Weak<ManagerInner> {
        Arc::downgrade(&self.inner)
    }

    fn upgrade(inner: &Weak<ManagerInner>) -> Option<Self> {
        inner.upgrade().map(|inner| Self { inner })
    }

    /// Apply `f` to a session; unknown ids are ignored
    fn with_session<R>(&self, session_id: &str, f: impl FnOnce(&mut SessionEntry) -> R) -> Option<R> {
        match self.inner.registry.update(session_id, f) {
            Ok(result) => Some(result),
            Err(e) => {
                trace!("{}", e);
                None
            }
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Create a disconnected session at the end of the list and make it active
    pub fn create_session(&self, name: Option<&str>) -> Result<String, RegistryError> {
        self.inner.registry.create(name.map(String::from))
    }

    /// Bind a widget in `container`, replay scrollback and connect if needed
    pub async fn attach(&self, session_id: &str, container: Arc<dyn Container>) {
        let key = container.key().to_string();
        let plan = self.with_session(session_id, |entry| {
            entry.touch();
            match &entry.binding {
                Some(binding) if binding.container_key() == key => AttachPlan::Keep,
                _ => AttachPlan::Rebind(entry.binding.take()),
            }
        });

        match plan {
            None => return,
            Some(AttachPlan::Keep) => {
                debug!("Session {} already bound to container {}", session_id, key);
            }
            Some(AttachPlan::Rebind(previous)) => {
                if let Some(previous) = previous {
                    previous.release(session_id);
                }
                self.bind_widget(session_id, container);
            }
        }

        let status = self
            .inner
            .registry
            .inspect(session_id, SessionEntry::status);
        if status == Some(ConnectionStatus::Disconnected) {
            self.connect(session_id).await;
        }
    }

    fn bind_widget(&self, session_id: &str, container: Arc<dyn Container>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let mut widget = match self.inner.widgets.create(session_id, event_tx) {
            Ok(widget) => widget,
            Err(e) => {
                warn!("Session {} widget creation failed: {}", session_id, e);
                return;
            }
        };
        widget.open(container.as_ref());

        let weak = self.downgrade();
        let frame = self.inner.config.frame_interval();
        let mut pending = Some(widget);
        let mut events = Some(event_rx);

        let displaced = self
            .with_session(session_id, |entry| {
                let (Some(mut widget), Some(event_rx)) = (pending.take(), events.take()) else {
                    return None;
                };
                // Replay and install in one step so no output slips between them
                for chunk in entry.buffer.iter() {
                    widget.write(chunk);
                }
                entry.binding_epoch += 1;
                let epoch = entry.binding_epoch;
                let id = entry.id.clone();

                let events = tokio::spawn(pump_widget_events(weak.clone(), id.clone(), epoch, event_rx));
                let resize = ResizeCoordinator::start(container.as_ref(), frame, move || {
                    Self::upgrade(&weak)
                        .map(|manager| manager.fit_binding(&id, epoch))
                        .unwrap_or(false)
                });

                info!(
                    "Session {} bound to container {} (replayed {} chunks)",
                    entry.id,
                    container.key(),
                    entry.buffer.len()
                );
                // A concurrent attach may have bound in the meantime
                entry.binding.replace(WidgetBinding {
                    widget,
                    container: container.clone(),
                    epoch,
                    events,
                    resize,
                })
            })
            .flatten();

        if let Some(mut widget) = pending {
            debug!("Session {} vanished during attach", session_id);
            dispose_quietly(session_id, widget.as_mut());
            return;
        }
        if let Some(displaced) = displaced {
            debug!(
                "Session {} replaced binding in container {}",
                session_id,
                displaced.container_key()
            );
            displaced.release(session_id);
        }
    }

    /// Release the widget; the connection stays open
    pub fn detach(&self, session_id: &str) {
        let binding = self.with_session(session_id, |entry| entry.binding.take()).flatten();
        if let Some(binding) = binding {
            binding.release(session_id);
            info!("Session {} detached", session_id);
        }
    }

    /// Disconnect, release the widget and remove the session
    pub fn close(&self, session_id: &str) {
        if let Some(entry) = self.inner.registry.remove(session_id) {
            entry.release_resources();
            info!("Session {} closed", session_id);
        }
    }

    pub fn rename(&self, session_id: &str, name: &str) {
        self.inner.registry.rename(session_id, name);
    }

    pub fn set_active(&self, session_id: &str) {
        self.inner.registry.set_active(session_id);
    }

    /// Close every session and reset the registry
    pub fn dispose(&self) {
        let entries = self.inner.registry.clear();
        let count = entries.len();
        for entry in entries {
            entry.release_resources();
        }
        info!("Session manager disposed ({} sessions closed)", count);
    }

    // ========================================================================
    // Connection
    // ========================================================================

    /// Open the session's stream. No-op unless disconnected.
    pub async fn connect(&self, session_id: &str) {
        let Some(Some(epoch)) =
            self.with_session(session_id, |entry| entry.controller.begin_connect())
        else {
            debug!("Session {} connect skipped", session_id);
            return;
        };

        info!("Session {} connecting (attempt {})", session_id, epoch);

        let connection = match self.inner.connector.connect(session_id).await {
            Ok(connection) => connection,
            Err(e) => {
                warn!("Session {} connect failed: {}", session_id, e);
                self.with_session(session_id, |entry| {
                    entry.controller.fail_connect(epoch, e.to_string())
                });
                return;
            }
        };

        self.complete_connect(session_id, epoch, connection);
    }

    fn complete_connect(&self, session_id: &str, epoch: u64, connection: StreamConnection) {
        let StreamConnection { mut stream, events } = connection;

        // Only subscribe for the attempt still in flight
        let current = self.inner.registry.inspect(session_id, |entry| {
            let live = entry.controller.epoch() == epoch
                && entry.status() == ConnectionStatus::Connecting;
            live.then_some(entry.geometry)
        });
        let Some(Some(geometry)) = current else {
            debug!("Session {} dropped stream of superseded attempt {}", session_id, epoch);
            stream.disconnect();
            return;
        };

        let subscribe = Frame::subscribe(geometry, self.inner.config.shell.as_str());
        if let Err(e) = stream.send(&subscribe) {
            warn!("Session {} subscribe failed: {}", session_id, e);
            stream.disconnect();
            self.with_session(session_id, |entry| {
                entry.controller.fail_connect(epoch, e.to_string())
            });
            return;
        }

        let weak = self.downgrade();
        let mut stream = Some(stream);
        let mut events = Some(events);

        let accepted = self.with_session(session_id, |entry| {
            let (Some(stream), Some(events)) = (stream.take(), events.take()) else {
                return false;
            };
            let id = entry.id.clone();
            let accepted = entry.controller.complete_connect(epoch, stream, || {
                tokio::spawn(pump_stream_events(weak, id, epoch, events))
            });
            // Geometry may have moved while the handshake was in flight
            if accepted && entry.geometry != geometry {
                entry.controller.send(&Frame::resize(entry.geometry));
            }
            accepted
        });

        match accepted {
            Some(true) => info!("Session {} connected", session_id),
            Some(false) => debug!("Session {} dropped superseded stream", session_id),
            None => {
                if let Some(mut stream) = stream {
                    stream.disconnect();
                }
            }
        }
    }

    /// Close the stream but keep widget and scrollback
    pub fn disconnect(&self, session_id: &str) {
        let changed = self.with_session(session_id, |entry| entry.controller.disconnect(None));
        if changed == Some(true) {
            info!("Session {} disconnected", session_id);
        }
    }

    /// Drop any current stream and connect again
    pub async fn reconnect(&self, session_id: &str) {
        self.disconnect(session_id);
        self.connect(session_id).await;
    }

    fn handle_stream_event(&self, session_id: &str, epoch: u64, event: StreamEvent) {
        self.with_session(session_id, |entry| {
            if entry.controller.epoch() != epoch {
                trace!("Session {} dropped stale stream event", session_id);
                return;
            }
            match event {
                StreamEvent::Frame(Frame::Output { payload }) => {
                    entry.touch();
                    if let Some(binding) = entry.binding.as_mut() {
                        binding.widget.write(&payload.data);
                    }
                    entry.buffer.append(payload.data);
                }
                StreamEvent::Frame(Frame::Error { error }) => {
                    warn!("Session {} server error: {}", session_id, error);
                    entry.controller.on_error_frame(error);
                }
                StreamEvent::Frame(frame) => {
                    debug!("Session {} ignoring inbound {} frame", session_id, frame.kind());
                }
                StreamEvent::Closed { reason } => {
                    if entry.controller.on_stream_closed(reason.clone()) {
                        info!("Session {} stream closed: {:?}", session_id, reason);
                    }
                }
            }
        });
    }

    // ========================================================================
    // Widget-facing operations
    // ========================================================================

    fn handle_widget_event(&self, session_id: &str, epoch: u64, event: WidgetEvent) {
        self.with_session(session_id, |entry| {
            if entry.binding.as_ref().map(|b| b.epoch) != Some(epoch) {
                trace!("Session {} dropped stale widget event", session_id);
                return;
            }
            match event {
                WidgetEvent::Data(data) => {
                    entry.touch();
                    entry.controller.send(&Frame::input(data));
                }
                WidgetEvent::Resize(geometry) => {
                    apply_geometry(entry, geometry);
                }
            }
        });
    }

    /// Forward keystrokes. Returns whether a frame was sent.
    pub fn send_input(&self, session_id: &str, data: &str) -> bool {
        self.with_session(session_id, |entry| {
            entry.touch();
            entry.controller.send(&Frame::input(data))
        })
        .unwrap_or(false)
    }

    /// Clear the widget and the scrollback together
    pub fn clear(&self, session_id: &str) {
        self.with_session(session_id, |entry| {
            entry.buffer.clear();
            if let Some(binding) = entry.binding.as_mut() {
                binding.widget.clear();
            }
        });
    }

    pub fn focus(&self, session_id: &str) {
        self.with_session(session_id, |entry| {
            entry.touch();
            if let Some(binding) = entry.binding.as_mut() {
                binding.widget.focus();
            }
        });
    }

    /// Fit the widget now. Returns whether the geometry changed.
    pub fn fit(&self, session_id: &str) -> bool {
        self.with_session(session_id, fit_entry).unwrap_or(false)
    }

    /// Scheduled fit for binding `epoch`. Returns `false` once it's gone.
    fn fit_binding(&self, session_id: &str, epoch: u64) -> bool {
        self.with_session(session_id, |entry| {
            if entry.widget_for(epoch).is_none() {
                return false;
            }
            fit_entry(entry);
            true
        })
        .unwrap_or(false)
    }

    pub fn scroll_to_top(&self, session_id: &str) {
        self.with_widget(session_id, |widget| widget.scroll_to_top());
    }

    pub fn scroll_to_bottom(&self, session_id: &str) {
        self.with_widget(session_id, |widget| widget.scroll_to_bottom());
    }

    pub fn get_selection(&self, session_id: &str) -> Option<String> {
        self.with_widget(session_id, |widget| {
            if widget.has_selection() {
                widget.get_selection()
            } else {
                None
            }
        })
        .flatten()
        .filter(|text| !text.is_empty())
    }

    fn with_widget<R>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut Box<dyn TerminalWidget>) -> R,
    ) -> Option<R> {
        self.with_session(session_id, |entry| {
            entry.binding.as_mut().map(|binding| f(&mut binding.widget))
        })
        .flatten()
    }

    /// Copy the current selection. Returns `Ok(false)` when nothing is selected.
    pub fn copy_selection(
        &self,
        session_id: &str,
        clipboard: &dyn Clipboard,
    ) -> Result<bool, ClipboardError> {
        match self.get_selection(session_id) {
            Some(text) => {
                clipboard.write_text(&text)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Send clipboard text as input. Returns whether it was sent.
    pub fn paste(&self, session_id: &str, clipboard: &dyn Clipboard) -> Result<bool, ClipboardError> {
        let text = clipboard.read_text()?;
        if text.is_empty() {
            return Err(ClipboardError::Empty);
        }
        Ok(self.send_input(session_id, &text))
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn session(&self, session_id: &str) -> Option<SessionInfo> {
        self.inner.registry.get(session_id)
    }

    /// Sessions in creation order
    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.inner.registry.list()
    }

    pub fn active_session_id(&self) -> Option<String> {
        self.inner.registry.active_session_id()
    }

    pub fn connected_count(&self) -> usize {
        self.inner.registry.connected_count()
    }

    pub fn session_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Buffered scrollback, oldest first
    pub fn scrollback(&self, session_id: &str) -> Option<Vec<String>> {
        self.inner
            .registry
            .inspect(session_id, |entry| entry.buffer.snapshot())
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        self.inner.registry.snapshot()
    }

    /// Feed of registry snapshots, republished on structural and status changes
    pub fn subscribe(&self) -> watch::Receiver<RegistrySnapshot> {
        self.inner.registry.subscribe()
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("sessions", &self.inner.registry.len())
            .finish_non_exhaustive()
    }
}

/// Store a new geometry and propagate it while connected
fn apply_geometry(entry: &mut SessionEntry, geometry: Geometry) -> bool {
    if entry.geometry == geometry {
        return false;
    }
    debug!("Session {} resized {} -> {}", entry.id, entry.geometry, geometry);
    entry.geometry = geometry;
    if entry.is_connected() {
        entry.controller.send(&Frame::resize(geometry));
    }
    true
}

fn fit_entry(entry: &mut SessionEntry) -> bool {
    let measured = entry.binding.as_mut().and_then(|binding| binding.widget.fit());
    match measured {
        Some(geometry) => apply_geometry(entry, geometry),
        None => false,
    }
}

fn dispose_quietly(session_id: &str, widget: &mut dyn TerminalWidget) {
    if let Err(e) = widget.dispose() {
        warn!("Session {} widget dispose failed: {}", session_id, e);
    }
}

async fn pump_stream_events(
    inner: Weak<ManagerInner>,
    session_id: String,
    epoch: u64,
    mut events: mpsc::Receiver<StreamEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(manager) = SessionManager::upgrade(&inner) else {
            return;
        };
        let closed = matches!(event, StreamEvent::Closed { .. });
        manager.handle_stream_event(&session_id, epoch, event);
        if closed {
            return;
        }
    }
    // Sender dropped without a close event
    if let Some(manager) = SessionManager::upgrade(&inner) {
        manager.handle_stream_event(
            &session_id,
            epoch,
            StreamEvent::Closed {
                reason: Some("stream ended".to_string()),
            },
        );
    }
}

async fn pump_widget_events(
    inner: Weak<ManagerInner>,
    session_id: String,
    epoch: u64,
    mut events: mpsc::UnboundedReceiver<WidgetEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(manager) = SessionManager::upgrade(&inner) else {
            return;
        };
        manager.handle_widget_event(&session_id, epoch, event);
    }
}
