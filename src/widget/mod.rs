//! Terminal widget capabilities
//!
//! The visual terminal emulator is an external component. The session
//! manager drives it through `TerminalWidget` and receives its keystrokes and
//! grid changes as `WidgetEvent` messages on a per-binding channel rather
//! than through registered callbacks.

pub mod container;

use tokio::sync::mpsc;

use crate::session::Geometry;

pub use container::{Container, HostContainer};

/// Widget error types
#[derive(Debug, thiserror::Error)]
pub enum WidgetError {
    #[error("Failed to create widget: {0}")]
    CreateFailed(String),

    #[error("Failed to dispose widget: {0}")]
    DisposeFailed(String),
}

/// Clipboard error types
#[derive(Debug, thiserror::Error)]
pub enum ClipboardError {
    #[error("Clipboard unavailable: {0}")]
    Unavailable(String),

    #[error("Clipboard is empty")]
    Empty,
}

/// Events a widget emits while bound
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WidgetEvent {
    /// User typed or pasted into the widget
    Data(String),
    /// The widget's grid changed size on its own
    Resize(Geometry),
}

pub type WidgetEventSender = mpsc::UnboundedSender<WidgetEvent>;

/// A terminal display bound to one container
pub trait TerminalWidget: Send {
    /// Mount into a container
    fn open(&mut self, container: &dyn Container);

    /// Render a raw output chunk
    fn write(&mut self, chunk: &str);

    /// Clear the visible screen and the widget's own scrollback
    fn clear(&mut self);

    /// Release the display. The widget is not used afterwards.
    fn dispose(&mut self) -> Result<(), WidgetError>;

    /// Resize the grid to the container and report the result, if measurable
    fn fit(&mut self) -> Option<Geometry>;

    fn focus(&mut self);

    fn has_selection(&self) -> bool;

    fn get_selection(&self) -> Option<String>;

    fn scroll_to_top(&mut self);

    fn scroll_to_bottom(&mut self);
}

/// Creates widgets on demand when a session is attached
pub trait WidgetFactory: Send + Sync {
    fn create(
        &self,
        session_id: &str,
        events: WidgetEventSender,
    ) -> Result<Box<dyn TerminalWidget>, WidgetError>;
}

/// System clipboard access
pub trait Clipboard {
    fn read_text(&self) -> Result<String, ClipboardError>;

    fn write_text(&self, text: &str) -> Result<(), ClipboardError>;
}
