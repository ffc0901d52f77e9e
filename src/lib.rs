//! vmdash-terminal - terminal session manager for the vmdash dashboard
//!
//! Keeps interactive shell sessions alive across UI navigation: each session
//! owns a duplex stream and a bounded scrollback, and widgets come and go as
//! views attach and detach.

pub mod config;
pub mod session;
pub mod transport;
pub mod widget;

#[cfg(test)]
mod testing;

pub use config::{ConfigStorage, MonitorConfig, TerminalConfig};
pub use session::{
    ConnectionStatus, Geometry, LeakMonitor, RegistrySnapshot, SessionInfo, SessionManager,
};
pub use transport::{DuplexStream, Frame, StreamConnector, StreamEvent, TransportError};
pub use widget::{Clipboard, Container, HostContainer, TerminalWidget, WidgetEvent, WidgetFactory};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging (`RUST_LOG`, default `info`). Later calls are no-ops.
pub fn init_logging() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
