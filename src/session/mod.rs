//! Session Management Module
//!
//! Terminal sessions that outlive the views displaying them:
//! - Registry of sessions with an active-session pointer and a snapshot feed
//! - Connection state machine per session (no automatic retry)
//! - Bounded scrollback replayed when a widget is bound again
//! - Frame-coalesced resize propagation
//! - Leak/health auditing of stream and widget ownership

pub mod connection;
pub mod health;
pub mod manager;
pub mod registry;
pub mod resize;
pub mod scroll_buffer;
pub mod state;
pub mod types;

pub use connection::ConnectionController;
pub use health::{LeakMonitor, LeakReport, SessionHealthRecord, SweepCallback, ValidationSummary};
pub use manager::SessionManager;
pub use registry::{RegistryError, RegistryOptions, SessionRegistry};
pub use resize::{FitScheduler, ResizeCoordinator, ScheduleOutcome, DEFAULT_FRAME_INTERVAL};
pub use scroll_buffer::{ScrollBuffer, DEFAULT_MAX_CHUNKS};
pub use state::{ConnectionStateMachine, ConnectionStatus, StateError};
pub use types::{Geometry, RegistrySnapshot, SessionEntry, SessionInfo, WidgetBinding};
