//! Session Leak / Health Monitor
//!
//! Audits the registry for sessions whose recorded state disagrees with the
//! resources they hold:
//! - **Orphaned**: the stream reports open while the status is disconnected
//! - **Stale**: disconnected, still holding a widget or stream, and inactive
//!   past the warning threshold
//! - **Expired**: disconnected and inactive past the cleanup threshold
//!
//! Connects have no timeout of their own, so a session stuck in
//! `connecting` past the warning threshold is reported here as well.
//!
//! The tags are independent; a session can carry several. The monitor
//! never runs on its own: sweeps happen on `validate_all` or while
//! `start_monitoring` is active.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{info, warn};

use super::manager::SessionManager;
use super::state::ConnectionStatus;
use super::types::SessionEntry;
use crate::config::MonitorConfig;

/// Per-session audit record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionHealthRecord {
    pub session_id: String,
    pub name: String,
    pub is_stream_open: bool,
    /// A stream handle is held, open or not
    pub has_connection: bool,
    pub has_widget: bool,
    pub has_container: bool,
    pub connection_status: ConnectionStatus,
    pub last_active_at: DateTime<Utc>,
    pub inactive_secs: u64,
    /// Time spent in `connection_status`
    pub state_secs: u64,
    pub orphaned: bool,
    pub stale: bool,
    pub expired: bool,
    /// Connecting for longer than the warning threshold
    pub stuck_connecting: bool,
}

impl SessionHealthRecord {
    fn from_entry(entry: &SessionEntry, config: &MonitorConfig, now: DateTime<Utc>) -> Self {
        let inactive = (now - entry.last_active_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        let status = entry.status();
        let in_state = entry.controller.time_in_state();
        let disconnected = status == ConnectionStatus::Disconnected;
        let is_stream_open = entry.controller.is_stream_open();
        let has_connection = entry.controller.has_connection();
        let has_widget = entry.binding.is_some();
        // A container is only ever referenced through the binding
        let has_container = has_widget;

        Self {
            session_id: entry.id.clone(),
            name: entry.name.clone(),
            is_stream_open,
            has_connection,
            has_widget,
            has_container,
            connection_status: status,
            last_active_at: entry.last_active_at,
            inactive_secs: inactive.as_secs(),
            state_secs: in_state.as_secs(),
            orphaned: disconnected && is_stream_open,
            stale: disconnected
                && (has_widget || has_connection)
                && inactive >= config.stale_warning(),
            expired: disconnected && inactive >= config.stale_cleanup(),
            stuck_connecting: status == ConnectionStatus::Connecting
                && in_state >= config.stale_warning(),
        }
    }

    /// Neither orphaned nor stale
    pub fn is_clean(&self) -> bool {
        !self.orphaned && !self.stale
    }

    pub fn is_properly_closed(&self) -> bool {
        self.connection_status == ConnectionStatus::Disconnected
            && !self.is_stream_open
            && !self.has_widget
            && !self.has_container
    }
}

/// Result of one sweep
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationSummary {
    pub validated_at: DateTime<Utc>,
    pub total_sessions: usize,
    /// Sessions whose stream reports open
    pub active_connections: usize,
    pub orphaned_connections: usize,
    pub stale_sessions: usize,
    pub properly_closed_sessions: usize,
    pub sessions: Vec<SessionHealthRecord>,
    pub warnings: Vec<String>,
}

impl ValidationSummary {
    fn from_records(sessions: Vec<SessionHealthRecord>) -> Self {
        let mut warnings = Vec::new();
        for record in &sessions {
            if record.orphaned {
                warnings.push(format!(
                    "Session {} has an open stream but is marked disconnected",
                    record.session_id
                ));
            }
            if record.stale {
                warnings.push(format!(
                    "Session {} still holds resources but has been disconnected for {}s",
                    record.session_id, record.inactive_secs
                ));
            }
            if record.stuck_connecting {
                warnings.push(format!(
                    "Session {} has been connecting for {}s",
                    record.session_id, record.state_secs
                ));
            }
        }

        Self {
            validated_at: Utc::now(),
            total_sessions: sessions.len(),
            active_connections: sessions.iter().filter(|s| s.is_stream_open).count(),
            orphaned_connections: sessions.iter().filter(|s| s.orphaned).count(),
            stale_sessions: sessions.iter().filter(|s| s.stale).count(),
            properly_closed_sessions: sessions.iter().filter(|s| s.is_properly_closed()).count(),
            sessions,
            warnings,
        }
    }
}

/// Outcome of `check_for_leaks`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeakReport {
    pub has_leaks: bool,
    pub details: Vec<String>,
}

/// Invoked after every periodic sweep
pub type SweepCallback = Box<dyn Fn(&ValidationSummary) + Send + Sync>;

struct MonitorInner {
    manager: SessionManager,
    config: MonitorConfig,
    history: Mutex<VecDeque<ValidationSummary>>,
}

impl MonitorInner {
    fn records(&self) -> Vec<SessionHealthRecord> {
        let now = Utc::now();
        self.manager
            .registry()
            .inspect_all(|entry| SessionHealthRecord::from_entry(entry, &self.config, now))
    }

    fn validate_all(&self) -> ValidationSummary {
        let summary = ValidationSummary::from_records(self.records());

        let mut history = self.history.lock();
        history.push_back(summary.clone());
        while history.len() > self.config.history_limit {
            history.pop_front();
        }
        summary
    }
}

/// Registry auditor with optional periodic sweeps
pub struct LeakMonitor {
    inner: Arc<MonitorInner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LeakMonitor {
    pub fn new(manager: SessionManager) -> Self {
        let config = manager.config().monitor.clone();
        Self::with_config(manager, config)
    }

    pub fn with_config(manager: SessionManager, config: MonitorConfig) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                manager,
                config,
                history: Mutex::new(VecDeque::new()),
            }),
            task: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.inner.config
    }

    /// Audit every session and record the summary in history
    pub fn validate_all(&self) -> ValidationSummary {
        self.inner.validate_all()
    }

    /// Sweep and describe every mismatch found
    pub fn check_for_leaks(&self) -> LeakReport {
        let summary = self.validate_all();
        let mut details = Vec::new();

        if summary.orphaned_connections > 0 {
            details.push(format!(
                "Found {} orphaned stream connections",
                summary.orphaned_connections
            ));
        }
        for record in &summary.sessions {
            if record.orphaned {
                details.push(format!(
                    "Session {} marked as disconnected but its stream is still open",
                    record.session_id
                ));
            }
            if record.stale {
                details.push(format!(
                    "Session {} has been inactive for {} minutes but resources were not released",
                    record.session_id,
                    record.inactive_secs / 60
                ));
            }
        }

        LeakReport {
            has_leaks: !details.is_empty(),
            details,
        }
    }

    /// Force-disconnect every orphaned session. Returns how many were cleaned.
    pub fn cleanup_orphaned_connections(&self) -> usize {
        let orphaned: Vec<String> = self
            .inner
            .records()
            .into_iter()
            .filter(|record| record.orphaned)
            .map(|record| record.session_id)
            .collect();

        for session_id in &orphaned {
            warn!("Cleaning up orphaned connection for session {}", session_id);
            self.inner.manager.disconnect(session_id);
        }
        orphaned.len()
    }

    /// Close every disconnected session inactive past the cleanup threshold
    pub fn cleanup_stale(&self) -> usize {
        let expired: Vec<String> = self
            .inner
            .records()
            .into_iter()
            .filter(|record| record.expired)
            .map(|record| record.session_id)
            .collect();

        for session_id in &expired {
            warn!("Removing long-inactive session {}", session_id);
            self.inner.manager.close(session_id);
        }
        expired.len()
    }

    /// Sweep every `interval` until stopped. Replaces a running sweep.
    pub fn start_monitoring(&self, interval: Duration, callback: Option<SweepCallback>) {
        self.stop_monitoring();

        let inner = self.inner.clone();
        let period = interval.max(Duration::from_millis(1));
        info!("Starting session monitoring every {:?}", period);

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let summary = inner.validate_all();
                info!(
                    "Session sweep: {} total, {} open streams, {} orphaned, {} stale, {} properly closed",
                    summary.total_sessions,
                    summary.active_connections,
                    summary.orphaned_connections,
                    summary.stale_sessions,
                    summary.properly_closed_sessions
                );
                for warning in &summary.warnings {
                    warn!("{}", warning);
                }
                if let Some(callback) = &callback {
                    callback(&summary);
                }
            }
        });

        *self.task.lock() = Some(handle);
    }

    pub fn stop_monitoring(&self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
            info!("Stopped session monitoring");
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Recorded summaries, oldest first
    pub fn history(&self) -> Vec<ValidationSummary> {
        self.inner.history.lock().iter().cloned().collect()
    }

    pub fn clear_history(&self) {
        self.inner.history.lock().clear();
    }
}

impl Drop for LeakMonitor {
    fn drop(&mut self) {
        if let Some(handle) = self.task.get_mut().take() {
            handle.abort();
        }
    }
}
