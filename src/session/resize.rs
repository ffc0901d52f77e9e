//! Viewport resize coordination
//!
//! One coordinator per bound widget. It watches the container's size-change
//! notifications and funnels them through a `FitScheduler`, a single-slot
//! scheduler: the first notification arms a deadline one frame out, later
//! notifications before that deadline replace the pending fit instead of
//! queueing another one.

use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, trace};

use crate::widget::Container;

/// Default frame interval (~60 Hz)
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// Outcome of a `FitScheduler::schedule` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// Slot was empty; a fit is now pending
    Scheduled,
    /// A fit was already pending and was replaced
    Replaced,
}

/// Single-slot, frame-aligned fit scheduler
#[derive(Debug)]
pub struct FitScheduler {
    frame: Duration,
    pending: Option<Instant>,
    /// Notifications absorbed by the current slot
    coalesced: u64,
}

impl FitScheduler {
    pub fn new(frame: Duration) -> Self {
        Self {
            frame,
            pending: None,
            coalesced: 0,
        }
    }

    pub fn schedule(&mut self) -> ScheduleOutcome {
        match self.pending {
            Some(_) => {
                self.coalesced += 1;
                ScheduleOutcome::Replaced
            }
            None => {
                self.pending = Some(Instant::now() + self.frame);
                self.coalesced = 0;
                ScheduleOutcome::Scheduled
            }
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.pending
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Clear the slot if its deadline has passed. Returns whether a fit is due.
    pub fn take_due(&mut self, now: Instant) -> bool {
        match self.pending {
            Some(deadline) if deadline <= now => {
                self.pending = None;
                true
            }
            _ => false,
        }
    }

    pub fn cancel(&mut self) {
        self.pending = None;
    }

    pub fn coalesced(&self) -> u64 {
        self.coalesced
    }
}

/// Background task turning container size changes into fits
#[derive(Debug)]
pub struct ResizeCoordinator {
    task: JoinHandle<()>,
}

impl ResizeCoordinator {
    /// Start observing `container`. One fit is scheduled immediately.
    ///
    /// `on_fit` runs once per elapsed frame slot and returns `false` once
    /// the binding it serves is gone, which ends the task.
    pub fn start<F>(container: &dyn Container, frame: Duration, on_fit: F) -> Self
    where
        F: Fn() -> bool + Send + 'static,
    {
        // Subscribe before spawning so no notification is missed
        let mut changes = container.size_changes();
        let key = container.key().to_string();

        let task = tokio::spawn(async move {
            let mut scheduler = FitScheduler::new(frame);
            let mut observing = true;
            scheduler.schedule();

            loop {
                let deadline = scheduler.deadline();
                tokio::select! {
                    changed = changes.recv(), if observing => match changed {
                        Ok(()) | Err(RecvError::Lagged(_)) => {
                            if scheduler.schedule() == ScheduleOutcome::Replaced {
                                trace!("Container {} resize coalesced", key);
                            }
                        }
                        Err(RecvError::Closed) => {
                            observing = false;
                            if !scheduler.is_pending() {
                                break;
                            }
                        }
                    },
                    _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                        if !scheduler.take_due(Instant::now()) {
                            continue;
                        }
                        if !on_fit() || !observing {
                            break;
                        }
                    }
                }
            }
            debug!("Resize observer for container {} stopped", key);
        });

        Self { task }
    }

    /// Tear down the observer and drop any pending fit
    pub fn stop(&self) {
        self.task.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for ResizeCoordinator {
    fn drop(&mut self) {
        self.task.abort();
    }
}
