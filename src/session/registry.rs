//! Session Registry
//!
//! Canonical store of session id -> session state plus the active-session
//! pointer. All state sits behind one `parking_lot::Mutex`; callers mutate
//! through short closures that must not await or call back into the
//! registry. Structural changes (create, remove, rename, active switch) and
//! any change to a session's status, geometry, binding, stream or error
//! republish a `RegistrySnapshot` on a `watch` channel. Activity timestamps
//! and buffer depth alone do not; they ride along with the next publish.

use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::watch;
use tracing::{debug, info};

use super::state::ConnectionStatus;
use super::types::{Geometry, RegistrySnapshot, SessionEntry, SessionInfo};

/// Registry error types
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Session limit reached: {current}/{max} sessions open")]
    SessionLimitReached { current: usize, max: usize },

    #[error("Session not found: {0}")]
    SessionNotFound(String),
}

/// Registry construction parameters
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    pub scrollback_limit: usize,
    pub default_geometry: Geometry,
    pub max_sessions: Option<usize>,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            scrollback_limit: super::scroll_buffer::DEFAULT_MAX_CHUNKS,
            default_geometry: Geometry::default(),
            max_sessions: None,
        }
    }
}

/// The part of an entry whose change warrants a republish
#[derive(PartialEq, Eq)]
struct Published {
    status: ConnectionStatus,
    geometry: Geometry,
    binding: Option<u64>,
    stream_open: bool,
    last_error: Option<String>,
}

impl Published {
    fn of(entry: &SessionEntry) -> Self {
        Self {
            status: entry.status(),
            geometry: entry.geometry,
            binding: entry.binding.as_ref().map(|binding| binding.epoch),
            stream_open: entry.controller.is_stream_open(),
            last_error: entry.controller.last_error().map(String::from),
        }
    }
}

#[derive(Default)]
struct RegistryState {
    sessions: HashMap<String, SessionEntry>,
    active_session_id: Option<String>,
    /// Source of default names and iteration order; reset only by `clear`
    counter: u64,
    revision: u64,
}

impl RegistryState {
    fn ordered(&self) -> Vec<&SessionEntry> {
        let mut entries: Vec<_> = self.sessions.values().collect();
        entries.sort_by_key(|entry| entry.order);
        entries
    }

    /// Earliest remaining session by creation order
    fn first_id(&self) -> Option<String> {
        self.sessions
            .values()
            .min_by_key(|entry| entry.order)
            .map(|entry| entry.id.clone())
    }

    fn snapshot(&self) -> RegistrySnapshot {
        let sessions: Vec<SessionInfo> = self.ordered().into_iter().map(SessionInfo::from).collect();
        let connected_count = sessions
            .iter()
            .filter(|s| s.status == ConnectionStatus::Connected)
            .count();
        RegistrySnapshot {
            revision: self.revision,
            sessions,
            active_session_id: self.active_session_id.clone(),
            connected_count,
        }
    }
}

pub struct SessionRegistry {
    state: Mutex<RegistryState>,
    feed: watch::Sender<RegistrySnapshot>,
    options: RegistryOptions,
}

impl SessionRegistry {
    pub fn new(options: RegistryOptions) -> Self {
        let (feed, _) = watch::channel(RegistrySnapshot::default());
        Self {
            state: Mutex::new(RegistryState::default()),
            feed,
            options,
        }
    }

    pub fn options(&self) -> &RegistryOptions {
        &self.options
    }

    fn publish(&self, state: &mut RegistryState) {
        state.revision += 1;
        self.feed.send_replace(state.snapshot());
    }

    /// Insert a new disconnected session at the end and make it active
    pub fn create(&self, name: Option<String>) -> Result<String, RegistryError> {
        let mut state = self.state.lock();

        if let Some(max) = self.options.max_sessions {
            let current = state.sessions.len();
            if current >= max {
                return Err(RegistryError::SessionLimitReached { current, max });
            }
        }

        state.counter += 1;
        let order = state.counter;
        let id = uuid::Uuid::new_v4().to_string();
        let name = name.unwrap_or_else(|| format!("Terminal {}", order));

        info!("Creating session {}: {} (order: {})", id, name, order);

        let entry = SessionEntry::new(
            id.clone(),
            name,
            order,
            self.options.default_geometry,
            self.options.scrollback_limit,
        );
        state.sessions.insert(id.clone(), entry);
        state.active_session_id = Some(id.clone());
        self.publish(&mut state);

        Ok(id)
    }

    /// Mutate one session, republishing only if a published field changed
    pub fn update<R>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut SessionEntry) -> R,
    ) -> Result<R, RegistryError> {
        let mut state = self.state.lock();
        let entry = state
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| RegistryError::SessionNotFound(session_id.to_string()))?;
        let before = Published::of(entry);
        let result = f(entry);
        if Published::of(entry) != before {
            self.publish(&mut state);
        }
        Ok(result)
    }

    /// Read one session without publishing
    pub fn inspect<R>(&self, session_id: &str, f: impl FnOnce(&SessionEntry) -> R) -> Option<R> {
        let state = self.state.lock();
        state.sessions.get(session_id).map(f)
    }

    /// Read every session in creation order
    pub fn inspect_all<R>(&self, mut f: impl FnMut(&SessionEntry) -> R) -> Vec<R> {
        let state = self.state.lock();
        state.ordered().into_iter().map(|entry| f(entry)).collect()
    }

    /// Remove a session, repairing the active pointer in the same step
    pub fn remove(&self, session_id: &str) -> Option<SessionEntry> {
        let mut state = self.state.lock();
        let entry = state.sessions.remove(session_id)?;

        if state.active_session_id.as_deref() == Some(session_id) {
            state.active_session_id = state.first_id();
            debug!(
                "Active session {} closed, promoted {:?}",
                session_id, state.active_session_id
            );
        }
        self.publish(&mut state);
        info!("Session {} removed from registry", session_id);

        Some(entry)
    }

    /// Drop every session and reset names/order
    pub fn clear(&self) -> Vec<SessionEntry> {
        let mut state = self.state.lock();
        let entries: Vec<SessionEntry> = state.sessions.drain().map(|(_, entry)| entry).collect();
        state.active_session_id = None;
        state.counter = 0;
        self.publish(&mut state);
        entries
    }

    pub fn set_active(&self, session_id: &str) -> bool {
        let mut state = self.state.lock();
        if !state.sessions.contains_key(session_id) {
            return false;
        }
        state.active_session_id = Some(session_id.to_string());
        self.publish(&mut state);
        true
    }

    pub fn rename(&self, session_id: &str, name: impl Into<String>) -> bool {
        let mut state = self.state.lock();
        let Some(entry) = state.sessions.get_mut(session_id) else {
            return false;
        };
        let name = name.into();
        debug!("Session {} renamed to {}", entry.id, name);
        entry.name = name;
        self.publish(&mut state);
        true
    }

    pub fn get(&self, session_id: &str) -> Option<SessionInfo> {
        self.inspect(session_id, |entry| SessionInfo::from(entry))
    }

    /// Sessions in creation order
    pub fn list(&self) -> Vec<SessionInfo> {
        self.inspect_all(|entry| SessionInfo::from(entry))
    }

    /// Session ids in creation order
    pub fn ids(&self) -> Vec<String> {
        self.inspect_all(|entry| entry.id.clone())
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.state.lock().sessions.contains_key(session_id)
    }

    pub fn active_session_id(&self) -> Option<String> {
        self.state.lock().active_session_id.clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn connected_count(&self) -> usize {
        self.state
            .lock()
            .sessions
            .values()
            .filter(|entry| entry.is_connected())
            .count()
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        self.feed.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RegistrySnapshot> {
        self.feed.subscribe()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(RegistryOptions::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_create_and_names() {
        let registry = SessionRegistry::default();
        let a = registry.create(None).unwrap();
        let b = registry.create(None).unwrap();
        let c = registry.create(Some("build box".to_string())).unwrap();

        let names: Vec<String> = registry.list().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["Terminal 1", "Terminal 2", "build box"]);
        assert_eq!(registry.ids(), vec![a, b, c.clone()]);
        assert_eq!(registry.active_session_id(), Some(c));

        let info = &registry.list()[0];
        assert_eq!(info.status, ConnectionStatus::Disconnected);
        assert_eq!(info.geometry, Geometry::new(80, 24));
        assert!(!info.attached);
    }

    #[test]
    fn test_size_tracks_creates_minus_closes() {
        let registry = SessionRegistry::default();
        let ids: Vec<String> = (0..10).map(|_| registry.create(None).unwrap()).collect();
        assert_eq!(ids.iter().collect::<HashSet<_>>().len(), 10);

        for id in ids.iter().step_by(3) {
            assert!(registry.remove(id).is_some());
        }
        assert_eq!(registry.len(), 10 - 4);
        // Second removal is a no-op
        assert!(registry.remove(&ids[0]).is_none());
        assert_eq!(registry.len(), 6);
    }

    #[test]
    fn test_close_non_active_keeps_active() {
        let registry = SessionRegistry::default();
        let t1 = registry.create(None).unwrap();
        let t2 = registry.create(None).unwrap();
        let t3 = registry.create(None).unwrap();

        registry.remove(&t2);

        let names: Vec<String> = registry.list().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["Terminal 1", "Terminal 3"]);
        assert_eq!(registry.active_session_id(), Some(t3));
        assert!(registry.contains(&t1));
    }

    #[test]
    fn test_close_active_promotes_earliest() {
        let registry = SessionRegistry::default();
        let t1 = registry.create(None).unwrap();
        let t2 = registry.create(None).unwrap();
        let t3 = registry.create(None).unwrap();

        registry.remove(&t3);
        assert_eq!(registry.active_session_id(), Some(t1.clone()));

        registry.set_active(&t2);
        registry.remove(&t2);
        assert_eq!(registry.active_session_id(), Some(t1.clone()));

        registry.remove(&t1);
        assert_eq!(registry.active_session_id(), None);
    }

    #[test]
    fn test_counter_keeps_growing_after_close() {
        let registry = SessionRegistry::default();
        let t1 = registry.create(None).unwrap();
        registry.remove(&t1);
        registry.create(None).unwrap();
        assert_eq!(registry.list()[0].name, "Terminal 2");

        registry.clear();
        assert!(registry.is_empty());
        assert_eq!(registry.active_session_id(), None);
        registry.create(None).unwrap();
        assert_eq!(registry.list()[0].name, "Terminal 1");
    }

    #[test]
    fn test_unknown_ids_are_noops() {
        let registry = SessionRegistry::default();
        let id = registry.create(None).unwrap();
        let revision = registry.snapshot().revision;

        assert!(!registry.set_active("missing"));
        assert!(!registry.rename("missing", "x"));
        assert!(matches!(
            registry.update("missing", |_| ()),
            Err(RegistryError::SessionNotFound(_))
        ));
        assert_eq!(registry.snapshot().revision, revision);
        assert_eq!(registry.active_session_id(), Some(id));
    }

    #[test]
    fn test_session_limit() {
        let registry = SessionRegistry::new(RegistryOptions {
            max_sessions: Some(2),
            ..Default::default()
        });
        let first = registry.create(None).unwrap();
        registry.create(None).unwrap();
        assert_eq!(
            registry.create(None),
            Err(RegistryError::SessionLimitReached { current: 2, max: 2 })
        );

        registry.remove(&first);
        assert!(registry.create(None).is_ok());
    }

    #[test]
    fn test_activity_alone_does_not_republish() {
        let registry = SessionRegistry::default();
        let id = registry.create(None).unwrap();
        let revision = registry.snapshot().revision;

        for i in 0..100 {
            registry
                .update(&id, |entry| {
                    entry.touch();
                    entry.buffer.append(format!("line {}", i));
                })
                .unwrap();
        }
        assert_eq!(registry.snapshot().revision, revision);
        // Queries still see the live entry
        assert_eq!(registry.get(&id).unwrap().buffered_chunks, 100);

        registry
            .update(&id, |entry| entry.geometry = Geometry::new(120, 40))
            .unwrap();
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.revision, revision + 1);
        assert_eq!(snapshot.sessions[0].geometry, Geometry::new(120, 40));
        assert_eq!(snapshot.sessions[0].buffered_chunks, 100);
    }

    #[tokio::test]
    async fn test_mutations_notify_subscribers() {
        let registry = SessionRegistry::default();
        let mut rx = registry.subscribe();

        let id = registry.create(None).unwrap();
        assert!(rx.has_changed().unwrap());
        let snapshot = rx.borrow_and_update().clone();
        assert_eq!(snapshot.sessions.len(), 1);
        assert_eq!(snapshot.active_session_id.as_deref(), Some(id.as_str()));
        assert_eq!(snapshot.connected_count, 0);

        registry.rename(&id, "db");
        assert!(rx.has_changed().unwrap());
        let snapshot = rx.borrow_and_update().clone();
        assert_eq!(snapshot.names(), vec!["db"]);
        assert!(snapshot.revision >= 2);

        registry.remove(&id);
        assert!(rx.borrow_and_update().sessions.is_empty());
    }
}
