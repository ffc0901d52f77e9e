//! Display containers and size-change notification

use std::sync::Arc;

use tokio::sync::broadcast;

/// Notifications buffered per observer before it is considered lagging
const SIZE_CHANGE_CAPACITY: usize = 16;

/// Host element a widget is mounted into
pub trait Container: Send + Sync {
    /// Stable identity; two handles with the same key are the same element
    fn key(&self) -> &str;

    /// Subscribe to size-change notifications for this element
    fn size_changes(&self) -> broadcast::Receiver<()>;
}

/// Container backed by a broadcast channel.
///
/// Hosts without their own element type (headless runners, tests) call
/// `notify_resize` from whatever observes the real viewport.
pub struct HostContainer {
    key: String,
    size_tx: broadcast::Sender<()>,
}

impl HostContainer {
    pub fn new(key: impl Into<String>) -> Arc<Self> {
        let (size_tx, _) = broadcast::channel(SIZE_CHANGE_CAPACITY);
        Arc::new(Self {
            key: key.into(),
            size_tx,
        })
    }

    /// Report that the element's size changed
    pub fn notify_resize(&self) {
        // No observers means nothing is attached; dropping is correct
        let _ = self.size_tx.send(());
    }

    /// Number of live observers (one per attached session)
    pub fn observer_count(&self) -> usize {
        self.size_tx.receiver_count()
    }
}

impl Container for HostContainer {
    fn key(&self) -> &str {
        &self.key
    }

    fn size_changes(&self) -> broadcast::Receiver<()> {
        self.size_tx.subscribe()
    }
}

impl std::fmt::Debug for HostContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostContainer")
            .field("key", &self.key)
            .field("observers", &self.observer_count())
            .finish()
    }
}
