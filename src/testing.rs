//! Test doubles for the transport and widget capabilities

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Semaphore};

use crate::config::TerminalConfig;
use crate::session::{Geometry, SessionManager};
use crate::transport::{
    DuplexStream, Frame, StreamConnection, StreamConnector, StreamEvent, TransportError,
};
use crate::widget::{
    Clipboard, ClipboardError, Container, TerminalWidget, WidgetError, WidgetEvent,
    WidgetEventSender, WidgetFactory,
};

/// Large enough that tests never block on a full channel
const MOCK_EVENT_CAPACITY: usize = 16_384;

/// Poll `condition` until it holds, yielding to spawned tasks in between
pub async fn eventually(condition: impl Fn() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

pub struct Harness {
    pub manager: SessionManager,
    pub connector: Arc<MockConnector>,
    pub widgets: Arc<MockWidgetFactory>,
}

pub fn harness() -> Harness {
    harness_with(TerminalConfig::default())
}

pub fn harness_with(config: TerminalConfig) -> Harness {
    let connector = Arc::new(MockConnector::default());
    let widgets = Arc::new(MockWidgetFactory::default());
    let manager = SessionManager::new(config, connector.clone(), widgets.clone());
    Harness {
        manager,
        connector,
        widgets,
    }
}

// ============================================================================
// Stream
// ============================================================================

#[derive(Default)]
struct StreamShared {
    sent: Mutex<Vec<Frame>>,
    open: AtomicBool,
    fail_sends: AtomicBool,
}

pub struct MockStream {
    shared: Arc<StreamShared>,
}

/// Test-side control of a `MockStream`
#[derive(Clone)]
pub struct MockStreamHandle {
    shared: Arc<StreamShared>,
    events: mpsc::Sender<StreamEvent>,
}

impl MockStream {
    pub fn channel() -> (Self, MockStreamHandle, mpsc::Receiver<StreamEvent>) {
        let shared = Arc::new(StreamShared::default());
        shared.open.store(true, Ordering::SeqCst);
        let (events, rx) = mpsc::channel(MOCK_EVENT_CAPACITY);
        let stream = Self {
            shared: shared.clone(),
        };
        (stream, MockStreamHandle { shared, events }, rx)
    }

    /// A stream whose inbound side is not consumed
    pub fn pair() -> (Self, MockStreamHandle) {
        let (stream, handle, _) = Self::channel();
        (stream, handle)
    }
}

impl DuplexStream for MockStream {
    fn send(&self, frame: &Frame) -> Result<(), TransportError> {
        if !self.shared.open.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if self.shared.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::SendFailed("injected".to_string()));
        }
        self.shared.sent.lock().push(frame.clone());
        Ok(())
    }

    fn disconnect(&mut self) {
        self.shared.open.store(false, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }
}

impl MockStreamHandle {
    pub fn sent(&self) -> Vec<Frame> {
        self.shared.sent.lock().clone()
    }

    pub fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }

    pub fn fail_sends(&self, fail: bool) {
        self.shared.fail_sends.store(fail, Ordering::SeqCst);
    }

    fn push(&self, event: StreamEvent) {
        // The receiving pump may already be gone
        let _ = self.events.try_send(event);
    }

    pub fn output(&self, data: &str) {
        self.push(StreamEvent::Frame(Frame::output(data)));
    }

    pub fn error(&self, message: &str) {
        self.push(StreamEvent::Frame(Frame::error(message)));
    }

    /// Server side hangs up
    pub fn close(&self, reason: Option<&str>) {
        self.shared.open.store(false, Ordering::SeqCst);
        self.push(StreamEvent::Closed {
            reason: reason.map(String::from),
        });
    }
}

// ============================================================================
// Connector
// ============================================================================

pub struct MockConnector {
    streams: Mutex<Vec<MockStreamHandle>>,
    calls: AtomicUsize,
    fail_next: Mutex<Option<String>>,
    fail_handshake: AtomicBool,
    held: AtomicBool,
    waiting: AtomicUsize,
    gate: Semaphore,
}

impl Default for MockConnector {
    fn default() -> Self {
        Self {
            streams: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            fail_next: Mutex::new(None),
            fail_handshake: AtomicBool::new(false),
            held: AtomicBool::new(false),
            waiting: AtomicUsize::new(0),
            gate: Semaphore::new(0),
        }
    }
}

impl MockConnector {
    pub fn connect_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Stream opened by the `index`-th successful connect
    pub fn stream(&self, index: usize) -> MockStreamHandle {
        self.streams.lock()[index].clone()
    }

    pub fn fail_next(&self, message: &str) {
        *self.fail_next.lock() = Some(message.to_string());
    }

    /// Streams reject every frame, so the subscribe step fails
    pub fn fail_handshake(&self, fail: bool) {
        self.fail_handshake.store(fail, Ordering::SeqCst);
    }

    /// Park connects until `release`
    pub fn hold(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    pub fn release(&self) {
        self.held.store(false, Ordering::SeqCst);
        self.gate.add_permits(64);
    }

    /// Connects currently parked
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StreamConnector for MockConnector {
    async fn connect(&self, _session_id: &str) -> Result<StreamConnection, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.held.load(Ordering::SeqCst) {
            self.waiting.fetch_add(1, Ordering::SeqCst);
            if let Ok(permit) = self.gate.acquire().await {
                permit.forget();
            }
            self.waiting.fetch_sub(1, Ordering::SeqCst);
        }

        if let Some(message) = self.fail_next.lock().take() {
            return Err(TransportError::ConnectionFailed(message));
        }

        let (stream, handle, events) = MockStream::channel();
        handle.fail_sends(self.fail_handshake.load(Ordering::SeqCst));
        self.streams.lock().push(handle);

        Ok(StreamConnection {
            stream: Box::new(stream),
            events,
        })
    }
}

// ============================================================================
// Widget
// ============================================================================

#[derive(Default)]
struct WidgetLog {
    opened_in: Option<String>,
    written: Vec<String>,
    disposed: bool,
    fail_dispose: bool,
    fit_calls: usize,
    clear_calls: usize,
    focus_calls: usize,
    scrolls: Vec<&'static str>,
    selection: Option<String>,
}

struct MockWidget {
    log: Arc<Mutex<WidgetLog>>,
    fit: Arc<Mutex<Option<Geometry>>>,
}

impl TerminalWidget for MockWidget {
    fn open(&mut self, container: &dyn Container) {
        self.log.lock().opened_in = Some(container.key().to_string());
    }

    fn write(&mut self, chunk: &str) {
        self.log.lock().written.push(chunk.to_string());
    }

    fn clear(&mut self) {
        self.log.lock().clear_calls += 1;
    }

    fn dispose(&mut self) -> Result<(), WidgetError> {
        let mut log = self.log.lock();
        log.disposed = true;
        if log.fail_dispose {
            return Err(WidgetError::DisposeFailed("injected".to_string()));
        }
        Ok(())
    }

    fn fit(&mut self) -> Option<Geometry> {
        self.log.lock().fit_calls += 1;
        *self.fit.lock()
    }

    fn focus(&mut self) {
        self.log.lock().focus_calls += 1;
    }

    fn has_selection(&self) -> bool {
        self.log.lock().selection.is_some()
    }

    fn get_selection(&self) -> Option<String> {
        self.log.lock().selection.clone()
    }

    fn scroll_to_top(&mut self) {
        self.log.lock().scrolls.push("top");
    }

    fn scroll_to_bottom(&mut self) {
        self.log.lock().scrolls.push("bottom");
    }
}

/// Test-side view of a created widget
#[derive(Clone)]
pub struct WidgetProbe {
    log: Arc<Mutex<WidgetLog>>,
    events: WidgetEventSender,
}

impl WidgetProbe {
    pub fn opened_in(&self) -> Option<String> {
        self.log.lock().opened_in.clone()
    }

    pub fn written(&self) -> Vec<String> {
        self.log.lock().written.clone()
    }

    pub fn disposed(&self) -> bool {
        self.log.lock().disposed
    }

    pub fn fail_dispose(&self, fail: bool) {
        self.log.lock().fail_dispose = fail;
    }

    pub fn fit_calls(&self) -> usize {
        self.log.lock().fit_calls
    }

    pub fn clear_calls(&self) -> usize {
        self.log.lock().clear_calls
    }

    pub fn focus_calls(&self) -> usize {
        self.log.lock().focus_calls
    }

    pub fn scrolls(&self) -> Vec<&'static str> {
        self.log.lock().scrolls.clone()
    }

    pub fn select(&self, text: Option<&str>) {
        self.log.lock().selection = text.map(String::from);
    }

    /// Simulate the user typing
    pub fn type_text(&self, text: &str) {
        let _ = self.events.send(WidgetEvent::Data(text.to_string()));
    }

    /// Simulate the widget resizing itself
    pub fn report_resize(&self, geometry: Geometry) {
        let _ = self.events.send(WidgetEvent::Resize(geometry));
    }
}

#[derive(Default)]
pub struct MockWidgetFactory {
    widgets: Mutex<Vec<WidgetProbe>>,
    fit: Arc<Mutex<Option<Geometry>>>,
    create_delay: Mutex<Option<Duration>>,
}

impl MockWidgetFactory {
    pub fn widget(&self, index: usize) -> WidgetProbe {
        self.widgets.lock()[index].clone()
    }

    pub fn created(&self) -> usize {
        self.widgets.lock().len()
    }

    /// Geometry every widget reports from `fit`
    pub fn set_fit(&self, geometry: Option<Geometry>) {
        *self.fit.lock() = geometry;
    }

    /// Block each `create` for `delay`, widening attach races
    pub fn set_create_delay(&self, delay: Duration) {
        *self.create_delay.lock() = Some(delay);
    }
}

impl WidgetFactory for MockWidgetFactory {
    fn create(
        &self,
        _session_id: &str,
        events: WidgetEventSender,
    ) -> Result<Box<dyn TerminalWidget>, WidgetError> {
        let delay = *self.create_delay.lock();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        let log = Arc::new(Mutex::new(WidgetLog::default()));
        self.widgets.lock().push(WidgetProbe {
            log: log.clone(),
            events,
        });
        Ok(Box::new(MockWidget {
            log,
            fit: self.fit.clone(),
        }))
    }
}

// ============================================================================
// Clipboard
// ============================================================================

pub struct MockClipboard {
    contents: Mutex<Option<String>>,
    available: bool,
}

impl MockClipboard {
    pub fn new() -> Self {
        Self {
            contents: Mutex::new(None),
            available: true,
        }
    }

    pub fn unavailable() -> Self {
        Self {
            contents: Mutex::new(None),
            available: false,
        }
    }

    pub fn contents(&self) -> Option<String> {
        self.contents.lock().clone()
    }
}

impl Clipboard for MockClipboard {
    fn read_text(&self) -> Result<String, ClipboardError> {
        if !self.available {
            return Err(ClipboardError::Unavailable("no clipboard".to_string()));
        }
        Ok(self.contents.lock().clone().unwrap_or_default())
    }

    fn write_text(&self, text: &str) -> Result<(), ClipboardError> {
        if !self.available {
            return Err(ClipboardError::Unavailable("no clipboard".to_string()));
        }
        *self.contents.lock() = Some(text.to_string());
        Ok(())
    }
}
