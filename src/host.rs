//! The hookable page surface.
//!
//! A [`Page`] models the signal sources of one running document: global
//! error and rejection handlers, fetch/XHR transports, history methods, UI
//! event listeners, and the performance / mutation / intersection observer
//! registries.  Embeddings (a browser binding, a webview shell, or the
//! scripted page used in tests) adapt their environment onto this surface;
//! the capture components hook into it.
//!
//! # Save-and-chain
//! Handler slots swap: installing returns the prior value, uninstalling
//! restores it.  Capture wrappers always invoke the prior handler first, so
//! the host application's own handlers keep running unchanged.
//!
//! # Dispatch discipline
//! Dispatch snapshots the listener list before invoking, so a listener may
//! remove itself (or others) without poisoning iteration.  Capture-phase
//! listeners run before bubble-phase ones, in registration order.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use futures_util::future::BoxFuture;
use lookout_protocol::{DeviceInfo, DomNode, NodePath, ResourceTiming, Viewport};

// ---------------------------------------------------------------------------
// Raw signals
// ---------------------------------------------------------------------------

/// A JavaScript runtime error as delivered to the global error handler.
#[derive(Debug, Clone, Default)]
pub struct RuntimeError {
    pub message: String,
    pub file_name: Option<String>,
    pub line_number: Option<u32>,
    pub column_number: Option<u32>,
    pub stack_trace: Option<String>,
}

/// The reason of an unhandled promise rejection.
#[derive(Debug, Clone)]
pub enum RejectionReason {
    /// An Error object: contributes message and stack.
    Error {
        message: String,
        stack_trace: Option<String>,
    },
    /// A bare string reason.
    Text(String),
    /// Anything else; JSON-stringified at capture.
    Value(serde_json::Value),
}

/// A failed resource load (an element with a `src`/`href` whose load failed).
#[derive(Debug, Clone)]
pub struct ResourceError {
    pub tag_name: String,
    pub source: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UiEventKind {
    Click,
    Scroll,
    Input,
    Change,
    Focus,
    Blur,
    KeyDown,
    MouseDown,
    TouchStart,
    PointerDown,
    MouseMove,
    Resize,
    VisibilityChange,
    PopState,
    PageHide,
    BeforeUnload,
    Online,
    /// Capturing-phase `error` event for resource loads.
    ResourceError,
}

/// One UI event as dispatched to listeners.  Only the fields relevant to the
/// kind are populated.
#[derive(Debug, Clone)]
pub struct UiEvent {
    pub kind: UiEventKind,
    /// Wall-clock ms when the event fired.
    pub timestamp: i64,
    pub target: Option<NodePath>,
    pub value: Option<String>,
    pub coordinates: Option<(f64, f64)>,
    pub scroll: Option<(f64, f64)>,
    pub size: Option<(u32, u32)>,
    pub url: Option<String>,
    pub hidden: Option<bool>,
    pub resource: Option<ResourceError>,
}

impl UiEvent {
    pub fn new(kind: UiEventKind, timestamp: i64) -> Self {
        UiEvent {
            kind,
            timestamp,
            target: None,
            value: None,
            coordinates: None,
            scroll: None,
            size: None,
            url: None,
            hidden: None,
            resource: None,
        }
    }

    pub fn with_target(mut self, path: NodePath) -> Self {
        self.target = Some(path);
        self
    }

    pub fn with_value(mut self, value: &str) -> Self {
        self.value = Some(value.to_owned());
        self
    }

    pub fn with_coordinates(mut self, x: f64, y: f64) -> Self {
        self.coordinates = Some((x, y));
        self
    }

    pub fn with_scroll(mut self, x: f64, y: f64) -> Self {
        self.scroll = Some((x, y));
        self
    }
}

/// Navigation-timing milestones, all in ms relative to the time origin.
#[derive(Debug, Clone, Copy, Default)]
pub struct NavigationTiming {
    pub navigation_start: f64,
    pub request_start: f64,
    pub response_start: f64,
    pub dom_content_loaded_event_end: f64,
    pub load_event_end: f64,
}

/// One entry from the performance stream.
#[derive(Debug, Clone)]
pub enum PerfEntry {
    Navigation(NavigationTiming),
    Paint { name: String, start_time: f64 },
    LargestContentfulPaint { start_time: f64, size: u64 },
    LayoutShift { value: f64, had_recent_input: bool, start_time: f64 },
    Resource(ResourceTiming),
}

impl PerfEntry {
    pub fn entry_type(&self) -> &'static str {
        match self {
            PerfEntry::Navigation(_) => "navigation",
            PerfEntry::Paint { .. } => "paint",
            PerfEntry::LargestContentfulPaint { .. } => "largest-contentful-paint",
            PerfEntry::LayoutShift { .. } => "layout-shift",
            PerfEntry::Resource(_) => "resource",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    ChildList,
    Attributes,
    CharacterData,
}

/// One DOM mutation as delivered to mutation observers.
#[derive(Debug, Clone)]
pub struct DomMutation {
    pub kind: MutationKind,
    pub target: NodePath,
    pub added: Vec<DomNode>,
    pub removed: Vec<DomNode>,
    pub attribute_name: Option<String>,
    pub old_value: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MutationObserverOptions {
    pub child_list: bool,
    pub subtree: bool,
    pub attributes: bool,
    pub attribute_old_value: bool,
    pub character_data: bool,
    pub character_data_old_value: bool,
}

impl MutationObserverOptions {
    pub fn all() -> Self {
        MutationObserverOptions {
            child_list: true,
            subtree: true,
            attributes: true,
            attribute_old_value: true,
            character_data: true,
            character_data_old_value: true,
        }
    }

    fn accepts(&self, kind: MutationKind) -> bool {
        match kind {
            MutationKind::ChildList => self.child_list,
            MutationKind::Attributes => self.attributes,
            MutationKind::CharacterData => self.character_data,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IntersectionChange {
    pub target: NodePath,
    pub is_intersecting: bool,
    pub ratio: f64,
}

// ---------------------------------------------------------------------------
// Transport seams
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct HttpExchangeRequest {
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct HttpExchangeResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
}

impl HttpExchangeResponse {
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchFailure {
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    #[error("request aborted")]
    Aborted,
}

/// The page's `fetch`.  The SDK intercepts by swapping the slot with a
/// wrapper that delegates to the saved transport.
pub trait FetchTransport: Send + Sync {
    fn fetch(
        &self,
        request: HttpExchangeRequest,
    ) -> BoxFuture<'static, Result<HttpExchangeResponse, FetchFailure>>;
}

/// The page's XHR machinery, flattened to one synchronous exchange.
pub trait XhrTransport: Send + Sync {
    fn perform(&self, request: HttpExchangeRequest) -> Result<HttpExchangeResponse, FetchFailure>;
}

/// Unload-safe one-shot delivery channel (`navigator.sendBeacon` analog).
pub trait BeaconTransport: Send + Sync {
    /// Enqueue `body` for delivery to `url`.  Returns `false` when refused.
    fn send(&self, url: &str, body: &[u8]) -> bool;
}

struct UnavailableTransport;

impl FetchTransport for UnavailableTransport {
    fn fetch(
        &self,
        _request: HttpExchangeRequest,
    ) -> BoxFuture<'static, Result<HttpExchangeResponse, FetchFailure>> {
        Box::pin(async { Err(FetchFailure::Network("no fetch transport installed".to_owned())) })
    }
}

impl XhrTransport for UnavailableTransport {
    fn perform(&self, _request: HttpExchangeRequest) -> Result<HttpExchangeResponse, FetchFailure> {
        Err(FetchFailure::Network("no XHR transport installed".to_owned()))
    }
}

// ---------------------------------------------------------------------------
// Handler aliases and ids
// ---------------------------------------------------------------------------

pub type ErrorHandler = dyn Fn(&RuntimeError) + Send + Sync;
pub type RejectionHandler = dyn Fn(&RejectionReason) + Send + Sync;
pub type UiListener = dyn Fn(&UiEvent) + Send + Sync;
pub type HistoryHandler = dyn Fn(&str) + Send + Sync;
pub type PerfObserverCallback = dyn Fn(&PerfEntry) + Send + Sync;
pub type MutationObserverCallback = dyn Fn(&DomMutation) + Send + Sync;
pub type IntersectionObserverCallback = dyn Fn(&IntersectionChange) + Send + Sync;

pub type ListenerId = u64;
pub type ObserverId = u64;

struct ListenerEntry {
    id: ListenerId,
    kind: UiEventKind,
    capture: bool,
    callback: Arc<UiListener>,
}

struct PerfObserverEntry {
    id: ObserverId,
    entry_types: Vec<String>,
    callback: Arc<PerfObserverCallback>,
}

struct MutationObserverEntry {
    id: ObserverId,
    options: MutationObserverOptions,
    callback: Arc<MutationObserverCallback>,
}

struct IntersectionObserverEntry {
    id: ObserverId,
    targets: Vec<NodePath>,
    callback: Arc<IntersectionObserverCallback>,
}

// ---------------------------------------------------------------------------
// Page
// ---------------------------------------------------------------------------

/// Which observer/delivery APIs this environment exposes.
#[derive(Debug, Clone, Copy)]
pub struct Capabilities {
    pub mutation_observer: bool,
    pub intersection_observer: bool,
    pub beacon: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Capabilities {
            mutation_observer: true,
            intersection_observer: true,
            beacon: true,
        }
    }
}

/// Construction-time description of the environment.
#[derive(Clone)]
pub struct PageConfig {
    pub document_root: DomNode,
    pub url: String,
    pub doctype: Option<String>,
    pub user_agent: String,
    pub platform: String,
    pub language: String,
    pub timezone: String,
    pub connection: Option<String>,
    pub screen: (u32, u32),
    pub viewport: (u32, u32),
    pub capabilities: Capabilities,
}

impl Default for PageConfig {
    fn default() -> Self {
        PageConfig {
            document_root: DomNode::element("html").with_children(vec![
                DomNode::element("head"),
                DomNode::element("body"),
            ]),
            url: "https://example.com/".to_owned(),
            doctype: Some("html".to_owned()),
            user_agent: "lookout-host/0.3".to_owned(),
            platform: "linux".to_owned(),
            language: "en-US".to_owned(),
            timezone: "UTC".to_owned(),
            connection: None,
            screen: (1920, 1080),
            viewport: (1280, 720),
            capabilities: Capabilities::default(),
        }
    }
}

/// The hookable surface of one running document.
pub struct Page {
    error_handler: Mutex<Option<Arc<ErrorHandler>>>,
    rejection_handler: Mutex<Option<Arc<RejectionHandler>>>,
    fetch: Mutex<Arc<dyn FetchTransport>>,
    xhr: Mutex<Arc<dyn XhrTransport>>,
    push_state: Mutex<Arc<HistoryHandler>>,
    replace_state: Mutex<Arc<HistoryHandler>>,
    beacon: Mutex<Option<Arc<dyn BeaconTransport>>>,

    listeners: Mutex<Vec<ListenerEntry>>,
    perf_observers: Mutex<Vec<PerfObserverEntry>>,
    mutation_observers: Mutex<Vec<MutationObserverEntry>>,
    intersection_observers: Mutex<Vec<IntersectionObserverEntry>>,
    next_id: AtomicU64,

    document_root: Mutex<DomNode>,
    url: Mutex<String>,
    doctype: Option<String>,
    viewport: Mutex<(u32, u32)>,
    hidden: Mutex<bool>,

    user_agent: String,
    platform: String,
    language: String,
    timezone: String,
    connection: Option<String>,
    screen: (u32, u32),
    capabilities: Capabilities,
}

impl Page {
    pub fn new(config: PageConfig) -> Arc<Page> {
        Arc::new_cyclic(|weak: &Weak<Page>| {
            let push_weak = weak.clone();
            let replace_weak = weak.clone();
            Page {
                error_handler: Mutex::new(None),
                rejection_handler: Mutex::new(None),
                fetch: Mutex::new(Arc::new(UnavailableTransport)),
                xhr: Mutex::new(Arc::new(UnavailableTransport)),
                // The built-in history methods update the page URL.
                push_state: Mutex::new(Arc::new(move |url: &str| {
                    if let Some(page) = push_weak.upgrade() {
                        page.set_url(url);
                    }
                })),
                replace_state: Mutex::new(Arc::new(move |url: &str| {
                    if let Some(page) = replace_weak.upgrade() {
                        page.set_url(url);
                    }
                })),
                beacon: Mutex::new(None),
                listeners: Mutex::new(Vec::new()),
                perf_observers: Mutex::new(Vec::new()),
                mutation_observers: Mutex::new(Vec::new()),
                intersection_observers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                document_root: Mutex::new(config.document_root),
                url: Mutex::new(config.url),
                doctype: config.doctype,
                viewport: Mutex::new(config.viewport),
                hidden: Mutex::new(false),
                user_agent: config.user_agent,
                platform: config.platform,
                language: config.language,
                timezone: config.timezone,
                connection: config.connection,
                screen: config.screen,
                capabilities: config.capabilities,
            }
        })
    }

    // -----------------------------------------------------------------------
    // Handler slots (save-and-chain)
    // -----------------------------------------------------------------------

    /// Swap the global error handler; returns the prior one for chaining.
    pub fn set_error_handler(&self, handler: Option<Arc<ErrorHandler>>) -> Option<Arc<ErrorHandler>> {
        let mut slot = self.error_handler.lock().expect("error handler slot");
        std::mem::replace(&mut *slot, handler)
    }

    pub fn set_rejection_handler(
        &self,
        handler: Option<Arc<RejectionHandler>>,
    ) -> Option<Arc<RejectionHandler>> {
        let mut slot = self.rejection_handler.lock().expect("rejection handler slot");
        std::mem::replace(&mut *slot, handler)
    }

    pub fn swap_fetch(&self, transport: Arc<dyn FetchTransport>) -> Arc<dyn FetchTransport> {
        let mut slot = self.fetch.lock().expect("fetch slot");
        std::mem::replace(&mut *slot, transport)
    }

    pub fn fetch_transport(&self) -> Arc<dyn FetchTransport> {
        self.fetch.lock().expect("fetch slot").clone()
    }

    pub fn swap_xhr(&self, transport: Arc<dyn XhrTransport>) -> Arc<dyn XhrTransport> {
        let mut slot = self.xhr.lock().expect("xhr slot");
        std::mem::replace(&mut *slot, transport)
    }

    pub fn xhr_transport(&self) -> Arc<dyn XhrTransport> {
        self.xhr.lock().expect("xhr slot").clone()
    }

    pub fn swap_push_state(&self, handler: Arc<HistoryHandler>) -> Arc<HistoryHandler> {
        let mut slot = self.push_state.lock().expect("pushState slot");
        std::mem::replace(&mut *slot, handler)
    }

    pub fn swap_replace_state(&self, handler: Arc<HistoryHandler>) -> Arc<HistoryHandler> {
        let mut slot = self.replace_state.lock().expect("replaceState slot");
        std::mem::replace(&mut *slot, handler)
    }

    pub fn set_beacon_transport(&self, transport: Arc<dyn BeaconTransport>) {
        *self.beacon.lock().expect("beacon slot") = Some(transport);
    }

    // -----------------------------------------------------------------------
    // Listener registry
    // -----------------------------------------------------------------------

    pub fn add_listener(
        &self,
        kind: UiEventKind,
        capture: bool,
        callback: Arc<UiListener>,
    ) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().expect("listener registry").push(ListenerEntry {
            id,
            kind,
            capture,
            callback,
        });
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock().expect("listener registry");
        let before = listeners.len();
        listeners.retain(|entry| entry.id != id);
        listeners.len() != before
    }

    // -----------------------------------------------------------------------
    // Observer registries
    // -----------------------------------------------------------------------

    pub fn observe_performance(
        &self,
        entry_types: &[&str],
        callback: Arc<PerfObserverCallback>,
    ) -> ObserverId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.perf_observers.lock().expect("perf observers").push(PerfObserverEntry {
            id,
            entry_types: entry_types.iter().map(|s| (*s).to_owned()).collect(),
            callback,
        });
        id
    }

    pub fn disconnect_performance(&self, id: ObserverId) {
        self.perf_observers.lock().expect("perf observers").retain(|o| o.id != id);
    }

    pub fn observe_mutations(
        &self,
        options: MutationObserverOptions,
        callback: Arc<MutationObserverCallback>,
    ) -> ObserverId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.mutation_observers
            .lock()
            .expect("mutation observers")
            .push(MutationObserverEntry { id, options, callback });
        id
    }

    pub fn disconnect_mutations(&self, id: ObserverId) {
        self.mutation_observers.lock().expect("mutation observers").retain(|o| o.id != id);
    }

    pub fn observe_intersections(
        &self,
        targets: Vec<NodePath>,
        callback: Arc<IntersectionObserverCallback>,
    ) -> ObserverId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.intersection_observers
            .lock()
            .expect("intersection observers")
            .push(IntersectionObserverEntry { id, targets, callback });
        id
    }

    pub fn disconnect_intersections(&self, id: ObserverId) {
        self.intersection_observers
            .lock()
            .expect("intersection observers")
            .retain(|o| o.id != id);
    }

    // -----------------------------------------------------------------------
    // Environment
    // -----------------------------------------------------------------------

    pub fn url(&self) -> String {
        self.url.lock().expect("url").clone()
    }

    pub fn set_url(&self, url: &str) {
        *self.url.lock().expect("url") = url.to_owned();
    }

    pub fn document_root(&self) -> DomNode {
        self.document_root.lock().expect("document root").clone()
    }

    pub fn set_document_root(&self, root: DomNode) {
        *self.document_root.lock().expect("document root") = root;
    }

    pub fn doctype(&self) -> Option<String> {
        self.doctype.clone()
    }

    pub fn viewport(&self) -> Viewport {
        let (width, height) = *self.viewport.lock().expect("viewport");
        Viewport { width, height }
    }

    pub fn visibility_hidden(&self) -> bool {
        *self.hidden.lock().expect("visibility")
    }

    pub fn user_agent(&self) -> String {
        self.user_agent.clone()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn device_info(&self) -> DeviceInfo {
        let viewport = self.viewport();
        DeviceInfo {
            screen_width: self.screen.0,
            screen_height: self.screen.1,
            viewport_width: viewport.width,
            viewport_height: viewport.height,
            platform: self.platform.clone(),
            language: self.language.clone(),
            timezone: self.timezone.clone(),
            connection: self.connection.clone(),
        }
    }

    /// Wall-clock milliseconds.
    pub fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// One-shot unload-safe delivery.  `false` when the channel is
    /// unavailable or refuses the payload.
    pub fn send_beacon(&self, url: &str, body: &[u8]) -> bool {
        if !self.capabilities.beacon {
            return false;
        }
        let transport = self.beacon.lock().expect("beacon slot").clone();
        match transport {
            Some(t) => t.send(url, body),
            None => false,
        }
    }

    // -----------------------------------------------------------------------
    // Signal injection (embeddings and tests)
    // -----------------------------------------------------------------------

    /// Deliver a runtime error to the current global error handler.
    pub fn dispatch_error(&self, error: &RuntimeError) {
        let handler = self.error_handler.lock().expect("error handler slot").clone();
        if let Some(h) = handler {
            h(error);
        }
    }

    /// Deliver an unhandled rejection to the current rejection handler.
    pub fn dispatch_rejection(&self, reason: &RejectionReason) {
        let handler = self.rejection_handler.lock().expect("rejection handler slot").clone();
        if let Some(h) = handler {
            h(reason);
        }
    }

    /// Route a UI event: capture-phase listeners first, then bubble-phase,
    /// each in registration order.
    pub fn dispatch(&self, event: &UiEvent) {
        let snapshot: Vec<(bool, Arc<UiListener>)> = {
            let listeners = self.listeners.lock().expect("listener registry");
            listeners
                .iter()
                .filter(|entry| entry.kind == event.kind)
                .map(|entry| (entry.capture, entry.callback.clone()))
                .collect()
        };
        for (_, callback) in snapshot.iter().filter(|(capture, _)| *capture) {
            callback(event);
        }
        for (_, callback) in snapshot.iter().filter(|(capture, _)| !*capture) {
            callback(event);
        }
    }

    /// Invoke the current `pushState` (the SDK wrap, if installed).
    pub fn push_state(&self, url: &str) {
        let handler = self.push_state.lock().expect("pushState slot").clone();
        handler(url);
    }

    pub fn replace_state(&self, url: &str) {
        let handler = self.replace_state.lock().expect("replaceState slot").clone();
        handler(url);
    }

    pub fn emit_performance_entries(&self, entries: &[PerfEntry]) {
        let snapshot: Vec<(Vec<String>, Arc<PerfObserverCallback>)> = {
            let observers = self.perf_observers.lock().expect("perf observers");
            observers
                .iter()
                .map(|o| (o.entry_types.clone(), o.callback.clone()))
                .collect()
        };
        for entry in entries {
            let entry_type = entry.entry_type();
            for (types, callback) in &snapshot {
                if types.iter().any(|t| t == entry_type) {
                    callback(entry);
                }
            }
        }
    }

    pub fn emit_mutations(&self, mutations: &[DomMutation]) {
        let snapshot: Vec<(MutationObserverOptions, Arc<MutationObserverCallback>)> = {
            let observers = self.mutation_observers.lock().expect("mutation observers");
            observers.iter().map(|o| (o.options, o.callback.clone())).collect()
        };
        for mutation in mutations {
            for (options, callback) in &snapshot {
                if options.accepts(mutation.kind) {
                    callback(mutation);
                }
            }
        }
    }

    pub fn emit_intersections(&self, changes: &[IntersectionChange]) {
        let snapshot: Vec<(Vec<NodePath>, Arc<IntersectionObserverCallback>)> = {
            let observers = self.intersection_observers.lock().expect("intersection observers");
            observers.iter().map(|o| (o.targets.clone(), o.callback.clone())).collect()
        };
        for change in changes {
            for (targets, callback) in &snapshot {
                if targets.iter().any(|t| *t == change.target) {
                    callback(change);
                }
            }
        }
    }

    /// Flip document visibility and dispatch the corresponding event.
    pub fn set_visibility(&self, hidden: bool) {
        *self.hidden.lock().expect("visibility") = hidden;
        let mut event = UiEvent::new(UiEventKind::VisibilityChange, self.now_ms());
        event.hidden = Some(hidden);
        self.dispatch(&event);
    }

    /// Resize the viewport and dispatch a resize event.
    pub fn set_viewport(&self, width: u32, height: u32) {
        *self.viewport.lock().expect("viewport") = (width, height);
        let mut event = UiEvent::new(UiEventKind::Resize, self.now_ms());
        event.size = Some((width, height));
        self.dispatch(&event);
    }

    /// Signal that network connectivity came back.
    pub fn go_online(&self) {
        self.dispatch(&UiEvent::new(UiEventKind::Online, self.now_ms()));
    }
}
