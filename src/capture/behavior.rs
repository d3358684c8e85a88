//! Behavior capture: clicks, scrolls, inputs, focus changes, navigation,
//! visibility, and resize.
//!
//! Scroll, resize, and (opt-in) mousemove are throttled; input is debounced
//! so a typing burst produces one summarized event.  `pushState` and
//! `replaceState` are wrapped save-and-chain to emit navigate events, and
//! restored on uninstall.  Raw input text never enters an event: sensitive
//! inputs yield the `"[MASKED]"` literal, everything else a length summary.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use lookout_protocol::{
    BehaviorAction, BehaviorPayload, Coordinates, DomNode, EventCategory, NodePath, Payload,
};
use tracing::warn;

use crate::envelope::Pending;
use crate::flush::FlushNotifier;
use crate::host::{HistoryHandler, ListenerId, Page, UiEventKind};
#[cfg(test)]
use crate::host::UiEvent;
use crate::redact::MASKED;

/// Per-session capture-side buffer cap.
const BEHAVIOR_BUFFER_CAP: usize = 500;

const SCROLL_THROTTLE_MS: i64 = 250;
const RESIZE_THROTTLE_MS: i64 = 250;
const MOUSEMOVE_THROTTLE_MS: i64 = 100;
const INPUT_DEBOUNCE_MS: u64 = 500;

// ---------------------------------------------------------------------------
// CSS-path target encoding
// ---------------------------------------------------------------------------

/// Encode a node as a CSS path, root-to-leaf.
///
/// An `#id` segment restarts the path (ascent stops at ids); classes are
/// dot-joined; `:nth-child(k)` is added when the node shares its tag with
/// another element sibling.
pub fn css_path(root: &DomNode, path: &[usize]) -> Option<String> {
    let mut segments: Vec<String> = Vec::new();
    let mut parent: Option<&DomNode> = None;
    let mut current = root;

    for depth in 0..=path.len() {
        if let DomNode::Element { tag_name, attributes, .. } = current {
            if let Some(id) = attributes.get("id").filter(|id| !id.is_empty()) {
                // Ids are unique; anything above is redundant.
                segments.clear();
                segments.push(format!("#{id}"));
            } else {
                let mut segment = tag_name.clone();
                if let Some(classes) = attributes.get("class") {
                    for class in classes.split_whitespace() {
                        segment.push('.');
                        segment.push_str(class);
                    }
                }
                if let Some(DomNode::Element { children, .. }) = parent {
                    let same_tag = children
                        .iter()
                        .filter(|c| c.tag() == Some(tag_name.as_str()))
                        .count();
                    if same_tag > 1 {
                        let position = children
                            .iter()
                            .filter(|c| matches!(c, DomNode::Element { .. }))
                            .position(|c| std::ptr::eq(c, current))
                            .map(|i| i + 1)?;
                        segment.push_str(&format!(":nth-child({position})"));
                    }
                }
                segments.push(segment);
            }
        }
        if depth < path.len() {
            parent = Some(current);
            current = match current {
                DomNode::Element { children, .. } => children.get(path[depth])?,
                DomNode::Text { .. } => return None,
            };
        }
    }
    Some(segments.join(" > "))
}

// ---------------------------------------------------------------------------
// Input masking
// ---------------------------------------------------------------------------

const SENSITIVE_TYPES: [&str; 5] = ["password", "email", "tel", "credit-card", "ssn"];
const SENSITIVE_NAME_FRAGMENTS: [&str; 10] = [
    "password", "pass", "pwd", "email", "phone", "tel", "credit", "card", "ssn", "social",
];

/// An input is sensitive by its `type`, or by a `name`/`id` containing a
/// sensitive fragment (an input named `userEmail` is sensitive even as
/// `type="text"`).
pub fn is_sensitive_input(node: &DomNode) -> bool {
    let type_attr = node.attr("type").unwrap_or("").to_lowercase();
    if SENSITIVE_TYPES.contains(&type_attr.as_str()) {
        return true;
    }
    for key in ["name", "id"] {
        if let Some(value) = node.attr(key) {
            let lower = value.to_lowercase();
            if SENSITIVE_NAME_FRAGMENTS.iter().any(|f| lower.contains(f)) {
                return true;
            }
        }
    }
    false
}

/// The recorded value for an input: the masked literal, or a summary that
/// never contains the raw text.
pub fn input_value(target: Option<&DomNode>, raw: &str, mask_sensitive: bool) -> serde_json::Value {
    if mask_sensitive && target.is_some_and(is_sensitive_input) {
        return serde_json::Value::String(MASKED.to_owned());
    }
    let length = raw.chars().count();
    serde_json::json!({
        "length": length,
        "isEmpty": length == 0,
        "hasValue": length > 0,
    })
}

// ---------------------------------------------------------------------------
// BehaviorCapture
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct BehaviorCaptureConfig {
    pub track_mouse_move: bool,
    pub mask_sensitive: bool,
}

impl Default for BehaviorCaptureConfig {
    fn default() -> Self {
        BehaviorCaptureConfig {
            track_mouse_move: false,
            mask_sensitive: true,
        }
    }
}

#[derive(Debug, Clone)]
struct PendingInput {
    path: Option<NodePath>,
    raw: String,
    captured_at: i64,
}

struct BehaviorInner {
    page: Arc<Page>,
    notifier: FlushNotifier,
    config: BehaviorCaptureConfig,
    buffer: Mutex<VecDeque<Pending>>,
    /// Last-emit time per throttled kind.
    throttle: Mutex<HashMap<UiEventKind, i64>>,
    pending_input: Mutex<Option<PendingInput>>,
    debounce_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl BehaviorInner {
    fn push(&self, captured_at: i64, payload: BehaviorPayload) {
        {
            let mut buffer = match self.buffer.lock() {
                Ok(buffer) => buffer,
                Err(_) => return,
            };
            if buffer.len() == BEHAVIOR_BUFFER_CAP {
                buffer.pop_front();
                warn!(cap = BEHAVIOR_BUFFER_CAP, "behavior buffer full, dropping oldest");
            }
            buffer.push_back(Pending::new(captured_at, Payload::Behavior(payload)));
        }
        self.notifier.event_captured(EventCategory::Behavior);
    }

    /// Leading-edge throttle: emit when the window since the last emit has
    /// elapsed, drop otherwise.
    fn throttled(&self, kind: UiEventKind, window_ms: i64, now: i64) -> bool {
        let mut throttle = match self.throttle.lock() {
            Ok(throttle) => throttle,
            Err(_) => return false,
        };
        match throttle.get(&kind) {
            Some(last) if now - last < window_ms => true,
            _ => {
                throttle.insert(kind, now);
                false
            }
        }
    }

    fn target_path_string(&self, path: Option<&NodePath>) -> Option<String> {
        let path = path?;
        css_path(&self.page.document_root(), path)
    }

    fn record_input(&self, pending: PendingInput) {
        let root = self.page.document_root();
        let node = pending.path.as_ref().and_then(|p| root.node_at(p));
        let value = input_value(node, &pending.raw, self.config.mask_sensitive);
        let target = pending.path.as_ref().and_then(|p| css_path(&root, p));
        self.push(
            pending.captured_at,
            BehaviorPayload {
                action: BehaviorAction::Input,
                target,
                value: Some(value),
                coordinates: None,
                duration: None,
                context: None,
            },
        );
    }

    fn record_navigation(&self, new_url: &str) {
        let resolved = match url::Url::parse(&self.page.url())
            .ok()
            .and_then(|base| base.join(new_url).ok())
        {
            Some(url) => url,
            None => match url::Url::parse(new_url) {
                Ok(url) => url,
                Err(_) => return,
            },
        };
        let value = serde_json::json!({
            "url": resolved.as_str(),
            "path": resolved.path(),
            "search": resolved.query().map(|q| format!("?{q}")).unwrap_or_default(),
            "hash": resolved.fragment().map(|f| format!("#{f}")).unwrap_or_default(),
        });
        self.push(
            self.page.now_ms(),
            BehaviorPayload {
                action: BehaviorAction::Navigate,
                target: None,
                value: Some(value),
                coordinates: None,
                duration: None,
                context: None,
            },
        );
    }
}

pub struct BehaviorCapture {
    inner: Arc<BehaviorInner>,
    listeners: Mutex<Vec<ListenerId>>,
    saved_push: Mutex<Option<Arc<HistoryHandler>>>,
    saved_replace: Mutex<Option<Arc<HistoryHandler>>>,
}

impl BehaviorCapture {
    pub fn new(page: Arc<Page>, notifier: FlushNotifier, config: BehaviorCaptureConfig) -> Self {
        BehaviorCapture {
            inner: Arc::new(BehaviorInner {
                page,
                notifier,
                config,
                buffer: Mutex::new(VecDeque::new()),
                throttle: Mutex::new(HashMap::new()),
                pending_input: Mutex::new(None),
                debounce_task: Mutex::new(None),
            }),
            listeners: Mutex::new(Vec::new()),
            saved_push: Mutex::new(None),
            saved_replace: Mutex::new(None),
        }
    }

    pub fn install(&self) {
        let page = self.inner.page.clone();
        let mut ids = Vec::new();

        // Click: no policy.
        let inner = self.inner.clone();
        ids.push(page.add_listener(UiEventKind::Click, false, Arc::new(move |event| {
            let target = inner.target_path_string(event.target.as_ref());
            inner.push(
                event.timestamp,
                BehaviorPayload {
                    action: BehaviorAction::Click,
                    target,
                    value: None,
                    coordinates: event.coordinates.map(|(x, y)| Coordinates { x, y }),
                    duration: None,
                    context: None,
                },
            );
        })));

        // Scroll: throttled.
        let inner = self.inner.clone();
        ids.push(page.add_listener(UiEventKind::Scroll, false, Arc::new(move |event| {
            if inner.throttled(UiEventKind::Scroll, SCROLL_THROTTLE_MS, event.timestamp) {
                return;
            }
            let (x, y) = event.scroll.unwrap_or((0.0, 0.0));
            inner.push(
                event.timestamp,
                BehaviorPayload {
                    action: BehaviorAction::Scroll,
                    target: inner.target_path_string(event.target.as_ref()),
                    value: Some(serde_json::json!({ "x": x, "y": y })),
                    coordinates: None,
                    duration: None,
                    context: None,
                },
            );
        })));

        // Input: debounced; a burst of keystrokes becomes one event.
        let inner = self.inner.clone();
        ids.push(page.add_listener(UiEventKind::Input, false, Arc::new(move |event| {
            let pending = PendingInput {
                path: event.target.clone(),
                raw: event.value.clone().unwrap_or_default(),
                captured_at: event.timestamp,
            };
            if let Ok(mut slot) = inner.pending_input.lock() {
                *slot = Some(pending);
            }
            let restart = inner.clone();
            let mut task = match inner.debounce_task.lock() {
                Ok(task) => task,
                Err(_) => return,
            };
            if let Some(handle) = task.take() {
                handle.abort();
            }
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    *task = Some(handle.spawn(async move {
                        tokio::time::sleep(std::time::Duration::from_millis(INPUT_DEBOUNCE_MS))
                            .await;
                        let pending = restart.pending_input.lock().ok().and_then(|mut p| p.take());
                        if let Some(pending) = pending {
                            restart.record_input(pending);
                        }
                    }));
                }
                // No runtime (pure-sync embedding): emit immediately.
                Err(_) => {
                    drop(task);
                    if let Ok(mut slot) = inner.pending_input.lock() {
                        if let Some(pending) = slot.take() {
                            drop(slot);
                            inner.record_input(pending);
                        }
                    }
                }
            }
        })));

        // Change: immediate, same masking as input.
        let inner = self.inner.clone();
        ids.push(page.add_listener(UiEventKind::Change, false, Arc::new(move |event| {
            let root = inner.page.document_root();
            let node = event.target.as_ref().and_then(|p| root.node_at(p));
            let value = input_value(
                node,
                event.value.as_deref().unwrap_or(""),
                inner.config.mask_sensitive,
            );
            inner.push(
                event.timestamp,
                BehaviorPayload {
                    action: BehaviorAction::Change,
                    target: event.target.as_ref().and_then(|p| css_path(&root, p)),
                    value: Some(value),
                    coordinates: None,
                    duration: None,
                    context: None,
                },
            );
        })));

        // Focus / blur: no policy.
        for (kind, action) in [
            (UiEventKind::Focus, BehaviorAction::Focus),
            (UiEventKind::Blur, BehaviorAction::Blur),
        ] {
            let inner = self.inner.clone();
            ids.push(page.add_listener(kind, false, Arc::new(move |event| {
                inner.push(
                    event.timestamp,
                    BehaviorPayload {
                        action,
                        target: inner.target_path_string(event.target.as_ref()),
                        value: None,
                        coordinates: None,
                        duration: None,
                        context: None,
                    },
                );
            })));
        }

        // popstate navigation.
        let inner = self.inner.clone();
        ids.push(page.add_listener(UiEventKind::PopState, false, Arc::new(move |event| {
            if let Some(url) = &event.url {
                inner.record_navigation(url);
            }
        })));

        // Visibility: no policy.
        let inner = self.inner.clone();
        ids.push(page.add_listener(UiEventKind::VisibilityChange, false, Arc::new(move |event| {
            inner.push(
                event.timestamp,
                BehaviorPayload {
                    action: BehaviorAction::Visibility,
                    target: None,
                    value: Some(serde_json::json!({ "hidden": event.hidden.unwrap_or(false) })),
                    coordinates: None,
                    duration: None,
                    context: None,
                },
            );
        })));

        // Resize: throttled.
        let inner = self.inner.clone();
        ids.push(page.add_listener(UiEventKind::Resize, false, Arc::new(move |event| {
            if inner.throttled(UiEventKind::Resize, RESIZE_THROTTLE_MS, event.timestamp) {
                return;
            }
            let (width, height) = event.size.unwrap_or((0, 0));
            inner.push(
                event.timestamp,
                BehaviorPayload {
                    action: BehaviorAction::Resize,
                    target: None,
                    value: Some(serde_json::json!({ "width": width, "height": height })),
                    coordinates: None,
                    duration: None,
                    context: None,
                },
            );
        })));

        // Mousemove: opt-in, throttled.
        if self.inner.config.track_mouse_move {
            let inner = self.inner.clone();
            ids.push(page.add_listener(UiEventKind::MouseMove, false, Arc::new(move |event| {
                if inner.throttled(UiEventKind::MouseMove, MOUSEMOVE_THROTTLE_MS, event.timestamp) {
                    return;
                }
                inner.push(
                    event.timestamp,
                    BehaviorPayload {
                        action: BehaviorAction::Custom,
                        target: None,
                        value: Some(serde_json::json!({ "kind": "mousemove" })),
                        coordinates: event.coordinates.map(|(x, y)| Coordinates { x, y }),
                        duration: None,
                        context: None,
                    },
                );
            })));
        }

        *self.listeners.lock().expect("behavior listeners") = ids;

        // History wraps: emit navigate, then delegate to the saved original.
        let prior_cell: Arc<Mutex<Option<Arc<HistoryHandler>>>> = Arc::new(Mutex::new(None));
        let inner = self.inner.clone();
        let chain = prior_cell.clone();
        let prior = self.inner.page.swap_push_state(Arc::new(move |url: &str| {
            inner.record_navigation(url);
            if let Ok(prior) = chain.lock() {
                if let Some(prior) = prior.as_ref() {
                    prior(url);
                }
            }
        }));
        *prior_cell.lock().expect("prior pushState cell") = Some(prior.clone());
        *self.saved_push.lock().expect("saved pushState") = Some(prior);

        let prior_cell: Arc<Mutex<Option<Arc<HistoryHandler>>>> = Arc::new(Mutex::new(None));
        let inner = self.inner.clone();
        let chain = prior_cell.clone();
        let prior = self.inner.page.swap_replace_state(Arc::new(move |url: &str| {
            inner.record_navigation(url);
            if let Ok(prior) = chain.lock() {
                if let Some(prior) = prior.as_ref() {
                    prior(url);
                }
            }
        }));
        *prior_cell.lock().expect("prior replaceState cell") = Some(prior.clone());
        *self.saved_replace.lock().expect("saved replaceState") = Some(prior);
    }

    pub fn uninstall(&self) {
        if let Some(prior) = self.saved_replace.lock().expect("saved replaceState").take() {
            self.inner.page.swap_replace_state(prior);
        }
        if let Some(prior) = self.saved_push.lock().expect("saved pushState").take() {
            self.inner.page.swap_push_state(prior);
        }
        if let Ok(mut task) = self.inner.debounce_task.lock() {
            if let Some(handle) = task.take() {
                handle.abort();
            }
        }
        let ids: Vec<ListenerId> = self
            .listeners
            .lock()
            .expect("behavior listeners")
            .drain(..)
            .collect();
        for id in ids.into_iter().rev() {
            self.inner.page.remove_listener(id);
        }
    }

    pub fn drain_pending(&self) -> Vec<Pending> {
        match self.inner.buffer.lock() {
            Ok(mut buffer) => buffer.drain(..).collect(),
            Err(_) => Vec::new(),
        }
    }
}
