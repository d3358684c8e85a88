//! Error capture: global errors, unhandled rejections, resource-load
//! failures, and intercepted fetch/XHR exchanges.
//!
//! # Installation discipline
//! Every hook saves the existing handler and installs a wrapper that
//! invokes the prior handler first; uninstall restores the saved
//! references.  Intercepted transports re-yield the original outcome to the
//! caller after recording, so host semantics are preserved.
//!
//! # Dedup
//! The fingerprint is a pure function of `(message, fileName, line,
//! column)`; within a session the second event with an equal fingerprint is
//! dropped.  The dedup set is never garbage-collected.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use lookout_protocol::{ErrorKind, ErrorPayload, EventCategory, Payload, Severity};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::envelope::Pending;
use crate::flush::FlushNotifier;
use crate::host::{
    ErrorHandler, FetchFailure, FetchTransport, HttpExchangeRequest, HttpExchangeResponse,
    ListenerId, Page, RejectionHandler, RejectionReason, RuntimeError, UiEventKind, XhrTransport,
};
use crate::redact;

/// Per-session capture-side buffer cap.
const ERROR_BUFFER_CAP: usize = 100;

// ---------------------------------------------------------------------------
// Fingerprint and severity
// ---------------------------------------------------------------------------

/// Stable short hash of `message:fileName:line:column`.
///
/// No timestamp, no salt: equal inputs always collide, which is what makes
/// session dedup deterministic.
pub fn fingerprint(
    message: &str,
    file_name: Option<&str>,
    line: Option<u32>,
    column: Option<u32>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(message.as_bytes());
    hasher.update(b":");
    hasher.update(file_name.unwrap_or("").as_bytes());
    hasher.update(b":");
    hasher.update(line.unwrap_or(0).to_le_bytes());
    hasher.update(b":");
    hasher.update(column.unwrap_or(0).to_le_bytes());
    let digest = hasher.finalize();
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}

/// Keyword-based severity for JS runtime errors, case-insensitive.
pub fn severity_from_message(message: &str) -> Severity {
    let lower = message.to_lowercase();
    const CRITICAL: [&str; 4] = ["crash", "fatal", "critical", "security"];
    const HIGH: [&str; 4] = ["error", "exception", "failed", "timeout"];
    const MEDIUM: [&str; 3] = ["warning", "deprecated", "invalid"];

    if CRITICAL.iter().any(|k| lower.contains(k)) {
        Severity::Critical
    } else if HIGH.iter().any(|k| lower.contains(k)) {
        Severity::High
    } else if MEDIUM.iter().any(|k| lower.contains(k)) {
        Severity::Medium
    } else {
        Severity::Low
    }
}

// ---------------------------------------------------------------------------
// Shared capture state
// ---------------------------------------------------------------------------

struct CaptureState {
    page: Arc<Page>,
    notifier: FlushNotifier,
    buffer: Mutex<VecDeque<Pending>>,
    seen: Mutex<HashSet<String>>,
    /// When non-empty, only exchanges whose URL host matches are recorded.
    allowed_domains: Vec<String>,
}

impl CaptureState {
    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        kind: ErrorKind,
        message: &str,
        file_name: Option<String>,
        line: Option<u32>,
        column: Option<u32>,
        stack: Option<String>,
        severity: Severity,
        context: Option<serde_json::Value>,
    ) {
        let fp = fingerprint(message, file_name.as_deref(), line, column);
        {
            let mut seen = match self.seen.lock() {
                Ok(seen) => seen,
                Err(_) => return,
            };
            if !seen.insert(fp.clone()) {
                debug!(fingerprint = %fp, "duplicate error dropped");
                return;
            }
        }

        let payload = ErrorPayload {
            error_type: kind,
            message: redact::redact_message(message),
            stack_trace: stack.map(|s| redact::redact_stack(&s)),
            file_name,
            line_number: line,
            column_number: column,
            severity,
            context: context.map(redact::sanitize_context),
            fingerprint: fp,
        };
        self.push(Pending::new(self.page.now_ms(), Payload::Error(payload)));
    }

    fn push(&self, pending: Pending) {
        {
            let mut buffer = match self.buffer.lock() {
                Ok(buffer) => buffer,
                Err(_) => return,
            };
            if buffer.len() == ERROR_BUFFER_CAP {
                buffer.pop_front();
                warn!(cap = ERROR_BUFFER_CAP, "error buffer full, dropping oldest");
            }
            buffer.push_back(pending);
        }
        self.notifier.event_captured(EventCategory::Error);
    }

    fn record_runtime_error(&self, error: &RuntimeError) {
        self.record(
            ErrorKind::Javascript,
            &error.message,
            error.file_name.clone(),
            error.line_number,
            error.column_number,
            error.stack_trace.clone(),
            severity_from_message(&error.message),
            None,
        );
    }

    fn record_rejection(&self, reason: &RejectionReason) {
        let (message, stack) = match reason {
            RejectionReason::Error {
                message,
                stack_trace,
            } => (format!("Unhandled rejection: {message}"), stack_trace.clone()),
            RejectionReason::Text(text) => (format!("Unhandled rejection: {text}"), None),
            RejectionReason::Value(value) => (
                format!(
                    "Unhandled rejection: {}",
                    serde_json::to_string(value).unwrap_or_else(|_| "<unserializable>".to_owned())
                ),
                None,
            ),
        };
        self.record(
            ErrorKind::Promise,
            &message,
            None,
            None,
            None,
            stack,
            Severity::High,
            None,
        );
    }

    fn record_exchange(
        &self,
        request: &HttpExchangeRequest,
        response: Option<&HttpExchangeResponse>,
        failure: Option<&FetchFailure>,
        duration_ms: i64,
    ) {
        if !self.domain_allowed(&request.url) {
            return;
        }

        let (message, severity, status) = match (response, failure) {
            (Some(resp), _) => {
                let severity = if resp.status >= 500 {
                    Severity::High
                } else {
                    Severity::Medium
                };
                (
                    format!("HTTP {} for {} {}", resp.status, request.method, request.url),
                    severity,
                    Some(resp.status),
                )
            }
            (None, Some(failure)) => (
                format!("{} {} failed: {failure}", request.method, request.url),
                Severity::High,
                None,
            ),
            (None, None) => return,
        };

        let context = serde_json::json!({
            "url": request.url,
            "method": request.method,
            "status": status,
            "duration": duration_ms,
            "requestHeaders": request.headers,
            "responseHeaders": response.map(|r| r.headers.clone()),
        });
        self.record(
            ErrorKind::Network,
            &message,
            None,
            None,
            None,
            None,
            severity,
            Some(context),
        );
    }

    fn domain_allowed(&self, url: &str) -> bool {
        if self.allowed_domains.is_empty() {
            return true;
        }
        let host = url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_owned));
        match host {
            Some(host) => self
                .allowed_domains
                .iter()
                .any(|d| host == *d || host.ends_with(&format!(".{d}"))),
            None => true,
        }
    }
}

// ---------------------------------------------------------------------------
// Transport interceptors
// ---------------------------------------------------------------------------

struct InterceptingFetch {
    inner: Arc<dyn FetchTransport>,
    state: Arc<CaptureState>,
}

impl FetchTransport for InterceptingFetch {
    fn fetch(
        &self,
        request: HttpExchangeRequest,
    ) -> BoxFuture<'static, Result<HttpExchangeResponse, FetchFailure>> {
        let inner = self.inner.clone();
        let state = self.state.clone();
        Box::pin(async move {
            let started = state.page.now_ms();
            let result = inner.fetch(request.clone()).await;
            let duration = state.page.now_ms() - started;
            match &result {
                Ok(response) if !response.ok() => {
                    state.record_exchange(&request, Some(response), None, duration);
                }
                Err(failure) => {
                    state.record_exchange(&request, None, Some(failure), duration);
                }
                Ok(_) => {}
            }
            // Re-yield the original outcome; host semantics are untouched.
            result
        })
    }
}

struct InterceptingXhr {
    inner: Arc<dyn XhrTransport>,
    state: Arc<CaptureState>,
}

impl XhrTransport for InterceptingXhr {
    fn perform(&self, request: HttpExchangeRequest) -> Result<HttpExchangeResponse, FetchFailure> {
        let started = self.state.page.now_ms();
        let result = self.inner.perform(request.clone());
        let duration = self.state.page.now_ms() - started;
        match &result {
            Ok(response) if !response.ok() => {
                self.state
                    .record_exchange(&request, Some(response), None, duration);
            }
            Err(failure) => {
                self.state
                    .record_exchange(&request, None, Some(failure), duration);
            }
            Ok(_) => {}
        }
        result
    }
}

// ---------------------------------------------------------------------------
// ErrorCapture
// ---------------------------------------------------------------------------

pub struct ErrorCapture {
    page: Arc<Page>,
    state: Arc<CaptureState>,
    saved_error: Mutex<Option<Option<Arc<ErrorHandler>>>>,
    saved_rejection: Mutex<Option<Option<Arc<RejectionHandler>>>>,
    saved_fetch: Mutex<Option<Arc<dyn FetchTransport>>>,
    saved_xhr: Mutex<Option<Arc<dyn XhrTransport>>>,
    resource_listener: Mutex<Option<ListenerId>>,
}

impl ErrorCapture {
    pub fn new(page: Arc<Page>, notifier: FlushNotifier, allowed_domains: Vec<String>) -> Self {
        ErrorCapture {
            state: Arc::new(CaptureState {
                page: page.clone(),
                notifier,
                buffer: Mutex::new(VecDeque::new()),
                seen: Mutex::new(HashSet::new()),
                allowed_domains,
            }),
            page,
            saved_error: Mutex::new(None),
            saved_rejection: Mutex::new(None),
            saved_fetch: Mutex::new(None),
            saved_xhr: Mutex::new(None),
            resource_listener: Mutex::new(None),
        }
    }

    /// Install all hooks, chaining to whatever handlers the host already has.
    pub fn install(&self) {
        // Global error handler.
        let prior_cell: Arc<Mutex<Option<Arc<ErrorHandler>>>> = Arc::new(Mutex::new(None));
        let state = self.state.clone();
        let chain = prior_cell.clone();
        let wrapper: Arc<ErrorHandler> = Arc::new(move |error: &RuntimeError| {
            if let Ok(prior) = chain.lock() {
                if let Some(prior) = prior.as_ref() {
                    prior(error);
                }
            }
            state.record_runtime_error(error);
        });
        let prior = self.page.set_error_handler(Some(wrapper));
        *prior_cell.lock().expect("prior error handler cell") = prior.clone();
        *self.saved_error.lock().expect("saved error handler") = Some(prior);

        // Unhandled rejection handler.
        let prior_cell: Arc<Mutex<Option<Arc<RejectionHandler>>>> = Arc::new(Mutex::new(None));
        let state = self.state.clone();
        let chain = prior_cell.clone();
        let wrapper: Arc<RejectionHandler> = Arc::new(move |reason: &RejectionReason| {
            if let Ok(prior) = chain.lock() {
                if let Some(prior) = prior.as_ref() {
                    prior(reason);
                }
            }
            state.record_rejection(reason);
        });
        let prior = self.page.set_rejection_handler(Some(wrapper));
        *prior_cell.lock().expect("prior rejection handler cell") = prior.clone();
        *self.saved_rejection.lock().expect("saved rejection handler") = Some(prior);

        // Resource-load errors: capturing-phase listener.
        let state = self.state.clone();
        let id = self.page.add_listener(
            UiEventKind::ResourceError,
            true,
            Arc::new(move |event| {
                if let Some(resource) = &event.resource {
                    let message =
                        format!("Failed to load {}: {}", resource.tag_name, resource.source);
                    state.record(
                        ErrorKind::Network,
                        &message,
                        None,
                        None,
                        None,
                        None,
                        Severity::Medium,
                        None,
                    );
                }
            }),
        );
        *self.resource_listener.lock().expect("resource listener id") = Some(id);

        // fetch / XHR interception.
        let inner = self.page.fetch_transport();
        let prior = self.page.swap_fetch(Arc::new(InterceptingFetch {
            inner,
            state: self.state.clone(),
        }));
        *self.saved_fetch.lock().expect("saved fetch") = Some(prior);

        let inner = self.page.xhr_transport();
        let prior = self.page.swap_xhr(Arc::new(InterceptingXhr {
            inner,
            state: self.state.clone(),
        }));
        *self.saved_xhr.lock().expect("saved xhr") = Some(prior);
    }

    /// Remove all hooks, restoring the saved references in reverse order.
    pub fn uninstall(&self) {
        if let Some(prior) = self.saved_xhr.lock().expect("saved xhr").take() {
            self.page.swap_xhr(prior);
        }
        if let Some(prior) = self.saved_fetch.lock().expect("saved fetch").take() {
            self.page.swap_fetch(prior);
        }
        if let Some(id) = self.resource_listener.lock().expect("resource listener id").take() {
            self.page.remove_listener(id);
        }
        if let Some(prior) = self.saved_rejection.lock().expect("saved rejection handler").take() {
            self.page.set_rejection_handler(prior);
        }
        if let Some(prior) = self.saved_error.lock().expect("saved error handler").take() {
            self.page.set_error_handler(prior);
        }
    }

    /// Record an explicitly captured exception (`captureException`).
    pub fn capture_exception(
        &self,
        message: &str,
        stack: Option<String>,
        context: Option<serde_json::Value>,
        severity: Option<Severity>,
    ) {
        self.state.record(
            ErrorKind::Custom,
            message,
            None,
            None,
            None,
            stack,
            severity.unwrap_or_else(|| severity_from_message(message)),
            context,
        );
    }

    /// Record an explicitly captured message (`captureMessage`).
    pub fn capture_message(
        &self,
        message: &str,
        level: Option<Severity>,
        context: Option<serde_json::Value>,
    ) {
        self.state.record(
            ErrorKind::Custom,
            message,
            None,
            None,
            None,
            None,
            level.unwrap_or(Severity::Low),
            context,
        );
    }

    pub fn drain_pending(&self) -> Vec<Pending> {
        match self.state.buffer.lock() {
            Ok(mut buffer) => buffer.drain(..).collect(),
            Err(_) => Vec::new(),
        }
    }
}
