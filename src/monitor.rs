//! Orchestrator and public facade.
//!
//! Owns the lifecycle: capture installation, periodic collection, flush
//! dispatch, session/user identity, spill replay on startup and `online`,
//! and the unload beacon.  `start`/`stop` are re-entrancy safe; `stop`
//! removes everything installed during `start` in reverse order, then runs
//! a final flush and beacon attempt.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use lookout_protocol::{BehaviorAction, BehaviorPayload, Payload, Severity};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::SDK_VERSION;
use crate::bus::{EventBus, Plugin, PluginRegistry, SubscriptionId};
use crate::capture::{BehaviorCapture, BehaviorCaptureConfig, ErrorCapture, PerformanceCapture};
use crate::config::{ConfigError, MonitorConfig};
use crate::envelope::{EnvelopeStamper, Pending};
use crate::flush::{self, FlushNotifier, FlushPolicy, FlushSignal};
use crate::host::{ListenerId, Page, UiEventKind};
use crate::queue::{self, EventQueue};
use crate::replay::{RecorderState, ReplayConfig, ReplayRecorder};
use crate::sampler::Sampler;
use crate::session::SessionIdentity;
use crate::store::spill::SpillStore;
use crate::store::{KeyValueStore, MemoryStore, Namespaced, open_persistent};
use crate::transport::{BeaconSender, HttpSender, HttpSenderConfig, SendError};

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Send(#[from] SendError),
}

/// Point-in-time view for `getStatus`.
#[derive(Debug, Clone)]
pub struct MonitorStatus {
    pub running: bool,
    pub session_id: String,
    pub user_id: Option<String>,
    pub queue_size: usize,
    pub spilled_events: usize,
    pub events_sent: u64,
    pub replay_state: RecorderState,
    pub environment: Option<String>,
}

struct MonitorInner {
    config: MonitorConfig,
    page: Arc<Page>,
    identity: Arc<SessionIdentity>,
    stamper: EnvelopeStamper,
    queue: Mutex<EventQueue>,
    sampler: Sampler,
    sender: HttpSender,
    beacon: BeaconSender,
    spill: Arc<SpillStore>,
    notifier: FlushNotifier,
    error_capture: Option<ErrorCapture>,
    performance_capture: Option<PerformanceCapture>,
    behavior_capture: Option<BehaviorCapture>,
    replay: ReplayRecorder,
    bus: EventBus,
    plugins: PluginRegistry,
    running: AtomicBool,
    events_sent: AtomicU64,
}

impl MonitorInner {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Drain every capture buffer, stamp, sample, and enqueue.
    fn collect(&self) {
        let mut pending: Vec<Pending> = Vec::new();
        if let Some(capture) = &self.error_capture {
            pending.extend(capture.drain_pending());
        }
        if let Some(capture) = &self.performance_capture {
            pending.extend(capture.drain_pending());
        }
        if let Some(capture) = &self.behavior_capture {
            pending.extend(capture.drain_pending());
        }
        pending.extend(self.replay.drain_pending());

        for item in pending {
            let event = self.stamper.stamp(item);
            if !self.sampler.admit(&event) {
                continue;
            }
            if let Ok(mut queue) = self.queue.lock() {
                queue.enqueue(event);
            }
        }
    }

    /// Snapshot-drain the queue, then await the send.  Admissions that land
    /// while the POST is in flight go to the next batch.
    async fn flush_queue(&self) {
        let events = match self.queue.lock() {
            Ok(mut queue) => queue.drain(None),
            Err(_) => return,
        };
        if events.is_empty() {
            return;
        }
        let count = events.len() as u64;
        match self.sender.send(events).await {
            Ok(()) => {
                self.events_sent.fetch_add(count, Ordering::Relaxed);
            }
            // Failed batches are already spilled; surface here only.
            Err(e) => warn!(error = %e, "flush failed"),
        }
    }

    async fn collect_and_flush(&self) {
        self.collect();
        self.flush_queue().await;
    }

    /// Unload path: synchronous collect + drain + beacon.  Failure is
    /// silent; the page is going away.
    fn handle_unload(&self) {
        self.collect();
        let events = match self.queue.lock() {
            Ok(mut queue) => queue.drain(None),
            Err(_) => return,
        };
        if events.is_empty() {
            return;
        }
        let _ = self.beacon.send(events);
    }

    fn spawn_spill_replay(self: &Arc<Self>, reason: &'static str) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!(reason, "no async runtime, skipping spill replay");
            return;
        };
        let inner = self.clone();
        handle.spawn(async move {
            if inner.sender.replay_spill().await {
                debug!(reason, "spill replay complete");
            }
        });
    }
}

/// The SDK core.
///
/// Construct with [`Monitor::new`], then `start()`.  All public operations
/// are warn-and-no-op before `start` and after `stop`, never panics.
pub struct Monitor {
    inner: Arc<MonitorInner>,
    signal_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<FlushSignal>>>,
    scheduler: Mutex<Option<tokio::task::JoinHandle<()>>>,
    lifecycle_listeners: Mutex<Vec<ListenerId>>,
}

impl Monitor {
    /// Build a monitor with default stores: in-memory session store and a
    /// SQLite-backed persistent store when `storage_path` is configured.
    pub fn new(config: MonitorConfig, page: Arc<Page>) -> Result<Monitor, MonitorError> {
        let persistent = open_persistent(config.storage_path.as_deref());
        Monitor::with_stores(config, page, Arc::new(MemoryStore::new()), persistent)
    }

    /// Build a monitor over caller-supplied session and persistent stores.
    pub fn with_stores(
        config: MonitorConfig,
        page: Arc<Page>,
        session_store: Arc<dyn KeyValueStore>,
        persistent_store: Arc<dyn KeyValueStore>,
    ) -> Result<Monitor, MonitorError> {
        config.validate()?;

        if config.debug {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
                )
                .try_init();
        }

        let session_store: Arc<dyn KeyValueStore> =
            Arc::new(Namespaced::new(&config.app_id, session_store));
        let persistent_store: Arc<dyn KeyValueStore> =
            Arc::new(Namespaced::new(&config.app_id, persistent_store));

        let identity = Arc::new(SessionIdentity::new(session_store, persistent_store.clone()));
        let spill = Arc::new(SpillStore::new(persistent_store));

        let sender = HttpSender::new(
            HttpSenderConfig {
                endpoint: config.endpoint.clone(),
                api_key: config.api_key.clone(),
                sdk_version: SDK_VERSION.to_owned(),
                batch_size: config.reporting.batch_size,
                max_retries: config.reporting.max_retries,
                timeout: config.timeout(),
                retry_base_delay: Duration::from_millis(config.reporting.retry_base_delay_ms),
                compress: config.reporting.compress,
            },
            spill.clone(),
        )?;
        let beacon = BeaconSender::new(page.clone(), &config.endpoint, &config.api_key, SDK_VERSION);

        let (notifier, signal_rx) = flush::channel();

        let error_capture = config.features.errors.then(|| {
            ErrorCapture::new(
                page.clone(),
                notifier.clone(),
                config.privacy.allowed_domains.clone(),
            )
        });
        let performance_capture = config
            .features
            .performance
            .then(|| PerformanceCapture::new(page.clone()));
        let behavior_capture = config.features.behavior.then(|| {
            BehaviorCapture::new(
                page.clone(),
                notifier.clone(),
                BehaviorCaptureConfig {
                    track_mouse_move: config.features.mouse_move,
                    mask_sensitive: config.privacy.mask_sensitive_data,
                },
            )
        });
        let replay = ReplayRecorder::new(
            page.clone(),
            ReplayConfig {
                blocked_elements: config.privacy.blocked_elements.clone(),
                track_mouse_move: config.features.mouse_move,
            },
        );

        let stamper = EnvelopeStamper::new(&config.app_id, page.clone(), identity.clone());
        let sampler = Sampler::new(config.sampling, config.reporting.slow_load_threshold_ms);

        let inner = Arc::new(MonitorInner {
            queue: Mutex::new(EventQueue::new(queue::DEFAULT_CAPACITY)),
            sampler,
            sender,
            beacon,
            spill,
            notifier,
            error_capture,
            performance_capture,
            behavior_capture,
            replay,
            bus: EventBus::new(),
            plugins: PluginRegistry::new(),
            running: AtomicBool::new(false),
            events_sent: AtomicU64::new(0),
            stamper,
            identity,
            page,
            config,
        });

        Ok(Monitor {
            inner,
            signal_rx: Arc::new(tokio::sync::Mutex::new(signal_rx)),
            scheduler: Mutex::new(None),
            lifecycle_listeners: Mutex::new(Vec::new()),
        })
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Install captures, lifecycle hooks, and the flush scheduler.
    ///
    /// Reentrant start is a warning and a no-op.
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            warn!("monitor already started");
            return;
        }
        info!(
            app_id = %self.inner.config.app_id,
            session_id = %self.inner.identity.session_id(),
            version = SDK_VERSION,
            "monitor starting"
        );

        if let Some(capture) = &self.inner.error_capture {
            capture.install();
        }
        if let Some(capture) = &self.inner.performance_capture {
            capture.install();
        }
        if let Some(capture) = &self.inner.behavior_capture {
            capture.install();
        }
        if self.inner.config.features.replay {
            self.inner.replay.start();
        }

        self.install_lifecycle_listeners();

        // Flush scheduler.
        let policy = FlushPolicy {
            error_debounce: Duration::from_millis(self.inner.config.reporting.error_debounce_ms),
            routine_throttle: Duration::from_millis(
                self.inner.config.reporting.routine_throttle_ms,
            ),
            periodic: Duration::from_millis(self.inner.config.reporting.flush_interval_ms),
        };
        let inner = self.inner.clone();
        let rx = self.signal_rx.clone();
        let task = tokio::spawn(flush::run(policy, rx, move || {
            let inner = inner.clone();
            async move {
                inner.collect_and_flush().await;
            }
        }));
        *self.scheduler.lock().expect("scheduler slot") = Some(task);

        // Events parked by a previous run get one replay attempt.
        self.inner.spawn_spill_replay("startup");

        self.inner.bus.emit("start", &serde_json::json!({}));
    }

    /// Tear down in reverse installation order, then final-flush.
    ///
    /// Idempotent; safe to call on a never-started monitor.
    pub async fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            debug!("stop on a stopped monitor");
            return;
        }

        if let Some(task) = self.scheduler.lock().expect("scheduler slot").take() {
            task.abort();
        }
        self.remove_lifecycle_listeners();

        self.inner.replay.stop();
        if let Some(capture) = &self.inner.behavior_capture {
            capture.uninstall();
        }
        if let Some(capture) = &self.inner.performance_capture {
            capture.uninstall();
        }
        if let Some(capture) = &self.inner.error_capture {
            capture.uninstall();
        }

        // Final flush; anything admitted during the POST goes to the beacon.
        self.inner.collect();
        self.inner.flush_queue().await;
        let residual = match self.inner.queue.lock() {
            Ok(mut queue) => queue.drain(None),
            Err(_) => Vec::new(),
        };
        if !residual.is_empty() {
            let _ = self.inner.beacon.send(residual);
        }

        self.inner.plugins.shutdown();
        self.inner.bus.emit("stop", &serde_json::json!({}));
        info!("monitor stopped");
    }

    fn install_lifecycle_listeners(&self) {
        let page = &self.inner.page;
        let mut ids = Vec::new();

        // Unload contract: drain and beacon when the page goes away.
        let inner = self.inner.clone();
        ids.push(page.add_listener(UiEventKind::VisibilityChange, false, Arc::new(move |event| {
            if event.hidden == Some(true) {
                inner.handle_unload();
            }
        })));
        for kind in [UiEventKind::PageHide, UiEventKind::BeforeUnload] {
            let inner = self.inner.clone();
            ids.push(page.add_listener(kind, false, Arc::new(move |_| {
                inner.handle_unload();
            })));
        }

        // Connectivity restored: one spill replay attempt.
        let inner = self.inner.clone();
        ids.push(page.add_listener(UiEventKind::Online, false, Arc::new(move |_| {
            inner.spawn_spill_replay("online");
        })));

        *self.lifecycle_listeners.lock().expect("lifecycle listeners") = ids;
    }

    fn remove_lifecycle_listeners(&self) {
        let ids: Vec<ListenerId> = self
            .lifecycle_listeners
            .lock()
            .expect("lifecycle listeners")
            .drain(..)
            .collect();
        for id in ids.into_iter().rev() {
            self.inner.page.remove_listener(id);
        }
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    /// Record a custom event.  Emits `track` on the bus when admitted.
    pub fn track(&self, name: &str, props: Option<serde_json::Value>) {
        if !self.inner.is_running() {
            warn!(name, "track before start");
            return;
        }
        let payload = BehaviorPayload {
            action: BehaviorAction::Custom,
            target: None,
            value: Some(serde_json::json!({ "name": name, "props": props })),
            coordinates: None,
            duration: None,
            context: None,
        };
        let event = self.inner.stamper.stamp(Pending::new(
            self.inner.page.now_ms(),
            Payload::Behavior(payload),
        ));
        if !self.inner.sampler.admit(&event) {
            return;
        }
        if let Ok(mut queue) = self.inner.queue.lock() {
            queue.enqueue(event);
        }
        self.inner
            .notifier
            .event_captured(lookout_protocol::EventCategory::Behavior);
        self.inner
            .bus
            .emit("track", &serde_json::json!({ "name": name }));
    }

    pub fn capture_exception(
        &self,
        message: &str,
        stack: Option<String>,
        context: Option<serde_json::Value>,
        severity: Option<Severity>,
    ) {
        if !self.inner.is_running() {
            warn!("captureException before start");
            return;
        }
        match &self.inner.error_capture {
            Some(capture) => capture.capture_exception(message, stack, context, severity),
            None => warn!("error capture disabled"),
        }
    }

    pub fn capture_message(
        &self,
        message: &str,
        level: Option<Severity>,
        context: Option<serde_json::Value>,
    ) {
        if !self.inner.is_running() {
            warn!("captureMessage before start");
            return;
        }
        match &self.inner.error_capture {
            Some(capture) => capture.capture_message(message, level, context),
            None => warn!("error capture disabled"),
        }
    }

    // -----------------------------------------------------------------------
    // Identity
    // -----------------------------------------------------------------------

    pub fn set_user(&self, user_id: &str, props: Option<serde_json::Value>) {
        self.inner.identity.set_user(user_id, props);
    }

    pub fn clear_user(&self) {
        self.inner.identity.clear_user();
    }

    // -----------------------------------------------------------------------
    // Timing
    // -----------------------------------------------------------------------

    pub fn mark(&self, name: &str) {
        if let Some(capture) = &self.inner.performance_capture {
            capture.mark(name);
        }
    }

    pub fn measure(&self, name: &str, start: Option<&str>, end: Option<&str>) -> Option<f64> {
        self.inner
            .performance_capture
            .as_ref()
            .and_then(|capture| capture.measure(name, start, end))
    }

    // -----------------------------------------------------------------------
    // Replay controls
    // -----------------------------------------------------------------------

    pub fn start_replay(&self) -> bool {
        if !self.inner.is_running() {
            warn!("startReplay before start");
            return false;
        }
        self.inner.replay.start()
    }

    pub fn stop_replay(&self) {
        self.inner.replay.stop();
    }

    pub fn pause_replay(&self) {
        self.inner.replay.pause();
    }

    pub fn resume_replay(&self) {
        self.inner.replay.resume();
    }

    // -----------------------------------------------------------------------
    // Flush, status, plugins, bus
    // -----------------------------------------------------------------------

    /// Collect and flush now, bypassing the scheduler.
    pub async fn flush(&self) {
        if !self.inner.is_running() {
            warn!("flush before start");
            return;
        }
        self.inner.collect_and_flush().await;
    }

    pub fn status(&self) -> MonitorStatus {
        MonitorStatus {
            running: self.inner.is_running(),
            session_id: self.inner.identity.session_id(),
            user_id: self.inner.identity.user_id(),
            queue_size: self.inner.queue.lock().map(|q| q.size()).unwrap_or(0),
            spilled_events: self.inner.spill.len(),
            events_sent: self.inner.events_sent.load(Ordering::Relaxed),
            replay_state: self.inner.replay.state(),
            environment: self.inner.config.environment.clone(),
        }
    }

    pub fn use_plugin(&self, plugin: Plugin) {
        self.inner.plugins.install(plugin, &self.inner.bus);
    }

    pub fn unuse_plugin(&self, name: &str) {
        self.inner.plugins.remove(name);
    }

    pub fn on(&self, event: &str, callback: Arc<crate::bus::EventCallback>) -> SubscriptionId {
        self.inner.bus.on(event, callback)
    }

    pub fn off(&self, event: &str, id: Option<SubscriptionId>) {
        self.inner.bus.off(event, id);
    }
}
