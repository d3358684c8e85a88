//! Session replay recorder.
//!
//! `idle → recording ⇄ paused → stopped`.  Recording starts with a masked
//! full snapshot, then accumulates deltas: DOM mutations, input/scroll/
//! interaction records, viewport resizes, and media intersections.  The
//! snapshot is pinned apart from the delta ring, so every transmission
//! begins with the full snapshot regardless of oldest-drop.
//!
//! # Budgets
//! At most 1000 records per transmitted replay event and 60 s between the
//! first record and any admission; exceeding either stops the recording.
//! Recording is gated on both the mutation-observer and the
//! intersection-observer capability.

pub mod snapshot;

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use lookout_protocol::{
    InputRecord, InteractionKind, InteractionRecord, MutationRecord, Payload, ReplayData,
    ReplayPayload, ReplayRecord, ScrollRecord,
};
use tracing::{debug, warn};

use crate::capture::behavior::input_value;
use crate::envelope::Pending;
use crate::host::{
    DomMutation, IntersectionChange, ListenerId, MutationObserverOptions, ObserverId, Page,
    UiEvent, UiEventKind,
};

pub const MAX_RECORDS: usize = 1000;
pub const MAX_DURATION_MS: i64 = 60_000;

const SCROLL_THROTTLE_MS: i64 = 100;
const MOUSEMOVE_THROTTLE_MS: i64 = 50;
const RESIZE_THROTTLE_MS: i64 = 250;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Idle,
    Recording,
    Paused,
    Stopped,
}

#[derive(Debug, Clone, Default)]
pub struct ReplayConfig {
    pub blocked_elements: Vec<String>,
    pub track_mouse_move: bool,
}

struct ReplayInner {
    page: Arc<Page>,
    config: ReplayConfig,
    state: Mutex<RecorderState>,
    /// Pinned full snapshot; never subject to oldest-drop.
    snapshot: Mutex<Option<ReplayRecord>>,
    deltas: Mutex<VecDeque<ReplayRecord>>,
    first_record_at: Mutex<Option<i64>>,
    throttle: Mutex<HashMap<UiEventKind, i64>>,
}

impl ReplayInner {
    fn admit(&self, record: ReplayRecord) {
        {
            let state = match self.state.lock() {
                Ok(state) => state,
                Err(_) => return,
            };
            if *state != RecorderState::Recording {
                return;
            }
        }

        let first = self.first_record_at.lock().ok().and_then(|f| *f);
        if let Some(first) = first {
            if record.timestamp - first > MAX_DURATION_MS {
                debug!("replay time budget exhausted, stopping recorder");
                self.auto_stop();
                return;
            }
        }

        let mut deltas = match self.deltas.lock() {
            Ok(deltas) => deltas,
            Err(_) => return,
        };
        if deltas.len() + 1 >= MAX_RECORDS {
            drop(deltas);
            debug!(max = MAX_RECORDS, "replay record budget exhausted, stopping recorder");
            self.auto_stop();
            return;
        }
        deltas.push_back(record);
    }

    fn auto_stop(&self) {
        if let Ok(mut state) = self.state.lock() {
            *state = RecorderState::Stopped;
        }
    }

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

    fn interaction(&self, event: &UiEvent, kind: InteractionKind) {
        self.admit(ReplayRecord {
            timestamp: event.timestamp,
            data: ReplayData::Interaction(InteractionRecord {
                kind,
                path: event.target.clone(),
                coordinates: event
                    .coordinates
                    .map(|(x, y)| lookout_protocol::Coordinates { x, y }),
                hidden: event.hidden,
            }),
        });
    }
}

pub struct ReplayRecorder {
    inner: Arc<ReplayInner>,
    listeners: Mutex<Vec<ListenerId>>,
    mutation_observer: Mutex<Option<ObserverId>>,
    intersection_observer: Mutex<Option<ObserverId>>,
}

impl ReplayRecorder {
    pub fn new(page: Arc<Page>, config: ReplayConfig) -> Self {
        ReplayRecorder {
            inner: Arc::new(ReplayInner {
                page,
                config,
                state: Mutex::new(RecorderState::Idle),
                snapshot: Mutex::new(None),
                deltas: Mutex::new(VecDeque::new()),
                first_record_at: Mutex::new(None),
                throttle: Mutex::new(HashMap::new()),
            }),
            listeners: Mutex::new(Vec::new()),
            mutation_observer: Mutex::new(None),
            intersection_observer: Mutex::new(None),
        }
    }

    pub fn state(&self) -> RecorderState {
        self.inner
            .state
            .lock()
            .map(|s| *s)
            .unwrap_or(RecorderState::Stopped)
    }

    /// Begin recording: snapshot, then observers and listeners.
    ///
    /// Refused (with a warning) when either observer API is unavailable, or
    /// when already recording/paused.
    pub fn start(&self) -> bool {
        let capabilities = self.inner.page.capabilities();
        if !capabilities.mutation_observer || !capabilities.intersection_observer {
            warn!("replay recording unavailable: observer APIs missing");
            return false;
        }
        {
            let mut state = match self.inner.state.lock() {
                Ok(state) => state,
                Err(_) => return false,
            };
            match *state {
                RecorderState::Recording | RecorderState::Paused => {
                    warn!("replay recorder already active");
                    return false;
                }
                RecorderState::Idle | RecorderState::Stopped => {}
            }
            *state = RecorderState::Recording;
        }

        let now = self.inner.page.now_ms();
        let body = snapshot::snapshot_document(&self.inner.page, &self.inner.config.blocked_elements);
        if let Ok(mut snapshot) = self.inner.snapshot.lock() {
            *snapshot = Some(ReplayRecord {
                timestamp: now,
                data: ReplayData::Dom(body),
            });
        }
        if let Ok(mut deltas) = self.inner.deltas.lock() {
            deltas.clear();
        }
        if let Ok(mut first) = self.inner.first_record_at.lock() {
            *first = Some(now);
        }
        if let Ok(mut throttle) = self.inner.throttle.lock() {
            throttle.clear();
        }

        self.install_observers();
        self.install_listeners();
        debug!("replay recording started");
        true
    }

    /// Suspend admission; listeners stay installed.
    pub fn pause(&self) {
        if let Ok(mut state) = self.inner.state.lock() {
            if *state == RecorderState::Recording {
                *state = RecorderState::Paused;
            }
        }
    }

    pub fn resume(&self) {
        if let Ok(mut state) = self.inner.state.lock() {
            if *state == RecorderState::Paused {
                *state = RecorderState::Recording;
            }
        }
    }

    /// Stop and tear down hooks.  Accumulated records stay available for one
    /// final `take_payload`; the next `start` clears them.
    pub fn stop(&self) {
        if let Ok(mut state) = self.inner.state.lock() {
            if *state == RecorderState::Idle {
                return;
            }
            *state = RecorderState::Stopped;
        }
        self.teardown();
        debug!("replay recording stopped");
    }

    /// Drain a transmission: the pinned snapshot followed by the buffered
    /// deltas.
    ///
    /// While recording, the snapshot is retained so later transmissions
    /// still lead with it; once stopped, the final drain consumes it.
    pub fn take_payload(&self) -> Option<ReplayPayload> {
        let state = self.state();
        let drained: Vec<ReplayRecord> = match self.inner.deltas.lock() {
            Ok(mut deltas) => deltas.drain(..).collect(),
            Err(_) => return None,
        };

        let mut snapshot_slot = self.inner.snapshot.lock().ok()?;
        let snapshot = match state {
            RecorderState::Recording | RecorderState::Paused => snapshot_slot.clone(),
            _ => snapshot_slot.take(),
        }?;
        if drained.is_empty() && state != RecorderState::Stopped {
            // Nothing new since the last drain; hold the snapshot back too.
            return None;
        }
        drop(snapshot_slot);

        let mut events = Vec::with_capacity(drained.len() + 1);
        events.push(snapshot);
        events.extend(drained);
        Some(ReplayPayload { events })
    }

    pub fn drain_pending(&self) -> Vec<Pending> {
        match self.take_payload() {
            Some(payload) => vec![Pending::new(
                self.inner.page.now_ms(),
                Payload::Replay(payload),
            )],
            None => Vec::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Hook installation
    // -----------------------------------------------------------------------

    fn install_observers(&self) {
        let inner = self.inner.clone();
        let id = self.inner.page.observe_mutations(
            MutationObserverOptions::all(),
            Arc::new(move |mutation: &DomMutation| {
                inner.admit(ReplayRecord {
                    timestamp: inner.page.now_ms(),
                    data: ReplayData::Mutation(MutationRecord {
                        path: mutation.target.clone(),
                        added: mutation.added.clone(),
                        removed: mutation.removed.clone(),
                        attribute_name: mutation.attribute_name.clone(),
                        old_value: mutation.old_value.clone(),
                    }),
                });
            }),
        );
        *self.mutation_observer.lock().expect("mutation observer id") = Some(id);

        let media = snapshot::media_paths(&self.inner.page.document_root());
        let inner = self.inner.clone();
        let id = self.inner.page.observe_intersections(
            media,
            Arc::new(move |change: &IntersectionChange| {
                inner.admit(ReplayRecord {
                    timestamp: inner.page.now_ms(),
                    data: ReplayData::Intersection(lookout_protocol::IntersectionRecord {
                        path: change.target.clone(),
                        is_intersecting: change.is_intersecting,
                        ratio: change.ratio,
                    }),
                });
            }),
        );
        *self.intersection_observer.lock().expect("intersection observer id") = Some(id);
    }

    fn install_listeners(&self) {
        let page = self.inner.page.clone();
        let mut ids = Vec::new();

        let inner = self.inner.clone();
        ids.push(page.add_listener(UiEventKind::Input, false, Arc::new(move |event| {
            let root = inner.page.document_root();
            let node = event.target.as_ref().and_then(|p| root.node_at(p));
            let value = input_value(node, event.value.as_deref().unwrap_or(""), true);
            inner.admit(ReplayRecord {
                timestamp: event.timestamp,
                data: ReplayData::Input(InputRecord {
                    path: event.target.clone().unwrap_or_default(),
                    value,
                }),
            });
        })));

        let inner = self.inner.clone();
        ids.push(page.add_listener(UiEventKind::Change, false, Arc::new(move |event| {
            let root = inner.page.document_root();
            let node = event.target.as_ref().and_then(|p| root.node_at(p));
            let value = input_value(node, event.value.as_deref().unwrap_or(""), true);
            inner.admit(ReplayRecord {
                timestamp: event.timestamp,
                data: ReplayData::Input(InputRecord {
                    path: event.target.clone().unwrap_or_default(),
                    value,
                }),
            });
        })));

        let inner = self.inner.clone();
        ids.push(page.add_listener(UiEventKind::Scroll, false, Arc::new(move |event| {
            if inner.throttled(UiEventKind::Scroll, SCROLL_THROTTLE_MS, event.timestamp) {
                return;
            }
            let (x, y) = event.scroll.unwrap_or((0.0, 0.0));
            inner.admit(ReplayRecord {
                timestamp: event.timestamp,
                data: ReplayData::Scroll(ScrollRecord {
                    path: event.target.clone(),
                    x,
                    y,
                }),
            });
        })));

        let inner = self.inner.clone();
        ids.push(page.add_listener(UiEventKind::Resize, false, Arc::new(move |event| {
            if inner.throttled(UiEventKind::Resize, RESIZE_THROTTLE_MS, event.timestamp) {
                return;
            }
            let (width, height) = event.size.unwrap_or((0, 0));
            inner.admit(ReplayRecord {
                timestamp: event.timestamp,
                data: ReplayData::Resize(lookout_protocol::Viewport { width, height }),
            });
        })));

        for (kind, interaction) in [
            (UiEventKind::Click, InteractionKind::Click),
            (UiEventKind::Focus, InteractionKind::Focus),
            (UiEventKind::Blur, InteractionKind::Blur),
            (UiEventKind::VisibilityChange, InteractionKind::Visibility),
        ] {
            let inner = self.inner.clone();
            ids.push(page.add_listener(kind, false, Arc::new(move |event| {
                inner.interaction(event, interaction);
            })));
        }

        if self.inner.config.track_mouse_move {
            let inner = self.inner.clone();
            ids.push(page.add_listener(UiEventKind::MouseMove, false, Arc::new(move |event| {
                if inner.throttled(UiEventKind::MouseMove, MOUSEMOVE_THROTTLE_MS, event.timestamp) {
                    return;
                }
                inner.interaction(event, InteractionKind::MouseMove);
            })));
        }

        *self.listeners.lock().expect("replay listeners") = ids;
    }

    fn teardown(&self) {
        if let Some(id) = self.intersection_observer.lock().expect("intersection observer id").take() {
            self.inner.page.disconnect_intersections(id);
        }
        if let Some(id) = self.mutation_observer.lock().expect("mutation observer id").take() {
            self.inner.page.disconnect_mutations(id);
        }
        let ids: Vec<ListenerId> = self
            .listeners
            .lock()
            .expect("replay listeners")
            .drain(..)
            .collect();
        for id in ids.into_iter().rev() {
            self.inner.page.remove_listener(id);
        }
    }
}
