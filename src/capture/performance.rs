//! Performance capture: navigation timing, paint/web-vitals streams, and
//! custom marks/measures.
//!
//! Navigation timing is one-shot; FCP, LCP, and CLS arrive through the
//! performance observer stream; FID is measured on the first qualifying
//! input with a self-removing capture-phase listener.  One `performance`
//! event is produced per collection cycle while navigation timing is known;
//! a final event is attempted on hidden/unload.
//!
//! # CLS session windows
//! A layout shift without recent user input accumulates into the current
//! session; a new session starts when the gap to the last entry exceeds 1 s
//! or the session span exceeds 5 s.  The reported CLS is the maximum
//! session value seen.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};

use lookout_protocol::{Payload, PerformanceMetrics, PerformancePayload, ResourceTiming};
use tracing::debug;

use crate::envelope::Pending;
use crate::host::{ListenerId, NavigationTiming, ObserverId, Page, PerfEntry, UiEventKind};

const CLS_SESSION_GAP_MS: f64 = 1000.0;
const CLS_SESSION_SPAN_MS: f64 = 5000.0;
/// Most recent resource entries kept per cycle.
const RESOURCE_CAP: usize = 50;

// ---------------------------------------------------------------------------
// CLS session tracker
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct ClsTracker {
    session_value: f64,
    session_start: f64,
    last_entry: f64,
    max_value: Option<f64>,
}

impl ClsTracker {
    fn observe(&mut self, value: f64, had_recent_input: bool, start_time: f64) {
        if had_recent_input {
            return;
        }
        let new_session = self.max_value.is_none()
            || start_time - self.last_entry > CLS_SESSION_GAP_MS
            || start_time - self.session_start > CLS_SESSION_SPAN_MS;
        if new_session {
            self.session_value = value;
            self.session_start = start_time;
        } else {
            self.session_value += value;
        }
        self.last_entry = start_time;
        self.max_value = Some(match self.max_value {
            Some(max) => max.max(self.session_value),
            None => self.session_value,
        });
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct PerfState {
    nav: Option<NavigationTiming>,
    fcp: Option<f64>,
    lcp: Option<f64>,
    fid: Option<f64>,
    ttfb: Option<f64>,
    cls: ClsTracker,
    marks: BTreeMap<String, f64>,
    custom: BTreeMap<String, f64>,
    resources: Vec<ResourceTiming>,
    fid_fired: bool,
}

impl PerfState {
    fn observe_entry(&mut self, entry: &PerfEntry) {
        match entry {
            PerfEntry::Navigation(nav) => {
                self.nav = Some(*nav);
                self.ttfb = Some((nav.response_start - nav.request_start).max(0.0));
            }
            PerfEntry::Paint { name, start_time } => {
                if name == "first-contentful-paint" && self.fcp.is_none() {
                    self.fcp = Some(*start_time);
                }
            }
            // The entry stream reports growing candidates; the latest wins.
            PerfEntry::LargestContentfulPaint { start_time, .. } => {
                self.lcp = Some(*start_time);
            }
            PerfEntry::LayoutShift {
                value,
                had_recent_input,
                start_time,
            } => {
                self.cls.observe(*value, *had_recent_input, *start_time);
            }
            PerfEntry::Resource(resource) => {
                if self.resources.len() == RESOURCE_CAP {
                    self.resources.remove(0);
                }
                self.resources.push(resource.clone());
            }
        }
    }
}

// ---------------------------------------------------------------------------
// PerformanceCapture
// ---------------------------------------------------------------------------

pub struct PerformanceCapture {
    page: Arc<Page>,
    state: Arc<Mutex<PerfState>>,
    origin_ms: i64,
    observer: Mutex<Option<ObserverId>>,
    input_listeners: Arc<Mutex<Vec<ListenerId>>>,
}

impl PerformanceCapture {
    pub fn new(page: Arc<Page>) -> Self {
        let origin_ms = page.now_ms();
        PerformanceCapture {
            page,
            state: Arc::new(Mutex::new(PerfState::default())),
            origin_ms,
            observer: Mutex::new(None),
            input_listeners: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn install(&self) {
        let state = self.state.clone();
        let id = self.page.observe_performance(
            &[
                "navigation",
                "paint",
                "largest-contentful-paint",
                "layout-shift",
                "resource",
            ],
            Arc::new(move |entry| {
                if let Ok(mut state) = state.lock() {
                    state.observe_entry(entry);
                }
            }),
        );
        *self.observer.lock().expect("perf observer id") = Some(id);

        // FID: first of mousedown/keydown/touchstart/pointerdown, measured
        // as handler start minus event timestamp.  Registered with
        // capture+once semantics; the handler removes the whole group.
        let kinds = [
            UiEventKind::MouseDown,
            UiEventKind::KeyDown,
            UiEventKind::TouchStart,
            UiEventKind::PointerDown,
        ];
        for kind in kinds {
            let state = self.state.clone();
            let page_weak: Weak<Page> = Arc::downgrade(&self.page);
            let ids = self.input_listeners.clone();
            let id = self.page.add_listener(
                kind,
                true,
                Arc::new(move |event| {
                    let fid = {
                        let Ok(mut state) = state.lock() else { return };
                        if state.fid_fired {
                            None
                        } else {
                            state.fid_fired = true;
                            let now = match page_weak.upgrade() {
                                Some(page) => page.now_ms(),
                                None => event.timestamp,
                            };
                            let delay = (now - event.timestamp).max(0) as f64;
                            state.fid = Some(delay);
                            Some(delay)
                        }
                    };
                    if let Some(delay) = fid {
                        debug!(fid_ms = delay, "first input delay measured");
                        if let Some(page) = page_weak.upgrade() {
                            if let Ok(mut ids) = ids.lock() {
                                for id in ids.drain(..) {
                                    page.remove_listener(id);
                                }
                            }
                        }
                    }
                }),
            );
            self.input_listeners.lock().expect("fid listener ids").push(id);
        }
    }

    pub fn uninstall(&self) {
        if let Some(id) = self.observer.lock().expect("perf observer id").take() {
            self.page.disconnect_performance(id);
        }
        if let Ok(mut ids) = self.input_listeners.lock() {
            for id in ids.drain(..) {
                self.page.remove_listener(id);
            }
        }
    }

    /// Milliseconds since this capture was created; the mark/measure time
    /// base.
    fn now_rel(&self) -> f64 {
        (self.page.now_ms() - self.origin_ms) as f64
    }

    pub fn mark(&self, name: &str) {
        let at = self.now_rel();
        if let Ok(mut state) = self.state.lock() {
            state.marks.insert(name.to_owned(), at);
        }
    }

    /// Measure between two marks; a missing start means the time origin, a
    /// missing end means now.  The duration lands in `customMetrics`.
    pub fn measure(&self, name: &str, start: Option<&str>, end: Option<&str>) -> Option<f64> {
        let now = self.now_rel();
        let mut state = self.state.lock().ok()?;
        let start_time = match start {
            Some(mark) => *state.marks.get(mark)?,
            None => 0.0,
        };
        let end_time = match end {
            Some(mark) => *state.marks.get(mark)?,
            None => now,
        };
        let duration = (end_time - start_time).max(0.0);
        state.custom.insert(name.to_owned(), duration);
        Some(duration)
    }

    /// Produce the cycle's performance event, if navigation timing is known.
    pub fn collect(&self) -> Option<Pending> {
        let payload = {
            let mut state = self.state.lock().ok()?;
            let nav = state.nav?;
            let metrics = PerformanceMetrics {
                lcp: state.lcp,
                fid: state.fid,
                cls: state.cls.max_value,
                fcp: state.fcp,
                ttfb: state.ttfb,
                page_load_time: (nav.load_event_end - nav.navigation_start).max(0.0),
                dom_ready_time: (nav.dom_content_loaded_event_end - nav.navigation_start).max(0.0),
                resource_load_time: (nav.load_event_end - nav.dom_content_loaded_event_end)
                    .max(0.0),
                custom_metrics: state.custom.clone(),
            };
            let resources = if state.resources.is_empty() {
                None
            } else {
                Some(std::mem::take(&mut state.resources))
            };
            PerformancePayload { metrics, resources }
        };
        Some(Pending::new(self.page.now_ms(), Payload::Performance(payload)))
    }

    pub fn drain_pending(&self) -> Vec<Pending> {
        self.collect().into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{PageConfig, UiEvent};

    fn capture() -> (Arc<Page>, PerformanceCapture) {
        let page = Page::new(PageConfig::default());
        let capture = PerformanceCapture::new(page.clone());
        capture.install();
        (page, capture)
    }

    fn nav_entry() -> PerfEntry {
        PerfEntry::Navigation(NavigationTiming {
            navigation_start: 0.0,
            request_start: 15.0,
            response_start: 95.0,
            dom_content_loaded_event_end: 700.0,
            load_event_end: 1800.0,
        })
    }

    fn metrics(capture: &PerformanceCapture) -> PerformanceMetrics {
        match capture.collect().expect("performance event").payload {
            Payload::Performance(p) => p.metrics,
            other => panic!("expected performance payload, got {other:?}"),
        }
    }

    #[test]
    fn navigation_timing_derives_load_metrics() {
        let (page, capture) = capture();
        page.emit_performance_entries(&[nav_entry()]);

        let m = metrics(&capture);
        assert_eq!(m.page_load_time, 1800.0);
        assert_eq!(m.dom_ready_time, 700.0);
        assert_eq!(m.resource_load_time, 1100.0);
        assert_eq!(m.ttfb, Some(80.0));
    }

    #[test]
    fn no_event_before_navigation_timing() {
        let (_page, capture) = capture();
        assert!(capture.collect().is_none());
    }

    /// Three shifts at t=0 (0.1), t=900 (0.1), t=2200 (0.2): the 1.3 s gap
    /// opens a new session, so the reported value is the max session, 0.2.
    #[test]
    fn cls_session_windowing_reports_max_session() {
        let (page, capture) = capture();
        page.emit_performance_entries(&[nav_entry()]);
        page.emit_performance_entries(&[
            PerfEntry::LayoutShift { value: 0.1, had_recent_input: false, start_time: 0.0 },
            PerfEntry::LayoutShift { value: 0.1, had_recent_input: false, start_time: 900.0 },
            PerfEntry::LayoutShift { value: 0.2, had_recent_input: false, start_time: 2200.0 },
        ]);

        let m = metrics(&capture);
        assert_eq!(m.cls, Some(0.2));
    }

    #[test]
    fn cls_ignores_shifts_with_recent_input() {
        let (page, capture) = capture();
        page.emit_performance_entries(&[nav_entry()]);
        page.emit_performance_entries(&[
            PerfEntry::LayoutShift { value: 0.5, had_recent_input: true, start_time: 10.0 },
            PerfEntry::LayoutShift { value: 0.1, had_recent_input: false, start_time: 20.0 },
        ]);

        let m = metrics(&capture);
        assert_eq!(m.cls, Some(0.1));
    }

    #[test]
    fn cls_span_cap_opens_new_session() {
        let (page, capture) = capture();
        page.emit_performance_entries(&[nav_entry()]);
        // Entries every 900 ms stay within the gap but overrun the 5 s span.
        let entries: Vec<PerfEntry> = (0..8)
            .map(|i| PerfEntry::LayoutShift {
                value: 0.1,
                had_recent_input: false,
                start_time: (i as f64) * 900.0,
            })
            .collect();
        page.emit_performance_entries(&entries);

        let m = metrics(&capture);
        // First session holds entries at 0..=4500 (six shifts), then a new
        // session starts; the max is the first session's 0.6.
        let cls = m.cls.unwrap();
        assert!((cls - 0.6).abs() < 1e-9, "cls was {cls}");
    }

    #[test]
    fn fid_fires_once_and_listener_group_self_removes() {
        let (page, capture) = capture();
        page.emit_performance_entries(&[nav_entry()]);

        let past = page.now_ms() - 40;
        page.dispatch(&UiEvent::new(UiEventKind::MouseDown, past));
        let first = metrics(&capture).fid.expect("fid measured");
        assert!(first >= 40.0);

        // A later, slower input must not overwrite the first measurement.
        let much_earlier = page.now_ms() - 4000;
        page.dispatch(&UiEvent::new(UiEventKind::KeyDown, much_earlier));
        assert_eq!(metrics(&capture).fid, Some(first));
    }

    #[test]
    fn fcp_keeps_first_paint_and_lcp_keeps_latest() {
        let (page, capture) = capture();
        page.emit_performance_entries(&[nav_entry()]);
        page.emit_performance_entries(&[
            PerfEntry::Paint { name: "first-paint".to_owned(), start_time: 80.0 },
            PerfEntry::Paint { name: "first-contentful-paint".to_owned(), start_time: 120.0 },
            PerfEntry::Paint { name: "first-contentful-paint".to_owned(), start_time: 500.0 },
            PerfEntry::LargestContentfulPaint { start_time: 600.0, size: 1200 },
            PerfEntry::LargestContentfulPaint { start_time: 900.0, size: 5000 },
        ]);

        let m = metrics(&capture);
        assert_eq!(m.fcp, Some(120.0));
        assert_eq!(m.lcp, Some(900.0));
    }

    #[test]
    fn measure_between_marks_lands_in_custom_metrics() {
        let (_page, capture) = capture();
        capture.mark("checkout:start");
        capture.mark("checkout:end");
        // Overwrite the mark times directly for a deterministic duration.
        {
            let mut state = capture.state.lock().unwrap();
            state.marks.insert("checkout:start".to_owned(), 100.0);
            state.marks.insert("checkout:end".to_owned(), 350.0);
        }
        let duration = capture.measure("checkout", Some("checkout:start"), Some("checkout:end"));
        assert_eq!(duration, Some(250.0));

        capture.page.emit_performance_entries(&[nav_entry()]);
        let m = metrics(&capture);
        assert_eq!(m.custom_metrics.get("checkout"), Some(&250.0));
    }
}
