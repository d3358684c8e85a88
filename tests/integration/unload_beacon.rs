//! Unload contract.
//!
//! When the page becomes hidden (or fires pagehide/beforeunload), the
//! residual queue is drained and handed to the beacon channel in one body;
//! the API key travels as a query parameter because beacons cannot carry
//! headers.

use std::sync::{Arc, Mutex};

use lookout::host::BeaconTransport;
use lookout::{Monitor, MonitorConfig, Page, PageConfig};
use lookout_test_utils::MockCollector;

struct RecordingBeacon {
    sent: Mutex<Vec<(String, Vec<u8>)>>,
}

impl RecordingBeacon {
    fn new() -> Arc<Self> {
        Arc::new(RecordingBeacon { sent: Mutex::new(Vec::new()) })
    }

    fn bodies(&self) -> Vec<(String, serde_json::Value)> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(url, body)| (url.clone(), serde_json::from_slice(body).unwrap()))
            .collect()
    }
}

impl BeaconTransport for RecordingBeacon {
    fn send(&self, url: &str, body: &[u8]) -> bool {
        self.sent.lock().unwrap().push((url.to_owned(), body.to_vec()));
        true
    }
}

fn config(endpoint: &str) -> MonitorConfig {
    let mut config = MonitorConfig::new("unload-app", "key-9", endpoint);
    config.features.performance = false;
    config.features.behavior = false;
    config.features.errors = false;
    config.sampling.behavior = 1.0;
    config
}

#[tokio::test]
async fn hidden_visibility_beacons_the_whole_queue() {
    let collector = MockCollector::start().await.unwrap();
    let page = Page::new(PageConfig::default());
    let beacon = RecordingBeacon::new();
    page.set_beacon_transport(beacon.clone());

    let monitor = Monitor::new(config(&collector.endpoint()), page.clone()).unwrap();
    monitor.start();

    for i in 0..10 {
        monitor.track("step", Some(serde_json::json!({ "i": i })));
    }
    assert_eq!(monitor.status().queue_size, 10);

    page.set_visibility(true);

    let bodies = beacon.bodies();
    assert_eq!(bodies.len(), 1, "exactly one beacon POST");
    let (url, body) = &bodies[0];
    assert!(url.ends_with("?apiKey=key-9"), "api key as query param: {url}");
    assert_eq!(body["events"].as_array().unwrap().len(), 10);
    assert_eq!(body["sdk_version"], lookout::SDK_VERSION);
    assert!(body["timestamp"].as_i64().is_some());
    assert_eq!(monitor.status().queue_size, 0, "queue drained");

    // No HTTP POST went out for the unload path.
    assert_eq!(collector.request_count(), 0);

    monitor.stop().await;
}

#[tokio::test]
async fn empty_queue_unload_sends_no_beacon() {
    let collector = MockCollector::start().await.unwrap();
    let page = Page::new(PageConfig::default());
    let beacon = RecordingBeacon::new();
    page.set_beacon_transport(beacon.clone());

    let monitor = Monitor::new(config(&collector.endpoint()), page.clone()).unwrap();
    monitor.start();

    page.set_visibility(true);
    assert!(beacon.bodies().is_empty());

    monitor.stop().await;
}

#[tokio::test]
async fn pagehide_also_triggers_the_beacon() {
    let collector = MockCollector::start().await.unwrap();
    let page = Page::new(PageConfig::default());
    let beacon = RecordingBeacon::new();
    page.set_beacon_transport(beacon.clone());

    let monitor = Monitor::new(config(&collector.endpoint()), page.clone()).unwrap();
    monitor.start();

    monitor.track("last-click", None);
    page.dispatch(&lookout::host::UiEvent::new(
        lookout::host::UiEventKind::PageHide,
        page.now_ms(),
    ));

    assert_eq!(beacon.bodies().len(), 1);
    monitor.stop().await;
}
