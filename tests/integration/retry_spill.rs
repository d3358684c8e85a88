//! Retry-then-spill and spill replay.
//!
//! A batch against a collector returning HTTP 500 gets 1 + 3 attempts with
//! exponentially growing delays; after exhaustion the exact event set lands
//! in the persistent store under `monitor_<appId>:failed_events`, and a
//! later `online` signal replays it once.

use std::sync::Arc;
use std::time::{Duration, Instant};

use lookout::store::{KeyValueStore, MemoryStore};
use lookout::{Monitor, MonitorConfig, Page, PageConfig};
use lookout_test_utils::MockCollector;

const EVENT_COUNT: usize = 50;
const BACKOFF_BASE_MS: u64 = 50;

fn config(endpoint: &str) -> MonitorConfig {
    let mut config = MonitorConfig::new("spill-app", "key-1", endpoint);
    config.features.performance = false;
    config.features.behavior = false;
    config.features.errors = false;
    config.sampling.behavior = 1.0;
    // Compressed backoff schedule, same doubling shape.
    config.reporting.retry_base_delay_ms = BACKOFF_BASE_MS;
    config
}

#[tokio::test]
async fn exhausted_retries_spill_the_exact_event_set() {
    let collector = MockCollector::start().await.unwrap();
    // 1 initial attempt + 3 retries, all failing.
    collector.respond_with(&[500, 500, 500, 500]);

    let page = Page::new(PageConfig::default());
    let persistent = Arc::new(MemoryStore::new());
    let monitor = Monitor::with_stores(
        config(&collector.endpoint()),
        page.clone(),
        Arc::new(MemoryStore::new()),
        persistent.clone(),
    )
    .unwrap();
    monitor.start();

    for i in 0..EVENT_COUNT {
        monitor.track("load-test", Some(serde_json::json!({ "i": i })));
    }
    assert_eq!(monitor.status().queue_size, EVENT_COUNT);

    let started = Instant::now();
    monitor.flush().await;
    let elapsed = started.elapsed();

    // 4 POSTs of the same batch.
    assert_eq!(collector.request_count(), 4);
    // Backoff delays of base, 2x, 4x must have elapsed between attempts.
    let minimum = Duration::from_millis(BACKOFF_BASE_MS * (1 + 2 + 4));
    assert!(elapsed >= minimum, "elapsed {elapsed:?} < backoff floor {minimum:?}");

    // The exact event set is parked under the namespaced key.
    let raw = persistent
        .get("monitor_spill-app:failed_events")
        .unwrap()
        .expect("spill key present");
    let parked: Vec<serde_json::Value> = serde_json::from_str(&raw).unwrap();
    assert_eq!(parked.len(), EVENT_COUNT);
    assert!(parked.iter().all(|e| e["type"] == "behavior"));
    assert_eq!(monitor.status().spilled_events, EVENT_COUNT);
    // The queue retains no trace.
    assert_eq!(monitor.status().queue_size, 0);

    monitor.stop().await;
}

#[tokio::test]
async fn online_signal_replays_spill_once_and_empties_it() {
    let collector = MockCollector::start().await.unwrap();
    collector.respond_with(&[500, 500, 500, 500]);

    let page = Page::new(PageConfig::default());
    let monitor = Monitor::new(config(&collector.endpoint()), page.clone()).unwrap();
    monitor.start();

    for _ in 0..5 {
        monitor.track("burst", None);
    }
    monitor.flush().await;
    assert_eq!(monitor.status().spilled_events, 5);

    // Connectivity returns; the collector accepts again.
    let before = collector.request_count();
    page.go_online();
    assert!(
        collector
            .wait_for_requests(before + 1, Duration::from_secs(2))
            .await,
        "replay POST arrives"
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(monitor.status().spilled_events, 0, "success empties the store");

    monitor.stop().await;
}

#[tokio::test]
async fn next_startup_replays_the_previous_runs_spill() {
    let collector = MockCollector::start().await.unwrap();
    collector.respond_with(&[500, 500, 500, 500]);

    let persistent = Arc::new(MemoryStore::new());
    let session = Arc::new(MemoryStore::new());

    // First run: spill, then go away without draining.
    {
        let page = Page::new(PageConfig::default());
        let monitor = Monitor::with_stores(
            config(&collector.endpoint()),
            page,
            session.clone(),
            persistent.clone(),
        )
        .unwrap();
        monitor.start();
        monitor.track("orphan", None);
        monitor.flush().await;
        assert_eq!(monitor.status().spilled_events, 1);
        monitor.stop().await;
    }

    // Second run over the same persistent store: startup replay drains it.
    let page = Page::new(PageConfig::default());
    let monitor = Monitor::with_stores(
        config(&collector.endpoint()),
        page,
        session,
        persistent.clone(),
    )
    .unwrap();
    let before = collector.request_count();
    monitor.start();
    assert!(
        collector
            .wait_for_requests(before + 1, Duration::from_secs(2))
            .await
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(monitor.status().spilled_events, 0);
    assert!(
        persistent
            .get("monitor_spill-app:failed_events")
            .unwrap()
            .is_none()
    );
    monitor.stop().await;
}

#[tokio::test]
async fn failed_replay_leaves_spill_intact() {
    let collector = MockCollector::start().await.unwrap();
    collector.respond_with(&[500, 500, 500, 500]);

    let page = Page::new(PageConfig::default());
    let monitor = Monitor::new(config(&collector.endpoint()), page.clone()).unwrap();
    monitor.start();

    monitor.track("one", None);
    monitor.flush().await;
    assert_eq!(monitor.status().spilled_events, 1);

    // Still offline: the single replay attempt fails and keeps the store.
    collector.respond_with(&[500]);
    let before = collector.request_count();
    page.go_online();
    collector
        .wait_for_requests(before + 1, Duration::from_secs(2))
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(monitor.status().spilled_events, 1);

    monitor.stop().await;
}
