//! Flush-policy dispatch, end to end.
//!
//! Non-error admissions open an absorbing throttle window; an error
//! admission arms the shorter trailing debounce.  A burst of 5 custom
//! events followed by one error must go out as a single POST carrying all
//! 6, roughly one debounce after the error.

use std::time::Duration;

use lookout::host::RuntimeError;
use lookout::{Monitor, MonitorConfig, Page, PageConfig};
use lookout_test_utils::MockCollector;

fn config(endpoint: &str) -> MonitorConfig {
    let mut config = MonitorConfig::new("flush-app", "key-1", endpoint);
    config.features.performance = false;
    config.features.behavior = false;
    config.sampling.behavior = 1.0;
    // Compressed timers, same ordering: debounce < throttle < periodic.
    config.reporting.error_debounce_ms = 300;
    config.reporting.routine_throttle_ms = 3000;
    config.reporting.flush_interval_ms = 30_000;
    config
}

#[tokio::test]
async fn error_debounce_flushes_routine_burst_in_one_post() {
    let collector = MockCollector::start().await.unwrap();
    let page = Page::new(PageConfig::default());
    let monitor = Monitor::new(config(&collector.endpoint()), page.clone()).unwrap();
    monitor.start();

    for i in 0..5 {
        monitor.track("step", Some(serde_json::json!({ "i": i })));
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        collector.request_count(),
        0,
        "throttled flush has not fired yet"
    );

    page.dispatch_error(&RuntimeError {
        message: "checkout failed".to_owned(),
        ..RuntimeError::default()
    });

    // Debounce is 300 ms; the POST should land well before the 3 s window.
    assert!(
        collector.wait_for_requests(1, Duration::from_secs(2)).await,
        "debounced flush fired"
    );
    assert_eq!(collector.request_count(), 1, "a single POST");
    assert_eq!(collector.total_events(), 6, "all 6 events in one body");

    let events = collector.requests()[0].events();
    let errors = events.iter().filter(|e| e["type"] == "error").count();
    let behaviors = events.iter().filter(|e| e["type"] == "behavior").count();
    assert_eq!((errors, behaviors), (1, 5));

    monitor.stop().await;
}

#[tokio::test]
async fn routine_window_alone_flushes_after_throttle() {
    let collector = MockCollector::start().await.unwrap();
    let page = Page::new(PageConfig::default());
    let mut config = config(&collector.endpoint());
    config.reporting.routine_throttle_ms = 400;
    let monitor = Monitor::new(config, page).unwrap();
    monitor.start();

    monitor.track("only", None);
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(collector.request_count(), 0);

    assert!(collector.wait_for_requests(1, Duration::from_secs(2)).await);
    assert_eq!(collector.total_events(), 1);

    monitor.stop().await;
}
