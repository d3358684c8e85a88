//! Hook lifecycle: everything installed during `start` is removed by
//! `stop`, saved references are restored, and both calls are re-entrancy
//! safe.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use lookout::host::RuntimeError;
use lookout::{Monitor, MonitorConfig, Page, PageConfig};
use lookout_test_utils::MockCollector;

fn config(endpoint: &str) -> MonitorConfig {
    let mut config = MonitorConfig::new("cycle-app", "key-1", endpoint);
    config.sampling.behavior = 1.0;
    config
}

#[tokio::test]
async fn stop_restores_pre_init_handlers_and_wraps() {
    let collector = MockCollector::start().await.unwrap();
    let page = Page::new(PageConfig::default());

    // The host application's own handler, installed before the SDK.
    let host_calls = Arc::new(AtomicUsize::new(0));
    let count = host_calls.clone();
    page.set_error_handler(Some(Arc::new(move |_| {
        count.fetch_add(1, Ordering::SeqCst);
    })));

    let monitor = Monitor::new(config(&collector.endpoint()), page.clone()).unwrap();
    monitor.start();

    // Chained: host handler runs first, capture records after.
    page.dispatch_error(&RuntimeError {
        message: "during".to_owned(),
        ..RuntimeError::default()
    });
    assert_eq!(host_calls.load(Ordering::SeqCst), 1);

    monitor.stop().await;

    // Restored: the host handler still works, nothing records.
    page.dispatch_error(&RuntimeError {
        message: "after".to_owned(),
        ..RuntimeError::default()
    });
    assert_eq!(host_calls.load(Ordering::SeqCst), 2);
    let before = collector.request_count();
    monitor.flush().await; // warn + no-op on a stopped monitor
    assert_eq!(collector.request_count(), before);

    // History wraps are gone too; the built-in still updates the URL.
    page.push_state("/post-stop");
    assert!(page.url().contains("/post-stop"));
}

#[tokio::test]
async fn stop_is_idempotent_and_start_is_reentrant_safe() {
    let collector = MockCollector::start().await.unwrap();
    let page = Page::new(PageConfig::default());
    let monitor = Monitor::new(config(&collector.endpoint()), page.clone()).unwrap();

    monitor.start();
    monitor.start(); // warn + no-op
    monitor.stop().await;
    monitor.stop().await; // no-op

    // A fresh cycle still works end to end.
    monitor.start();
    monitor.track("again", None);
    monitor.flush().await;
    assert_eq!(collector.total_events(), 1);
    monitor.stop().await;
}

#[tokio::test]
async fn session_survives_stop_start_and_user_changes() {
    let collector = MockCollector::start().await.unwrap();
    let page = Page::new(PageConfig::default());
    let monitor = Monitor::new(config(&collector.endpoint()), page.clone()).unwrap();

    monitor.start();
    let session = monitor.status().session_id;

    monitor.set_user("user-1", None);
    assert_eq!(monitor.status().session_id, session, "setUser never rotates");
    assert_eq!(monitor.status().user_id.as_deref(), Some("user-1"));

    monitor.stop().await;
    monitor.start();
    assert_eq!(monitor.status().session_id, session);

    monitor.clear_user();
    assert_eq!(monitor.status().user_id, None);
    monitor.stop().await;
}

#[tokio::test]
async fn lifecycle_events_reach_bus_subscribers() {
    let collector = MockCollector::start().await.unwrap();
    let page = Page::new(PageConfig::default());
    let monitor = Monitor::new(config(&collector.endpoint()), page).unwrap();

    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    for event in ["start", "stop", "track"] {
        let seen = seen.clone();
        monitor.on(event, Arc::new(move |_| {
            seen.lock().unwrap().push(event);
        }));
    }

    monitor.start();
    monitor.track("signup", None);
    monitor.stop().await;

    assert_eq!(*seen.lock().unwrap(), vec!["start", "track", "stop"]);
}
