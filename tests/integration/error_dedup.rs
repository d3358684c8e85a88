//! End-to-end error dedup.
//!
//! Two identical runtime errors from the same source location must produce
//! exactly one `error` event in the flushed batch: the fingerprint
//! `(message, fileName, line, column)` dedups the second at capture.

use lookout::host::RuntimeError;
use lookout::{Monitor, MonitorConfig, Page, PageConfig};
use lookout_test_utils::MockCollector;

fn config(endpoint: &str) -> MonitorConfig {
    let mut config = MonitorConfig::new("dedup-app", "key-1", endpoint);
    // Keep the pipeline deterministic: only error capture is exercised.
    config.features.performance = false;
    config.features.behavior = false;
    config
}

#[tokio::test]
async fn second_identical_error_is_dropped() {
    let collector = MockCollector::start().await.unwrap();
    let page = Page::new(PageConfig::default());
    let monitor = Monitor::new(config(&collector.endpoint()), page.clone()).unwrap();
    monitor.start();

    // The host reports runtime throws as "Uncaught Error: <message>".
    let boom = RuntimeError {
        message: "Uncaught Error: Boom".to_owned(),
        file_name: Some("app.js".to_owned()),
        line_number: Some(10),
        column_number: Some(3),
        stack_trace: None,
    };
    page.dispatch_error(&boom);
    page.dispatch_error(&boom);

    monitor.flush().await;

    let errors: Vec<serde_json::Value> = collector
        .requests()
        .iter()
        .flat_map(|r| r.events())
        .filter(|e| e["type"] == "error")
        .collect();
    assert_eq!(errors.len(), 1, "one event for two identical throws");
    assert_eq!(errors[0]["message"], "Uncaught Error: Boom");
    assert_eq!(errors[0]["errorType"], "javascript");
    assert_eq!(errors[0]["severity"], "high");
    assert_eq!(errors[0]["fileName"], "app.js");
    assert_eq!(errors[0]["lineNumber"], 10);

    monitor.stop().await;
}

#[tokio::test]
async fn different_locations_produce_distinct_events() {
    let collector = MockCollector::start().await.unwrap();
    let page = Page::new(PageConfig::default());
    let monitor = Monitor::new(config(&collector.endpoint()), page.clone()).unwrap();
    monitor.start();

    for line in [10, 20] {
        page.dispatch_error(&RuntimeError {
            message: "Boom".to_owned(),
            file_name: Some("app.js".to_owned()),
            line_number: Some(line),
            column_number: Some(3),
            stack_trace: None,
        });
    }
    monitor.flush().await;

    let errors: Vec<serde_json::Value> = collector
        .requests()
        .iter()
        .flat_map(|r| r.events())
        .filter(|e| e["type"] == "error")
        .collect();
    assert_eq!(errors.len(), 2);
    assert_ne!(errors[0]["fingerprint"], errors[1]["fingerprint"]);

    monitor.stop().await;
}

#[tokio::test]
async fn wire_format_carries_auth_and_version_headers() {
    let collector = MockCollector::start().await.unwrap();
    let page = Page::new(PageConfig::default());
    let monitor = Monitor::new(config(&collector.endpoint()), page.clone()).unwrap();
    monitor.start();

    page.dispatch_error(&RuntimeError {
        message: "header check failed".to_owned(),
        ..RuntimeError::default()
    });
    monitor.flush().await;

    let requests = collector.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(
        request.headers.get("authorization").map(String::as_str),
        Some("Bearer key-1")
    );
    assert_eq!(
        request.headers.get("x-sdk-version").map(String::as_str),
        Some(lookout::SDK_VERSION)
    );
    assert_eq!(
        request.headers.get("content-type").map(String::as_str),
        Some("application/json")
    );
    assert_eq!(request.body["sdk_version"], lookout::SDK_VERSION);
    assert!(request.body["timestamp"].as_i64().is_some());

    monitor.stop().await;
}
