//! Sensitive input masking, end to end.
//!
//! Typing a card number into `<input type="text" name="creditCard">` must
//! produce a behavior event whose value is the `"[MASKED]"` literal; a
//! plain input produces a summary without the raw text.

use lookout::host::{UiEvent, UiEventKind};
use lookout::{Monitor, MonitorConfig, Page, PageConfig};
use lookout_test_utils::{MockCollector, fixtures};

// storefront_document: body > #app > form > [creditCard, quantity, button]
const CREDIT_CARD_PATH: [usize; 4] = [1, 0, 0, 0];
const QUANTITY_PATH: [usize; 4] = [1, 0, 0, 1];

fn config(endpoint: &str) -> MonitorConfig {
    let mut config = MonitorConfig::new("mask-app", "key-1", endpoint);
    config.features.performance = false;
    config.features.errors = false;
    config.sampling.behavior = 1.0;
    config
}

/// Drive one input event through capture, debounce, and flush; return the
/// input-action behavior events the collector received.
async fn run_input(path: &[usize], text: &str) -> Vec<serde_json::Value> {
    let collector = MockCollector::start().await.unwrap();
    let page = Page::new(PageConfig {
        document_root: fixtures::storefront_document(),
        ..PageConfig::default()
    });
    let monitor = Monitor::new(config(&collector.endpoint()), page.clone()).unwrap();
    monitor.start();

    let event = UiEvent::new(UiEventKind::Input, page.now_ms())
        .with_target(path.to_vec())
        .with_value(text);
    page.dispatch(&event);
    // Outlast the 500 ms input debounce.
    tokio::time::sleep(std::time::Duration::from_millis(700)).await;
    monitor.flush().await;

    let events = collector
        .requests()
        .iter()
        .flat_map(|r| r.events())
        .filter(|e| e["type"] == "behavior" && e["action"] == "input")
        .collect();
    monitor.stop().await;
    events
}

#[tokio::test]
async fn credit_card_named_input_is_masked() {
    let events = run_input(&CREDIT_CARD_PATH, "4111 1111 1111 1111").await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["value"], "[MASKED]");
    assert_eq!(events[0]["target"], "#app > form > input:nth-child(1)");
}

#[tokio::test]
async fn plain_input_is_summarized_without_raw_text() {
    let events = run_input(&QUANTITY_PATH, "3 items").await;
    assert_eq!(events.len(), 1);
    let value = &events[0]["value"];
    assert_eq!(value["length"], 7);
    assert_eq!(value["isEmpty"], false);
    assert_eq!(value["hasValue"], true);
    assert!(
        !serde_json::to_string(&events[0]).unwrap().contains("3 items"),
        "raw text must never reach the wire"
    );
}
