//! Replay recording, end to end.
//!
//! Recording starts with a masked full snapshot; mutations and
//! interactions accumulate as deltas; the flushed replay event leads with
//! the snapshot and the whole thing rides the normal pipeline.

use lookout::host::{DomMutation, MutationKind, UiEvent, UiEventKind};
use lookout::{Monitor, MonitorConfig, Page, PageConfig, RecorderState};
use lookout_protocol::DomNode;
use lookout_test_utils::{MockCollector, fixtures};

fn config(endpoint: &str) -> MonitorConfig {
    let mut config = MonitorConfig::new("replay-app", "key-1", endpoint);
    config.features.performance = false;
    config.features.behavior = false;
    config.features.errors = false;
    config.features.replay = true;
    config.sampling.replay = 1.0;
    config
}

fn replay_events(collector: &MockCollector) -> Vec<serde_json::Value> {
    collector
        .requests()
        .iter()
        .flat_map(|r| r.events())
        .filter(|e| e["type"] == "replay")
        .collect()
}

/// A page with a password field and a tokened element, both of which the
/// snapshot masker must neutralize.
fn replay_document() -> DomNode {
    DomNode::element("html").with_children(vec![
        DomNode::element("body").with_children(vec![
            DomNode::element("div").with_attr("id", "app").with_children(vec![
                DomNode::element("input").with_attr("type", "password"),
                DomNode::element("div")
                    .with_attr("data-token", "tok_live_1234")
                    .with_children(vec![DomNode::text("widget")]),
            ]),
            DomNode::element("img").with_attr("src", "/hero.png"),
        ]),
    ])
}

#[tokio::test]
async fn transmission_leads_with_masked_snapshot_then_deltas() {
    let collector = MockCollector::start().await.unwrap();
    let page = Page::new(PageConfig {
        document_root: replay_document(),
        ..PageConfig::default()
    });
    let monitor = Monitor::new(config(&collector.endpoint()), page.clone()).unwrap();
    monitor.start();
    assert_eq!(monitor.status().replay_state, RecorderState::Recording);

    // A mutation and a click become deltas.
    page.emit_mutations(&[DomMutation {
        kind: MutationKind::ChildList,
        target: vec![0, 0],
        added: vec![DomNode::element("p").with_children(vec![DomNode::text("added")])],
        removed: vec![],
        attribute_name: None,
        old_value: None,
    }]);
    page.dispatch(
        &UiEvent::new(UiEventKind::Click, page.now_ms()).with_target(vec![0, 0, 0]),
    );

    monitor.flush().await;

    let replays = replay_events(&collector);
    assert_eq!(replays.len(), 1);
    let records = replays[0]["events"].as_array().unwrap();
    assert!(records.len() >= 3);

    // First record is the full snapshot, masked.
    assert_eq!(records[0]["type"], "dom");
    let snapshot = &records[0]["data"];
    assert_eq!(snapshot["fullSnapshot"], true);
    assert_eq!(snapshot["url"], page.url());
    let app = &snapshot["node"]["children"][0]["children"][0];
    let password = &app["children"][0];
    assert_eq!(password["children"][0]["textContent"], "[MASKED]");
    let tokened = &app["children"][1];
    assert_eq!(tokened["attributes"]["data-token"], "[MASKED]");
    assert_eq!(tokened["children"][0]["textContent"], "widget");

    let kinds: Vec<&str> = records[1..]
        .iter()
        .map(|r| r["type"].as_str().unwrap())
        .collect();
    assert!(kinds.contains(&"mutation"));
    assert!(kinds.contains(&"interaction"));

    monitor.stop().await;
}

#[tokio::test]
async fn pause_and_resume_gate_delta_admission() {
    let collector = MockCollector::start().await.unwrap();
    let page = Page::new(PageConfig {
        document_root: fixtures::storefront_document(),
        ..PageConfig::default()
    });
    let monitor = Monitor::new(config(&collector.endpoint()), page.clone()).unwrap();
    monitor.start();

    monitor.pause_replay();
    page.dispatch(&UiEvent::new(UiEventKind::Click, page.now_ms()));
    monitor.flush().await;
    assert!(replay_events(&collector).is_empty(), "paused: nothing to send");

    monitor.resume_replay();
    page.dispatch(&UiEvent::new(UiEventKind::Click, page.now_ms()));
    monitor.flush().await;
    let replays = replay_events(&collector);
    assert_eq!(replays.len(), 1);

    monitor.stop().await;
}

#[tokio::test]
async fn replay_feature_gate_refuses_without_observers() {
    let collector = MockCollector::start().await.unwrap();
    let mut page_config = PageConfig::default();
    page_config.capabilities.mutation_observer = false;
    let page = Page::new(page_config);

    let monitor = Monitor::new(config(&collector.endpoint()), page).unwrap();
    monitor.start();
    assert_eq!(monitor.status().replay_state, RecorderState::Idle);
    monitor.stop().await;
}
