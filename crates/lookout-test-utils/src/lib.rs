// lookout-test-utils: Shared test utilities for the telemetry suite.
//
// Provides a mock HTTP collector and document fixtures for integration
// testing of the SDK pipeline.

pub mod fixtures;
pub mod mock_collector;

pub use mock_collector::{MockCollector, ReceivedRequest};

#[cfg(test)]
mod tests {
    use super::*;

    /// Test: collector starts, binds to a random port, and records a POST.
    #[tokio::test]
    async fn collector_records_posted_batches() {
        let collector = MockCollector::start().await.unwrap();
        let client = reqwest::Client::new();

        let response = client
            .post(collector.endpoint())
            .header("Authorization", "Bearer key-1")
            .json(&serde_json::json!({
                "events": [{ "type": "behavior" }],
                "timestamp": 1,
                "sdk_version": "0.3.0",
            }))
            .send()
            .await
            .unwrap();
        assert!(response.status().is_success());

        let requests = collector.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].events().len(), 1);
        assert_eq!(
            requests[0].headers.get("authorization").map(String::as_str),
            Some("Bearer key-1")
        );
    }

    /// Test: scripted response codes are served in order, then 200.
    #[tokio::test]
    async fn scripted_responses_drain_in_order() {
        let collector = MockCollector::start().await.unwrap();
        collector.respond_with(&[500, 503]);
        let client = reqwest::Client::new();

        let mut statuses = Vec::new();
        for _ in 0..3 {
            let response = client
                .post(collector.endpoint())
                .json(&serde_json::json!({ "events": [], "timestamp": 0, "sdk_version": "x" }))
                .send()
                .await
                .unwrap();
            statuses.push(response.status().as_u16());
        }
        assert_eq!(statuses, vec![500, 503, 200]);
    }
}
