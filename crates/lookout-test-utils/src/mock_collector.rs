// mock_collector: A mock HTTP collector for testing the SDK sender.
//
// Accepts POSTs on any path, records headers/query/body per request, and
// serves scripted response codes so tests can exercise retry, spill, and
// replay paths.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};

/// One recorded request.
#[derive(Debug, Clone)]
pub struct ReceivedRequest {
    pub path: String,
    pub query: HashMap<String, String>,
    /// Header names lowercased.
    pub headers: HashMap<String, String>,
    pub body: serde_json::Value,
}

impl ReceivedRequest {
    /// The `events` array of the batch body (empty when absent).
    pub fn events(&self) -> Vec<serde_json::Value> {
        self.body
            .get("events")
            .and_then(|e| e.as_array())
            .cloned()
            .unwrap_or_default()
    }
}

struct CollectorState {
    requests: Mutex<Vec<ReceivedRequest>>,
    /// Pending scripted status codes; drained one per request, 200 after.
    responses: Mutex<VecDeque<u16>>,
}

/// A mock collector bound to a random local port.
///
/// Each test spins up its own isolated instance; the accept loop runs in a
/// background tokio task dropped with the collector.
pub struct MockCollector {
    addr: SocketAddr,
    state: Arc<CollectorState>,
    _task: tokio::task::JoinHandle<()>,
}

impl MockCollector {
    /// Start the collector, binding to a random available port.
    pub async fn start() -> Result<Self, Box<dyn std::error::Error>> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(CollectorState {
            requests: Mutex::new(Vec::new()),
            responses: Mutex::new(VecDeque::new()),
        });

        // No routes: every path falls through to the recording handler.
        let router = axum::Router::new()
            .fallback(handle_request)
            .with_state(state.clone());
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        Ok(MockCollector { addr, state, _task: task })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// The URL the SDK should POST to.
    pub fn endpoint(&self) -> String {
        format!("http://{}/collect", self.addr)
    }

    /// Queue response status codes; requests beyond the script get 200.
    pub fn respond_with(&self, statuses: &[u16]) {
        let mut responses = self.state.responses.lock().expect("responses");
        responses.extend(statuses.iter().copied());
    }

    pub fn requests(&self) -> Vec<ReceivedRequest> {
        self.state.requests.lock().expect("requests").clone()
    }

    pub fn request_count(&self) -> usize {
        self.state.requests.lock().expect("requests").len()
    }

    /// Total events across all recorded batches.
    pub fn total_events(&self) -> usize {
        self.requests().iter().map(|r| r.events().len()).sum()
    }

    /// Poll until at least `n` requests arrived or the timeout elapses.
    pub async fn wait_for_requests(&self, n: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.request_count() >= n {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.request_count() >= n
    }
}

async fn handle_request(
    State(state): State<Arc<CollectorState>>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let query = uri
        .query()
        .unwrap_or_default()
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
        })
        .collect();
    let headers = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_owned(), v.to_owned()))
        })
        .collect();
    let body = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);

    state.requests.lock().expect("requests").push(ReceivedRequest {
        path: uri.path().to_owned(),
        query,
        headers,
        body,
    });

    let status = state
        .responses
        .lock()
        .expect("responses")
        .pop_front()
        .unwrap_or(200);
    StatusCode::from_u16(status).unwrap_or(StatusCode::OK)
}
