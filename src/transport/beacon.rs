//! Unload-time beacon sender.
//!
//! A single synchronous call that hands the batch to the page's unload-safe
//! delivery channel.  No retry, no backoff: the page is going away.  Beacon
//! requests cannot carry custom headers, so the API key travels as an
//! `apiKey` query parameter instead.

use std::sync::Arc;

use lookout_protocol::{Batch, Event};
use tracing::debug;

use crate::host::Page;

pub struct BeaconSender {
    page: Arc<Page>,
    endpoint: String,
    api_key: String,
    sdk_version: String,
}

impl BeaconSender {
    pub fn new(page: Arc<Page>, endpoint: &str, api_key: &str, sdk_version: &str) -> Self {
        BeaconSender {
            page,
            endpoint: endpoint.to_owned(),
            api_key: api_key.to_owned(),
            sdk_version: sdk_version.to_owned(),
        }
    }

    /// Attempt one beacon POST of `events`.
    ///
    /// An empty list performs no request and reports success.  Returns
    /// `false` when the body cannot be built or the channel refuses it.
    pub fn send(&self, events: Vec<Event>) -> bool {
        if events.is_empty() {
            return true;
        }
        let count = events.len();
        let batch = Batch {
            events,
            timestamp: self.page.now_ms(),
            sdk_version: self.sdk_version.clone(),
        };
        let body = match serde_json::to_vec(&batch) {
            Ok(body) => body,
            Err(_) => return false,
        };
        let url = self.url_with_key();
        let accepted = self.page.send_beacon(&url, &body);
        debug!(events = count, accepted, "beacon send");
        accepted
    }

    fn url_with_key(&self) -> String {
        let separator = if self.endpoint.contains('?') { '&' } else { '?' };
        format!("{}{}apiKey={}", self.endpoint, separator, self.api_key)
    }
}
