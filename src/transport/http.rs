//! Batched HTTP sender.
//!
//! `send` splits the drained events into batches of at most `batch_size`
//! and transmits them in parallel.  Each batch retries up to `max_retries`
//! times with exponential backoff (base delay doubling per attempt); a batch
//! that exhausts its retries is appended to the spill store and counted in
//! the surfaced error.  Nothing here panics or escapes to the host:
//! failures come back to the caller only.
//!
//! # Wire contract
//! POST `{events, timestamp, sdk_version}` as JSON with
//! `Authorization: Bearer <apiKey>` and `X-SDK-Version` headers.
//! Bodies above a size floor are gzip-compressed when compression is
//! enabled; `Content-Encoding` is set only when compression was applied.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use flate2::Compression;
use flate2::write::GzEncoder;
use futures_util::future::join_all;
use lookout_protocol::{Batch, Event};
use reqwest::header::{AUTHORIZATION, CONTENT_ENCODING, CONTENT_TYPE};
use tracing::{debug, warn};

use crate::store::spill::SpillStore;

/// Bodies smaller than this are not worth compressing.
const COMPRESS_MIN_BYTES: usize = 1024;

#[derive(Debug, Clone)]
pub struct HttpSenderConfig {
    pub endpoint: String,
    pub api_key: String,
    pub sdk_version: String,
    /// Max events per POST body.
    pub batch_size: usize,
    /// Retries after the initial attempt.
    pub max_retries: u32,
    /// Per-request timeout.
    pub timeout: Duration,
    /// First backoff delay; doubles per attempt.
    pub retry_base_delay: Duration,
    pub compress: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("{failed} of {total} batches failed after retries and were spilled")]
    BatchesFailed { failed: usize, total: usize },
    #[error("serialization: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("http client: {0}")]
    Client(String),
}

/// One batch's terminal failure, after retries.
#[derive(Debug)]
enum BatchFailure {
    Status(u16),
    Transport(String),
}

impl std::fmt::Display for BatchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BatchFailure::Status(code) => write!(f, "HTTP {code}"),
            BatchFailure::Transport(msg) => write!(f, "{msg}"),
        }
    }
}

pub struct HttpSender {
    client: reqwest::Client,
    config: HttpSenderConfig,
    spill: Arc<SpillStore>,
}

impl HttpSender {
    pub fn new(config: HttpSenderConfig, spill: Arc<SpillStore>) -> Result<Self, SendError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SendError::Client(e.to_string()))?;
        Ok(HttpSender { client, config, spill })
    }

    /// Transmit the given events in parallel batches.
    ///
    /// Ordering within a batch is preserved; ordering across batches is not.
    /// On partial failure the failed batches' events are already spilled
    /// when this returns.
    pub async fn send(&self, events: Vec<Event>) -> Result<(), SendError> {
        if events.is_empty() {
            return Ok(());
        }

        let batches: Vec<Vec<Event>> = events
            .chunks(self.config.batch_size.max(1))
            .map(<[Event]>::to_vec)
            .collect();
        let total = batches.len();

        let results = join_all(
            batches
                .into_iter()
                .map(|batch| self.send_batch_with_retry(batch)),
        )
        .await;

        let failed = results.iter().filter(|r| r.is_err()).count();
        if failed > 0 {
            return Err(SendError::BatchesFailed { failed, total });
        }
        Ok(())
    }

    /// Replay the spill store once: a single non-retried attempt per batch.
    ///
    /// Success empties the store; any failure leaves it intact for the next
    /// startup or `online` signal.
    pub async fn replay_spill(&self) -> bool {
        let parked = self.spill.load();
        if parked.is_empty() {
            return true;
        }
        debug!(count = parked.len(), "replaying spilled events");

        for chunk in parked.chunks(self.config.batch_size.max(1)) {
            let (body, encoding) = match self.encode_batch(chunk) {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "cannot encode spilled batch");
                    return false;
                }
            };
            if let Err(failure) = self.post_once(body, encoding).await {
                debug!(error = %failure, "spill replay attempt failed, keeping store intact");
                return false;
            }
        }
        self.spill.clear();
        true
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    async fn send_batch_with_retry(&self, events: Vec<Event>) -> Result<(), BatchFailure> {
        let (body, encoding) = self
            .encode_batch(&events)
            .map_err(|e| BatchFailure::Transport(e.to_string()))?;

        let mut last_failure = BatchFailure::Transport("no attempt made".to_owned());
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tokio::time::sleep(backoff_delay(self.config.retry_base_delay, attempt)).await;
            }
            match self.post_once(body.clone(), encoding).await {
                Ok(()) => {
                    debug!(events = events.len(), attempt, "batch delivered");
                    return Ok(());
                }
                Err(failure) => {
                    warn!(
                        events = events.len(),
                        attempt,
                        error = %failure,
                        "batch send attempt failed"
                    );
                    last_failure = failure;
                }
            }
        }

        warn!(events = events.len(), "batch exhausted retries, spilling");
        self.spill.append(&events);
        Err(last_failure)
    }

    fn encode_batch(&self, events: &[Event]) -> Result<(Vec<u8>, Option<&'static str>), SendError> {
        let batch = Batch {
            events: events.to_vec(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            sdk_version: self.config.sdk_version.clone(),
        };
        let json = serde_json::to_vec(&batch)?;

        if self.config.compress && json.len() >= COMPRESS_MIN_BYTES {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            if encoder.write_all(&json).is_ok() {
                if let Ok(compressed) = encoder.finish() {
                    return Ok((compressed, Some("gzip")));
                }
            }
            // Compression failure is not a delivery failure.
            return Ok((json, None));
        }
        Ok((json, None))
    }

    async fn post_once(
        &self,
        body: Vec<u8>,
        encoding: Option<&'static str>,
    ) -> Result<(), BatchFailure> {
        let mut request = self
            .client
            .post(&self.config.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, format!("Bearer {}", self.config.api_key))
            .header("X-SDK-Version", &self.config.sdk_version)
            .timeout(self.config.timeout)
            .body(body);
        if let Some(enc) = encoding {
            request = request.header(CONTENT_ENCODING, enc);
        }

        let response = request
            .send()
            .await
            .map_err(|e| BatchFailure::Transport(e.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(BatchFailure::Status(response.status().as_u16()))
        }
    }
}

/// Exponential backoff: `base * 2^(attempt-1)` for attempt >= 1.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let multiplier = 2u32.saturating_pow(attempt.saturating_sub(1));
    base.checked_mul(multiplier).unwrap_or(Duration::from_secs(u64::MAX))
}
