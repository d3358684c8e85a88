//! Persistent spill store for events that failed upload.
//!
//! Batches that exhaust their retries are parked here and replayed on the
//! next startup or `online` signal.  The store is bounded two ways:
//! entry count (newest-wins) and serialized byte size, so a burst of large
//! replay events cannot blow the backing store's quota.

use std::sync::Arc;

use lookout_protocol::Event;
use tracing::warn;

use super::KeyValueStore;

pub const SPILL_KEY: &str = "failed_events";
pub const DEFAULT_MAX_ENTRIES: usize = 1000;
pub const DEFAULT_MAX_BYTES: usize = 4 * 1024 * 1024;

/// Capped view over the `failed_events` key of the persistent store.
pub struct SpillStore {
    store: Arc<dyn KeyValueStore>,
    max_entries: usize,
    max_bytes: usize,
}

impl SpillStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        SpillStore {
            store,
            max_entries: DEFAULT_MAX_ENTRIES,
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }

    pub fn with_caps(store: Arc<dyn KeyValueStore>, max_entries: usize, max_bytes: usize) -> Self {
        SpillStore {
            store,
            max_entries: max_entries.max(1),
            max_bytes,
        }
    }

    /// Append failed events, evicting the oldest entries when either cap is
    /// exceeded.
    pub fn append(&self, events: &[Event]) {
        if events.is_empty() {
            return;
        }
        let mut parked = self.load();
        parked.extend_from_slice(events);

        if parked.len() > self.max_entries {
            let excess = parked.len() - self.max_entries;
            parked.drain(..excess);
        }

        let mut serialized = match serde_json::to_string(&parked) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "cannot serialize spill entries, dropping batch");
                return;
            }
        };
        while serialized.len() > self.max_bytes && !parked.is_empty() {
            parked.remove(0);
            serialized = match serde_json::to_string(&parked) {
                Ok(s) => s,
                Err(_) => return,
            };
        }

        if let Err(e) = self.store.set(SPILL_KEY, &serialized) {
            warn!(error = %e, "cannot persist spilled events");
        }
    }

    /// All parked events, oldest first.  Corrupt data reads as empty.
    pub fn load(&self) -> Vec<Event> {
        let raw = match self.store.get(SPILL_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!(error = %e, "cannot read spilled events");
                return Vec::new();
            }
        };
        match serde_json::from_str(&raw) {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %e, "spill store corrupt, discarding contents");
                let _ = self.store.remove(SPILL_KEY);
                Vec::new()
            }
        }
    }

    pub fn clear(&self) {
        if let Err(e) = self.store.remove(SPILL_KEY) {
            warn!(error = %e, "cannot clear spill store");
        }
    }

    pub fn len(&self) -> usize {
        self.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
