//! Envelope stamping at admission time.
//!
//! Capture components buffer `Pending` records (capture timestamp plus
//! payload); the orchestrator stamps them into full events when they are
//! admitted to the queue.  The envelope timestamp is the capture time, not
//! the admission time, so per-component ordering survives buffering.

use std::sync::Arc;

use lookout_protocol::{Envelope, Event, Payload};

use crate::host::Page;
use crate::session::SessionIdentity;

/// A captured payload waiting for admission.
#[derive(Debug, Clone)]
pub struct Pending {
    pub captured_at: i64,
    pub payload: Payload,
}

impl Pending {
    pub fn new(captured_at: i64, payload: Payload) -> Self {
        Pending {
            captured_at,
            payload,
        }
    }
}

pub struct EnvelopeStamper {
    app_id: String,
    page: Arc<Page>,
    identity: Arc<SessionIdentity>,
}

impl EnvelopeStamper {
    pub fn new(app_id: &str, page: Arc<Page>, identity: Arc<SessionIdentity>) -> Self {
        EnvelopeStamper {
            app_id: app_id.to_owned(),
            page,
            identity,
        }
    }

    pub fn stamp(&self, pending: Pending) -> Event {
        Event {
            envelope: Envelope {
                event_id: uuid::Uuid::new_v4().to_string(),
                app_id: self.app_id.clone(),
                session_id: self.identity.session_id(),
                user_id: self.identity.user_id(),
                timestamp: pending.captured_at,
                page_url: self.page.url(),
                user_agent: self.page.user_agent(),
                device_info: self.page.device_info(),
            },
            payload: pending.payload,
        }
    }
}

#[cfg(test)]
impl EnvelopeStamper {
    /// A minimal stamped event for transport-level tests.
    pub fn test_event() -> Event {
        use crate::host::PageConfig;
        use crate::store::MemoryStore;
        use lookout_protocol::{BehaviorAction, BehaviorPayload};

        let page = Page::new(PageConfig::default());
        let identity = Arc::new(SessionIdentity::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryStore::new()),
        ));
        let stamper = EnvelopeStamper::new("test-app", page.clone(), identity);
        stamper.stamp(Pending::new(
            page.now_ms(),
            Payload::Behavior(BehaviorPayload {
                action: BehaviorAction::Click,
                target: None,
                value: None,
                coordinates: None,
                duration: None,
                context: None,
            }),
        ))
    }
}
