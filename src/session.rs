//! Session and user identity over the two key/value stores.
//!
//! `session_id` lives in the session-scoped store and is created from
//! `(timestamp + random)` on first read; it never rotates for the life of
//! the browsing session.  `user_id` lives in the browser-persistent store
//! and may change freely without touching the session.

use std::sync::Arc;

use tracing::warn;

use crate::store::KeyValueStore;

const SESSION_ID_KEY: &str = "session_id";
const USER_ID_KEY: &str = "user_id";
const USER_PROPS_KEY: &str = "user_props";

pub struct SessionIdentity {
    session_store: Arc<dyn KeyValueStore>,
    persistent_store: Arc<dyn KeyValueStore>,
}

impl SessionIdentity {
    pub fn new(
        session_store: Arc<dyn KeyValueStore>,
        persistent_store: Arc<dyn KeyValueStore>,
    ) -> Self {
        SessionIdentity {
            session_store,
            persistent_store,
        }
    }

    /// The stable session id, created on first read.
    pub fn session_id(&self) -> String {
        match self.session_store.get(SESSION_ID_KEY) {
            Ok(Some(id)) => return id,
            Ok(None) => {}
            Err(e) => warn!(error = %e, "cannot read session id"),
        }
        let id = new_session_id();
        if let Err(e) = self.session_store.set(SESSION_ID_KEY, &id) {
            warn!(error = %e, "cannot persist session id");
        }
        id
    }

    pub fn user_id(&self) -> Option<String> {
        self.persistent_store.get(USER_ID_KEY).ok().flatten()
    }

    /// Set the user identity.  Does not rotate the session.
    pub fn set_user(&self, user_id: &str, props: Option<serde_json::Value>) {
        if let Err(e) = self.persistent_store.set(USER_ID_KEY, user_id) {
            warn!(error = %e, "cannot persist user id");
        }
        if let Some(props) = props {
            if let Ok(raw) = serde_json::to_string(&props) {
                let _ = self.persistent_store.set(USER_PROPS_KEY, &raw);
            }
        }
    }

    pub fn clear_user(&self) {
        let _ = self.persistent_store.remove(USER_ID_KEY);
        let _ = self.persistent_store.remove(USER_PROPS_KEY);
    }
}

fn new_session_id() -> String {
    let now = chrono::Utc::now().timestamp_millis();
    let entropy = uuid::Uuid::new_v4().simple().to_string();
    format!("{now}-{}", &entropy[..8])
}
