//! Key/value storage with an in-memory fallback.
//!
//! Two logical stores back the SDK, distinguished by lifetime: the
//! session-scoped store (holds `session_id`) and the browser-persistent
//! store (holds `user_id` and `failed_events`).  Both are namespaced with
//! `monitor_<appId>` and share one interface so capture logic stays
//! oblivious to the backing.
//!
//! # SQLite durability settings
//! Applied at open: WAL, synchronous=FULL, wal_autocheckpoint=1000.
//! PRAGMA integrity_check runs at open; returns error if it fails.

pub mod spill;

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use rusqlite::{Connection, params};
use tracing::warn;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("integrity check failed: {0}")]
    IntegrityCheckFailed(String),
    #[error("store poisoned")]
    Poisoned,
}

// ---------------------------------------------------------------------------
// Interface
// ---------------------------------------------------------------------------

/// Minimal key/value surface shared by both identity stores and the spill
/// store.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Process-lifetime store; the universal fallback.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        entries.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        entries.remove(key);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SQLite-backed store
// ---------------------------------------------------------------------------

/// Durable store used as the browser-persistent backing in native
/// embeddings.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the store at the given path.
    ///
    /// Applies PRAGMAs, runs `PRAGMA integrity_check`, and creates the `kv`
    /// table if needed.  Returns `Err` if integrity_check fails.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        apply_pragmas(&conn)?;
        run_integrity_check(&conn)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                 key   TEXT PRIMARY KEY,
                 value TEXT NOT NULL
             );",
        )?;
        Ok(SqliteStore { conn: Mutex::new(conn) })
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let mut stmt = conn.prepare("SELECT value FROM kv WHERE key = ?1")?;
        let mut rows = stmt.query(params![key])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }
}

fn apply_pragmas(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=FULL;
         PRAGMA wal_autocheckpoint=1000;",
    )?;
    Ok(())
}

fn run_integrity_check(conn: &Connection) -> Result<(), StoreError> {
    let result: String = conn.pragma_query_value(None, "integrity_check", |row| row.get(0))?;
    if result != "ok" {
        return Err(StoreError::IntegrityCheckFailed(result));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Namespacing
// ---------------------------------------------------------------------------

/// Prefixes every key with `monitor_<appId>:`.
pub struct Namespaced {
    prefix: String,
    inner: Arc<dyn KeyValueStore>,
}

impl Namespaced {
    pub fn new(app_id: &str, inner: Arc<dyn KeyValueStore>) -> Self {
        Namespaced {
            prefix: format!("monitor_{app_id}"),
            inner,
        }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }
}

impl KeyValueStore for Namespaced {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(&self.full_key(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.inner.set(&self.full_key(key), value)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.inner.remove(&self.full_key(key))
    }
}

// ---------------------------------------------------------------------------
// Fallback wrapper
// ---------------------------------------------------------------------------

/// Routes to the primary store until its first failure, then degrades to an
/// in-memory store for the rest of the process.  Warns once.
pub struct FallbackStore {
    primary: Arc<dyn KeyValueStore>,
    fallback: MemoryStore,
    degraded: AtomicBool,
}

impl FallbackStore {
    pub fn new(primary: Arc<dyn KeyValueStore>) -> Self {
        FallbackStore {
            primary,
            fallback: MemoryStore::new(),
            degraded: AtomicBool::new(false),
        }
    }

    fn degrade(&self, err: &StoreError) {
        if !self.degraded.swap(true, Ordering::SeqCst) {
            warn!(error = %err, "backing store unavailable, falling back to in-memory storage");
        }
    }

    fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }
}

impl KeyValueStore for FallbackStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        if !self.is_degraded() {
            match self.primary.get(key) {
                Ok(value) => return Ok(value),
                Err(e) => self.degrade(&e),
            }
        }
        self.fallback.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        if !self.is_degraded() {
            match self.primary.set(key, value) {
                Ok(()) => return Ok(()),
                Err(e) => self.degrade(&e),
            }
        }
        self.fallback.set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        if !self.is_degraded() {
            match self.primary.remove(key) {
                Ok(()) => return Ok(()),
                Err(e) => self.degrade(&e),
            }
        }
        self.fallback.remove(key)
    }
}

/// Open the browser-persistent store: SQLite when a path is configured,
/// in-memory otherwise.  SQLite open failures fall back with one warning.
pub fn open_persistent(path: Option<&Path>) -> Arc<dyn KeyValueStore> {
    match path {
        Some(p) => match SqliteStore::open(p) {
            Ok(store) => Arc::new(FallbackStore::new(Arc::new(store))),
            Err(e) => {
                warn!(path = %p.display(), error = %e, "cannot open persistent store, using in-memory fallback");
                Arc::new(MemoryStore::new())
            }
        },
        None => Arc::new(MemoryStore::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_store_survives_close_and_reopen() {
        let dir = tempfile::tempdir().expect("temp dir");
        let db_path = dir.path().join("kv.sqlite3");

        {
            let store = SqliteStore::open(&db_path).expect("open");
            store.set("monitor_app:session_id", "sess-1").unwrap();
        }

        let reopened = SqliteStore::open(&db_path).expect("reopen");
        assert_eq!(
            reopened.get("monitor_app:session_id").unwrap().as_deref(),
            Some("sess-1")
        );
    }

    #[test]
    fn sqlite_wal_mode_is_set() {
        let dir = tempfile::tempdir().expect("temp dir");
        let db_path = dir.path().join("wal.sqlite3");
        let store = SqliteStore::open(&db_path).expect("open");
        let conn = store.conn.lock().unwrap();
        let mode: String = conn
            .pragma_query_value(None, "journal_mode", |row| row.get(0))
            .expect("query journal_mode");
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[test]
    fn namespaced_keys_carry_app_prefix() {
        let backing = Arc::new(MemoryStore::new());
        let store = Namespaced::new("shop-7", backing.clone());
        store.set("user_id", "u-1").unwrap();

        assert_eq!(backing.get("monitor_shop-7:user_id").unwrap().as_deref(), Some("u-1"));
        assert_eq!(store.get("user_id").unwrap().as_deref(), Some("u-1"));
        store.remove("user_id").unwrap();
        assert_eq!(store.get("user_id").unwrap(), None);
    }

    struct FailingStore;

    impl KeyValueStore for FailingStore {
        fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::Poisoned)
        }
        fn set(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
            Err(StoreError::Poisoned)
        }
        fn remove(&self, _key: &str) -> Result<(), StoreError> {
            Err(StoreError::Poisoned)
        }
    }

    #[test]
    fn fallback_store_degrades_transparently() {
        let store = FallbackStore::new(Arc::new(FailingStore));
        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
        assert!(store.is_degraded());
    }
}
