// src/identity/storage.rs
//! Persisted identity storage
//!
//! Two scopes mirror the browser model: `Local` survives across sessions,
//! `Session` belongs to one tab group. Reads and writes are assumed to
//! succeed; backend failures are logged and read back as "absent".

use crate::utils::errors::{AgentError, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Long-lived visitor identifier
pub const VISITOR_ID_KEY: &str = "squeaky_visitor_id";

/// Short-lived session identifier
pub const SESSION_ID_KEY: &str = "squeaky_session_id";

/// Epoch milliseconds of the last qualifying interaction
pub const LAST_EVENT_AT_KEY: &str = "squeaky_last_event_at";

/// Consent flag, `"true"` / `"false"` / absent
pub const CONSENT_KEY: &str = "squeaky_consent";

/// Storage scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Survives across sessions
    Local,

    /// Bound to a single tab group
    Session,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Local => "local",
            Scope::Session => "session",
        }
    }
}

/// Key/value store shared by every component of one agent
pub trait Storage: Send + Sync {
    fn get(&self, scope: Scope, key: &str) -> Option<String>;

    fn set(&self, scope: Scope, key: &str, value: &str);

    fn remove(&self, scope: Scope, key: &str);
}

/// In-memory storage; clones share the same map
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    entries: Arc<Mutex<HashMap<(Scope, String), String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop everything in one scope (a closed tab group)
    pub fn clear_scope(&self, scope: Scope) {
        self.entries.lock().retain(|(s, _), _| *s != scope);
    }
}

impl Storage for MemoryStorage {
    fn get(&self, scope: Scope, key: &str) -> Option<String> {
        self.entries.lock().get(&(scope, key.to_string())).cloned()
    }

    fn set(&self, scope: Scope, key: &str, value: &str) {
        self.entries
            .lock()
            .insert((scope, key.to_string()), value.to_string());
    }

    fn remove(&self, scope: Scope, key: &str) {
        self.entries.lock().remove(&(scope, key.to_string()));
    }
}

/// SQLite-backed storage, both scopes in one table
pub struct SqliteStorage {
    db: Mutex<Connection>,
}

impl SqliteStorage {
    /// Open (or create) a database file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).map_err(|e| {
            AgentError::StorageFailed(format!("Failed to open database: {}", e))
        })?;

        let storage = Self::from_connection(conn)?;
        info!("Identity storage opened at {:?}", path.as_ref());

        Ok(storage)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            AgentError::StorageFailed(format!("Failed to open database: {}", e))
        })?;

        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS identity_entries (
                scope TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (scope, key)
            )
            "#,
            [],
        )
        .map_err(|e| AgentError::StorageFailed(format!("Schema creation failed: {}", e)))?;

        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// Drop everything in one scope (a closed tab group)
    pub fn clear_scope(&self, scope: Scope) -> Result<()> {
        self.db
            .lock()
            .execute(
                "DELETE FROM identity_entries WHERE scope = ?",
                params![scope.as_str()],
            )
            .map_err(|e| AgentError::StorageFailed(format!("Failed to clear scope: {}", e)))?;

        Ok(())
    }
}

impl Storage for SqliteStorage {
    fn get(&self, scope: Scope, key: &str) -> Option<String> {
        let db = self.db.lock();

        match db
            .query_row(
                "SELECT value FROM identity_entries WHERE scope = ? AND key = ?",
                params![scope.as_str(), key],
                |row| row.get(0),
            )
            .optional()
        {
            Ok(value) => value,
            Err(e) => {
                warn!("Failed to read {}/{}: {}", scope.as_str(), key, e);
                None
            }
        }
    }

    fn set(&self, scope: Scope, key: &str, value: &str) {
        let db = self.db.lock();

        let result = db.execute(
            r#"
            INSERT INTO identity_entries (scope, key, value, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(scope, key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
            params![
                scope.as_str(),
                key,
                value,
                chrono::Utc::now().timestamp_millis(),
            ],
        );

        match result {
            Ok(_) => debug!("Stored {}/{}", scope.as_str(), key),
            Err(e) => warn!("Failed to write {}/{}: {}", scope.as_str(), key, e),
        }
    }

    fn remove(&self, scope: Scope, key: &str) {
        let db = self.db.lock();

        if let Err(e) = db.execute(
            "DELETE FROM identity_entries WHERE scope = ? AND key = ?",
            params![scope.as_str(), key],
        ) {
            warn!("Failed to remove {}/{}: {}", scope.as_str(), key, e);
        }
    }
}
