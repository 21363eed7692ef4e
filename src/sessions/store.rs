//! Session state storage
//!
//! The service only depends on [`SessionStore`]. Two backends are provided: an
//! in-memory map for tests and ephemeral runs, and SQLite with one JSON row per
//! scope.

use crate::sessions::{Scope, SessionError, SessionResult, SessionState};
use async_trait::async_trait;
use dashmap::DashMap;
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Load/save access to session state keyed by scope
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load the state for `scope`, or a zeroed state if none was saved
    async fn load(&self, scope: Scope) -> SessionResult<SessionState>;

    /// Replace the state for `scope` in one write
    async fn save(&self, scope: Scope, state: SessionState) -> SessionResult<()>;
}

/// Session states held in memory
#[derive(Clone, Default)]
pub struct MemoryStore {
    states: Arc<DashMap<Scope, SessionState>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of scopes with saved state
    #[must_use]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn load(&self, scope: Scope) -> SessionResult<SessionState> {
        Ok(self
            .states
            .get(&scope)
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }

    async fn save(&self, scope: Scope, state: SessionState) -> SessionResult<()> {
        self.states.insert(scope, state);
        Ok(())
    }
}

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS guilds (
        guild_id INTEGER PRIMARY KEY NOT NULL,
        data TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS users (
        user_id INTEGER PRIMARY KEY NOT NULL,
        data TEXT NOT NULL
    );
";

const fn select_query(scope: Scope) -> &'static str {
    match scope {
        Scope::Guild(_) => "SELECT data FROM guilds WHERE guild_id = ?1",
        Scope::Member(_) => "SELECT data FROM users WHERE user_id = ?1",
    }
}

const fn replace_query(scope: Scope) -> &'static str {
    match scope {
        Scope::Guild(_) => "REPLACE INTO guilds (guild_id, data) VALUES (?1, ?2)",
        Scope::Member(_) => "REPLACE INTO users (user_id, data) VALUES (?1, ?2)",
    }
}

fn row_key(scope: Scope) -> SessionResult<i64> {
    i64::try_from(scope.id()).map_err(|_| SessionError::Storage(format!("Id out of range for {scope}")))
}

/// Session states stored as JSON rows in SQLite
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or the schema cannot be
    /// created.
    pub fn open(path: impl AsRef<Path>) -> SessionResult<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path.as_ref(), flags)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        debug!("Opened session database at {}", path.as_ref().display());
        Self::with_connection(conn)
    }

    /// Open a private in-memory database
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub fn open_in_memory() -> SessionResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> SessionResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> SessionResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> SessionResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|e| SessionError::Storage(format!("Connection lock poisoned: {e}")))?;
            f(&mut guard)
        })
        .await?
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn load(&self, scope: Scope) -> SessionResult<SessionState> {
        let key = row_key(scope)?;
        let raw = self
            .with_conn(move |conn| {
                Ok(conn
                    .query_row(select_query(scope), params![key], |row| row.get::<_, String>(0))
                    .optional()?)
            })
            .await?;

        match raw {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(SessionState::default()),
        }
    }

    async fn save(&self, scope: Scope, state: SessionState) -> SessionResult<()> {
        let key = row_key(scope)?;
        let json = serde_json::to_string(&state)?;
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(replace_query(scope), params![key, json])?;
            tx.commit()?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_state() -> SessionState {
        let mut state = SessionState::default();
        state.start(Utc::now());
        state
    }

    #[tokio::test]
    async fn test_memory_store_defaults_and_saves() {
        let store = MemoryStore::new();
        assert_eq!(store.load(Scope::Guild(1)).await.unwrap(), SessionState::default());
        assert!(store.is_empty());

        let state = sample_state();
        store.save(Scope::Guild(1), state.clone()).await.unwrap();
        assert_eq!(store.load(Scope::Guild(1)).await.unwrap(), state);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_sqlite_store_round_trip() {
        let store = SqliteStore::open_in_memory().expect("Failed to open database");
        assert_eq!(store.load(Scope::Member(42)).await.unwrap(), SessionState::default());

        let state = sample_state();
        store.save(Scope::Member(42), state.clone()).await.unwrap();
        assert_eq!(store.load(Scope::Member(42)).await.unwrap(), state);
    }

    #[tokio::test]
    async fn test_sqlite_store_keeps_scopes_apart() {
        let store = SqliteStore::open_in_memory().expect("Failed to open database");
        let state = sample_state();

        // Guild and member ids can collide; they live in different tables
        store.save(Scope::Guild(7), state.clone()).await.unwrap();
        assert_eq!(store.load(Scope::Member(7)).await.unwrap(), SessionState::default());
        assert_eq!(store.load(Scope::Guild(7)).await.unwrap(), state);
    }

    #[tokio::test]
    async fn test_sqlite_store_replaces_rows() {
        let store = SqliteStore::open_in_memory().expect("Failed to open database");
        let mut state = sample_state();
        store.save(Scope::Guild(9), state.clone()).await.unwrap();

        state.end(Utc::now());
        store.save(Scope::Guild(9), state.clone()).await.unwrap();

        let loaded = store.load(Scope::Guild(9)).await.unwrap();
        assert_eq!(loaded.total_sessions, 1);
        assert!(!loaded.currently_running);
    }

    #[tokio::test]
    async fn test_sqlite_store_rejects_corrupt_rows() {
        let store = SqliteStore::open_in_memory().expect("Failed to open database");
        store
            .with_conn(|conn| {
                conn.execute("INSERT INTO users (user_id, data) VALUES (5, 'not json')", [])?;
                Ok(())
            })
            .await
            .unwrap();

        let result = store.load(Scope::Member(5)).await;
        assert!(matches!(result, Err(SessionError::Serialization(_))));
    }

    #[test]
    fn test_row_key_range() {
        assert_eq!(row_key(Scope::Guild(12)).unwrap(), 12);
        assert!(row_key(Scope::Guild(u64::MAX)).is_err());
    }
}
