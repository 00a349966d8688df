//! Connection configuration and the process-wide shared store.

use crate::error::{DataLayerError, Result};
use crate::sqlite::SqliteStore;
use rusqlite::Connection;
use std::env;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;

pub const DB_PATH_ENV: &str = "DATALAYER_DB_PATH";
pub const BUSY_TIMEOUT_ENV: &str = "DATALAYER_BUSY_TIMEOUT_MS";

/// SQLite connection configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SqliteConfig {
    /// Path to the SQLite database file, or `:memory:`
    pub db_path: String,
    /// How long to wait on a locked database before failing
    pub busy_timeout: Option<Duration>,
}

impl SqliteConfig {
    pub fn new(db_path: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
            busy_timeout: None,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(":memory:")
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = Some(timeout);
        self
    }

    /// Read `DATALAYER_DB_PATH` (default `:memory:`) and
    /// `DATALAYER_BUSY_TIMEOUT_MS`. Unparseable timeouts are ignored.
    pub fn from_env() -> Self {
        let db_path = env::var(DB_PATH_ENV).unwrap_or_else(|_| ":memory:".to_string());
        let busy_timeout = env::var(BUSY_TIMEOUT_ENV)
            .ok()
            .and_then(|ms| ms.trim().parse::<u64>().ok())
            .map(Duration::from_millis);
        Self {
            db_path,
            busy_timeout,
        }
    }
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl SqliteStore {
    /// Open a store with the given config. Foreign keys are enforced.
    pub fn open(config: &SqliteConfig) -> Result<Self> {
        let connection = Connection::open(&config.db_path)?;
        if let Some(timeout) = config.busy_timeout {
            connection.busy_timeout(timeout)?;
        }
        connection.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self::new(connection))
    }
}

struct Shared {
    config: Option<SqliteConfig>,
    store: Option<Arc<SqliteStore>>,
}

static SHARED: Mutex<Shared> = Mutex::new(Shared {
    config: None,
    store: None,
});

/// Access point for the shared store used by records built with `Record::new`.
pub struct Connect;

impl Connect {
    /// Set the config used when the shared store is first opened.
    ///
    /// Returns false if the store is already open; the config is then ignored.
    pub fn configure(config: SqliteConfig) -> bool {
        let Ok(mut shared) = SHARED.lock() else {
            return false;
        };
        if shared.store.is_some() {
            return false;
        }
        shared.config = Some(config);
        true
    }

    /// The shared store, opened on first call. Every caller gets the same handle.
    ///
    /// A failed open is not cached, so a later call retries.
    pub fn instance() -> Result<Arc<SqliteStore>> {
        let mut shared = SHARED
            .lock()
            .map_err(|_| DataLayerError::connection("shared connection mutex poisoned"))?;
        if let Some(store) = &shared.store {
            return Ok(Arc::clone(store));
        }

        let config = shared.config.clone().unwrap_or_default();
        info!(db_path = %config.db_path, "opening shared sqlite connection");
        let store = Arc::new(SqliteStore::open(&config)?);
        shared.store = Some(Arc::clone(&store));
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builders() {
        let config = SqliteConfig::new("app.db").with_busy_timeout(Duration::from_millis(250));
        assert_eq!(config.db_path, "app.db");
        assert_eq!(config.busy_timeout, Some(Duration::from_millis(250)));
        assert_eq!(SqliteConfig::in_memory().db_path, ":memory:");
    }

    #[test]
    fn test_open_enables_foreign_keys() {
        let store = SqliteStore::open(&SqliteConfig::in_memory()).unwrap();
        store
            .execute_batch(
                r#"
                CREATE TABLE parent (id INTEGER PRIMARY KEY);
                CREATE TABLE child (id INTEGER PRIMARY KEY, parent_id INTEGER REFERENCES parent(id));
                "#,
            )
            .unwrap();
        let err = store
            .execute_batch("INSERT INTO child (parent_id) VALUES (42);")
            .unwrap_err();
        assert!(err.is_execution());
    }
}
