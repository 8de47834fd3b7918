use crate::infrastructure::error::EngineError;
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const SCHEMA_SQL: &str = include_str!("../../sql/schema.sql");

/// Generic asynchronous key-value document store. Values are JSON text; an
/// absent key means "empty default" for whichever collection it backs.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, EngineError>;
    async fn set(&self, key: &str, value: String) -> Result<(), EngineError>;
    async fn remove(&self, key: &str) -> Result<(), EngineError>;
    async fn keys(&self) -> Result<Vec<String>, EngineError>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, EngineError> {
        self.entries
            .lock()
            .map_err(|error| EngineError::Storage(format!("memory store lock poisoned: {error}")))
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, EngineError> {
        Ok(self.lock()?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), EngineError> {
        self.lock()?.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), EngineError> {
        self.lock()?.remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, EngineError> {
        let mut keys: Vec<String> = self.lock()?.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

/// Durable backend: one `kv` table, connection per call.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    db_path: PathBuf,
}

impl SqliteStore {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let db_path = db_path.as_ref().to_path_buf();
        let connection = Connection::open(&db_path)?;
        connection.execute_batch(SCHEMA_SQL)?;
        Ok(Self { db_path })
    }

    fn connect(&self) -> Result<Connection, EngineError> {
        Connection::open(&self.db_path).map_err(EngineError::from)
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>, EngineError> {
        let connection = self.connect()?;
        let value = connection
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: String) -> Result<(), EngineError> {
        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), EngineError> {
        let connection = self.connect()?;
        connection.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, EngineError> {
        let connection = self.connect()?;
        let mut statement = connection.prepare("SELECT key FROM kv ORDER BY key")?;
        let rows = statement.query_map([], |row| row.get::<_, String>(0))?;
        let mut keys = Vec::new();
        for key in rows {
            keys.push(key?);
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT_TEMP_DB: AtomicUsize = AtomicUsize::new(0);

    struct TempDb {
        path: PathBuf,
    }

    impl TempDb {
        fn new() -> Self {
            let sequence = NEXT_TEMP_DB.fetch_add(1, Ordering::Relaxed);
            let path = std::env::temp_dir().join(format!(
                "dayflow-store-tests-{}-{}.sqlite",
                std::process::id(),
                sequence
            ));
            Self { path }
        }
    }

    impl Drop for TempDb {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }

    #[tokio::test]
    async fn memory_store_set_get_remove() {
        let store = MemoryStore::default();
        assert_eq!(store.get("a").await.expect("get"), None);
        store.set("a", "1".to_string()).await.expect("set");
        assert_eq!(store.get("a").await.expect("get"), Some("1".to_string()));
        store.remove("a").await.expect("remove");
        assert_eq!(store.get("a").await.expect("get"), None);
    }

    #[tokio::test]
    async fn memory_store_lists_keys_sorted() {
        let store = MemoryStore::default();
        store.set("runs:2026-03-02", "[]".to_string()).await.expect("set");
        store.set("pipeline:2026-03-02", "[]".to_string()).await.expect("set");
        let keys = store.keys().await.expect("keys");
        assert_eq!(keys, vec!["pipeline:2026-03-02", "runs:2026-03-02"]);
    }

    #[tokio::test]
    async fn sqlite_store_roundtrips_values() {
        let db = TempDb::new();
        let store = SqliteStore::open(&db.path).expect("open store");
        store
            .set("routines:v1", "[{\"id\":\"rtn-1\"}]".to_string())
            .await
            .expect("set");
        assert_eq!(
            store.get("routines:v1").await.expect("get"),
            Some("[{\"id\":\"rtn-1\"}]".to_string())
        );

        // Upsert replaces the value.
        store.set("routines:v1", "[]".to_string()).await.expect("set again");
        assert_eq!(store.get("routines:v1").await.expect("get"), Some("[]".to_string()));

        store.remove("routines:v1").await.expect("remove");
        assert_eq!(store.get("routines:v1").await.expect("get"), None);
    }

    #[tokio::test]
    async fn sqlite_store_survives_reopen() {
        let db = TempDb::new();
        {
            let store = SqliteStore::open(&db.path).expect("open store");
            store.set("done:2026-03-02", "[\"a\"]".to_string()).await.expect("set");
        }
        let store = SqliteStore::open(&db.path).expect("reopen store");
        assert_eq!(
            store.get("done:2026-03-02").await.expect("get"),
            Some("[\"a\"]".to_string())
        );
    }
}
