use super::{Backend, Substrate};
use crate::error::{CorpusError, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// SQLite-backed substrate. One database file holds every namespace;
/// each namespace is a scoped view over the `documents` table, ordered
/// by key bytes so scans are stable across backends.
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBackend {
    /// Open or create the database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let backend = SqliteBackend {
            conn: Arc::new(Mutex::new(conn)),
        };
        backend.initialize_tables()?;
        Ok(backend)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let backend = SqliteBackend {
            conn: Arc::new(Mutex::new(conn)),
        };
        backend.initialize_tables()?;
        Ok(backend)
    }

    fn initialize_tables(&self) -> Result<()> {
        self.lock()?.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS namespaces (
                namespace TEXT PRIMARY KEY,
                schema_hash TEXT NOT NULL,
                schema_json TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS documents (
                namespace TEXT NOT NULL,
                key BLOB NOT NULL,
                value BLOB NOT NULL,
                PRIMARY KEY (namespace, key)
            );

            CREATE INDEX IF NOT EXISTS idx_documents_namespace ON documents(namespace);
            ",
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| CorpusError::Substrate("connection lock poisoned".into()))
    }
}

impl Backend for SqliteBackend {
    fn open_namespace(&self, namespace: &str) -> Result<Arc<dyn Substrate>> {
        Ok(Arc::new(SqliteSubstrate {
            conn: Arc::clone(&self.conn),
            namespace: namespace.to_string(),
        }))
    }

    fn record_namespace(
        &self,
        namespace: &str,
        schema_hash: &str,
        schema_json: &str,
    ) -> Result<()> {
        self.lock()?.execute(
            "INSERT OR IGNORE INTO namespaces (namespace, schema_hash, schema_json)
             VALUES (?1, ?2, ?3)",
            params![namespace, schema_hash, schema_json],
        )?;
        Ok(())
    }

    fn namespaces(&self) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT namespace FROM namespaces ORDER BY namespace")?;
        let rows = stmt.query_map([], |row| row.get(0))?;

        let mut names = Vec::new();
        for row in rows {
            names.push(row?);
        }
        Ok(names)
    }

    fn drop_namespace(&self, namespace: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM documents WHERE namespace = ?1", params![namespace])?;
        conn.execute("DELETE FROM namespaces WHERE namespace = ?1", params![namespace])?;
        Ok(())
    }
}

/// One namespace's scope over the shared connection.
pub struct SqliteSubstrate {
    conn: Arc<Mutex<Connection>>,
    namespace: String,
}

impl SqliteSubstrate {
    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| CorpusError::Substrate("connection lock poisoned".into()))
    }
}

impl Substrate for SqliteSubstrate {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let result = self
            .lock()?
            .query_row(
                "SELECT value FROM documents WHERE namespace = ?1 AND key = ?2",
                params![self.namespace, key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(result)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.lock()?.execute(
            "INSERT OR REPLACE INTO documents (namespace, key, value) VALUES (?1, ?2, ?3)",
            params![self.namespace, key, value],
        )?;
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<bool> {
        let changed = self.lock()?.execute(
            "DELETE FROM documents WHERE namespace = ?1 AND key = ?2",
            params![self.namespace, key],
        )?;
        Ok(changed > 0)
    }

    fn exists(&self, key: &[u8]) -> Result<bool> {
        let count: i64 = self.lock()?.query_row(
            "SELECT COUNT(*) FROM documents WHERE namespace = ?1 AND key = ?2",
            params![self.namespace, key],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn scan(&self, limit: usize, offset: usize) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT key, value FROM documents WHERE namespace = ?1
             ORDER BY key LIMIT ?2 OFFSET ?3",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let offset = i64::try_from(offset).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![self.namespace, limit, offset], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    fn count(&self) -> Result<usize> {
        let count: i64 = self.lock()?.query_row(
            "SELECT COUNT(*) FROM documents WHERE namespace = ?1",
            params![self.namespace],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_put_get_scoped_by_namespace() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        let dogs = backend.open_namespace("dogs").unwrap();
        let cats = backend.open_namespace("cats").unwrap();

        dogs.put(b"k", b"dog").unwrap();
        cats.put(b"k", b"cat").unwrap();

        assert_eq!(dogs.get(b"k").unwrap(), Some(b"dog".to_vec()));
        assert_eq!(cats.get(b"k").unwrap(), Some(b"cat".to_vec()));
        assert_eq!(dogs.count().unwrap(), 1);
    }

    #[test]
    fn test_scan_ordered_with_pagination() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        let scope = backend.open_namespace("dogs").unwrap();
        for key in ["m", "a", "z", "f"] {
            scope.put(key.as_bytes(), b"v").unwrap();
        }

        let keys: Vec<_> = scope
            .scan(10, 0)
            .unwrap()
            .into_iter()
            .map(|(k, _)| String::from_utf8(k).unwrap())
            .collect();
        assert_eq!(keys, vec!["a", "f", "m", "z"]);

        let page: Vec<_> = scope
            .scan(2, 1)
            .unwrap()
            .into_iter()
            .map(|(k, _)| String::from_utf8(k).unwrap())
            .collect();
        assert_eq!(page, vec!["f", "m"]);
    }

    #[test]
    fn test_delete_reports_absence() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        let scope = backend.open_namespace("dogs").unwrap();
        scope.put(b"k", b"v").unwrap();
        assert!(scope.delete(b"k").unwrap());
        assert!(!scope.delete(b"k").unwrap());
        assert!(!scope.exists(b"k").unwrap());
    }

    #[test]
    fn test_registry_and_drop() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        backend.record_namespace("dogs", "abc", "{}").unwrap();
        backend.record_namespace("cats", "def", "{}").unwrap();
        // second record for the same namespace keeps the original row
        backend.record_namespace("dogs", "zzz", "{}").unwrap();
        assert_eq!(backend.namespaces().unwrap(), vec!["cats", "dogs"]);

        let scope = backend.open_namespace("dogs").unwrap();
        scope.put(b"k", b"v").unwrap();
        backend.drop_namespace("dogs").unwrap();
        assert_eq!(backend.namespaces().unwrap(), vec!["cats"]);
        assert_eq!(scope.count().unwrap(), 0);
    }

    #[test]
    fn test_persists_across_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("corpus.db");

        {
            let backend = SqliteBackend::open(&path).unwrap();
            let scope = backend.open_namespace("dogs").unwrap();
            scope.put(b"fido", b"{\"key\":\"fido\"}").unwrap();
            backend.record_namespace("dogs", "abc", "{}").unwrap();
        }

        let backend = SqliteBackend::open(&path).unwrap();
        let scope = backend.open_namespace("dogs").unwrap();
        assert_eq!(scope.get(b"fido").unwrap(), Some(b"{\"key\":\"fido\"}".to_vec()));
        assert_eq!(backend.namespaces().unwrap(), vec!["dogs"]);
    }
}
