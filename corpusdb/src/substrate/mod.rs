mod memory;
mod sqlite;

pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

use crate::error::Result;
use std::sync::Arc;
use std::time::Duration;

/// Ordered byte-oriented key-value scope backing one namespace.
/// Keys and values are opaque; scans honor byte order of keys.
pub trait Substrate: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;
    /// Returns true when a value was actually removed.
    fn delete(&self, key: &[u8]) -> Result<bool>;
    fn exists(&self, key: &[u8]) -> Result<bool>;
    /// Range scan in key order, paginated by offset/limit. Not a snapshot.
    fn scan(&self, limit: usize, offset: usize) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;
    fn count(&self) -> Result<usize>;
}

/// Factory for namespace scopes plus the namespace registry.
pub trait Backend: Send + Sync {
    /// Lazily provision the physical scope for a namespace.
    fn open_namespace(&self, namespace: &str) -> Result<Arc<dyn Substrate>>;
    /// Record a namespace's schema hash and definition on first use.
    fn record_namespace(&self, namespace: &str, schema_hash: &str, schema_json: &str)
        -> Result<()>;
    fn namespaces(&self) -> Result<Vec<String>>;
    /// Remove a namespace's data and registry entry.
    fn drop_namespace(&self, namespace: &str) -> Result<()>;
}

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(10);

/// Run a substrate operation with a small bounded retry. Only transient
/// (I/O-shaped) errors are retried; validation and not-found surface at once.
pub(crate) fn with_retry<T>(op: &str, mut f: impl FnMut() -> Result<T>) -> Result<T> {
    let mut attempt = 1;
    loop {
        match f() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < RETRY_ATTEMPTS => {
                log::warn!("substrate {op} failed (attempt {attempt}): {e}");
                std::thread::sleep(RETRY_BASE_DELAY * attempt);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
