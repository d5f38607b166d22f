use super::{Backend, Substrate};
use crate::error::{CorpusError, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

/// In-memory backend: one ordered map per namespace. Used for tests and
/// ephemeral stores; ordering matches the SQLite backend (byte order).
pub struct MemoryBackend {
    namespaces: RwLock<HashMap<String, Arc<MemorySubstrate>>>,
    /// namespace -> (schema hash, schema json), first-use wins
    registry: RwLock<BTreeMap<String, (String, String)>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        MemoryBackend {
            namespaces: RwLock::new(HashMap::new()),
            registry: RwLock::new(BTreeMap::new()),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for MemoryBackend {
    fn open_namespace(&self, namespace: &str) -> Result<Arc<dyn Substrate>> {
        if let Ok(map) = self.namespaces.read() {
            if let Some(existing) = map.get(namespace) {
                return Ok(Arc::clone(existing) as Arc<dyn Substrate>);
            }
        }

        let mut map = self
            .namespaces
            .write()
            .map_err(|_| CorpusError::Substrate("namespace map lock poisoned".into()))?;
        let entry = map
            .entry(namespace.to_string())
            .or_insert_with(|| Arc::new(MemorySubstrate::new()));
        Ok(Arc::clone(entry) as Arc<dyn Substrate>)
    }

    fn record_namespace(
        &self,
        namespace: &str,
        schema_hash: &str,
        schema_json: &str,
    ) -> Result<()> {
        let mut registry = self
            .registry
            .write()
            .map_err(|_| CorpusError::Substrate("registry lock poisoned".into()))?;
        registry
            .entry(namespace.to_string())
            .or_insert_with(|| (schema_hash.to_string(), schema_json.to_string()));
        Ok(())
    }

    fn namespaces(&self) -> Result<Vec<String>> {
        let registry = self
            .registry
            .read()
            .map_err(|_| CorpusError::Substrate("registry lock poisoned".into()))?;
        Ok(registry.keys().cloned().collect())
    }

    fn drop_namespace(&self, namespace: &str) -> Result<()> {
        self.namespaces
            .write()
            .map_err(|_| CorpusError::Substrate("namespace map lock poisoned".into()))?
            .remove(namespace);
        self.registry
            .write()
            .map_err(|_| CorpusError::Substrate("registry lock poisoned".into()))?
            .remove(namespace);
        Ok(())
    }
}

/// One namespace's ordered key-value scope.
pub struct MemorySubstrate {
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemorySubstrate {
    pub fn new() -> Self {
        MemorySubstrate {
            map: RwLock::new(BTreeMap::new()),
        }
    }

    fn read_map(&self) -> Result<std::sync::RwLockReadGuard<'_, BTreeMap<Vec<u8>, Vec<u8>>>> {
        self.map
            .read()
            .map_err(|_| CorpusError::Substrate("substrate lock poisoned".into()))
    }

    fn write_map(&self) -> Result<std::sync::RwLockWriteGuard<'_, BTreeMap<Vec<u8>, Vec<u8>>>> {
        self.map
            .write()
            .map_err(|_| CorpusError::Substrate("substrate lock poisoned".into()))
    }
}

impl Default for MemorySubstrate {
    fn default() -> Self {
        Self::new()
    }
}

impl Substrate for MemorySubstrate {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.read_map()?.get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.write_map()?.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<bool> {
        Ok(self.write_map()?.remove(key).is_some())
    }

    fn exists(&self, key: &[u8]) -> Result<bool> {
        Ok(self.read_map()?.contains_key(key))
    }

    fn scan(&self, limit: usize, offset: usize) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(self
            .read_map()?
            .iter()
            .skip(offset)
            .take(limit)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn count(&self) -> Result<usize> {
        Ok(self.read_map()?.len())
    }
}
