use crate::bus::{ChangeBus, ChangeEvent, Subscription};
use crate::document::{decode_document, encode_document, merge_fields, Document};
use crate::error::{CorpusError, Result};
use crate::schema::{hash_schema, KeyStrategy, RecordType, SchemaCache, SchemaDefinition, SchemaMode};
use crate::substrate::{with_retry, Backend, MemoryBackend, SqliteBackend, Substrate};
use crate::validation;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

/// Page size used when find has to walk the whole namespace.
const FIND_PAGE: usize = 256;

/// The main entry point for CorpusDB.
/// Owns the substrate backend, the namespace registry, the compiled-schema
/// cache, and the change bus. Cheap to share behind an `Arc`; every
/// collection handle it produces is independently usable across threads.
pub struct Store {
    backend: Arc<dyn Backend>,
    bus: Arc<ChangeBus>,
    schemas: SchemaCache,
    collections: RwLock<HashMap<String, Arc<dyn Substrate>>>,
}

impl Store {
    /// Open a persistent store backed by SQLite at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::with_backend(Arc::new(SqliteBackend::open(path)?)))
    }

    /// Open an ephemeral in-memory store.
    pub fn in_memory() -> Self {
        Self::with_backend(Arc::new(MemoryBackend::new()))
    }

    /// Build a store over any substrate backend.
    pub fn with_backend(backend: Arc<dyn Backend>) -> Self {
        Store {
            backend,
            bus: Arc::new(ChangeBus::new()),
            schemas: SchemaCache::new(),
            collections: RwLock::new(HashMap::new()),
        }
    }

    /// Get a collection handle for a namespace, compiling the schema in the
    /// requested mode. First use lazily provisions the physical scope and
    /// records the namespace's schema in the registry.
    pub fn collection(
        &self,
        namespace: &str,
        schema: &SchemaDefinition,
        mode: SchemaMode,
    ) -> Result<Collection> {
        let record = self.schemas.compile(namespace, schema, mode)?;
        let substrate = self.namespace_substrate(namespace, schema)?;

        Ok(Collection {
            namespace: namespace.to_string(),
            substrate,
            record,
            bus: Arc::clone(&self.bus),
            key_strategy: KeyStrategy::default(),
        })
    }

    fn namespace_substrate(
        &self,
        namespace: &str,
        schema: &SchemaDefinition,
    ) -> Result<Arc<dyn Substrate>> {
        if let Ok(map) = self.collections.read() {
            if let Some(existing) = map.get(namespace) {
                return Ok(Arc::clone(existing));
            }
        }

        let substrate = self.backend.open_namespace(namespace)?;
        self.backend.record_namespace(
            namespace,
            &hash_schema(schema),
            &serde_json::to_string(schema)?,
        )?;

        let mut map = self
            .collections
            .write()
            .map_err(|_| CorpusError::Other("collection registry lock poisoned".into()))?;
        let entry = map
            .entry(namespace.to_string())
            .or_insert_with(|| Arc::clone(&substrate));
        Ok(Arc::clone(entry))
    }

    /// Subscribe to a namespace's change events. Only events published after
    /// this call are delivered.
    pub fn subscribe(&self, namespace: &str, subscriber_id: &str) -> Subscription {
        self.bus.subscribe(namespace, subscriber_id)
    }

    /// All namespaces the backend has recorded.
    pub fn namespaces(&self) -> Result<Vec<String>> {
        self.backend.namespaces()
    }

    /// Explicitly drop a namespace: data, registry entry, cached schemas.
    /// Live subscriptions on the namespace stay connected but go quiet.
    pub fn drop_namespace(&self, namespace: &str) -> Result<()> {
        if let Ok(mut map) = self.collections.write() {
            map.remove(namespace);
        }
        self.schemas.evict_namespace(namespace);
        self.backend.drop_namespace(namespace)
    }

    /// The change bus shared by all collections of this store.
    pub fn bus(&self) -> Arc<ChangeBus> {
        Arc::clone(&self.bus)
    }
}

/// A handle to one namespace with a compiled record type attached.
/// Clones share the same substrate scope and bus.
#[derive(Clone)]
pub struct Collection {
    namespace: String,
    substrate: Arc<dyn Substrate>,
    record: Arc<RecordType>,
    bus: Arc<ChangeBus>,
    key_strategy: KeyStrategy,
}

impl Collection {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn record_type(&self) -> &RecordType {
        &self.record
    }

    /// Change how keys are generated for documents inserted without one.
    pub fn with_key_strategy(mut self, strategy: KeyStrategy) -> Self {
        self.key_strategy = strategy;
        self
    }

    /// Put a document: validate, then create or merge-overwrite under its
    /// key. A `key` entry in the payload selects the key; otherwise one is
    /// generated. Emits a Put event with the stored snapshot.
    ///
    /// The read-merge-write sequence is not atomic across substrate calls;
    /// two concurrent puts to the same new key resolve last-write-wins.
    pub fn put(&self, mut fields: Map<String, Value>) -> Result<Document> {
        let key = match fields.remove("key") {
            Some(Value::String(k)) => k,
            Some(other) => {
                return Err(CorpusError::Validation(format!(
                    "Field 'key' expected string, got {other}"
                )))
            }
            None => self.generate_key(),
        };

        validation::validate(&self.record, &fields)?;
        let mut doc = Document::new(key, fields);
        let key_bytes = doc.key.as_bytes().to_vec();

        // Upsert with merge semantics: stored fields this write does not
        // supply survive the overwrite.
        if let Some(bytes) = with_retry("get", || self.substrate.get(&key_bytes))? {
            let stored = decode_document(&bytes)?;
            doc.fields = merge_fields(&stored.fields, &doc.fields);
        }

        let encoded = encode_document(&doc)?;
        with_retry("put", || self.substrate.put(&key_bytes, &encoded))?;

        self.bus
            .publish(ChangeEvent::put(&self.namespace, doc.clone()));
        Ok(doc)
    }

    /// Point lookup. Emits no event.
    pub fn get(&self, key: &str) -> Result<Document> {
        let bytes = with_retry("get", || self.substrate.get(key.as_bytes()))?.ok_or_else(|| {
            CorpusError::NotFound {
                namespace: self.namespace.clone(),
                key: key.to_string(),
            }
        })?;
        decode_document(&bytes)
    }

    /// Shallow-merge the supplied fields over an existing document.
    /// Unlike put, merging a nonexistent key is an error, never a create.
    pub fn merge(&self, key: &str, mut partial: Map<String, Value>) -> Result<Document> {
        partial.remove("key");
        validation::validate_merge(&self.record, &partial)?;

        let stored = self.get(key)?;
        let doc = Document::new(key, merge_fields(&stored.fields, &partial));

        let encoded = encode_document(&doc)?;
        with_retry("put", || self.substrate.put(key.as_bytes(), &encoded))?;

        self.bus
            .publish(ChangeEvent::merge(&self.namespace, doc.clone()));
        Ok(doc)
    }

    /// Delete a document. The event carries the key only, not the body.
    pub fn delete(&self, key: &str) -> Result<()> {
        let removed = with_retry("delete", || self.substrate.delete(key.as_bytes()))?;
        if !removed {
            return Err(CorpusError::NotFound {
                namespace: self.namespace.clone(),
                key: key.to_string(),
            });
        }

        self.bus.publish(ChangeEvent::delete(&self.namespace, key));
        Ok(())
    }

    /// Full scan in substrate order, paginated by offset/limit. Not a
    /// snapshot: concurrent writes may or may not be observed.
    pub fn scan(&self, limit: usize, offset: usize) -> Result<Vec<Document>> {
        let entries = with_retry("scan", || self.substrate.scan(limit, offset))?;
        let mut docs = Vec::with_capacity(entries.len());
        for (key, bytes) in &entries {
            match decode_document(bytes) {
                Ok(doc) => docs.push(doc),
                Err(e) => {
                    log::warn!(
                        "skipping undecodable document {} in '{}': {e}",
                        String::from_utf8_lossy(key),
                        self.namespace
                    );
                }
            }
        }
        Ok(docs)
    }

    /// Find documents where every supplied field equals the document's
    /// corresponding field. Conjunctive equality only; null predicate values
    /// are ignored and an empty predicate degrades to a scan.
    pub fn find(
        &self,
        limit: usize,
        offset: usize,
        predicate: &Map<String, Value>,
    ) -> Result<Vec<Document>> {
        let predicate: Map<String, Value> = predicate
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if predicate.is_empty() {
            return self.scan(limit, offset);
        }

        let mut matches = Vec::new();
        let mut skipped = 0;
        let mut scanned = 0;
        loop {
            let page = with_retry("scan", || self.substrate.scan(FIND_PAGE, scanned))?;
            if page.is_empty() {
                break;
            }
            scanned += page.len();

            for (_, bytes) in &page {
                let doc = match decode_document(bytes) {
                    Ok(doc) => doc,
                    Err(_) => continue,
                };
                if !matches_predicate(&doc, &predicate) {
                    continue;
                }
                if skipped < offset {
                    skipped += 1;
                } else if matches.len() < limit {
                    matches.push(doc);
                } else {
                    return Ok(matches);
                }
            }
        }
        Ok(matches)
    }

    /// Number of documents in the namespace.
    pub fn count(&self) -> Result<usize> {
        with_retry("count", || self.substrate.count())
    }

    /// Whether a document exists under the key.
    pub fn exists(&self, key: &str) -> Result<bool> {
        with_retry("exists", || self.substrate.exists(key.as_bytes()))
    }

    fn generate_key(&self) -> String {
        match self.key_strategy {
            KeyStrategy::Uuid => uuid::Uuid::new_v4().to_string(),
            KeyStrategy::Ulid => ulid::Ulid::new().to_string().to_lowercase(),
            KeyStrategy::Nanoid => nanoid::nanoid!(),
        }
    }
}

fn matches_predicate(doc: &Document, predicate: &Map<String, Value>) -> bool {
    predicate.iter().all(|(field, expected)| {
        if field == "key" {
            expected.as_str() == Some(doc.key.as_str())
        } else {
            doc.fields.get(field) == Some(expected)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::ChangeAction;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn dog_schema() -> SchemaDefinition {
        serde_json::from_value(serde_json::json!({
            "title": "Dog",
            "type": "object",
            "properties": {
                "name": { "type": "string" },
                "breed": { "type": "string" }
            }
        }))
        .unwrap()
    }

    fn fields(json: Value) -> Map<String, Value> {
        json.as_object().unwrap().clone()
    }

    fn setup() -> (Store, Collection) {
        let store = Store::in_memory();
        let dogs = store
            .collection("dogs", &dog_schema(), SchemaMode::Strict)
            .unwrap();
        (store, dogs)
    }

    #[test]
    fn test_put_then_get_round_trip() {
        let (_store, dogs) = setup();
        let doc = dogs
            .put(fields(serde_json::json!({ "name": "Fido", "breed": "Golden Retriever" })))
            .unwrap();

        assert!(!doc.key.is_empty());
        let fetched = dogs.get(&doc.key).unwrap();
        assert_eq!(fetched, doc);
    }

    #[test]
    fn test_put_honors_explicit_key() {
        let (_store, dogs) = setup();
        let doc = dogs
            .put(fields(serde_json::json!({ "key": "rex", "name": "Rex", "breed": "Mix" })))
            .unwrap();
        assert_eq!(doc.key, "rex");
        assert_eq!(dogs.get("rex").unwrap().fields["name"], "Rex");
    }

    #[test]
    fn test_put_rejects_non_string_key() {
        let (_store, dogs) = setup();
        let err = dogs
            .put(fields(serde_json::json!({ "key": 7, "name": "Rex", "breed": "Mix" })))
            .unwrap_err();
        assert!(matches!(err, CorpusError::Validation(_)));
    }

    #[test]
    fn test_put_is_upsert_with_merge() {
        // Partial mode so a later put can legally omit fields
        let store = Store::in_memory();
        let dogs = store
            .collection("dogs", &dog_schema(), SchemaMode::Partial)
            .unwrap();

        dogs.put(fields(serde_json::json!({ "key": "rex", "name": "Rex", "breed": "Mix" })))
            .unwrap();
        let merged = dogs
            .put(fields(serde_json::json!({ "key": "rex", "name": "Rexford" })))
            .unwrap();

        // Unsupplied stored field survives the second put
        assert_eq!(merged.fields["name"], "Rexford");
        assert_eq!(merged.fields["breed"], "Mix");
        assert_eq!(dogs.get("rex").unwrap(), merged);
    }

    #[test]
    fn test_put_validates_against_record_type() {
        let (_store, dogs) = setup();
        let err = dogs
            .put(fields(serde_json::json!({ "name": "Fido" })))
            .unwrap_err();
        assert!(matches!(err, CorpusError::Validation(_)));
        assert_eq!(dogs.count().unwrap(), 0);
    }

    #[test]
    fn test_merge_is_partial() {
        let (_store, dogs) = setup();
        dogs.put(fields(serde_json::json!({ "key": "rex", "name": "Rex", "breed": "Mix" })))
            .unwrap();

        let merged = dogs
            .merge("rex", fields(serde_json::json!({ "breed": "Border Collie" })))
            .unwrap();
        assert_eq!(merged.fields["name"], "Rex");
        assert_eq!(merged.fields["breed"], "Border Collie");
    }

    #[test]
    fn test_merge_missing_key_is_not_found() {
        let (_store, dogs) = setup();
        let err = dogs
            .merge("ghost", fields(serde_json::json!({ "name": "Boo" })))
            .unwrap_err();
        assert!(matches!(err, CorpusError::NotFound { .. }));
        // merge never creates
        assert!(!dogs.exists("ghost").unwrap());
    }

    #[test]
    fn test_delete_is_terminal() {
        let (_store, dogs) = setup();
        dogs.put(fields(serde_json::json!({ "key": "rex", "name": "Rex", "breed": "Mix" })))
            .unwrap();

        dogs.delete("rex").unwrap();
        assert!(!dogs.exists("rex").unwrap());
        assert!(matches!(dogs.get("rex"), Err(CorpusError::NotFound { .. })));
        assert!(matches!(dogs.delete("rex"), Err(CorpusError::NotFound { .. })));
    }

    #[test]
    fn test_find_is_conjunctive_equality() {
        let (_store, dogs) = setup();
        dogs.put(fields(serde_json::json!({ "name": "Fido", "breed": "Golden Retriever" })))
            .unwrap();
        dogs.put(fields(serde_json::json!({ "name": "Fido", "breed": "Poodle" })))
            .unwrap();
        dogs.put(fields(serde_json::json!({ "name": "Rex", "breed": "Golden Retriever" })))
            .unwrap();

        let both = dogs
            .find(
                10,
                0,
                &fields(serde_json::json!({ "name": "Fido", "breed": "Golden Retriever" })),
            )
            .unwrap();
        assert_eq!(both.len(), 1);
        assert_eq!(both[0].fields["breed"], "Golden Retriever");

        let fidos = dogs
            .find(10, 0, &fields(serde_json::json!({ "name": "Fido" })))
            .unwrap();
        assert_eq!(fidos.len(), 2);
    }

    #[test]
    fn test_find_empty_predicate_degrades_to_scan() {
        let (_store, dogs) = setup();
        for i in 0..3 {
            dogs.put(fields(
                serde_json::json!({ "name": format!("dog-{i}"), "breed": "Mix" }),
            ))
            .unwrap();
        }

        let found = dogs.find(10, 0, &Map::new()).unwrap();
        assert_eq!(found.len(), 3);

        // null values are ignored, so an all-null predicate is a scan too
        let found = dogs
            .find(10, 0, &fields(serde_json::json!({ "name": null })))
            .unwrap();
        assert_eq!(found.len(), 3);
    }

    #[test]
    fn test_find_paginates_filtered_sequence() {
        let (_store, dogs) = setup();
        for i in 0..5 {
            dogs.put(fields(
                serde_json::json!({ "key": format!("k{i}"), "name": "Fido", "breed": "Mix" }),
            ))
            .unwrap();
        }
        dogs.put(fields(serde_json::json!({ "name": "Rex", "breed": "Mix" })))
            .unwrap();

        let page = dogs
            .find(2, 1, &fields(serde_json::json!({ "name": "Fido" })))
            .unwrap();
        assert_eq!(page.len(), 2);
        assert!(page.iter().all(|d| d.fields["name"] == "Fido"));
    }

    #[test]
    fn test_scan_honors_limit_and_offset() {
        let (_store, dogs) = setup();
        for key in ["a", "b", "c", "d"] {
            dogs.put(fields(
                serde_json::json!({ "key": key, "name": key, "breed": "Mix" }),
            ))
            .unwrap();
        }

        let page = dogs.scan(2, 1).unwrap();
        let keys: Vec<_> = page.iter().map(|d| d.key.as_str()).collect();
        assert_eq!(keys, vec!["b", "c"]);
    }

    #[test]
    fn test_mutations_emit_events_in_order() {
        let (store, dogs) = setup();
        let sub = store.subscribe("dogs", "watcher");

        dogs.put(fields(serde_json::json!({ "key": "rex", "name": "Rex", "breed": "Mix" })))
            .unwrap();
        dogs.merge("rex", fields(serde_json::json!({ "breed": "Collie" })))
            .unwrap();
        dogs.delete("rex").unwrap();

        let events = sub.drain();
        let actions: Vec<_> = events.iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![ChangeAction::Put, ChangeAction::Merge, ChangeAction::Delete]
        );
        assert!(events[0].document.is_some());
        assert!(events[1].document.is_some());
        assert!(events[2].document.is_none());
        assert!(events.iter().all(|e| e.key == "rex"));
    }

    #[test]
    fn test_get_and_scan_emit_no_events() {
        let (store, dogs) = setup();
        dogs.put(fields(serde_json::json!({ "key": "rex", "name": "Rex", "breed": "Mix" })))
            .unwrap();

        let sub = store.subscribe("dogs", "watcher");
        dogs.get("rex").unwrap();
        dogs.scan(10, 0).unwrap();
        dogs.find(10, 0, &fields(serde_json::json!({ "name": "Rex" })))
            .unwrap();
        assert!(sub.drain().is_empty());
    }

    #[test]
    fn test_key_strategies() {
        let (_store, dogs) = setup();

        let uuid_doc = dogs
            .put(fields(serde_json::json!({ "name": "A", "breed": "Mix" })))
            .unwrap();
        assert_eq!(uuid_doc.key.len(), 36);

        let ulid_doc = dogs
            .clone()
            .with_key_strategy(KeyStrategy::Ulid)
            .put(fields(serde_json::json!({ "name": "B", "breed": "Mix" })))
            .unwrap();
        assert_eq!(ulid_doc.key.len(), 26);
        assert_eq!(ulid_doc.key, ulid_doc.key.to_lowercase());

        let nano_doc = dogs
            .clone()
            .with_key_strategy(KeyStrategy::Nanoid)
            .put(fields(serde_json::json!({ "name": "C", "breed": "Mix" })))
            .unwrap();
        assert_eq!(nano_doc.key.len(), 21);
    }

    #[test]
    fn test_concurrent_puts_resolve_last_write_wins() {
        // The exists/merge/put sequence is deliberately not atomic; two
        // racing puts to one new key must still leave a coherent document.
        let (_store, dogs) = setup();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let dogs = dogs.clone();
                std::thread::spawn(move || {
                    dogs.put(fields(serde_json::json!({
                        "key": "contested",
                        "name": format!("writer-{i}"),
                        "breed": format!("breed-{i}")
                    })))
                    .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let doc = dogs.get("contested").unwrap();
        let name = doc.fields["name"].as_str().unwrap();
        let suffix = name.strip_prefix("writer-").unwrap();
        assert_eq!(doc.fields["breed"].as_str().unwrap(), format!("breed-{suffix}"));
    }

    #[test]
    fn test_drop_namespace_removes_data_and_registry() {
        let (store, dogs) = setup();
        dogs.put(fields(serde_json::json!({ "key": "rex", "name": "Rex", "breed": "Mix" })))
            .unwrap();
        assert_eq!(store.namespaces().unwrap(), vec!["dogs"]);

        store.drop_namespace("dogs").unwrap();
        assert!(store.namespaces().unwrap().is_empty());

        let dogs = store
            .collection("dogs", &dog_schema(), SchemaMode::Strict)
            .unwrap();
        assert_eq!(dogs.count().unwrap(), 0);
    }

    #[test]
    fn test_sqlite_store_persists_across_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("corpus.db");

        {
            let store = Store::open(&path).unwrap();
            let dogs = store
                .collection("dogs", &dog_schema(), SchemaMode::Strict)
                .unwrap();
            dogs.put(fields(
                serde_json::json!({ "key": "rex", "name": "Rex", "breed": "Mix" }),
            ))
            .unwrap();
        }

        let store = Store::open(&path).unwrap();
        let dogs = store
            .collection("dogs", &dog_schema(), SchemaMode::Strict)
            .unwrap();
        assert_eq!(dogs.get("rex").unwrap().fields["name"], "Rex");
        assert_eq!(store.namespaces().unwrap(), vec!["dogs"]);
    }

    #[test]
    fn test_end_to_end_dog_scenario() {
        let (_store, dogs) = setup();

        let doc = dogs
            .put(fields(serde_json::json!({ "name": "Fido", "breed": "Golden Retriever" })))
            .unwrap();
        assert!(!doc.key.is_empty());

        let fetched = dogs.get(&doc.key).unwrap();
        assert_eq!(fetched.fields, doc.fields);

        let found = dogs
            .find(10, 0, &fields(serde_json::json!({ "name": "Fido" })))
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].key, doc.key);

        dogs.delete(&doc.key).unwrap();
        assert!(matches!(dogs.get(&doc.key), Err(CorpusError::NotFound { .. })));
    }
}
