use crate::document::Document;
use crate::error::{CorpusError, Result};
use crate::schema::{PropertySchema, SchemaDefinition, SchemaMode};
use crate::store::{Collection, Store};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Page size used when loading a namespace's vectors for a query.
const LOAD_PAGE: usize = 256;

/// Text-to-vector provider. One embedding per input, all of equal length
/// within a call. Implementations wrap whatever model or API serves them;
/// the store only depends on this seam.
pub trait Embedder: Send + Sync {
    fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Content to embed: a single sentence or a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VectorContent {
    One(String),
    Many(Vec<String>),
}

impl VectorContent {
    pub fn into_inputs(self) -> Vec<String> {
        match self {
            VectorContent::One(s) => vec![s],
            VectorContent::Many(v) => v,
        }
    }
}

impl From<&str> for VectorContent {
    fn from(s: &str) -> Self {
        VectorContent::One(s.to_string())
    }
}

impl From<Vec<String>> for VectorContent {
    fn from(v: Vec<String>) -> Self {
        VectorContent::Many(v)
    }
}

/// A document holding one embedded sentence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub key: String,
    pub content: String,
    pub embedding: Vec<f32>,
    pub dim: usize,
}

impl VectorRecord {
    fn fields_for(content: &str, embedding: &[f32], dim: usize) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert("content".into(), Value::String(content.to_string()));
        fields.insert(
            "embedding".into(),
            Value::Array(embedding.iter().map(|f| Value::from(f64::from(*f))).collect()),
        );
        fields.insert("dim".into(), Value::from(dim));
        fields
    }

    fn from_document(doc: &Document) -> Result<VectorRecord> {
        let content = doc
            .fields
            .get("content")
            .and_then(Value::as_str)
            .ok_or_else(|| CorpusError::Other(format!("vector record '{}' has no content", doc.key)))?
            .to_string();
        let embedding: Vec<f32> = doc
            .fields
            .get("embedding")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                CorpusError::Other(format!("vector record '{}' has no embedding", doc.key))
            })?
            .iter()
            .map(|v| v.as_f64().unwrap_or_default() as f32)
            .collect();
        let dim = doc
            .fields
            .get("dim")
            .and_then(Value::as_u64)
            .unwrap_or(embedding.len() as u64) as usize;

        Ok(VectorRecord {
            key: doc.key.clone(),
            content,
            embedding,
            dim,
        })
    }
}

/// One ranked similarity result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityHit {
    pub key: String,
    pub score: f32,
    pub content: String,
}

/// The built-in record shape vector namespaces compile against.
fn vector_schema() -> SchemaDefinition {
    fn typed(name: &str) -> PropertySchema {
        PropertySchema {
            property_type: Some(name.to_string()),
            ..Default::default()
        }
    }

    let mut properties = BTreeMap::new();
    properties.insert("content".to_string(), typed("string"));
    properties.insert(
        "embedding".to_string(),
        PropertySchema {
            property_type: Some("array".to_string()),
            items: Some(Box::new(typed("number"))),
            ..Default::default()
        },
    );
    properties.insert("dim".to_string(), typed("integer"));

    SchemaDefinition {
        title: Some("VectorRecord".to_string()),
        schema_type: Some("object".to_string()),
        properties,
        ..Default::default()
    }
}

impl Store {
    /// Open a vector collection: a namespace whose documents carry embedded
    /// content, queryable by cosine similarity.
    pub fn vectors(&self, namespace: &str, embedder: Arc<dyn Embedder>) -> Result<VectorCollection> {
        let collection = self.collection(namespace, &vector_schema(), SchemaMode::Strict)?;
        Ok(VectorCollection {
            collection,
            embedder,
        })
    }
}

/// Collection specialization for embedded content and similarity search.
#[derive(Clone)]
pub struct VectorCollection {
    collection: Collection,
    embedder: Arc<dyn Embedder>,
}

impl VectorCollection {
    pub fn namespace(&self) -> &str {
        self.collection.namespace()
    }

    /// Document-level handle for the same namespace.
    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    /// Embed content and persist one VectorRecord per input sentence.
    /// The first stored record fixes the namespace dimension; a conflicting
    /// embedding length fails before anything is written.
    pub fn upsert(&self, content: impl Into<VectorContent>) -> Result<Vec<VectorRecord>> {
        let inputs = content.into().into_inputs();
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let embeddings = self.embedder.embed(&inputs)?;
        if embeddings.len() != inputs.len() {
            return Err(CorpusError::Embedding(format!(
                "embedder returned {} vectors for {} inputs",
                embeddings.len(),
                inputs.len()
            )));
        }

        let dim = embeddings[0].len();
        if dim == 0 {
            return Err(CorpusError::Embedding("embedder returned an empty vector".into()));
        }
        if let Some(unequal) = embeddings.iter().find(|e| e.len() != dim) {
            return Err(CorpusError::Embedding(format!(
                "embedding lengths differ within one call: {} vs {dim}",
                unequal.len()
            )));
        }
        if let Some(expected) = self.namespace_dim()? {
            if dim != expected {
                return Err(CorpusError::DimensionMismatch {
                    namespace: self.namespace().to_string(),
                    expected,
                    got: dim,
                });
            }
        }

        let mut records = Vec::with_capacity(inputs.len());
        for (text, embedding) in inputs.into_iter().zip(embeddings) {
            let fields = VectorRecord::fields_for(&text, &embedding, dim);
            let doc = self.collection.put(fields)?;
            records.push(VectorRecord::from_document(&doc)?);
        }
        Ok(records)
    }

    /// Rank the namespace's records against a query vector. Builds a fresh
    /// index over all stored vectors per call: O(N), fine for small
    /// namespaces, the documented bottleneck for large ones.
    pub fn query(&self, embedding: &[f32], top_k: usize) -> Result<Vec<SimilarityHit>> {
        let records = self.load_all()?;
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let expected = records[0].dim;
        if embedding.len() != expected {
            return Err(CorpusError::DimensionMismatch {
                namespace: self.namespace().to_string(),
                expected,
                got: embedding.len(),
            });
        }

        let index = SimilarityIndex::build(records);
        Ok(index.search(embedding, top_k))
    }

    /// Embed a query sentence, then rank against it.
    pub fn query_text(&self, content: &str, top_k: usize) -> Result<Vec<SimilarityHit>> {
        let mut embeddings = self.embedder.embed(&[content.to_string()])?;
        let embedding = embeddings
            .pop()
            .ok_or_else(|| CorpusError::Embedding("empty embedding response".into()))?;
        self.query(&embedding, top_k)
    }

    /// The namespace's fixed dimension, if any record has been stored.
    pub fn namespace_dim(&self) -> Result<Option<usize>> {
        let first = self.collection.scan(1, 0)?;
        match first.first() {
            Some(doc) => Ok(Some(VectorRecord::from_document(doc)?.dim)),
            None => Ok(None),
        }
    }

    fn load_all(&self) -> Result<Vec<VectorRecord>> {
        let mut records = Vec::new();
        let mut offset = 0;
        loop {
            let page = self.collection.scan(LOAD_PAGE, offset)?;
            if page.is_empty() {
                break;
            }
            offset += page.len();
            for doc in &page {
                records.push(VectorRecord::from_document(doc)?);
            }
        }
        Ok(records)
    }
}

/// Transient nearest-neighbor structure over one namespace's embeddings.
/// Built per query, never persisted or incrementally maintained.
pub struct SimilarityIndex {
    entries: Vec<VectorRecord>,
}

impl SimilarityIndex {
    pub fn build(records: Vec<VectorRecord>) -> Self {
        SimilarityIndex { entries: records }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Top-k by descending cosine similarity, key ascending on ties so
    /// identical queries return identical rankings.
    pub fn search(&self, query: &[f32], top_k: usize) -> Vec<SimilarityHit> {
        let mut hits: Vec<SimilarityHit> = self
            .entries
            .iter()
            .map(|record| SimilarityHit {
                key: record.key.clone(),
                score: cosine_similarity(query, &record.embedding),
                content: record.content.clone(),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.key.cmp(&b.key))
        });
        hits.truncate(top_k.min(self.entries.len()));
        hits
    }
}

/// Cosine similarity: dot(a,b) / (||a|| * ||b||).
/// Returns 0.0 when either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Deterministic test embedder: a fixed lookup table.
    struct TableEmbedder {
        table: HashMap<String, Vec<f32>>,
    }

    impl TableEmbedder {
        fn new(entries: &[(&str, &[f32])]) -> Arc<Self> {
            Arc::new(TableEmbedder {
                table: entries
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_vec()))
                    .collect(),
            })
        }
    }

    impl Embedder for TableEmbedder {
        fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
            inputs
                .iter()
                .map(|text| {
                    self.table
                        .get(text)
                        .cloned()
                        .ok_or_else(|| CorpusError::Embedding(format!("unknown text '{text}'")))
                })
                .collect()
        }
    }

    struct FailingEmbedder;

    impl Embedder for FailingEmbedder {
        fn embed(&self, _inputs: &[String]) -> Result<Vec<Vec<f32>>> {
            Err(CorpusError::Embedding("model unavailable".into()))
        }
    }

    fn sample_embedder() -> Arc<TableEmbedder> {
        TableEmbedder::new(&[
            ("east", &[1.0, 0.0]),
            ("north", &[0.0, 1.0]),
            ("northeast", &[0.7, 0.7]),
            ("west", &[-1.0, 0.0]),
        ])
    }

    #[test]
    fn test_upsert_stores_one_record_per_input() {
        let store = Store::in_memory();
        let vectors = store.vectors("senses", sample_embedder()).unwrap();

        let records = vectors
            .upsert(vec!["east".to_string(), "north".to_string()])
            .unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.dim == 2));
        assert!(records.iter().all(|r| !r.key.is_empty()));
        assert_eq!(vectors.collection().count().unwrap(), 2);
        assert_eq!(vectors.namespace_dim().unwrap(), Some(2));
    }

    #[test]
    fn test_upsert_rejects_conflicting_dimension() {
        let store = Store::in_memory();
        let vectors = store.vectors("senses", sample_embedder()).unwrap();
        vectors.upsert("east").unwrap();

        let wide = store
            .vectors(
                "senses",
                TableEmbedder::new(&[("up", &[0.0, 0.0, 1.0])]),
            )
            .unwrap();
        let err = wide.upsert("up").unwrap_err();
        assert!(matches!(
            err,
            CorpusError::DimensionMismatch {
                expected: 2,
                got: 3,
                ..
            }
        ));
        // nothing was written
        assert_eq!(vectors.collection().count().unwrap(), 1);
    }

    #[test]
    fn test_failed_embed_writes_nothing() {
        let store = Store::in_memory();
        let vectors = store.vectors("senses", Arc::new(FailingEmbedder)).unwrap();
        assert!(vectors.upsert("anything").is_err());
        assert_eq!(vectors.collection().count().unwrap(), 0);
    }

    #[test]
    fn test_query_on_empty_namespace_returns_empty() {
        let store = Store::in_memory();
        let vectors = store.vectors("senses", sample_embedder()).unwrap();
        let hits = vectors.query(&[1.0, 0.0], 5).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_query_ranks_by_descending_similarity() {
        let store = Store::in_memory();
        let vectors = store.vectors("senses", sample_embedder()).unwrap();
        vectors
            .upsert(vec![
                "east".to_string(),
                "north".to_string(),
                "northeast".to_string(),
                "west".to_string(),
            ])
            .unwrap();

        let hits = vectors.query_text("east", 10).unwrap();
        assert_eq!(hits.len(), 4);
        let contents: Vec<_> = hits.iter().map(|h| h.content.as_str()).collect();
        assert_eq!(contents, vec!["east", "northeast", "north", "west"]);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn test_query_caps_top_k_at_record_count() {
        let store = Store::in_memory();
        let vectors = store.vectors("senses", sample_embedder()).unwrap();
        vectors.upsert("east").unwrap();
        vectors.upsert("north").unwrap();

        let hits = vectors.query(&[1.0, 0.0], 50).unwrap();
        assert_eq!(hits.len(), 2);

        let hits = vectors.query(&[1.0, 0.0], 1).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "east");
    }

    #[test]
    fn test_query_rejects_wrong_dimension() {
        let store = Store::in_memory();
        let vectors = store.vectors("senses", sample_embedder()).unwrap();
        vectors.upsert("east").unwrap();

        let err = vectors.query(&[1.0, 0.0, 0.0], 5).unwrap_err();
        assert!(matches!(err, CorpusError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_cosine_similarity_edges() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_search_breaks_score_ties_by_key() {
        let records = vec![
            VectorRecord {
                key: "b".into(),
                content: "b".into(),
                embedding: vec![1.0, 0.0],
                dim: 2,
            },
            VectorRecord {
                key: "a".into(),
                content: "a".into(),
                embedding: vec![1.0, 0.0],
                dim: 2,
            },
        ];
        let index = SimilarityIndex::build(records);
        let hits = index.search(&[1.0, 0.0], 2);
        assert_eq!(hits[0].key, "a");
        assert_eq!(hits[1].key, "b");
    }

    #[test]
    fn test_upsert_emits_put_events() {
        let store = Store::in_memory();
        let vectors = store.vectors("senses", sample_embedder()).unwrap();
        let sub = store.subscribe("senses", "watcher");

        vectors
            .upsert(vec!["east".to_string(), "north".to_string()])
            .unwrap();
        assert_eq!(sub.drain().len(), 2);
    }
}
