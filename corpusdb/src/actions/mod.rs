use crate::document::Document;
use crate::error::{CorpusError, Result};
use crate::schema::{SchemaDefinition, SchemaMode};
use crate::store::Store;
use crate::vector::{Embedder, SimilarityHit, VectorContent, VectorRecord};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

const DEFAULT_LIMIT: usize = 1000;
const DEFAULT_TOP_K: usize = 5;

/// The operations exposed to thin adapters (CLI here, HTTP elsewhere).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentAction {
    Put,
    Get,
    Merge,
    Delete,
    Find,
    Scan,
    Count,
    Exists,
}

impl DocumentAction {
    /// Which compilation mode an action's payload is validated under.
    /// Write-shaped payloads compile strict; key-only lookups partial.
    pub fn schema_mode(self) -> SchemaMode {
        match self {
            DocumentAction::Put | DocumentAction::Merge | DocumentAction::Find => SchemaMode::Strict,
            DocumentAction::Get
            | DocumentAction::Delete
            | DocumentAction::Scan
            | DocumentAction::Count
            | DocumentAction::Exists => SchemaMode::Partial,
        }
    }
}

/// One request against the document surface.
#[derive(Debug, Clone, Deserialize)]
pub struct ActionRequest {
    pub namespace: String,
    pub definition: SchemaDefinition,
    #[serde(default)]
    pub data: Option<Map<String, Value>>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

/// What an action returns, serialized flat for adapters.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ActionResponse {
    Document(Document),
    Documents(Vec<Document>),
    Count(usize),
    Exists(bool),
    Deleted { key: String },
}

/// Dispatch one document action against a store.
pub fn execute(store: &Store, action: DocumentAction, request: ActionRequest) -> Result<ActionResponse> {
    let collection = store.collection(
        &request.namespace,
        &request.definition,
        action.schema_mode(),
    )?;
    let limit = request.limit.unwrap_or(DEFAULT_LIMIT);
    let offset = request.offset.unwrap_or(0);

    match action {
        DocumentAction::Put => {
            let data = require_data(&request, "put")?;
            Ok(ActionResponse::Document(collection.put(data)?))
        }
        DocumentAction::Merge => {
            let key = require_key(&request, "merge")?;
            let data = require_data(&request, "merge")?;
            Ok(ActionResponse::Document(collection.merge(&key, data)?))
        }
        DocumentAction::Get => {
            let key = require_key(&request, "get")?;
            Ok(ActionResponse::Document(collection.get(&key)?))
        }
        DocumentAction::Delete => {
            let key = require_key(&request, "delete")?;
            collection.delete(&key)?;
            Ok(ActionResponse::Deleted { key })
        }
        DocumentAction::Find => {
            // find without a predicate degrades to a scan
            let predicate = request.data.unwrap_or_default();
            Ok(ActionResponse::Documents(
                collection.find(limit, offset, &predicate)?,
            ))
        }
        DocumentAction::Scan => Ok(ActionResponse::Documents(collection.scan(limit, offset)?)),
        DocumentAction::Count => Ok(ActionResponse::Count(collection.count()?)),
        DocumentAction::Exists => {
            let key = require_key(&request, "exists")?;
            Ok(ActionResponse::Exists(collection.exists(&key)?))
        }
    }
}

fn require_data(request: &ActionRequest, action: &str) -> Result<Map<String, Value>> {
    request
        .data
        .clone()
        .ok_or_else(|| CorpusError::Validation(format!("Action '{action}' requires data")))
}

fn require_key(request: &ActionRequest, action: &str) -> Result<String> {
    request
        .key
        .clone()
        .ok_or_else(|| CorpusError::Validation(format!("Action '{action}' requires a key")))
}

/// The operations exposed on the vector surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorAction {
    Upsert,
    Query,
}

/// One request against the vector surface.
#[derive(Debug, Clone, Deserialize)]
pub struct VectorRequest {
    pub namespace: String,
    pub content: VectorContent,
    #[serde(default)]
    pub top_k: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum VectorResponse {
    Records(Vec<VectorRecord>),
    Hits(Vec<SimilarityHit>),
}

/// Dispatch one vector action against a store.
pub fn execute_vector(
    store: &Store,
    embedder: Arc<dyn Embedder>,
    action: VectorAction,
    request: VectorRequest,
) -> Result<VectorResponse> {
    let vectors = store.vectors(&request.namespace, embedder)?;

    match action {
        VectorAction::Upsert => Ok(VectorResponse::Records(vectors.upsert(request.content)?)),
        VectorAction::Query => {
            let top_k = request.top_k.unwrap_or(DEFAULT_TOP_K);
            let query = match request.content {
                VectorContent::One(text) => text,
                VectorContent::Many(mut texts) => {
                    if texts.len() != 1 {
                        return Err(CorpusError::Validation(
                            "Query content must be a single sentence".into(),
                        ));
                    }
                    texts.remove(0)
                }
            };
            Ok(VectorResponse::Hits(vectors.query_text(&query, top_k)?))
        }
    }
}
