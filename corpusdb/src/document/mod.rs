// Document encoding - canonical JSON bytes crossing the substrate boundary

use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A stored record: unique key within its namespace plus schema-validated
/// fields. On the wire the fields sit beside the key in one flat object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub key: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Document {
    pub fn new(key: impl Into<String>, fields: Map<String, Value>) -> Self {
        Document {
            key: key.into(),
            fields,
        }
    }
}

/// Serialize a document for storage.
pub fn encode_document(doc: &Document) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(doc)?)
}

/// Deserialize a document read back from the substrate.
pub fn decode_document(bytes: &[u8]) -> Result<Document> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Shallow merge: `overlay` wins per field, everything else in `base`
/// survives. Null overlay values leave the base field unchanged.
pub fn merge_fields(base: &Map<String, Value>, overlay: &Map<String, Value>) -> Map<String, Value> {
    let mut merged = base.clone();
    for (key, value) in overlay {
        if !value.is_null() {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn fields(json: Value) -> Map<String, Value> {
        json.as_object().unwrap().clone()
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let doc = Document::new(
            "k-1",
            fields(serde_json::json!({ "name": "Fido", "age": 4 })),
        );
        let bytes = encode_document(&doc).unwrap();
        assert_eq!(decode_document(&bytes).unwrap(), doc);
    }

    #[test]
    fn test_wire_format_is_flat() {
        let doc = Document::new("k-1", fields(serde_json::json!({ "name": "Fido" })));
        let value: Value = serde_json::from_slice(&encode_document(&doc).unwrap()).unwrap();
        assert_eq!(value["key"], "k-1");
        assert_eq!(value["name"], "Fido");
    }

    #[test]
    fn test_merge_overlay_wins() {
        let base = fields(serde_json::json!({ "a": 1, "b": 2 }));
        let overlay = fields(serde_json::json!({ "b": 3 }));
        assert_eq!(
            merge_fields(&base, &overlay),
            fields(serde_json::json!({ "a": 1, "b": 3 }))
        );
    }

    #[test]
    fn test_merge_skips_nulls() {
        let base = fields(serde_json::json!({ "a": 1, "b": 2 }));
        let overlay = fields(serde_json::json!({ "b": null, "c": 4 }));
        assert_eq!(
            merge_fields(&base, &overlay),
            fields(serde_json::json!({ "a": 1, "b": 2, "c": 4 }))
        );
    }
}
