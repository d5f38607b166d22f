use super::types::{
    EnumLiteral, FieldSpec, FieldType, PropertySchema, RecordType, SchemaDefinition, SchemaMode,
};
use crate::error::{CorpusError, Result};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Stable hash of a schema definition. Property maps are ordered, so the
/// serialized form is canonical for structurally-equal schemas.
pub fn hash_schema(schema: &SchemaDefinition) -> String {
    let canonical = serde_json::to_string(schema).unwrap_or_default();
    let digest = Sha256::digest(canonical.as_bytes());
    let mut out = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Compile a declarative schema into a RecordType descriptor.
/// Deterministic: identical schema text yields a structurally equal result.
pub fn compile(namespace: &str, schema: &SchemaDefinition, mode: SchemaMode) -> Result<RecordType> {
    if let Some(kind) = schema.schema_type.as_deref() {
        if kind != "object" {
            return Err(CorpusError::Schema(format!(
                "Top-level schema for '{namespace}' must be an object, got '{kind}'"
            )));
        }
    }
    if schema.properties.is_empty() {
        return Err(CorpusError::Schema(format!(
            "Schema for '{namespace}' declares no properties"
        )));
    }

    let name = schema.title.clone().unwrap_or_else(|| "Model".to_string());
    let mut fields = Vec::with_capacity(schema.properties.len());

    for (prop_name, prop) in &schema.properties {
        let compiled = compile_property(prop_name, prop)?;
        let (field_type, required) = match mode {
            SchemaMode::Strict => (compiled, true),
            SchemaMode::Partial => (FieldType::Optional(Box::new(compiled)), false),
        };
        fields.push(FieldSpec {
            name: prop_name.clone(),
            field_type,
            required,
        });
    }

    Ok(RecordType { name, fields })
}

/// Compile one property schema into a FieldType. `path` names the property
/// for error messages and grows dot-separated through nesting.
fn compile_property(path: &str, prop: &PropertySchema) -> Result<FieldType> {
    if let Some(literals) = &prop.enum_values {
        return compile_enum(path, literals);
    }

    match prop.property_type.as_deref() {
        Some("object") => {
            let properties = prop.properties.as_ref().ok_or_else(|| {
                CorpusError::Schema(format!("Property '{path}' is an object without properties"))
            })?;
            if properties.is_empty() {
                return Err(CorpusError::Schema(format!(
                    "Property '{path}' is an object without properties"
                )));
            }

            let name = prop.title.clone().unwrap_or_else(|| "Model".to_string());
            let mut fields = Vec::with_capacity(properties.len());
            for (sub_name, sub_prop) in properties {
                let sub_path = format!("{path}.{sub_name}");
                fields.push(FieldSpec {
                    name: sub_name.clone(),
                    field_type: compile_property(&sub_path, sub_prop)?,
                    // Nested records compile strict regardless of the outer mode
                    required: true,
                });
            }
            Ok(FieldType::Object(RecordType { name, fields }))
        }
        Some("array") => {
            let item_type = match &prop.items {
                Some(items) => compile_property(&format!("{path}[]"), items)?,
                None => FieldType::String,
            };
            Ok(FieldType::Array(Box::new(item_type)))
        }
        Some("integer") => Ok(FieldType::Integer),
        Some("number") => Ok(FieldType::Float),
        Some("boolean") => Ok(FieldType::Boolean),
        // "string", unknown, and unspecified all map to String
        _ => Ok(FieldType::String),
    }
}

/// A closed literal set compiles to Enum when all literals share one
/// primitive type; mixed sets are a schema error.
fn compile_enum(path: &str, literals: &[serde_json::Value]) -> Result<FieldType> {
    if literals.is_empty() {
        return Err(CorpusError::Schema(format!(
            "Property '{path}' declares an empty enum"
        )));
    }

    let mut values = Vec::with_capacity(literals.len());
    for literal in literals {
        let value = match literal {
            serde_json::Value::String(s) => EnumLiteral::String(s.clone()),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    EnumLiteral::Integer(i)
                } else {
                    EnumLiteral::Float(n.as_f64().unwrap_or_default())
                }
            }
            serde_json::Value::Bool(b) => EnumLiteral::Boolean(*b),
            other => {
                return Err(CorpusError::Schema(format!(
                    "Property '{path}' enum literal {other} is not a primitive"
                )));
            }
        };
        values.push(value);
    }

    let kind = values[0].kind();
    if values.iter().any(|v| v.kind() != kind) {
        return Err(CorpusError::Schema(format!(
            "Property '{path}' enum mixes literal types"
        )));
    }

    Ok(FieldType::Enum(values))
}

/// Process-wide cache of compiled record types, keyed by
/// (namespace, schema hash, mode). Read-mostly; first compilation of a new
/// shape takes the write lock.
pub struct SchemaCache {
    compiled: RwLock<HashMap<(String, String, SchemaMode), Arc<RecordType>>>,
}

impl SchemaCache {
    pub fn new() -> Self {
        SchemaCache {
            compiled: RwLock::new(HashMap::new()),
        }
    }

    /// Compile-or-reuse. Identical schema text always resolves to the same
    /// interned RecordType.
    pub fn compile(
        &self,
        namespace: &str,
        schema: &SchemaDefinition,
        mode: SchemaMode,
    ) -> Result<Arc<RecordType>> {
        let key = (namespace.to_string(), hash_schema(schema), mode);

        if let Ok(cache) = self.compiled.read() {
            if let Some(record) = cache.get(&key) {
                return Ok(Arc::clone(record));
            }
        }

        let record = Arc::new(compile(namespace, schema, mode)?);
        let mut cache = self
            .compiled
            .write()
            .map_err(|_| CorpusError::Other("schema cache lock poisoned".into()))?;
        // A concurrent compile of the same shape may have won the race;
        // keep whichever is already interned.
        let entry = cache.entry(key).or_insert_with(|| Arc::clone(&record));
        Ok(Arc::clone(entry))
    }

    /// Forget every compiled shape for a namespace (used on drop).
    pub fn evict_namespace(&self, namespace: &str) {
        if let Ok(mut cache) = self.compiled.write() {
            cache.retain(|(ns, _, _), _| ns != namespace);
        }
    }
}

impl Default for SchemaCache {
    fn default() -> Self {
        Self::new()
    }
}
