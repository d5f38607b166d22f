use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Top-level declarative schema supplied by callers, a JSON-Schema subset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "type", default)]
    pub schema_type: Option<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertySchema>,
}

/// A single property inside a schema. Recursive: objects carry their own
/// properties, arrays carry an item schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertySchema {
    #[serde(rename = "type", default)]
    pub property_type: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "enum", default)]
    pub enum_values: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub properties: Option<BTreeMap<String, PropertySchema>>,
    #[serde(default)]
    pub items: Option<Box<PropertySchema>>,
}

/// Compilation mode for a schema. The same schema compiles differently
/// depending on the requested mode; callers pick it explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaMode {
    /// Every declared property is required (put/merge/find payloads).
    Strict,
    /// Every declared property is optional (key-only lookups).
    Partial,
}

/// Compiled record shape: the canonical descriptor used for validation
/// and (de)serialization. Never mutated after compilation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordType {
    pub name: String,
    pub fields: Vec<FieldSpec>,
}

impl RecordType {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// One field of a compiled record type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub field_type: FieldType,
    pub required: bool,
}

/// Field type enumeration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Integer,
    Float,
    Boolean,
    Object(RecordType),
    Array(Box<FieldType>),
    Enum(Vec<EnumLiteral>),
    Optional(Box<FieldType>),
}

/// A literal value inside a closed enum set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnumLiteral {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
}

impl EnumLiteral {
    /// Discriminant used for the homogeneity check.
    pub fn kind(&self) -> &'static str {
        match self {
            EnumLiteral::String(_) => "string",
            EnumLiteral::Integer(_) => "integer",
            EnumLiteral::Float(_) => "number",
            EnumLiteral::Boolean(_) => "boolean",
        }
    }

    /// Whether a document value matches this literal.
    pub fn matches(&self, value: &serde_json::Value) -> bool {
        match self {
            EnumLiteral::String(s) => value.as_str() == Some(s.as_str()),
            EnumLiteral::Integer(i) => value.as_i64() == Some(*i),
            EnumLiteral::Float(f) => value.as_f64() == Some(*f),
            EnumLiteral::Boolean(b) => value.as_bool() == Some(*b),
        }
    }
}

/// Key generation strategy for documents inserted without an explicit key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStrategy {
    Uuid,
    Ulid,
    Nanoid,
}

impl Default for KeyStrategy {
    fn default() -> Self {
        KeyStrategy::Uuid
    }
}
