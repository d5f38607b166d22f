mod compiler;
mod types;

pub use compiler::{compile, hash_schema, SchemaCache};
pub use types::{
    EnumLiteral, FieldSpec, FieldType, KeyStrategy, PropertySchema, RecordType, SchemaDefinition,
    SchemaMode,
};
