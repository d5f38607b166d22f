use crate::error::{CorpusError, Result};
use crate::schema::{FieldType, RecordType};
use serde_json::{Map, Value};

/// Result of validating a document's fields against a record type.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Validate a full document payload: required fields present, declared
/// types respected, no undeclared fields.
pub fn validate_document(record: &RecordType, fields: &Map<String, Value>) -> ValidationResult {
    let mut result = ValidationResult { errors: Vec::new() };

    for spec in &record.fields {
        let value = fields.get(&spec.name);

        match value {
            None | Some(Value::Null) => {
                if spec.required && !matches!(spec.field_type, FieldType::Optional(_)) {
                    result
                        .errors
                        .push(format!("Required field '{}' is missing", spec.name));
                }
            }
            Some(val) => validate_field_value(&spec.name, &spec.field_type, val, &mut result),
        }
    }

    for key in fields.keys() {
        if record.field(key).is_none() {
            result
                .errors
                .push(format!("Unexpected field '{key}' not declared in '{}'", record.name));
        }
    }

    result
}

/// Validate only the fields present in a partial payload. Missing fields are
/// fine; supplied values must still match their declared types.
pub fn validate_partial(record: &RecordType, fields: &Map<String, Value>) -> ValidationResult {
    let mut result = ValidationResult { errors: Vec::new() };

    for (key, value) in fields {
        match record.field(key) {
            Some(spec) => {
                if !value.is_null() {
                    validate_field_value(&spec.name, &spec.field_type, value, &mut result);
                }
            }
            None => result
                .errors
                .push(format!("Unexpected field '{key}' not declared in '{}'", record.name)),
        }
    }

    result
}

fn validate_field_value(path: &str, field_type: &FieldType, value: &Value, result: &mut ValidationResult) {
    match field_type {
        FieldType::String => {
            if !value.is_string() {
                result
                    .errors
                    .push(format!("Field '{path}' expected string, got {}", type_name(value)));
            }
        }
        FieldType::Integer => {
            if !value.is_i64() && !value.is_u64() {
                result
                    .errors
                    .push(format!("Field '{path}' expected integer, got {}", type_name(value)));
            }
        }
        FieldType::Float => {
            if !value.is_number() {
                result
                    .errors
                    .push(format!("Field '{path}' expected number, got {}", type_name(value)));
            }
        }
        FieldType::Boolean => {
            if !value.is_boolean() {
                result
                    .errors
                    .push(format!("Field '{path}' expected boolean, got {}", type_name(value)));
            }
        }
        FieldType::Enum(literals) => {
            if !literals.iter().any(|l| l.matches(value)) {
                result.errors.push(format!(
                    "Field '{path}' value {value} is not in the enum set"
                ));
            }
        }
        FieldType::Object(nested) => match value.as_object() {
            Some(obj) => {
                let nested_result = validate_document(nested, obj);
                for error in nested_result.errors {
                    result.errors.push(format!("{path}: {error}"));
                }
            }
            None => result
                .errors
                .push(format!("Field '{path}' expected object, got {}", type_name(value))),
        },
        FieldType::Array(item_type) => match value.as_array() {
            Some(items) => {
                for (i, item) in items.iter().enumerate() {
                    validate_field_value(&format!("{path}[{i}]"), item_type, item, result);
                }
            }
            None => result
                .errors
                .push(format!("Field '{path}' expected array, got {}", type_name(value))),
        },
        FieldType::Optional(inner) => {
            if !value.is_null() {
                validate_field_value(path, inner, value, result);
            }
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Validate a full payload, turning failures into a typed error.
pub fn validate(record: &RecordType, fields: &Map<String, Value>) -> Result<()> {
    let result = validate_document(record, fields);
    if !result.is_ok() {
        return Err(CorpusError::Validation(format!(
            "Document validation failed:\n  - {}",
            result.errors.join("\n  - ")
        )));
    }
    Ok(())
}

/// Validate a partial payload, turning failures into a typed error.
pub fn validate_merge(record: &RecordType, fields: &Map<String, Value>) -> Result<()> {
    let result = validate_partial(record, fields);
    if !result.is_ok() {
        return Err(CorpusError::Validation(format!(
            "Partial validation failed:\n  - {}",
            result.errors.join("\n  - ")
        )));
    }
    Ok(())
}
