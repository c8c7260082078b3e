//! Table schema definitions

use std::fmt;
use std::sync::Arc;

use jsonschema::JSONSchema;
use serde_json::Value;

use crate::error::{Result, StoreError};
use crate::record::Record;

/// Structural validator compiled from a JSON Schema document
#[derive(Clone)]
pub struct SchemaValidator {
    document: Value,
    // None accepts everything
    compiled: Option<Arc<JSONSchema>>,
}

impl SchemaValidator {
    /// Compile a JSON Schema document. `name` is only used for error reporting.
    pub fn compile(name: &str, document: Value) -> Result<Self> {
        let compiled = JSONSchema::options()
            .compile(&document)
            .map_err(|e| StoreError::InvalidSchema {
                name: name.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            document,
            compiled: Some(Arc::new(compiled)),
        })
    }

    /// A validator that accepts every record
    pub fn accept_all() -> Self {
        Self {
            document: Value::Object(Default::default()),
            compiled: None,
        }
    }

    /// The JSON Schema document this validator was compiled from
    pub fn document(&self) -> &Value {
        &self.document
    }

    /// Check a record. The error is the validator's own message, one line per violation
    /// joined with `"; "`.
    pub fn validate(&self, record: &Record) -> std::result::Result<(), String> {
        let Some(compiled) = &self.compiled else {
            return Ok(());
        };
        let instance = record.to_json();
        let result = compiled.validate(&instance).map_err(|errors| {
            errors
                .map(|e| {
                    let path = e.instance_path.to_string();
                    if path.is_empty() {
                        e.to_string()
                    } else {
                        format!("{}: {}", path, e)
                    }
                })
                .collect::<Vec<_>>()
                .join("; ")
        });
        result
    }

    /// Whether the schema only admits numbers for `field`. A union that
    /// also allows strings does not count.
    pub fn is_numeric_field(&self, field: &str) -> bool {
        let declared = &self.document["properties"][field]["type"];
        match declared {
            Value::String(t) => is_numeric_type(t),
            Value::Array(types) => {
                !types.is_empty() && types.iter().all(|t| t.as_str().is_some_and(is_numeric_type))
            }
            _ => false,
        }
    }
}

fn is_numeric_type(t: &str) -> bool {
    t == "integer" || t == "number"
}

impl fmt::Debug for SchemaValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaValidator")
            .field("document", &self.document)
            .finish()
    }
}

/// A table: its name, the field holding the primary key and the record validator
#[derive(Debug, Clone)]
pub struct SchemaDefinition {
    name: String,
    primary_key: String,
    validator: SchemaValidator,
}

impl SchemaDefinition {
    pub fn new(name: impl Into<String>, primary_key: impl Into<String>, validator: SchemaValidator) -> Self {
        Self {
            name: name.into(),
            primary_key: primary_key.into(),
            validator,
        }
    }

    /// Create a definition from a JSON Schema document
    pub fn from_json_schema(
        name: impl Into<String>,
        primary_key: impl Into<String>,
        document: Value,
    ) -> Result<Self> {
        let name = name.into();
        let validator = SchemaValidator::compile(&name, document)?;
        Ok(Self::new(name, primary_key, validator))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    pub fn validator(&self) -> &SchemaValidator {
        &self.validator
    }

    /// Fully-qualified key of the record with primary key `pk`
    pub fn record_key(&self, pk: &str) -> String {
        record_key(&self.name, pk)
    }
}

/// `{table}:{pk}`
pub fn record_key(table: &str, pk: &str) -> String {
    format!("{}:{}", table, pk)
}
