//! Records and their hash encoding

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, StoreError};

/// Hash field listing, as a JSON array, the fields of a record that hold
/// numbers. Records may not use this name themselves.
pub const NUMERIC_FIELDS: &str = ":numeric";

/// A single field value. Records are flat, so only text and numbers are allowed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(serde_json::Number),
    Text(String),
}

impl FieldValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            FieldValue::Number(_) => None,
        }
    }

    pub fn as_number(&self) -> Option<&serde_json::Number> {
        match self {
            FieldValue::Number(n) => Some(n),
            FieldValue::Text(_) => None,
        }
    }

    fn to_json(&self) -> Value {
        match self {
            FieldValue::Number(n) => Value::Number(n.clone()),
            FieldValue::Text(s) => Value::String(s.clone()),
        }
    }
}

/// Text form written to the store
impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Number(n) => write!(f, "{}", n),
            FieldValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        FieldValue::Number(n.into())
    }
}

impl From<u64> for FieldValue {
    fn from(n: u64) -> Self {
        FieldValue::Number(n.into())
    }
}

/// A flat mapping from field name to value, stored as one hash.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(BTreeMap<String, FieldValue>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.0.get(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Option<FieldValue> {
        self.0.insert(field.into(), value.into())
    }

    pub fn contains_field(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.0.iter()
    }

    /// Overlay `other` on top of this record. Fields in `other` win.
    pub fn merge(&mut self, other: &Record) {
        for (field, value) in &other.0 {
            self.0.insert(field.clone(), value.clone());
        }
    }

    /// Build a record from a JSON object, rejecting anything that is not flat.
    pub fn from_json(value: Value) -> Result<Self> {
        let map = match value {
            Value::Object(map) => map,
            other => {
                return Err(StoreError::validation(format!(
                    "record must be a JSON object, got {}",
                    json_kind(&other)
                )))
            }
        };

        let mut fields = BTreeMap::new();
        for (field, value) in map {
            let value = match value {
                Value::String(s) => FieldValue::Text(s),
                Value::Number(n) => FieldValue::Number(n),
                other => {
                    return Err(StoreError::validation(format!(
                        "field '{}' must be a string or a number, got {}",
                        field,
                        json_kind(&other)
                    )))
                }
            };
            fields.insert(field, value);
        }

        let record = Self(fields);
        record.check_field_names()?;
        Ok(record)
    }

    /// Reject records using the reserved [`NUMERIC_FIELDS`] name
    pub fn check_field_names(&self) -> Result<()> {
        if self.0.contains_key(NUMERIC_FIELDS) {
            return Err(StoreError::validation(format!(
                "field name '{}' is reserved",
                NUMERIC_FIELDS
            )));
        }
        Ok(())
    }

    pub fn to_json(&self) -> Value {
        Value::Object(
            self.0
                .iter()
                .map(|(field, value)| (field.clone(), value.to_json()))
                .collect(),
        )
    }

    /// Field/value pairs in the text form the store keeps. Records holding
    /// numbers also get a [`NUMERIC_FIELDS`] entry naming those fields.
    pub fn to_hash_fields(&self) -> Vec<(String, String)> {
        let mut fields: Vec<(String, String)> = self
            .0
            .iter()
            .map(|(field, value)| (field.clone(), value.to_string()))
            .collect();

        let numeric: Vec<&str> = self
            .0
            .iter()
            .filter(|(_, value)| value.as_number().is_some())
            .map(|(field, _)| field.as_str())
            .collect();
        if !numeric.is_empty() {
            fields.push((NUMERIC_FIELDS.to_string(), Value::from(numeric).to_string()));
        }
        fields
    }

    /// Rebuild a record from stored hash fields.
    ///
    /// A [`NUMERIC_FIELDS`] entry decides which fields are numbers. Hashes
    /// without one fall back to `is_numeric`. Either way a field only becomes
    /// a number when its text parses as one.
    pub fn from_hash_fields<F>(mut fields: Vec<(String, String)>, is_numeric: F) -> Self
    where
        F: Fn(&str) -> bool,
    {
        let marker = fields.iter().position(|(field, _)| field == NUMERIC_FIELDS);
        let numeric: Option<Vec<String>> = marker
            .map(|i| fields.swap_remove(i).1)
            .and_then(|text| serde_json::from_str(&text).ok());

        let fields = fields
            .into_iter()
            .map(|(field, text)| {
                let number = match &numeric {
                    Some(names) => names.contains(&field),
                    None => is_numeric(&field),
                };
                let value = if number {
                    match serde_json::from_str::<serde_json::Number>(&text) {
                        Ok(n) => FieldValue::Number(n),
                        Err(_) => FieldValue::Text(text),
                    }
                } else {
                    FieldValue::Text(text)
                };
                (field, value)
            })
            .collect();
        Self(fields)
    }
}

impl<K, V> FromIterator<(K, V)> for Record
where
    K: Into<String>,
    V: Into<FieldValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
