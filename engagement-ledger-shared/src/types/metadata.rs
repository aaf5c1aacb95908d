//! Correlation metadata attached to points entries and the idempotency key derived from it.
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::types::UserId;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("metadata must be a JSON object, got {0}")]
    NotAnObject(String),
}

/// Identifies which real-world event a points entry represents,
/// e.g. `{"canvasId": 42}` for "canvas 42 approved".
///
/// Keys are kept sorted so the serialized form is canonical: two metadata
/// values with the same key set and the same values always serialize to the
/// same string regardless of insertion order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, Value>);

impl Metadata {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Adds a field, replacing any previous value under the same key.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Builds metadata from a JSON object.
    pub fn from_json(value: Value) -> Result<Self, MetadataError> {
        match value {
            Value::Object(map) => Ok(Self(map.into_iter().collect())),
            other => Err(MetadataError::NotAnObject(other.to_string())),
        }
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.0.clone().into_iter().collect())
    }

    /// Compact JSON with sorted keys at every level.
    pub fn canonical(&self) -> String {
        let mut out = String::new();
        write_canonical(&self.to_json(), &mut out);
        out
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            out.push('{');
            for (i, (key, value)) in sorted.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(value, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Deterministic key for a (user, metadata) pair.
///
/// Hex SHA-256 of the user id and the canonical metadata, so it can back a
/// unique index in storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn derive(user_id: &UserId, metadata: &Metadata) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(user_id.as_hyphenated().to_string().as_bytes());
        hasher.update(b"\n");
        hasher.update(metadata.canonical().as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Wraps a key read back from storage.
    pub fn from_stored(key: String) -> Self {
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
