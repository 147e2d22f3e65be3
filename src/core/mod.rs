//! Core types shared across the engine.
//!
//! This module defines the document parameter record, the type-erased
//! metadata mapping and the error/report types consumed by every pipeline
//! stage.

pub mod error;
pub mod report;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Type-erased key/value mapping used for contexts and resolved metadata.
///
/// `serde_json::Map` keeps its keys sorted, which makes every serialization
/// of the same logical record canonical - a property the fingerprint store
/// relies on.
pub type JsonMap = serde_json::Map<String, Value>;

/// Resolved metadata record for one fragment or one document.
pub type Metadata = JsonMap;

/// The caller-supplied record identifying which document instance to build.
///
/// A parameter is immutable once generation starts (parameter augmentation
/// is a sequential pre-stage that produces a new, augmented parameter
/// before any fragment task is scheduled). Its values also derive the
/// per-document file suffix used to address cache and output artifacts.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentParameter(JsonMap);

impl DocumentParameter {
    /// Create an empty parameter record.
    pub fn new() -> Self {
        Self(JsonMap::new())
    }

    /// Wrap an existing mapping.
    pub const fn from_map(map: JsonMap) -> Self {
        Self(map)
    }

    /// Borrow the underlying mapping.
    pub const fn as_map(&self) -> &JsonMap {
        &self.0
    }

    /// Look up a single key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Insert or replace a key. Used only by the augmentation pre-stage.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    /// Whether the record carries no keys.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The parameter as a JSON value, for hashing and debug records.
    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    /// Derive the unique file suffix for this parameter.
    ///
    /// Values are joined with `-` in key order; `: ` sequences are replaced
    /// with `=` so the suffix stays usable in file names. An empty
    /// parameter maps to `default` (whole-spec singleton documents).
    pub fn suffix(&self) -> String {
        if self.0.is_empty() {
            return "default".to_string();
        }
        let joined = self
            .0
            .values()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join("-");
        joined.replace(": ", "=")
    }
}

impl From<JsonMap> for DocumentParameter {
    fn from(map: JsonMap) -> Self {
        Self(map)
    }
}
