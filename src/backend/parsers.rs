//! Built-in source parsers.
//!
//! A source parser is the logic-execution unit of a fragment: it turns
//! (parameter, data, metadata) into the fragment's rendering context.
//! Production deployments register parsers that execute real logic
//! runtimes; the built-ins cover presentational fragments and direct
//! data passthrough.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::backend::SourceParser;
use crate::core::{DocumentParameter, JsonMap, Metadata};

/// Produces an empty context. For fragments whose template needs no data.
pub struct StubParser;

#[async_trait]
impl SourceParser for StubParser {
    async fn retrieve_metadata(
        &self,
        _param: &DocumentParameter,
        _metadata: &Metadata,
    ) -> Result<JsonMap> {
        Ok(JsonMap::new())
    }

    async fn generate_context(
        &self,
        _param: &DocumentParameter,
        _data: &Value,
        _metadata: &Metadata,
    ) -> Result<Value> {
        Ok(Value::Object(JsonMap::new()))
    }
}

/// Passes fetched data straight through as `{"data": <fetched>}`.
///
/// Useful when the template iterates over the raw fetch result and no
/// transformation logic is needed. Fragment metadata embedded in a JSON
/// source unit (an object under a top-level `metadata` key) is surfaced by
/// `retrieve_metadata` so such fragments can declare their own fetchers.
pub struct PassthroughParser;

#[async_trait]
impl SourceParser for PassthroughParser {
    async fn retrieve_metadata(
        &self,
        _param: &DocumentParameter,
        metadata: &Metadata,
    ) -> Result<JsonMap> {
        // The source unit path is in the resolved metadata; a missing or
        // non-JSON unit simply contributes no fragment metadata.
        let Some(path) = metadata.get("fragment_source").and_then(Value::as_str) else {
            return Ok(JsonMap::new());
        };
        let Ok(bytes) = tokio::fs::read(path).await else {
            return Ok(JsonMap::new());
        };
        let parsed: Value = match serde_json::from_slice(&bytes) {
            Ok(value) => value,
            Err(_) => return Ok(JsonMap::new()),
        };
        match parsed.get("metadata") {
            Some(Value::Object(map)) => Ok(map.clone()),
            _ => Ok(JsonMap::new()),
        }
    }

    async fn generate_context(
        &self,
        _param: &DocumentParameter,
        data: &Value,
        _metadata: &Metadata,
    ) -> Result<Value> {
        let mut context = JsonMap::new();
        context.insert("data".to_string(), data.clone());
        Ok(Value::Object(context))
    }
}
