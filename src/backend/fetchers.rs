//! Built-in data fetchers.
//!
//! Real deployments plug in their own fetchers (relational stores,
//! spreadsheets, HTTP services); the built-ins cover declarative constants
//! and static JSON files shipped inside the specification directory.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde_json::Value;

use crate::backend::DataFetcher;
use crate::core::{DocumentParameter, Metadata};

/// Returns a constant value declared inline in the fetcher spec.
///
/// Spec shape: `{ type = "constant", value = <any> }`.
pub struct ConstantFetcher;

#[async_trait]
impl DataFetcher for ConstantFetcher {
    async fn fetch(
        &self,
        _param: &DocumentParameter,
        spec: &Value,
        _metadata: &Metadata,
    ) -> Result<Value> {
        match spec.get("value") {
            Some(value) => Ok(value.clone()),
            None => bail!("constant fetcher spec has no 'value' key"),
        }
    }
}

/// Reads a JSON file from the specification's `data/` directory.
///
/// Spec shape: `{ type = "json-file", file = "table.json" }`. The data
/// directory is taken from the resolved metadata (`data_path`), so the
/// fetcher works for any document without knowing the spec layout.
pub struct JsonFileFetcher;

#[async_trait]
impl DataFetcher for JsonFileFetcher {
    async fn fetch(
        &self,
        _param: &DocumentParameter,
        spec: &Value,
        metadata: &Metadata,
    ) -> Result<Value> {
        let file = spec
            .get("file")
            .and_then(Value::as_str)
            .context("json-file fetcher spec has no 'file' key")?;
        let data_path = metadata
            .get("data_path")
            .and_then(Value::as_str)
            .context("resolved metadata has no 'data_path'")?;

        let path = std::path::Path::new(data_path).join(file);
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read data file: {}", path.display()))?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("Data file is not valid JSON: {}", path.display()))
    }
}
