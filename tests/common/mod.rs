//! Shared fixtures for the integration suite.
//!
//! Builds real specification directories in temp dirs and provides
//! instrumented collaborators (counting, failing, delaying) so tests can
//! observe exactly which collaborator calls the engine makes.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Value, json};

use docforge::backend::{DataFetcher, PluginRegistry, SourceParser};
use docforge::core::{DocumentParameter, JsonMap, Metadata};

/// Write a complete specification directory.
pub fn build_spec(
    dir: &Path,
    manifest: &str,
    templates: &[(&str, &str)],
    sources: &[(&str, &str)],
) {
    std::fs::create_dir_all(dir.join("templates")).unwrap();
    std::fs::create_dir_all(dir.join("src")).unwrap();
    std::fs::create_dir_all(dir.join("data")).unwrap();
    std::fs::write(dir.join("docforge.toml"), manifest).unwrap();
    for (name, content) in templates {
        std::fs::write(dir.join("templates").join(name), content).unwrap();
    }
    for (name, content) in sources {
        std::fs::write(dir.join("src").join(name), content).unwrap();
    }
}

/// The standard three-fragment fixture: `root → {summary, detail}`.
///
/// Both leaves use the instrumented `test` parser and a `test` fetcher;
/// the root template prints both contexts.
pub fn three_fragment_spec(dir: &Path) {
    build_spec(
        dir,
        r#"
doc_name = "report"
main_template = "root.txt"

[metadata]
source_parser = "test"
data_fetchers = { type = "test" }
"#,
        &[
            (
                "root.txt",
                "DOC {{ param.id }}\n{% include \"summary.txt\" %}\n{% include \"detail.txt\" %}\n",
            ),
            ("summary.txt", "S={{ data.root.summary.value }}"),
            ("detail.txt", "D={{ data.root.detail.value }}"),
        ],
        &[("summary.json", "{}"), ("detail.json", "{}")],
    );
}

/// A document parameter `{"id": <id>}`.
pub fn param(id: &str) -> DocumentParameter {
    let mut p = DocumentParameter::new();
    p.insert("id", json!(id));
    p
}

/// Instrumented parser: counts `generate_context` calls per fragment and
/// fails fragments listed in `failing` while their flag is set.
pub struct TestParser {
    pub generated: DashMap<String, usize>,
    pub failing: DashMap<String, Arc<AtomicBool>>,
    pub delay_ms: AtomicUsize,
}

impl TestParser {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            generated: DashMap::new(),
            failing: DashMap::new(),
            delay_ms: AtomicUsize::new(0),
        })
    }

    /// Mark a fragment (by name) as failing; returns the toggle so a test
    /// can "fix" it later.
    pub fn fail_fragment(&self, name: &str) -> Arc<AtomicBool> {
        let flag = Arc::new(AtomicBool::new(true));
        self.failing.insert(name.to_string(), Arc::clone(&flag));
        flag
    }

    pub fn generation_count(&self, name: &str) -> usize {
        self.generated.get(name).map(|e| *e.value()).unwrap_or(0)
    }

    fn fragment_name(metadata: &Metadata) -> String {
        metadata
            .get("fragment_name")
            .and_then(Value::as_str)
            .unwrap_or("?")
            .to_string()
    }
}

#[async_trait]
impl SourceParser for TestParser {
    async fn retrieve_metadata(
        &self,
        _param: &DocumentParameter,
        _metadata: &Metadata,
    ) -> anyhow::Result<JsonMap> {
        Ok(JsonMap::new())
    }

    async fn generate_context(
        &self,
        param: &DocumentParameter,
        data: &Value,
        metadata: &Metadata,
    ) -> anyhow::Result<Value> {
        let name = Self::fragment_name(metadata);

        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            // Pseudo-random per-fragment delay to shuffle completion order.
            let jitter = name.bytes().map(usize::from).sum::<usize>() % delay;
            tokio::time::sleep(Duration::from_millis((delay + jitter) as u64)).await;
        }

        if let Some(flag) = self.failing.get(&name)
            && flag.load(Ordering::SeqCst)
        {
            anyhow::bail!("instrumented failure in '{name}'")
        }

        *self.generated.entry(name.clone()).or_insert(0) += 1;
        Ok(json!({
            "value": format!("{name}:{}", param.get("id").and_then(Value::as_str).unwrap_or("-")),
            "rows": data,
        }))
    }
}

/// Instrumented fetcher: counts calls and serves a configurable value.
pub struct TestFetcher {
    pub calls: AtomicUsize,
    pub payload: DashMap<String, Value>,
    pub failing: AtomicBool,
}

impl TestFetcher {
    pub fn new() -> Arc<Self> {
        let fetcher = Self {
            calls: AtomicUsize::new(0),
            payload: DashMap::new(),
            failing: AtomicBool::new(false),
        };
        fetcher.payload.insert("default".to_string(), json!([1, 2]));
        Arc::new(fetcher)
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_payload(&self, value: Value) {
        self.payload.insert("default".to_string(), value);
    }
}

#[async_trait]
impl DataFetcher for TestFetcher {
    async fn fetch(
        &self,
        _param: &DocumentParameter,
        _spec: &Value,
        _metadata: &Metadata,
    ) -> anyhow::Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("instrumented fetch failure")
        }
        Ok(self
            .payload
            .get("default")
            .map(|e| e.value().clone())
            .unwrap_or(Value::Null))
    }
}

/// A registry with built-ins plus the instrumented collaborators.
pub fn test_registry() -> (Arc<PluginRegistry>, Arc<TestParser>, Arc<TestFetcher>) {
    let registry = Arc::new(PluginRegistry::with_builtins());
    let parser = TestParser::new();
    let fetcher = TestFetcher::new();
    registry.register_parser("test", Arc::clone(&parser) as Arc<dyn SourceParser>);
    registry.register_fetcher("test", Arc::clone(&fetcher) as Arc<dyn DataFetcher>);
    (registry, parser, fetcher)
}
