//! Collaborator capability traits, the plugin registry and built-ins.
//!
//! The engine core never talks to a concrete data source, logic runtime,
//! template syntax or output format. Each of those concerns is a closed
//! capability trait, selected by a type tag at configuration-resolution
//! time from a process-wide [`PluginRegistry`] built once at startup.
//!
//! Capability stages, in pipeline order:
//!
//! - [`DataFetcher`] - turns (parameter, fetcher spec, metadata) into data
//! - [`SourceParser`] - retrieves fragment metadata and generates the
//!   fragment context from (parameter, data, metadata)
//! - [`TemplateBackend`] - lists template inclusions, renders the merged
//!   context, provides fragment start markers
//! - [`PostProcessor`] - transforms rendered bytes (e.g. compilation)
//!
//! All stage methods that may block on I/O are async; those calls are the
//! engine's only suspension points.

pub mod fetchers;
pub mod parsers;
pub mod postprocess;
pub mod tera;

use std::path::Path;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use crate::core::error::DocforgeError;
use crate::core::{DocumentParameter, JsonMap, Metadata};

/// Fetches the data a fragment needs, according to a fetcher spec.
#[async_trait]
pub trait DataFetcher: Send + Sync {
    /// Fetch data for a document parameter.
    ///
    /// `spec` is the fetcher declaration from the metadata (commonly an
    /// object with at least a `type` tag); `metadata` is the resolved
    /// metadata of the requesting fragment or document.
    async fn fetch(
        &self,
        param: &DocumentParameter,
        spec: &Value,
        metadata: &Metadata,
    ) -> anyhow::Result<Value>;
}

/// Parses a fragment's source unit: metadata retrieval and context
/// generation.
#[async_trait]
pub trait SourceParser: Send + Sync {
    /// Extract fragment-level metadata from the source unit.
    ///
    /// Returned keys are merged over the document-level metadata (fixed
    /// engine keys excepted) before data fetching starts, so a source unit
    /// can declare its own fetchers.
    async fn retrieve_metadata(
        &self,
        param: &DocumentParameter,
        metadata: &Metadata,
    ) -> anyhow::Result<JsonMap>;

    /// Generate the fragment context from parameter, fetched data and
    /// resolved metadata.
    async fn generate_context(
        &self,
        param: &DocumentParameter,
        data: &Value,
        metadata: &Metadata,
    ) -> anyhow::Result<Value>;
}

/// One template slot of a render request.
#[derive(Debug, Clone)]
pub struct TemplateSlot {
    /// Template file name, as referenced by inclusion directives
    pub name: String,
    /// Whether the fragment is part of the generation closure.
    ///
    /// Inactive slots must render as empty: their inclusion directives are
    /// suppressed in the output, not merely skipped.
    pub active: bool,
}

/// Everything a template backend needs to render one document.
#[derive(Debug)]
pub struct RenderRequest<'a> {
    /// Directory holding the template files
    pub templates_dir: &'a Path,
    /// Root template file name
    pub main_template: &'a str,
    /// All templates of the fragment tree with their closure membership
    pub slots: &'a [TemplateSlot],
}

/// Template syntax backend: inclusion discovery and rendering.
#[async_trait]
pub trait TemplateBackend: Send + Sync {
    /// List the template names included by the given template text, in
    /// order of appearance.
    fn included_templates(&self, text: &str) -> Vec<String>;

    /// A marker string emitted at the start of a fragment, possibly empty.
    fn fragment_start_marker(&self, fragment_name: &str) -> String;

    /// Render the merged context into document bytes.
    async fn render(
        &self,
        param: &DocumentParameter,
        context: &Value,
        request: &RenderRequest<'_>,
    ) -> anyhow::Result<Vec<u8>>;
}

/// Transforms rendered document bytes (conversion, compilation, ...).
#[async_trait]
pub trait PostProcessor: Send + Sync {
    /// Post-process rendered bytes according to a post-processor spec.
    async fn postprocess(
        &self,
        param: &DocumentParameter,
        doc: Vec<u8>,
        spec: &Value,
        context: &Value,
    ) -> anyhow::Result<Vec<u8>>;
}

/// Extract the type tag of a collaborator spec.
///
/// A spec is either a bare string tag or an object carrying a `type` key.
pub fn type_tag(spec: &Value) -> Result<&str, DocforgeError> {
    match spec {
        Value::String(tag) => Ok(tag),
        Value::Object(map) => map
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| DocforgeError::config("Collaborator spec is missing a 'type' tag")),
        _ => Err(DocforgeError::config(format!(
            "Invalid collaborator spec: expected string or table, got {spec}"
        ))),
    }
}

/// Process-wide lookup table of collaborator implementations.
///
/// Built once at startup with the built-in implementations; additional
/// implementations can be registered by embedding applications before
/// generation starts. Lookups are snapshot at configuration-resolution
/// time - the registry is not a dynamic discovery mechanism.
pub struct PluginRegistry {
    fetchers: DashMap<String, Arc<dyn DataFetcher>>,
    parsers: DashMap<String, Arc<dyn SourceParser>>,
    parser_extensions: DashMap<String, String>,
    template_backends: DashMap<String, Arc<dyn TemplateBackend>>,
    postprocessors: DashMap<String, Arc<dyn PostProcessor>>,
}

impl PluginRegistry {
    /// Create an empty registry. Mostly useful in tests.
    pub fn new() -> Self {
        Self {
            fetchers: DashMap::new(),
            parsers: DashMap::new(),
            parser_extensions: DashMap::new(),
            template_backends: DashMap::new(),
            postprocessors: DashMap::new(),
        }
    }

    /// Create a registry with all built-in implementations registered.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register_fetcher("constant", Arc::new(fetchers::ConstantFetcher));
        registry.register_fetcher("json-file", Arc::new(fetchers::JsonFileFetcher));
        registry.register_parser("stub", Arc::new(parsers::StubParser));
        registry.register_parser("passthrough", Arc::new(parsers::PassthroughParser));
        registry.register_parser_extension("json", "passthrough");
        registry.register_template_backend("tera", Arc::new(tera::TeraBackend::new()));
        registry.register_postprocessor("command", Arc::new(postprocess::CommandPostProcessor));
        registry
    }

    /// The shared process-wide registry with built-ins.
    pub fn global() -> &'static Self {
        static REGISTRY: OnceLock<PluginRegistry> = OnceLock::new();
        REGISTRY.get_or_init(Self::with_builtins)
    }

    /// Register a data fetcher under a type tag.
    pub fn register_fetcher(&self, tag: impl Into<String>, fetcher: Arc<dyn DataFetcher>) {
        self.fetchers.insert(tag.into(), fetcher);
    }

    /// Register a source parser under a type tag.
    pub fn register_parser(&self, tag: impl Into<String>, parser: Arc<dyn SourceParser>) {
        self.parsers.insert(tag.into(), parser);
    }

    /// Map a source-unit file extension (without dot) to a parser tag.
    pub fn register_parser_extension(&self, extension: impl Into<String>, tag: impl Into<String>) {
        self.parser_extensions.insert(extension.into(), tag.into());
    }

    /// Register a template backend under a type tag.
    pub fn register_template_backend(
        &self,
        tag: impl Into<String>,
        backend: Arc<dyn TemplateBackend>,
    ) {
        self.template_backends.insert(tag.into(), backend);
    }

    /// Register a post-processor under a type tag.
    pub fn register_postprocessor(&self, tag: impl Into<String>, pp: Arc<dyn PostProcessor>) {
        self.postprocessors.insert(tag.into(), pp);
    }

    /// Look up a data fetcher by tag.
    pub fn fetcher(&self, tag: &str) -> Result<Arc<dyn DataFetcher>, DocforgeError> {
        self.fetchers
            .get(tag)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| DocforgeError::UnknownPlugin {
                capability: "data fetcher".to_string(),
                tag: tag.to_string(),
            })
    }

    /// Look up a source parser by tag.
    pub fn parser(&self, tag: &str) -> Result<Arc<dyn SourceParser>, DocforgeError> {
        self.parsers
            .get(tag)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| DocforgeError::UnknownPlugin {
                capability: "source parser".to_string(),
                tag: tag.to_string(),
            })
    }

    /// Look up the default source parser for a file extension.
    pub fn parser_for_extension(&self, extension: &str) -> Result<Arc<dyn SourceParser>, DocforgeError> {
        let tag = self
            .parser_extensions
            .get(extension)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| DocforgeError::UnknownPlugin {
                capability: "source parser (by extension)".to_string(),
                tag: format!(".{extension}"),
            })?;
        self.parser(&tag)
    }

    /// Look up a template backend by tag.
    pub fn template_backend(&self, tag: &str) -> Result<Arc<dyn TemplateBackend>, DocforgeError> {
        self.template_backends
            .get(tag)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| DocforgeError::UnknownPlugin {
                capability: "template backend".to_string(),
                tag: tag.to_string(),
            })
    }

    /// Look up a post-processor by tag.
    pub fn postprocessor(&self, tag: &str) -> Result<Arc<dyn PostProcessor>, DocforgeError> {
        self.postprocessors
            .get(tag)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| DocforgeError::UnknownPlugin {
                capability: "post-processor".to_string(),
                tag: tag.to_string(),
            })
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
