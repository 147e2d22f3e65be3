//! Per-fragment execution.
//!
//! The executor is the unit of work the scheduler parallelizes: given one
//! fragment, the document parameter and the fragment's resolved metadata,
//! it runs metadata retrieval, the fingerprint check, data fetching and
//! context generation, persists the cache artifacts and converts any
//! collaborator failure into a [`FragmentOutcome`] error that never aborts
//! sibling fragments.
//!
//! Within one fragment the order is fixed: fetch precedes context
//! generation, which precedes the cache write. Fragments never read each
//! other's in-progress contexts - shared derived data must arrive through
//! parameter augmentation, a sequential pre-stage owned by the scheduler.

use std::sync::Arc;

use anyhow::{Context as _, anyhow};
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::backend::{PluginRegistry, SourceParser, type_tag};
use crate::core::error::DocforgeError;
use crate::core::report::{FragmentFailure, FragmentOutcome};
use crate::core::{DocumentParameter, JsonMap, Metadata};
use crate::debug::{DebugRecord, DebugRecorder};
use crate::fingerprint::{
    CacheDecision, Fingerprint, FingerprintStore, digest_bytes, digest_value,
};
use crate::metadata::merge_fragment_layer;
use crate::tree::Fragment;

/// How the data digest participates in cache validity checks.
///
/// The two policies trade fetch cost against staleness detection; the
/// choice is deliberate and surfaced to callers rather than hidden.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataDigestPolicy {
    /// Fetch on every run and digest the live data. Changing upstream data
    /// invalidates the fragment even when the other inputs are unchanged.
    #[default]
    FetchAndVerify,
    /// Trust the stored data digest when source, parameter and metadata
    /// digests all match the prior run, skipping the fetch entirely. This
    /// is the zero-collaborator bypass; upstream data changes go unnoticed
    /// until another input changes.
    TrustStored,
}

/// Executes fragments against a plugin registry, optionally recording
/// failures for replay.
pub struct FragmentExecutor {
    registry: Arc<PluginRegistry>,
    recorder: Option<Arc<DebugRecorder>>,
    policy: DataDigestPolicy,
}

impl FragmentExecutor {
    /// Create an executor.
    pub fn new(
        registry: Arc<PluginRegistry>,
        recorder: Option<Arc<DebugRecorder>>,
        policy: DataDigestPolicy,
    ) -> Self {
        Self {
            registry,
            recorder,
            policy,
        }
    }

    /// Execute one fragment to completion.
    ///
    /// Never returns an `Err`: every failure is folded into the outcome,
    /// tagged with the fragment path, so the scheduler can keep sibling
    /// fragments running.
    pub async fn execute(
        &self,
        fragment: &Fragment,
        param: &DocumentParameter,
        resolved: Metadata,
        store: &FingerprintStore,
    ) -> FragmentOutcome {
        let document = resolved
            .get("doc_suffix")
            .and_then(Value::as_str)
            .unwrap_or("-")
            .to_string();
        let mut fetched: Option<Value> = None;
        let mut final_metadata = resolved.clone();

        let result = self
            .run(fragment, param, resolved, store, &mut fetched, &mut final_metadata)
            .await;

        match result {
            Ok((context, cached)) => {
                info!(
                    "[{document}] {}: fragment done{}",
                    fragment.name,
                    if cached {
                        " (reused cached context)"
                    } else {
                        ""
                    }
                );
                FragmentOutcome {
                    name: fragment.name.clone(),
                    path: fragment.path.clone(),
                    result: Ok(context),
                    cached,
                }
            }
            Err(error) => {
                let failure = FragmentFailure::from_error(&error);
                let debug_mode = final_metadata
                    .get("debug_mode")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                if debug_mode
                    && let Some(recorder) = &self.recorder
                {
                    let record = DebugRecord {
                        timestamp: Utc::now(),
                        document: document.clone(),
                        fragment_path: fragment.path.clone(),
                        error: failure.summary.clone(),
                        parameter: param.clone(),
                        data: fetched.unwrap_or(Value::Null),
                        metadata: final_metadata,
                    };
                    if let Err(e) = recorder.record(&record) {
                        warn!("Failed to write debug record: {e}");
                    }
                }
                FragmentOutcome {
                    name: fragment.name.clone(),
                    path: fragment.path.clone(),
                    result: Err(failure),
                    cached: false,
                }
            }
        }
    }

    async fn run(
        &self,
        fragment: &Fragment,
        param: &DocumentParameter,
        resolved: Metadata,
        store: &FingerprintStore,
        fetched: &mut Option<Value>,
        final_metadata: &mut Metadata,
    ) -> anyhow::Result<(JsonMap, bool)> {
        // A fragment without a source unit is purely presentational.
        let Some(source) = &fragment.source else {
            return Ok((JsonMap::new(), false));
        };

        let parser = resolve_parser(&self.registry, &resolved)?;

        let fragment_meta = parser
            .retrieve_metadata(param, &resolved)
            .await
            .map_err(|e| {
                anyhow!(DocforgeError::MetadataRetrieval {
                    fragment: fragment.path.clone(),
                    reason: format!("{e:#}"),
                })
            })?;
        let resolved = merge_fragment_layer(&resolved, &fragment_meta);
        *final_metadata = resolved.clone();

        let source_bytes = std::fs::read(source)
            .with_context(|| format!("Failed to read source unit: {}", source.display()))?;
        let source_digest = digest_bytes(&source_bytes);
        let param_digest = digest_value(&param.to_value());
        let metadata_digest = digest_value(&Value::Object(resolved.clone()));

        // Trust-stored policy: when logic, parameter and metadata are
        // unchanged, reuse the stored data digest and skip the fetch.
        if self.policy == DataDigestPolicy::TrustStored
            && store.is_enabled()
            && let Some(stored) = store.stored(&fragment.path)
        {
            let probe = Fingerprint {
                source: source_digest.clone(),
                param: param_digest.clone(),
                data: stored.data.clone(),
                metadata: metadata_digest.clone(),
            };
            if probe.matches_except_data(&stored)
                && let Some(context) = store.load_context(&fragment.path)
            {
                debug!(
                    "Fragment '{}': inputs unchanged, trusting stored data digest",
                    fragment.path
                );
                return Ok((context, true));
            }
        }

        let data = self
            .fetch_all(fragment, param, &resolved)
            .await
            .map_err(|e| {
                anyhow!(DocforgeError::Fetch {
                    fragment: fragment.path.clone(),
                    reason: format!("{e:#}"),
                })
            })?;
        *fetched = Some(data.clone());

        let fingerprint = Fingerprint {
            source: source_digest,
            param: param_digest,
            data: digest_value(&data),
            metadata: metadata_digest,
        };

        if let CacheDecision::Hit(context) = store.check_and_get(&fragment.path, &fingerprint) {
            return Ok((context, true));
        }

        let context = parser
            .generate_context(param, &data, &resolved)
            .await
            .map_err(|e| {
                anyhow!(DocforgeError::Context {
                    fragment: fragment.path.clone(),
                    reason: format!("{e:#}"),
                })
            })?;
        let context = wrap_context(context);

        store.store(&fragment.path, &fingerprint, &context)?;
        Ok((context, false))
    }

    /// Run every fetcher declared in the resolved metadata and merge the
    /// results by declared name or positional index.
    async fn fetch_all(
        &self,
        fragment: &Fragment,
        param: &DocumentParameter,
        metadata: &Metadata,
    ) -> anyhow::Result<Value> {
        let specs: Vec<Value> = match metadata.get("data_fetchers") {
            None => {
                debug!(
                    "Fragment '{}': no data fetchers declared, data will be empty",
                    fragment.path
                );
                Vec::new()
            }
            Some(Value::Array(specs)) => specs.clone(),
            Some(single) => vec![single.clone()],
        };

        let mut data = JsonMap::new();
        for (i, spec) in specs.iter().enumerate() {
            let tag = type_tag(spec)?;
            let fetcher = self.registry.fetcher(tag)?;
            debug!("Fragment '{}': fetching '{tag}' (#{i})", fragment.path);
            let value = fetcher.fetch(param, spec, metadata).await?;

            let id = spec
                .get("name")
                .and_then(Value::as_str)
                .map_or_else(|| i.to_string(), str::to_string);
            if data.contains_key(&id) {
                anyhow::bail!("duplicate fetcher id '{id}'");
            }
            data.insert(id, value);
        }
        Ok(Value::Object(data))
    }
}

/// Select the source parser for a resolved metadata record.
///
/// The `source_parser` key may be a bare tag or a table keyed by
/// source-unit extension; absent either, the registry's extension default
/// applies.
pub fn resolve_parser(
    registry: &PluginRegistry,
    metadata: &Metadata,
) -> Result<Arc<dyn SourceParser>, DocforgeError> {
    let extension = metadata
        .get("fragment_source")
        .and_then(Value::as_str)
        .and_then(|s| std::path::Path::new(s).extension())
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_default();

    match metadata.get("source_parser") {
        Some(Value::String(tag)) => registry.parser(tag),
        Some(Value::Object(by_extension)) => {
            let tag = by_extension
                .get(&extension)
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    DocforgeError::config(format!(
                        "source_parser table has no entry for extension '{extension}'"
                    ))
                })?;
            registry.parser(tag)
        }
        Some(other) => Err(DocforgeError::config(format!(
            "Invalid source_parser declaration: {other}"
        ))),
        None => registry.parser_for_extension(&extension),
    }
}

/// Wrap non-mapping contexts so the merged tree stays uniform.
fn wrap_context(context: Value) -> JsonMap {
    match context {
        Value::Object(map) => map,
        other => {
            let mut map = JsonMap::new();
            map.insert("data".to_string(), other);
            map
        }
    }
}
