//! Document and batch orchestration.
//!
//! The scheduler drives one document through its lifecycle
//! (`Pending → Resolving → Executing → Merging → Rendering →
//! PostProcessing → {Done, Failed}`) and runs batches of documents
//! concurrently. Its contracts:
//!
//! - Configuration failures (missing mandatory parameter, unknown
//!   requested fragment, inclusion cycle) cancel a document during
//!   `Resolving`, before any fetch or generation cost is spent.
//! - Once `Executing` begins, a fragment failure never cancels sibling
//!   fragments; it is recorded in the report and its subtree is omitted
//!   from rendering.
//! - The merged context tree is assembled by fragment path in sorted
//!   order, so its shape is independent of task completion order.
//! - Render and post-process failures are document-scoped and terminal
//!   for that document only.
//!
//! Concurrency: fragments of one document run under
//! `buffer_unordered(fragment_workers)`, documents of a batch under
//! `buffer_unordered(document_workers)`. Debug mode forces both to strict
//! sequential pre-order execution so failures reproduce one at a time.

use std::path::PathBuf;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use indicatif::ProgressBar;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::backend::{PluginRegistry, TemplateBackend, TemplateSlot, type_tag};
use crate::constants::{
    DEBUG_LOG_NAME, DEFAULT_DOCUMENT_WORKERS, DEFAULT_FRAGMENT_WORKERS, PARTIAL_OUTPUT_MARKER,
};
use crate::core::error::DocforgeError;
use crate::core::report::{
    BatchOutcome, DocumentOutcome, FragmentFailure, FragmentOutcome, GenerationReport,
    GenerationState,
};
use crate::core::{DocumentParameter, JsonMap, Metadata};
use crate::debug::DebugRecorder;
use crate::executor::{DataDigestPolicy, FragmentExecutor};
use crate::fingerprint::FingerprintStore;
use crate::metadata;
use crate::spec::{DocSpec, GenPaths};
use crate::tree::FragmentTree;
use crate::utils::write_atomic;

/// Options for one generation run.
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    /// Requested fragment names; empty means the whole tree.
    pub fragments: Vec<String>,
    /// Sequential execution with failure recording.
    pub debug_mode: bool,
    /// Concurrent fragment executions per document.
    pub fragment_workers: usize,
    /// Concurrent documents per batch.
    pub document_workers: usize,
    /// Override for the specification's `skip_unchanged_fragments`.
    pub skip_unchanged: Option<bool>,
    /// How the data digest participates in cache checks.
    pub policy: DataDigestPolicy,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            fragments: Vec::new(),
            debug_mode: false,
            fragment_workers: DEFAULT_FRAGMENT_WORKERS,
            document_workers: DEFAULT_DOCUMENT_WORKERS,
            skip_unchanged: None,
            policy: DataDigestPolicy::default(),
        }
    }
}

/// The generation engine: orchestrates batches of documents against a
/// plugin registry.
pub struct Engine {
    registry: Arc<PluginRegistry>,
}

impl Engine {
    /// Create an engine over a registry.
    pub fn new(registry: Arc<PluginRegistry>) -> Self {
        Self {
            registry,
        }
    }

    /// Generate one document per parameter.
    ///
    /// Returns `Ok` even when individual documents or fragments failed;
    /// inspect [`BatchOutcome::is_failed`] and the embedded report. An
    /// `Err` means the run could not start at all (unresolvable backend,
    /// tree build failure, unopenable debug log).
    pub async fn generate(
        &self,
        spec: &DocSpec,
        params: Vec<DocumentParameter>,
        options: &GenerateOptions,
        progress: Option<ProgressBar>,
    ) -> Result<BatchOutcome, DocforgeError> {
        let backend = self
            .registry
            .template_backend(&spec.config.template_backend)?;
        let tree = Arc::new(FragmentTree::build(spec, backend.as_ref())?);

        let recorder = if options.debug_mode {
            let path = spec.meta_dir().join(DEBUG_LOG_NAME);
            Some(Arc::new(DebugRecorder::open(path).map_err(|e| {
                DocforgeError::config(format!("Cannot open debug log: {e}"))
            })?))
        } else {
            None
        };

        // Debug mode pins everything to one worker for reproducibility.
        let document_workers = if options.debug_mode {
            1
        } else {
            options.document_workers.max(1)
        };

        let mut batch = BatchOutcome::default();
        let runs = stream::iter(params.into_iter().enumerate())
            .map(|(index, param)| {
                let tree = Arc::clone(&tree);
                let backend = Arc::clone(&backend);
                let recorder = recorder.clone();
                let progress = progress.clone();
                async move {
                    let (outcome, report) = self
                        .generate_document(spec, &tree, backend, &param, options, recorder)
                        .await;
                    if let Some(pb) = progress {
                        pb.inc(1);
                        pb.set_message(format!("generated {}", outcome.document));
                    }
                    (index, outcome, report)
                }
            })
            .buffer_unordered(document_workers)
            .collect::<Vec<_>>()
            .await;

        let mut ordered = runs;
        ordered.sort_by_key(|(index, _, _)| *index);
        for (_, outcome, report) in ordered {
            batch.report.merge(report);
            batch.outcomes.push(outcome);
        }
        Ok(batch)
    }

    /// Generate a single document. Never fails the batch: every error ends
    /// up in the returned report.
    async fn generate_document(
        &self,
        spec: &DocSpec,
        tree: &FragmentTree,
        backend: Arc<dyn TemplateBackend>,
        param: &DocumentParameter,
        options: &GenerateOptions,
        recorder: Option<Arc<DebugRecorder>>,
    ) -> (DocumentOutcome, GenerationReport) {
        let suffix = param.suffix();
        let mut report = GenerationReport::new();
        let failed = |state: GenerationState, report: GenerationReport| {
            (
                DocumentOutcome {
                    document: suffix.clone(),
                    state,
                    closure: Vec::new(),
                    partial: false,
                    output_path: None,
                    cache_hits: 0,
                },
                report,
            )
        };

        info!("[{suffix}] Generating document...");

        // ---- Resolving: fail fast before any fragment cost. ----
        let skip_unchanged = options
            .skip_unchanged
            .unwrap_or(spec.config.skip_unchanged_fragments);

        let paths = match spec.prepare_generation_dirs(&suffix) {
            Ok(paths) => paths,
            Err(e) => {
                report.record_document(&suffix, FragmentFailure::from_error(&e.into()));
                return failed(GenerationState::Failed, report);
            }
        };

        let fixed = metadata::fixed_for_document(
            spec,
            param,
            &paths,
            options.debug_mode,
            skip_unchanged,
        );
        let document_metadata = metadata::resolve(&fixed, &spec.config.metadata, &Metadata::new());

        if let Err(e) = self.validate_mandatory(spec, param) {
            report.record_document(&suffix, FragmentFailure::from_error(&e.into()));
            return failed(GenerationState::Failed, report);
        }

        let param = match self.augment_param(spec, param, &document_metadata).await {
            Ok(param) => param,
            Err(e) => {
                report.record_document(&suffix, FragmentFailure::from_error(&e));
                return failed(GenerationState::Failed, report);
            }
        };

        let closure = match tree.minimal_closure(&options.fragments) {
            Ok(closure) => closure,
            Err(e) => {
                report.record_document(&suffix, FragmentFailure::from_error(&e.into()));
                return failed(GenerationState::Failed, report);
            }
        };
        let partial = tree.is_partial(&closure);

        // ---- Executing ----
        let store = FingerprintStore::new(&paths.hash_path, skip_unchanged);
        let executor = FragmentExecutor::new(Arc::clone(&self.registry), recorder, options.policy);

        let run_order: Vec<_> = tree
            .pre_order()
            .filter(|fragment| closure.contains(&fragment.path))
            .collect();

        let outcomes: Vec<FragmentOutcome> = if options.debug_mode {
            // Strict pre-order, one at a time: reproducible failures.
            let mut outcomes = Vec::with_capacity(run_order.len());
            for fragment in &run_order {
                let resolved = metadata::resolve(
                    &metadata::with_fragment_identity(
                        &fixed,
                        &fragment.name,
                        &fragment.path,
                        fragment.source.as_deref(),
                    ),
                    &spec.config.metadata,
                    &Metadata::new(),
                );
                outcomes.push(executor.execute(fragment, &param, resolved, &store).await);
            }
            outcomes
        } else {
            stream::iter(run_order.iter())
                .map(|fragment| {
                    let resolved = metadata::resolve(
                        &metadata::with_fragment_identity(
                            &fixed,
                            &fragment.name,
                            &fragment.path,
                            fragment.source.as_deref(),
                        ),
                        &spec.config.metadata,
                        &Metadata::new(),
                    );
                    let executor = &executor;
                    let store = &store;
                    let param = &param;
                    async move { executor.execute(fragment, param, resolved, store).await }
                })
                .buffer_unordered(options.fragment_workers.max(1))
                .collect()
                .await
        };

        // ---- Merging: deterministic regardless of completion order. ----
        let cache_hits = outcomes.iter().filter(|o| o.cached).count();
        let mut sorted = outcomes;
        sorted.sort_by(|a, b| a.path.cmp(&b.path));

        let mut failed_paths: Vec<String> = Vec::new();
        for outcome in &sorted {
            if let Err(failure) = &outcome.result {
                report.record(&suffix, &outcome.name, failure.clone());
                failed_paths.push(outcome.path.clone());
            }
        }

        let root_failed = failed_paths.iter().any(|p| p == tree.root());
        if root_failed {
            warn!("[{suffix}] Root fragment failed, nothing to render");
            return failed(GenerationState::Failed, report);
        }

        // A failed fragment omits its whole subtree: from the merged
        // context and from the rendered output alike.
        let omitted = |path: &str| {
            failed_paths
                .iter()
                .any(|failed| path == failed || path.starts_with(&format!("{failed}.")))
        };

        let mut data_tree = JsonMap::new();
        for outcome in &sorted {
            let Ok(context) = &outcome.result else {
                continue;
            };
            if omitted(&outcome.path) {
                continue;
            }
            insert_at_path(&mut data_tree, &outcome.path, context.clone());
        }

        let mut meta = document_metadata.clone();
        meta.insert(
            "template_context_info".to_string(),
            Value::Array(
                run_order
                    .iter()
                    .map(|f| json!([f.name, f.path]))
                    .collect(),
            ),
        );
        let context = json!({"data": data_tree, "meta": meta});

        // ---- Rendering ----
        let slots: Vec<TemplateSlot> = tree
            .pre_order()
            .map(|fragment| TemplateSlot {
                name: fragment.template.clone(),
                active: closure.contains(&fragment.path) && !omitted(&fragment.path),
            })
            .collect();
        let templates_dir = spec.templates_dir();
        let request = crate::backend::RenderRequest {
            templates_dir: &templates_dir,
            main_template: &spec.config.main_template,
            slots: &slots,
        };

        let rendered = match backend.render(&param, &context, &request).await {
            Ok(bytes) => bytes,
            Err(e) => {
                let e = anyhow::anyhow!(DocforgeError::Render {
                    document: suffix.clone(),
                    reason: format!("{e:#}"),
                });
                report.record_document(&suffix, FragmentFailure::from_error(&e));
                return failed(GenerationState::Failed, report);
            }
        };

        // ---- PostProcessing ----
        let mut doc = rendered;
        for pp_spec in &spec.config.postprocessors {
            let result = self.run_postprocessor(&param, doc, pp_spec, &context).await;
            match result {
                Ok(bytes) => doc = bytes,
                Err(e) => {
                    let e = anyhow::anyhow!(DocforgeError::PostProcess {
                        document: suffix.clone(),
                        reason: format!("{e:#}"),
                    });
                    report.record_document(&suffix, FragmentFailure::from_error(&e));
                    return failed(GenerationState::Failed, report);
                }
            }
        }

        let output_path = self.output_path(spec, &paths, &suffix, partial);
        if let Err(e) = write_atomic(&output_path, &doc) {
            report.record_document(&suffix, FragmentFailure::from_error(&e));
            return failed(GenerationState::Failed, report);
        }

        info!("[{suffix}] Document generated: {}", output_path.display());

        // Fragment failures leave the run degraded (flagged in the
        // report) but the document itself finished with an artifact.
        (
            DocumentOutcome {
                document: suffix,
                state: GenerationState::Done,
                closure: run_order.iter().map(|f| f.path.clone()).collect(),
                partial,
                output_path: Some(output_path),
                cache_hits,
            },
            report,
        )
    }

    fn validate_mandatory(
        &self,
        spec: &DocSpec,
        param: &DocumentParameter,
    ) -> Result<(), DocforgeError> {
        for key in &spec.config.params.mandatory {
            if param.get(key).is_none() {
                return Err(DocforgeError::MissingParameter {
                    key: key.clone(),
                });
            }
        }
        Ok(())
    }

    /// Parameter augmentation: a strictly sequential pre-stage that runs
    /// once per document, before any fragment task is scheduled. Fetched
    /// mappings merge into the parameter; fragments may then share the
    /// derived values without depending on each other.
    async fn augment_param(
        &self,
        spec: &DocSpec,
        param: &DocumentParameter,
        document_metadata: &Metadata,
    ) -> anyhow::Result<DocumentParameter> {
        let mut augmented = param.clone();
        for fetcher_spec in &spec.config.params.augmentation {
            let tag = type_tag(fetcher_spec)?;
            let fetcher = self.registry.fetcher(tag)?;
            let value = fetcher
                .fetch(param, fetcher_spec, document_metadata)
                .await
                .map_err(|e| anyhow::anyhow!("parameter augmentation ('{tag}') failed: {e:#}"))?;
            match value {
                Value::Object(map) => {
                    for (key, entry) in map {
                        augmented.insert(key, entry);
                    }
                }
                other => warn!("Augmentation fetcher '{tag}' returned non-mapping {other}, ignored"),
            }
        }
        Ok(augmented)
    }

    async fn run_postprocessor(
        &self,
        param: &DocumentParameter,
        doc: Vec<u8>,
        pp_spec: &Value,
        context: &Value,
    ) -> anyhow::Result<Vec<u8>> {
        let tag = type_tag(pp_spec)?;
        let postprocessor = self.registry.postprocessor(tag)?;
        postprocessor.postprocess(param, doc, pp_spec, context).await
    }

    fn output_path(
        &self,
        spec: &DocSpec,
        paths: &GenPaths,
        suffix: &str,
        partial: bool,
    ) -> PathBuf {
        let extension = std::path::Path::new(&spec.config.main_template)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let marker = if partial {
            PARTIAL_OUTPUT_MARKER
        } else {
            ""
        };
        paths
            .out_path
            .join(format!("{}_{suffix}{marker}{extension}", spec.config.doc_name))
    }
}

/// Insert a fragment context into the merged tree at its dot-separated
/// path, creating intermediate nodes as needed.
fn insert_at_path(tree: &mut JsonMap, path: &str, context: JsonMap) {
    let mut node = tree;
    for segment in path.split('.') {
        let entry = node
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(JsonMap::new()));
        if !entry.is_object() {
            *entry = Value::Object(JsonMap::new());
        }
        let Value::Object(child) = entry else {
            return;
        };
        node = child;
    }
    node.extend(context);
}
