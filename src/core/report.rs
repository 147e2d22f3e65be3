//! Generation results and the aggregated error report.
//!
//! Every fragment execution produces a [`FragmentOutcome`]; the scheduler
//! collects them into a [`GenerationReport`] grouped by document, then by
//! fragment name, so a caller (or a UI) can pinpoint exactly which units
//! failed and why without parsing log output.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::constants::DOCUMENT_SCOPE_KEY;
use crate::core::JsonMap;

/// One recorded failure: a short summary plus machine-inspectable detail
/// (the rendered error chain).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentFailure {
    /// One-line error summary
    pub summary: String,
    /// Full error detail (cause chain), suitable for a trace pane
    pub detail: String,
}

impl FragmentFailure {
    /// Build a failure record from an error chain.
    pub fn from_error(error: &anyhow::Error) -> Self {
        Self {
            summary: error.to_string(),
            detail: format!("{error:?}"),
        }
    }
}

/// Outcome of executing one fragment: its context or its failure.
///
/// Never silently dropped - the scheduler turns every error into a report
/// entry and every context into a merged-tree node.
#[derive(Debug, Clone)]
pub struct FragmentOutcome {
    /// Fragment name (template basename)
    pub name: String,
    /// Dot-separated path from the tree root
    pub path: String,
    /// Context on success, failure record otherwise
    pub result: Result<JsonMap, FragmentFailure>,
    /// Whether the context came from the fingerprint cache
    pub cached: bool,
}

/// Lifecycle of one document generation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GenerationState {
    /// Queued, nothing started
    Pending,
    /// Tree resolution, parameter validation and augmentation
    Resolving,
    /// Fragment execution (parallel unless debug mode)
    Executing,
    /// Assembling the merged context tree
    Merging,
    /// Template rendering
    Rendering,
    /// Post-processing stages
    PostProcessing,
    /// Finished with a usable artifact
    Done,
    /// Terminal failure for this document
    Failed,
}

impl fmt::Display for GenerationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Resolving => "resolving",
            Self::Executing => "executing",
            Self::Merging => "merging",
            Self::Rendering => "rendering",
            Self::PostProcessing => "post-processing",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Aggregated failures of one batch run: document name to fragment name to
/// failure. Document-scoped failures (render, post-process, configuration)
/// use the reserved [`DOCUMENT_SCOPE_KEY`] fragment key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GenerationReport {
    documents: BTreeMap<String, BTreeMap<String, FragmentFailure>>,
}

impl GenerationReport {
    /// Create an empty report.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fragment-scoped failure.
    pub fn record(
        &mut self,
        document: impl Into<String>,
        fragment: impl Into<String>,
        failure: FragmentFailure,
    ) {
        self.documents
            .entry(document.into())
            .or_default()
            .insert(fragment.into(), failure);
    }

    /// Record a document-scoped failure under the reserved key.
    pub fn record_document(&mut self, document: impl Into<String>, failure: FragmentFailure) {
        self.record(document, DOCUMENT_SCOPE_KEY, failure);
    }

    /// Fold another report into this one.
    pub fn merge(&mut self, other: Self) {
        for (doc, fragments) in other.documents {
            self.documents.entry(doc).or_default().extend(fragments);
        }
    }

    /// Whether any failure was recorded.
    pub fn is_failed(&self) -> bool {
        !self.documents.is_empty()
    }

    /// Total number of recorded failures.
    pub fn error_count(&self) -> usize {
        self.documents.values().map(BTreeMap::len).sum()
    }

    /// Failures of one document, if any.
    pub fn for_document(&self, document: &str) -> Option<&BTreeMap<String, FragmentFailure>> {
        self.documents.get(document)
    }

    /// Iterate over all (document, fragment, failure) entries.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str, &FragmentFailure)> {
        self.documents.iter().flat_map(|(doc, fragments)| {
            fragments
                .iter()
                .map(move |(frag, failure)| (doc.as_str(), frag.as_str(), failure))
        })
    }
}

impl fmt::Display for GenerationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (doc, frag, failure) in self.entries() {
            writeln!(f, "[{doc}] {frag}:\n  {}\n", failure.summary)?;
        }
        write!(f, "{} error/s", self.error_count())
    }
}

/// Result of generating one document of a batch.
#[derive(Debug, Clone)]
pub struct DocumentOutcome {
    /// Document identity (parameter suffix)
    pub document: String,
    /// Final state, either `Done` or `Failed`
    pub state: GenerationState,
    /// Paths of the fragments in the executed closure, pre-order.
    ///
    /// Exposed so callers can label partial output and drive selective
    /// re-runs.
    pub closure: Vec<String>,
    /// Whether the closure was a proper subset of the tree
    pub partial: bool,
    /// Rendered artifact location, when rendering succeeded
    pub output_path: Option<PathBuf>,
    /// Number of fragments served from the fingerprint cache
    pub cache_hits: usize,
}

/// Result of a whole batch run: per-document outcomes plus the aggregated
/// report. The report is populated even on partial success.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    /// Per-document outcomes in input order
    pub outcomes: Vec<DocumentOutcome>,
    /// Aggregated failures
    pub report: GenerationReport,
}

impl BatchOutcome {
    /// Whether the batch as a whole is considered failed.
    pub fn is_failed(&self) -> bool {
        self.report.is_failed()
    }
}
