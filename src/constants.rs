//! Global constants used throughout the docforge codebase.
//!
//! Worker limits, directory names and cache file extensions are defined
//! centrally so the on-disk layout is discoverable in one place.

/// Default number of fragments of one document generated concurrently.
pub const DEFAULT_FRAGMENT_WORKERS: usize = 4;

/// Default number of documents of one batch generated concurrently.
pub const DEFAULT_DOCUMENT_WORKERS: usize = 2;

/// Name of the specification manifest inside a document spec directory.
pub const SPEC_MANIFEST_NAME: &str = "docforge.toml";

/// Subdirectory of a spec holding the presentation templates.
pub const TEMPLATES_DIR_NAME: &str = "templates";

/// Subdirectory of a spec holding the fragment source units.
pub const SOURCES_DIR_NAME: &str = "src";

/// Subdirectory of a spec holding static data files.
pub const DATA_DIR_NAME: &str = "data";

/// Root of all generated per-document artifacts inside a spec.
pub const GEN_DIR_NAME: &str = "gen";

/// Shared directory (sibling of the spec directory) for debug artifacts.
pub const META_DIR_NAME: &str = "_meta";

/// File name of the shared append-only debug log inside the meta directory.
pub const DEBUG_LOG_NAME: &str = "debug_log.jsonl";

/// Extension of the stored fingerprint record of one fragment.
pub const HASH_FILE_EXT: &str = "hash";

/// Extension of the stored context of one fragment.
pub const CONTEXT_FILE_EXT: &str = "ctx";

/// Suffix appended to output file names when only a fragment subset was
/// generated.
pub const PARTIAL_OUTPUT_MARKER: &str = "-partial";

/// Report key used for document-scoped failures that are not attributable
/// to a single fragment (render and post-process errors).
pub const DOCUMENT_SCOPE_KEY: &str = "<document>";
