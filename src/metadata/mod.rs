//! Metadata hierarchy merging.
//!
//! Every fragment execution receives one resolved metadata record, merged
//! from three layers with defined precedence (lowest to highest):
//!
//! 1. engine defaults and computed values ("fixed" layer),
//! 2. document-level declarations from the specification manifest,
//! 3. fragment-level declarations from the fragment's source unit.
//!
//! Fixed, engine-computed keys (paths, identities, modes) are never
//! user-overridable: a document- or fragment-level attempt to set one is
//! silently ignored. Resolution is a pure function and is recomputed every
//! run - its inputs are what get fingerprinted, not the merge itself.

use serde_json::json;

use crate::core::{DocumentParameter, Metadata};
use crate::spec::{DocSpec, GenPaths};

/// Keys computed by the engine that user layers can never override.
pub const FIXED_KEYS: &[&str] = &[
    "doc_name",
    "doc_suffix",
    "docspec_path",
    "fragment_name",
    "fragment_path",
    "fragment_source",
    "hash_path",
    "tmp_path",
    "log_path",
    "out_path",
    "data_path",
    "templates_path",
    "src_path",
    "debug_mode",
    "skip_unchanged_fragments",
];

/// Whether a key belongs to the engine-controlled fixed set.
pub fn is_fixed_key(key: &str) -> bool {
    FIXED_KEYS.contains(&key)
}

/// Merge the three metadata layers into one resolved record.
///
/// Keys from `document` override non-fixed defaults in `fixed`; keys from
/// `fragment` override both. Keys listed in [`FIXED_KEYS`] always come
/// from `fixed`, regardless of what the user layers declare.
pub fn resolve(fixed: &Metadata, document: &Metadata, fragment: &Metadata) -> Metadata {
    let mut resolved = Metadata::new();
    for (key, value) in fixed {
        resolved.insert(key.clone(), value.clone());
    }
    for layer in [document, fragment] {
        for (key, value) in layer {
            if is_fixed_key(key) {
                continue;
            }
            resolved.insert(key.clone(), value.clone());
        }
    }
    resolved
}

/// Build the fixed (engine-computed) metadata layer for one document.
pub fn fixed_for_document(
    spec: &DocSpec,
    param: &DocumentParameter,
    paths: &GenPaths,
    debug_mode: bool,
    skip_unchanged: bool,
) -> Metadata {
    let mut fixed = Metadata::new();
    fixed.insert("doc_name".to_string(), json!(spec.config.doc_name));
    fixed.insert("doc_suffix".to_string(), json!(param.suffix()));
    fixed.insert(
        "docspec_path".to_string(),
        json!(spec.path.display().to_string()),
    );
    fixed.insert(
        "hash_path".to_string(),
        json!(paths.hash_path.display().to_string()),
    );
    fixed.insert(
        "tmp_path".to_string(),
        json!(paths.tmp_path.display().to_string()),
    );
    fixed.insert(
        "log_path".to_string(),
        json!(paths.log_path.display().to_string()),
    );
    fixed.insert(
        "out_path".to_string(),
        json!(paths.out_path.display().to_string()),
    );
    fixed.insert(
        "data_path".to_string(),
        json!(spec.data_dir().display().to_string()),
    );
    fixed.insert(
        "templates_path".to_string(),
        json!(spec.templates_dir().display().to_string()),
    );
    fixed.insert(
        "src_path".to_string(),
        json!(spec.sources_dir().display().to_string()),
    );
    fixed.insert("debug_mode".to_string(), json!(debug_mode));
    fixed.insert(
        "skip_unchanged_fragments".to_string(),
        json!(skip_unchanged),
    );
    fixed
}

/// Extend a document's fixed layer with one fragment's identity keys.
pub fn with_fragment_identity(
    document_fixed: &Metadata,
    name: &str,
    path: &str,
    source: Option<&std::path::Path>,
) -> Metadata {
    let mut fixed = document_fixed.clone();
    fixed.insert("fragment_name".to_string(), json!(name));
    fixed.insert("fragment_path".to_string(), json!(path));
    if let Some(source) = source {
        fixed.insert(
            "fragment_source".to_string(),
            json!(source.display().to_string()),
        );
    }
    fixed
}

/// Merge fragment-level metadata (from a source unit) over a resolved
/// record, protecting fixed keys.
pub fn merge_fragment_layer(resolved: &Metadata, fragment: &Metadata) -> Metadata {
    let mut merged = resolved.clone();
    for (key, value) in fragment {
        if is_fixed_key(key) {
            continue;
        }
        merged.insert(key.clone(), value.clone());
    }
    merged
}
