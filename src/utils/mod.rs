//! Filesystem helpers shared across the engine.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

/// Create a directory (and its parents) if it does not exist yet.
pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory: {}", path.display()))?;
    }
    Ok(())
}

/// Write a file atomically: write to a sibling temp file, then rename.
///
/// Cache artifacts are overwritten in place on every recomputation; the
/// rename keeps a concurrent reader from ever observing a half-written
/// record.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)
        .with_context(|| format!("Failed to write temporary file: {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("Failed to move {} into place", tmp.display()))?;
    Ok(())
}

/// Turn an arbitrary identity string into a safe file name component.
///
/// Path separators and dots collapse to underscores so fragment paths like
/// `root.section.detail` map to flat cache file names.
pub fn sanitize_file_component(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' || c == '=' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
