//! Failure recording and standalone replay.
//!
//! When debug mode is active, every fragment failure appends one record to
//! a shared, append-only JSONL log holding the exact (parameter, data,
//! metadata) triple that produced the failure. Each record is
//! self-contained: feeding it back into the context-generation stage
//! reproduces the failure without any other run state.
//!
//! The log is process-wide state with explicit open-or-create
//! initialization and no implicit teardown. It is safe under a single
//! concurrent writer only - multiple writer processes may interleave
//! records. That limitation is accepted, not worked around with locking.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::backend::PluginRegistry;
use crate::core::{DocumentParameter, Metadata};
use crate::executor::resolve_parser;
use crate::utils::ensure_dir;

/// One recorded failure: everything needed to re-run the failing fragment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugRecord {
    /// When the failure happened
    pub timestamp: DateTime<Utc>,
    /// Document identity (parameter suffix)
    pub document: String,
    /// Failing fragment's tree path
    pub fragment_path: String,
    /// Error summary at record time
    pub error: String,
    /// Document parameter used in the failing attempt
    pub parameter: DocumentParameter,
    /// Fetched data used in the failing attempt (`null` when the fetch
    /// itself failed)
    pub data: Value,
    /// Resolved metadata used in the failing attempt
    pub metadata: Metadata,
}

/// Append-only writer over the shared debug log.
#[derive(Debug)]
pub struct DebugRecorder {
    path: PathBuf,
    file: Mutex<File>,
}

impl DebugRecorder {
    /// Open or create the log file, creating parent directories as needed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            ensure_dir(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open debug log: {}", path.display()))?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Location of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record as a single JSON line.
    pub fn record(&self, record: &DebugRecord) -> Result<()> {
        let line = serde_json::to_string(record)?;
        let mut file = self
            .file
            .lock()
            .map_err(|_| anyhow::anyhow!("debug log writer poisoned"))?;
        writeln!(file, "{line}")?;
        file.flush()?;
        Ok(())
    }
}

/// Read all records from a debug log, skipping unreadable lines.
pub fn read_records(path: &Path) -> Result<Vec<DebugRecord>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read debug log: {}", path.display()))?;
    let mut records = Vec::new();
    for (i, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<DebugRecord>(line) {
            Ok(record) => records.push(record),
            Err(e) => warn!("Skipping malformed debug record on line {}: {e}", i + 1),
        }
    }
    Ok(records)
}

/// Re-run the context-generation stage of a recorded failure in isolation.
///
/// Uses the recorded triple verbatim - no fetch, no cache, no sibling
/// fragments - so the result deterministically reproduces the original
/// outcome.
pub async fn replay(registry: &PluginRegistry, record: &DebugRecord) -> Result<Value> {
    let parser = resolve_parser(registry, &record.metadata)?;
    parser
        .generate_context(&record.parameter, &record.data, &record.metadata)
        .await
}
