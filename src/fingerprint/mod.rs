//! Content digests and the on-disk context cache.
//!
//! A fragment computation has four inputs: the source unit (logic), the
//! document parameter, the fetched data and the resolved metadata. The
//! store persists a SHA-256 digest of each next to the generated context;
//! a later run may reuse the context only when all four digests match.
//!
//! Two artifacts exist per (document identity, fragment path), both under
//! the document's `gen/<suffix>/hash/` directory and overwritten in place:
//! a `.hash` record with the labeled digests and a `.ctx` file with the
//! canonical-JSON context. They are addressed by fragment identity, not by
//! digest value - the digests gate reuse, they are not storage keys. Both
//! files are regenerable and safe to delete wholesale.
//!
//! Corruption never propagates: an unreadable or malformed artifact is a
//! cache miss with a warning, because caching is an optimization and
//! correctness must hold with it fully disabled.

use std::path::{Path, PathBuf};

use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::constants::{CONTEXT_FILE_EXT, HASH_FILE_EXT};
use crate::core::JsonMap;
use crate::core::error::DocforgeError;
use crate::utils::{sanitize_file_component, write_atomic};

/// Digest a JSON value over its canonical serialization.
///
/// `serde_json` maps keep their keys sorted, so two logically equal
/// records serialize identically regardless of insertion order. Array
/// order is significant and preserved.
pub fn digest_value(value: &Value) -> String {
    let canonical = serde_json::to_vec(value).unwrap_or_default();
    digest_bytes(&canonical)
}

/// Digest raw bytes.
pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

/// The four content digests gating reuse of one fragment context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    /// Digest of the source unit bytes
    pub source: String,
    /// Digest of the document parameter
    pub param: String,
    /// Digest of the fetched data
    pub data: String,
    /// Digest of the resolved metadata
    pub metadata: String,
}

const COMPONENTS: [&str; 4] = ["source", "param", "data", "metadata"];

impl Fingerprint {
    /// Serialize to the stored record format: one labeled digest per line.
    pub fn to_record(&self) -> String {
        format!(
            "source {}\nparam {}\ndata {}\nmetadata {}\n",
            self.source, self.param, self.data, self.metadata
        )
    }

    /// Parse a stored record. Returns `None` on any shape mismatch.
    pub fn parse(text: &str) -> Option<Self> {
        let mut values = [None, None, None, None];
        for line in text.lines() {
            let (label, digest) = line.split_once(' ')?;
            let index = COMPONENTS.iter().position(|c| *c == label)?;
            values[index] = Some(digest.to_string());
        }
        Some(Self {
            source: values[0].take()?,
            param: values[1].take()?,
            data: values[2].take()?,
            metadata: values[3].take()?,
        })
    }

    /// Names of the components that differ from `other`.
    pub fn mismatches(&self, other: &Self) -> Vec<&'static str> {
        let pairs = [
            (&self.source, &other.source),
            (&self.param, &other.param),
            (&self.data, &other.data),
            (&self.metadata, &other.metadata),
        ];
        COMPONENTS
            .iter()
            .zip(pairs)
            .filter(|(_, (a, b))| a != b)
            .map(|(name, _)| *name)
            .collect()
    }

    /// Whether source, parameter and metadata match (data excepted).
    ///
    /// This is the comparison the trust-stored data policy uses to decide
    /// whether the fetch can be skipped.
    pub fn matches_except_data(&self, other: &Self) -> bool {
        self.source == other.source
            && self.param == other.param
            && self.metadata == other.metadata
    }
}

/// Why a cache lookup did not produce a context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MissReason {
    /// Skip-unchanged is disabled for this run
    Disabled,
    /// No record exists for this fragment yet
    NoPriorEntry,
    /// The record or context artifact was unreadable
    CorruptEntry,
    /// One or more input digests changed
    InputsChanged(Vec<&'static str>),
}

/// Result of a cache lookup.
#[derive(Debug, Clone)]
pub enum CacheDecision {
    /// All four digests match; the stored context is returned verbatim
    Hit(JsonMap),
    /// The fragment must be recomputed
    Miss(MissReason),
}

/// On-disk fingerprint and context store for one document identity.
#[derive(Debug, Clone)]
pub struct FingerprintStore {
    hash_dir: PathBuf,
    enabled: bool,
}

impl FingerprintStore {
    /// Create a store rooted at a document's hash directory.
    ///
    /// With `enabled == false` every lookup is a miss but stores still
    /// happen, keeping artifacts warm for later cached runs.
    pub fn new(hash_dir: impl Into<PathBuf>, enabled: bool) -> Self {
        Self {
            hash_dir: hash_dir.into(),
            enabled,
        }
    }

    /// Whether cache lookups are enabled for this run.
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn record_path(&self, fragment_path: &str) -> PathBuf {
        self.hash_dir
            .join(sanitize_file_component(fragment_path))
            .with_extension(HASH_FILE_EXT)
    }

    fn context_path(&self, fragment_path: &str) -> PathBuf {
        self.hash_dir
            .join(sanitize_file_component(fragment_path))
            .with_extension(CONTEXT_FILE_EXT)
    }

    /// The stored fingerprint of a fragment, if a readable one exists.
    pub fn stored(&self, fragment_path: &str) -> Option<Fingerprint> {
        let path = self.record_path(fragment_path);
        let text = read_artifact(&path)?;
        match Fingerprint::parse(&text) {
            Some(fp) => Some(fp),
            None => {
                warn!(
                    "Malformed fingerprint record at {}, treating as cache miss",
                    path.display()
                );
                None
            }
        }
    }

    /// The stored context of a fragment, if a readable one exists.
    pub fn load_context(&self, fragment_path: &str) -> Option<JsonMap> {
        let path = self.context_path(fragment_path);
        let text = read_artifact(&path)?;
        match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(map)) => Some(map),
            Ok(_) | Err(_) => {
                warn!(
                    "Malformed context artifact at {}, treating as cache miss",
                    path.display()
                );
                None
            }
        }
    }

    /// Compare `current` against the stored record and return the stored
    /// context on a full match.
    ///
    /// This is the engine's sole bypass path: a hit is returned without
    /// invoking any collaborator, so it must never have side effects.
    pub fn check_and_get(&self, fragment_path: &str, current: &Fingerprint) -> CacheDecision {
        if !self.enabled {
            return CacheDecision::Miss(MissReason::Disabled);
        }
        let Some(stored) = self.stored(fragment_path) else {
            let reason = if self.record_path(fragment_path).exists() {
                MissReason::CorruptEntry
            } else {
                MissReason::NoPriorEntry
            };
            return CacheDecision::Miss(reason);
        };

        let mismatches = current.mismatches(&stored);
        if !mismatches.is_empty() {
            debug!("Fragment '{fragment_path}': {} differ", mismatches.join(", "));
            return CacheDecision::Miss(MissReason::InputsChanged(mismatches));
        }

        match self.load_context(fragment_path) {
            Some(context) => CacheDecision::Hit(context),
            None => CacheDecision::Miss(MissReason::CorruptEntry),
        }
    }

    /// Persist the fingerprint record and context for a fragment,
    /// overwriting any prior entry.
    pub fn store(
        &self,
        fragment_path: &str,
        fingerprint: &Fingerprint,
        context: &JsonMap,
    ) -> Result<(), DocforgeError> {
        let serialized = serde_json::to_string(&Value::Object(context.clone()))?;
        write_atomic(&self.context_path(fragment_path), serialized.as_bytes())
            .map_err(|e| DocforgeError::config(e.to_string()))?;
        write_atomic(
            &self.record_path(fragment_path),
            fingerprint.to_record().as_bytes(),
        )
        .map_err(|e| DocforgeError::config(e.to_string()))?;
        Ok(())
    }
}

fn read_artifact(path: &Path) -> Option<String> {
    if !path.exists() {
        return None;
    }
    match std::fs::read_to_string(path) {
        Ok(text) => Some(text),
        Err(e) => {
            warn!("Unreadable cache artifact at {}: {e}", path.display());
            None
        }
    }
}
