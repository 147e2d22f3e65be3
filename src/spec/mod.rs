//! Document specification loading and validation.
//!
//! A specification is a directory with a `docforge.toml` manifest and a
//! conventional layout:
//!
//! ```text
//! myreport/
//! ├── docforge.toml      # manifest (this module)
//! ├── templates/         # presentation templates, one per fragment
//! ├── src/               # source units, matched to templates by basename
//! ├── data/              # static data files for the json-file fetcher
//! └── gen/<suffix>/      # per-document generated artifacts
//!     ├── hash/          # fingerprint records and cached contexts
//!     ├── tmp/           # scratch space for source units
//!     ├── log/           # per-run logs
//!     └── out/           # rendered documents
//! ```
//!
//! The manifest's top-level keys are closed (unknown keys are rejected so
//! typos surface early); the `[metadata]` table is open-ended and flows
//! into the metadata hierarchy as the document-level layer.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::constants::{
    DATA_DIR_NAME, GEN_DIR_NAME, SOURCES_DIR_NAME, SPEC_MANIFEST_NAME, TEMPLATES_DIR_NAME,
};
use crate::core::JsonMap;
use crate::core::error::DocforgeError;
use crate::utils::ensure_dir;

/// Parameter-related configuration: validation and augmentation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParamsConfig {
    /// Keys that must be present in every document parameter.
    #[serde(default)]
    pub mandatory: Vec<String>,
    /// Fetcher specs run sequentially before fragment execution; their
    /// results are merged into the document parameter.
    #[serde(default)]
    pub augmentation: Vec<Value>,
}

/// Parsed `docforge.toml` manifest.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpecConfig {
    /// Short machine name of the document family.
    pub doc_name: String,
    /// Optional human-readable name.
    #[serde(default)]
    pub verbose_name: Option<String>,
    /// Root template file name inside `templates/`.
    pub main_template: String,
    /// Template backend tag. Defaults to `tera`.
    #[serde(default = "default_template_backend")]
    pub template_backend: String,
    /// Whether unchanged fragments may reuse their cached contexts.
    #[serde(default = "default_true")]
    pub skip_unchanged_fragments: bool,
    /// Post-processor specs applied in order to the rendered document.
    #[serde(default)]
    pub postprocessors: Vec<Value>,
    /// Parameter validation and augmentation.
    #[serde(default)]
    pub params: ParamsConfig,
    /// Document-level metadata layer. Open-ended; commonly carries
    /// `source_parser` and `data_fetchers` defaults for all fragments.
    #[serde(default)]
    pub metadata: JsonMap,
}

fn default_template_backend() -> String {
    "tera".to_string()
}

const fn default_true() -> bool {
    true
}

/// Per-document generated-artifact directories, created lazily per suffix.
#[derive(Debug, Clone)]
pub struct GenPaths {
    /// Fingerprint records and cached contexts
    pub hash_path: PathBuf,
    /// Scratch space handed to source units
    pub tmp_path: PathBuf,
    /// Per-run logs
    pub log_path: PathBuf,
    /// Rendered documents
    pub out_path: PathBuf,
}

/// A loaded document specification directory.
#[derive(Debug, Clone)]
pub struct DocSpec {
    /// Absolute path of the specification directory
    pub path: PathBuf,
    /// Directory basename, used in messages
    pub name: String,
    /// Parsed manifest
    pub config: SpecConfig,
}

impl DocSpec {
    /// Load and validate a specification directory.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the manifest is missing or
    /// malformed, or when the declared main template does not exist.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self, DocforgeError> {
        let path = dir.as_ref().to_path_buf();
        let manifest = path.join(SPEC_MANIFEST_NAME);
        if !manifest.exists() {
            return Err(DocforgeError::config(format!(
                "Specification '{}' has no {SPEC_MANIFEST_NAME}",
                path.display()
            )));
        }

        let raw = std::fs::read_to_string(&manifest)?;
        let config: SpecConfig = toml::from_str(&raw)?;

        if config.doc_name.is_empty() {
            return Err(DocforgeError::config("doc_name must not be empty"));
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| config.doc_name.clone());

        let spec = Self {
            path,
            name,
            config,
        };

        let main = spec.template_path(&spec.config.main_template);
        if !main.exists() {
            return Err(DocforgeError::config(format!(
                "Main template '{}' does not exist in {}",
                spec.config.main_template,
                spec.templates_dir().display()
            )));
        }

        Ok(spec)
    }

    /// Directory holding the presentation templates.
    pub fn templates_dir(&self) -> PathBuf {
        self.path.join(TEMPLATES_DIR_NAME)
    }

    /// Directory holding the fragment source units.
    pub fn sources_dir(&self) -> PathBuf {
        self.path.join(SOURCES_DIR_NAME)
    }

    /// Directory holding static data files.
    pub fn data_dir(&self) -> PathBuf {
        self.path.join(DATA_DIR_NAME)
    }

    /// Full path of one template file.
    pub fn template_path(&self, template: &str) -> PathBuf {
        self.templates_dir().join(template)
    }

    /// Find the source unit for a fragment by basename.
    ///
    /// Source units live in `src/` and share their basename with the
    /// template they feed (`summary.tex` is fed by `src/summary.*`). A
    /// fragment without a source unit is legal and yields an empty
    /// context; two source units with the same basename are ambiguous and
    /// rejected.
    pub fn source_unit_for(&self, basename: &str) -> Result<Option<PathBuf>, DocforgeError> {
        let pattern = self
            .sources_dir()
            .join(format!("{basename}.*"))
            .to_string_lossy()
            .into_owned();
        let mut matches: Vec<PathBuf> = glob::glob(&pattern)
            .map_err(|e| DocforgeError::config(format!("Invalid source pattern: {e}")))?
            .filter_map(Result::ok)
            .collect();
        matches.sort();

        match matches.len() {
            0 => {
                warn!("No source unit for fragment '{basename}', context will be empty");
                Ok(None)
            }
            1 => Ok(Some(matches.remove(0))),
            _ => Err(DocforgeError::config(format!(
                "More than one source unit for fragment '{basename}': {}",
                matches
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }

    /// Create the generated-artifact directories for one document suffix.
    pub fn prepare_generation_dirs(&self, suffix: &str) -> Result<GenPaths, DocforgeError> {
        let base = self.path.join(GEN_DIR_NAME).join(suffix);
        let paths = GenPaths {
            hash_path: base.join("hash"),
            tmp_path: base.join("tmp"),
            log_path: base.join("log"),
            out_path: base.join("out"),
        };
        for dir in [
            &paths.hash_path,
            &paths.tmp_path,
            &paths.log_path,
            &paths.out_path,
        ] {
            ensure_dir(dir).map_err(|e| DocforgeError::config(e.to_string()))?;
        }
        Ok(paths)
    }

    /// The shared meta directory, sibling of the specification directory.
    pub fn meta_dir(&self) -> PathBuf {
        self.path
            .parent()
            .map(|p| p.join(crate::constants::META_DIR_NAME))
            .unwrap_or_else(|| self.path.join(crate::constants::META_DIR_NAME))
    }
}
