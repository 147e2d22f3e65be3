//! Error handling for docforge.
//!
//! The engine distinguishes four failure scopes, each with its own
//! propagation rule:
//!
//! - **Configuration errors** (missing mandatory parameter, inclusion
//!   cycle, unknown requested fragment) abort a document before any
//!   fragment work is scheduled.
//! - **Fragment-scoped errors** (data fetch, metadata retrieval, context
//!   generation) are isolated to the failing fragment and recorded in the
//!   generation report; siblings keep running.
//! - **Document-scoped errors** (template rendering, post-processing) are
//!   terminal for that document only; other documents in a batch continue.
//! - **Cache corruption** always degrades to a cache miss and never
//!   propagates - caching is an optimization, not a correctness
//!   requirement.
//!
//! [`DocforgeError`] is the strongly-typed enum for all of these;
//! [`user_friendly_error`] converts any error chain into a displayable
//! [`ErrorContext`] for the CLI.

use colored::Colorize;
use std::fmt;
use thiserror::Error;

/// The main error type for docforge operations.
#[derive(Error, Debug)]
pub enum DocforgeError {
    /// Document specification is invalid or incomplete.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem
        message: String,
    },

    /// The template inclusion graph contains a cycle.
    ///
    /// A cyclic inclusion can never produce a finite document, so this is
    /// detected during tree resolution and reported with the full chain
    /// instead of looping.
    #[error("Template inclusion cycle detected: {chain}")]
    InclusionCycle {
        /// Human-readable cycle chain, e.g. `a.tex → b.tex → a.tex`
        chain: String,
    },

    /// A requested fragment name does not exist in the fragment tree.
    #[error("Fragment '{name}' not found in the template tree")]
    UnknownFragment {
        /// The requested fragment name
        name: String,
    },

    /// A mandatory document parameter key is absent.
    #[error("Mandatory parameter key '{key}' is missing")]
    MissingParameter {
        /// The missing key
        key: String,
    },

    /// A data fetcher failed for one fragment.
    #[error("Data fetch failed for fragment '{fragment}': {reason}")]
    Fetch {
        /// Fragment path the fetch belonged to
        fragment: String,
        /// Underlying failure
        reason: String,
    },

    /// Fragment-level metadata retrieval failed.
    #[error("Metadata retrieval failed for fragment '{fragment}': {reason}")]
    MetadataRetrieval {
        /// Fragment path the retrieval belonged to
        fragment: String,
        /// Underlying failure
        reason: String,
    },

    /// Context generation failed for one fragment.
    #[error("Context generation failed for fragment '{fragment}': {reason}")]
    Context {
        /// Fragment path the generation belonged to
        fragment: String,
        /// Underlying failure
        reason: String,
    },

    /// Template rendering failed for a document.
    #[error("Template rendering failed for document '{document}': {reason}")]
    Render {
        /// Document suffix
        document: String,
        /// Underlying failure
        reason: String,
    },

    /// A post-processor failed for a document.
    #[error("Post-processing failed for document '{document}': {reason}")]
    PostProcess {
        /// Document suffix
        document: String,
        /// Underlying failure
        reason: String,
    },

    /// A cache artifact could not be read or parsed.
    ///
    /// Never surfaced to callers as a failure; the fingerprint store
    /// converts it into a miss and logs a warning.
    #[error("Corrupt cache artifact at {path}: {reason}")]
    CacheCorruption {
        /// Path of the unreadable artifact
        path: String,
        /// Parse or read failure
        reason: String,
    },

    /// A collaborator implementation is not registered for a type tag.
    #[error("No {capability} registered under tag '{tag}'")]
    UnknownPlugin {
        /// Capability kind (e.g. "data fetcher")
        capability: String,
        /// The requested type tag
        tag: String,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing error.
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl DocforgeError {
    /// Shorthand for a [`DocforgeError::Configuration`] with a formatted
    /// message.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Whether this error must abort the document before scheduling.
    pub const fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Configuration { .. }
                | Self::InclusionCycle { .. }
                | Self::UnknownFragment { .. }
                | Self::MissingParameter { .. }
        )
    }
}

/// Wrapper adding user-facing details and suggestions to an error.
///
/// The CLI shows the error in red, optional details in yellow and an
/// optional suggestion in green; library callers get the same content via
/// `Display`.
#[derive(Debug)]
pub struct ErrorContext {
    /// The rendered error message
    pub message: String,
    /// Optional suggestion for resolving the error
    pub suggestion: Option<String>,
    /// Optional additional details about the error
    pub details: Option<String>,
}

impl ErrorContext {
    /// Create a context with just a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            suggestion: None,
            details: None,
        }
    }

    /// Add a suggestion for resolving the error.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Add details explaining the error.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Print the context to stderr with terminal colors.
    pub fn display(&self) {
        eprintln!("{}: {}", "error".red().bold(), self.message);
        if let Some(details) = &self.details {
            eprintln!("{}: {}", "details".yellow(), details);
        }
        if let Some(suggestion) = &self.suggestion {
            eprintln!("{}: {}", "suggestion".green(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(details) = &self.details {
            write!(f, "\nDetails: {details}")?;
        }
        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nSuggestion: {suggestion}")?;
        }
        Ok(())
    }
}

/// Convert any error chain into a displayable [`ErrorContext`].
///
/// Recognized [`DocforgeError`] variants get tailored suggestions; other
/// errors are shown with their full cause chain.
#[must_use]
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    if let Some(err) = error.downcast_ref::<DocforgeError>() {
        return match err {
            DocforgeError::Configuration { .. } => ErrorContext::new(err.to_string())
                .with_suggestion(
                    "Check docforge.toml in the specification directory; \
                     run 'docforge tree' to inspect the resolved fragment tree",
                ),
            DocforgeError::InclusionCycle { chain } => ErrorContext::new(err.to_string())
                .with_details(format!("Inclusion chain: {chain}"))
                .with_suggestion("Remove the circular include from the templates involved"),
            DocforgeError::UnknownFragment { name } => ErrorContext::new(err.to_string())
                .with_suggestion(format!(
                    "Run 'docforge tree' to list available fragments; '{name}' is not one of them"
                )),
            DocforgeError::MissingParameter { key } => ErrorContext::new(err.to_string())
                .with_suggestion(format!("Pass the key with --param {key}=<value>")),
            DocforgeError::UnknownPlugin { capability, tag } => ErrorContext::new(err.to_string())
                .with_details(format!(
                    "The {capability} tag '{tag}' was referenced by the specification \
                     but no implementation with that tag is registered"
                )),
            _ => ErrorContext::new(err.to_string()),
        };
    }

    // Generic error: include the full cause chain for diagnostics.
    let mut message = error.to_string();
    let chain: Vec<String> = error.chain().skip(1).map(|c| c.to_string()).collect();
    if !chain.is_empty() {
        message.push_str("\n\nCaused by:");
        for (i, cause) in chain.iter().enumerate() {
            message.push_str(&format!("\n  {}: {}", i + 1, cause));
        }
    }
    ErrorContext::new(message)
}
