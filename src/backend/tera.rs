//! Tera template backend.
//!
//! Implements the [`TemplateBackend`] capability with the Tera engine:
//! inclusion discovery by scanning `{% include %}` directives, and
//! closure-aware rendering where templates outside the generation closure
//! are registered empty so their inclusion directives vanish from the
//! output instead of failing or leaking.

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tera::{Context as TeraContext, Tera};
use tracing::debug;

use crate::backend::{RenderRequest, TemplateBackend};
use crate::core::DocumentParameter;

/// Template backend backed by [`tera`].
pub struct TeraBackend {
    include_re: Regex,
}

impl TeraBackend {
    /// Create a backend with the include-directive scanner compiled.
    pub fn new() -> Self {
        // Matches {% include "name" %} and {% include 'name' %}, with
        // optional whitespace-control dashes.
        let include_re = Regex::new(r#"\{%-?\s*include\s+["']([^"']+)["']\s*-?%\}"#)
            .expect("include directive pattern is valid");
        Self {
            include_re,
        }
    }

    /// Flatten a Tera error chain into one readable message.
    fn format_error(error: &tera::Error) -> String {
        use std::error::Error;

        let mut messages = vec![error.to_string()];
        let mut current: Option<&dyn Error> = error.source();
        while let Some(err) = current {
            messages.push(err.to_string());
            current = err.source();
        }
        messages
            .into_iter()
            .map(|m| m.replace("'__tera_one_off'", "template"))
            .collect::<Vec<_>>()
            .join(" → ")
    }
}

impl Default for TeraBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TemplateBackend for TeraBackend {
    fn included_templates(&self, text: &str) -> Vec<String> {
        self.include_re
            .captures_iter(text)
            .map(|caps| caps[1].to_string())
            .collect()
    }

    // Tera comments are stripped at render time and the output format is
    // unknown to the backend, so there is no marker that safely survives
    // into arbitrary output.
    fn fragment_start_marker(&self, _fragment_name: &str) -> String {
        String::new()
    }

    async fn render(
        &self,
        param: &DocumentParameter,
        context: &Value,
        request: &RenderRequest<'_>,
    ) -> Result<Vec<u8>> {
        let mut tera = Tera::default();

        for slot in request.slots {
            if slot.active {
                let path = request.templates_dir.join(&slot.name);
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read template: {}", path.display()))?;
                tera.add_raw_template(&slot.name, &content)
                    .map_err(|e| anyhow::anyhow!(Self::format_error(&e)))?;
            } else {
                // Suppress the inclusion directive of excluded fragments.
                debug!("Registering excluded template '{}' as empty", slot.name);
                tera.add_raw_template(&slot.name, "")
                    .map_err(|e| anyhow::anyhow!(Self::format_error(&e)))?;
            }
        }

        let mut tera_ctx = TeraContext::from_value(context.clone())
            .context("Merged context is not a JSON object")?;
        tera_ctx.insert("param", &param.to_value());

        let rendered = tera
            .render(request.main_template, &tera_ctx)
            .map_err(|e| anyhow::anyhow!(Self::format_error(&e)))?;
        Ok(rendered.into_bytes())
    }
}
