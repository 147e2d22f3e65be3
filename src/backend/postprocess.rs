//! Built-in post-processors.
//!
//! Post-processors transform the rendered document bytes - typically by
//! piping them through an external converter or compiler (pandoc, a LaTeX
//! toolchain wrapper, ...).

use std::process::Stdio;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::backend::PostProcessor;
use crate::core::DocumentParameter;

/// Pipes the rendered document through an external command.
///
/// Spec shape:
/// `{ type = "command", command = "pandoc", args = ["-f", "markdown", "-t", "html"] }`.
/// The document bytes go to the command's stdin; its stdout becomes the new
/// document. A non-zero exit status fails the post-processing stage with
/// the captured stderr.
pub struct CommandPostProcessor;

#[async_trait]
impl PostProcessor for CommandPostProcessor {
    async fn postprocess(
        &self,
        _param: &DocumentParameter,
        doc: Vec<u8>,
        spec: &Value,
        _context: &Value,
    ) -> Result<Vec<u8>> {
        let program = spec
            .get("command")
            .and_then(Value::as_str)
            .context("command post-processor spec has no 'command' key")?;
        let args: Vec<String> = spec
            .get("args")
            .and_then(Value::as_array)
            .map(|values| {
                values
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        debug!("Running post-process command: {program} {}", args.join(" "));

        let mut child = Command::new(program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to spawn post-process command '{program}'"))?;

        {
            let mut stdin = child.stdin.take().context("child stdin unavailable")?;
            stdin.write_all(&doc).await?;
        }

        let output = child
            .wait_with_output()
            .await
            .with_context(|| format!("Post-process command '{program}' did not complete"))?;

        if !output.status.success() {
            bail!(
                "Post-process command '{program}' failed ({}): {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(output.stdout)
    }
}
