//! Command-line interface for docforge.
//!
//! Three commands cover the generation workflow:
//!
//! - `generate` - build one or more documents from a specification
//! - `tree` - print the resolved fragment tree
//! - `replay` - re-run a recorded failure from the debug log
//!
//! ```bash
//! # Whole document for one parameter
//! docforge generate ./myreport --param country=ES
//!
//! # Partial generation: one fragment and its ancestors
//! docforge generate ./myreport --param country=ES --fragment detail
//!
//! # Batch from a JSON file, sequential debug mode
//! docforge generate ./myreport --params-file params.json --debug
//!
//! # Inspect and replay the last recorded failure
//! docforge replay ./myreport
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;

use crate::backend::PluginRegistry;
use crate::constants::{DEBUG_LOG_NAME, DEFAULT_DOCUMENT_WORKERS, DEFAULT_FRAGMENT_WORKERS};
use crate::core::DocumentParameter;
use crate::core::report::GenerationState;
use crate::debug::{read_records, replay};
use crate::executor::DataDigestPolicy;
use crate::scheduler::{Engine, GenerateOptions};
use crate::spec::DocSpec;
use crate::tree::FragmentTree;

/// Top-level CLI definition.
#[derive(Parser)]
#[command(name = "docforge", version, about = "Parameterizable document compiler")]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate documents from a specification directory
    Generate(GenerateArgs),
    /// Print the resolved fragment tree of a specification
    Tree(TreeArgs),
    /// Re-run a failure recorded in the debug log
    Replay(ReplayArgs),
}

#[derive(Args)]
struct GenerateArgs {
    /// Path to the document specification directory
    docspec: PathBuf,

    /// Document parameter entries as key=value (repeatable); values are
    /// parsed as JSON when possible, kept as strings otherwise
    #[arg(short, long = "param")]
    params: Vec<String>,

    /// JSON file with an array of parameter objects (batch generation)
    #[arg(long)]
    params_file: Option<PathBuf>,

    /// Generate only these fragments (and their ancestors); repeatable
    #[arg(short, long = "fragment")]
    fragments: Vec<String>,

    /// Sequential execution with failure recording for replay
    #[arg(long)]
    debug: bool,

    /// Concurrent fragment executions per document
    #[arg(long, default_value_t = DEFAULT_FRAGMENT_WORKERS)]
    fragment_workers: usize,

    /// Concurrent documents per batch
    #[arg(long, default_value_t = DEFAULT_DOCUMENT_WORKERS)]
    document_workers: usize,

    /// Ignore cached contexts and recompute every fragment
    #[arg(long)]
    no_cache: bool,

    /// Trust stored data digests: skip data fetches when logic, parameter
    /// and metadata are unchanged (faster, may serve stale data)
    #[arg(long)]
    trust_stored_data: bool,
}

#[derive(Args)]
struct TreeArgs {
    /// Path to the document specification directory
    docspec: PathBuf,
}

#[derive(Args)]
struct ReplayArgs {
    /// Path to the document specification directory
    docspec: PathBuf,

    /// Record index in the debug log; defaults to the most recent
    #[arg(long)]
    index: Option<usize>,
}

impl Cli {
    /// Execute the parsed command.
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Generate(args) => generate(args).await,
            Commands::Tree(args) => tree(args),
            Commands::Replay(args) => replay_command(args).await,
        }
    }
}

async fn generate(args: GenerateArgs) -> Result<()> {
    let spec = DocSpec::load(&args.docspec)?;
    let params = collect_params(&args)?;
    if params.is_empty() {
        bail!("No document parameters given; pass --param or --params-file");
    }

    let options = GenerateOptions {
        fragments: args.fragments,
        debug_mode: args.debug,
        fragment_workers: args.fragment_workers,
        document_workers: args.document_workers,
        skip_unchanged: if args.no_cache {
            Some(false)
        } else {
            None
        },
        policy: if args.trust_stored_data {
            DataDigestPolicy::TrustStored
        } else {
            DataDigestPolicy::FetchAndVerify
        },
    };

    let pb = ProgressBar::new(params.len() as u64);
    pb.set_style(
        ProgressStyle::with_template("{spinner} [{bar:30}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let engine = Engine::new(Arc::new(PluginRegistry::with_builtins()));
    let batch = engine
        .generate(&spec, params, &options, Some(pb.clone()))
        .await?;
    pb.finish_and_clear();

    for outcome in &batch.outcomes {
        let label = match outcome.state {
            GenerationState::Done if outcome.partial => "partial".yellow(),
            GenerationState::Done => "done".green(),
            _ => "failed".red(),
        };
        let location = outcome
            .output_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        println!(
            "{label} {} ({} fragment/s, {} cached) {location}",
            outcome.document.bold(),
            outcome.closure.len(),
            outcome.cache_hits,
        );
    }

    if batch.is_failed() {
        eprintln!("\n{}", batch.report);
        bail!(
            "Generation finished with {} error/s",
            batch.report.error_count()
        );
    }
    Ok(())
}

fn collect_params(args: &GenerateArgs) -> Result<Vec<DocumentParameter>> {
    if let Some(file) = &args.params_file {
        let text = std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read params file: {}", file.display()))?;
        let values: Vec<Value> =
            serde_json::from_str(&text).context("Params file must be a JSON array of objects")?;
        return values
            .into_iter()
            .map(|value| match value {
                Value::Object(map) => Ok(DocumentParameter::from_map(map)),
                other => bail!("Params file entries must be objects, got {other}"),
            })
            .collect();
    }

    let mut param = DocumentParameter::new();
    for entry in &args.params {
        let (key, raw) = entry
            .split_once('=')
            .with_context(|| format!("Invalid --param '{entry}', expected key=value"))?;
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        param.insert(key, value);
    }
    Ok(if param.is_empty() {
        Vec::new()
    } else {
        vec![param]
    })
}

fn tree(args: TreeArgs) -> Result<()> {
    let spec = DocSpec::load(&args.docspec)?;
    let registry = PluginRegistry::with_builtins();
    let backend = registry.template_backend(&spec.config.template_backend)?;
    let tree = FragmentTree::build(&spec, backend.as_ref())?;
    print!("{}", tree.to_tree_string());
    Ok(())
}

async fn replay_command(args: ReplayArgs) -> Result<()> {
    let spec = DocSpec::load(&args.docspec)?;
    let log = spec.meta_dir().join(DEBUG_LOG_NAME);
    let records = read_records(&log)?;
    if records.is_empty() {
        bail!("Debug log {} has no records", log.display());
    }

    let index = args.index.unwrap_or(records.len() - 1);
    let record = records
        .get(index)
        .with_context(|| format!("Record index {index} out of range (0..{})", records.len()))?;

    println!(
        "Replaying [{}] {} recorded at {}",
        record.document.bold(),
        record.fragment_path,
        record.timestamp
    );

    let registry = PluginRegistry::with_builtins();
    match replay(&registry, record).await {
        Ok(context) => {
            println!("{}", "Replay succeeded; the failure did not reproduce".green());
            println!("{}", serde_json::to_string_pretty(&context)?);
            Ok(())
        }
        Err(e) => {
            eprintln!("{}", "Failure reproduced:".red().bold());
            Err(e)
        }
    }
}
