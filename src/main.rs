//! docforge CLI entry point.
//!
//! Parses command-line arguments, initializes tracing and delegates to
//! the command implementations in [`docforge::cli`].

use anyhow::Result;
use clap::Parser;
use docforge::cli::Cli;
use docforge::core::error::user_friendly_error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.execute().await {
        Ok(()) => Ok(()),
        Err(e) => {
            user_friendly_error(e).display();
            std::process::exit(1);
        }
    }
}
