//! parsegen binary entry point.
//!
//! Parses arguments, sets up logging for the project root and hands off to
//! [`Cli::run`]. The process exit status reflects the run outcome.

mod cli;
mod logging;

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

use crate::cli::Cli;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let (root, target) = cli.log_context()?;

    // Runs before tracing is initialized.
    logging::cleanup_old_logs(&root);

    let _guard = logging::init_tracing(&root, target.as_deref())?;

    cli.run().await
}
