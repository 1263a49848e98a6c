use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use parsegen_core::{
    ApiKey, CoreError, Engine, EngineConfig, LoopEvent, Outcome, Provider, RunReport,
    validate_target,
};
use tracing::info;

/// Exit status when every attempt failed verification.
const EXIT_EXHAUSTED: u8 = 2;
/// Exit status when the generator produced no usable code.
const EXIT_GENERATION_FAILED: u8 = 3;

#[derive(Debug, Parser)]
#[command(
    name = "parsegen",
    version,
    about = "Generate, test and self-correct bank statement parsers with an LLM"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Generate a parser for a target bank, retrying while tests fail
    Run {
        /// Target bank (e.g. icici)
        #[arg(short, long)]
        target: String,

        /// Gemini API key
        #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
        api_key: Option<String>,

        /// Maximum generate/test attempts
        #[arg(short = 'n', long, value_parser = clap::value_parser!(u32).range(1..))]
        max_attempts: Option<u32>,

        /// Model override
        #[arg(short, long)]
        model: Option<String>,

        /// Generation backend override
        #[arg(long, value_enum)]
        provider: Option<ProviderArg>,

        /// Project root (contains data/ and custom_parsers/); tests run here
        #[arg(short, long, default_value = ".")]
        root: PathBuf,
    },

    /// Validate the project setup and create missing directories
    Check {
        /// Also check the files of this target
        #[arg(short, long)]
        target: Option<String>,

        /// Gemini API key
        #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
        api_key: Option<String>,

        /// Generation backend override
        #[arg(long, value_enum)]
        provider: Option<ProviderArg>,

        /// Project root
        #[arg(short, long, default_value = ".")]
        root: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ProviderArg {
    Gemini,
    Claude,
}

impl From<ProviderArg> for Provider {
    fn from(arg: ProviderArg) -> Self {
        match arg {
            ProviderArg::Gemini => Provider::Gemini,
            ProviderArg::Claude => Provider::Claude,
        }
    }
}

impl Cli {
    /// Project root and, for runs, the target used to name the log file.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidTarget` before anything touches the
    /// filesystem if the run target is not a plain name.
    pub fn log_context(&self) -> Result<(PathBuf, Option<String>), CoreError> {
        match &self.command {
            Commands::Run { root, target, .. } => {
                validate_target(target)?;
                Ok((root.clone(), Some(target.clone())))
            }
            Commands::Check { root, .. } => Ok((root.clone(), None)),
        }
    }

    pub async fn run(self) -> Result<ExitCode> {
        match self.command {
            Commands::Run {
                target,
                api_key,
                max_attempts,
                model,
                provider,
                root,
            } => {
                let config = EngineConfig::builder()
                    .root(root)
                    .model(model)
                    .provider(provider.map(Provider::from))
                    .max_attempts(max_attempts)
                    .api_key(api_key.map(ApiKey::new))
                    .build();
                run_target(config, &target).await
            }
            Commands::Check {
                target,
                api_key,
                provider,
                root,
            } => {
                let config = EngineConfig::builder()
                    .root(root)
                    .provider(provider.map(Provider::from))
                    .api_key(api_key.map(ApiKey::new))
                    .build();
                check_setup(config, target.as_deref()).await
            }
        }
    }
}

async fn run_target(config: EngineConfig, target: &str) -> Result<ExitCode> {
    let engine = Engine::new(config)
        .await
        .context("failed to initialize engine")?;

    println!("Starting agent for {target} parser...");
    let mut stream = engine
        .run(target)
        .await
        .with_context(|| format!("failed to start run for {target}"))?;

    let mut report = None;
    while let Some(event) = stream.next().await {
        match event {
            LoopEvent::Planning { target } => println!("Planning parser for {target}..."),
            LoopEvent::Generating { attempt } => {
                println!("Generating parser code (Attempt {attempt})...");
            }
            LoopEvent::CodeWritten { path, bytes } => {
                println!("  wrote {bytes} bytes to {}", path.display());
            }
            LoopEvent::GenerationFailed { feedback } => println!("  no code produced: {feedback}"),
            LoopEvent::Testing => println!("Running tests..."),
            LoopEvent::TestResult { passed } => {
                println!("  tests {}", if passed { "passed" } else { "failed" });
            }
            LoopEvent::Fixing { .. } => println!("Self-correcting based on test feedback..."),
            LoopEvent::Finished(finished) => report = Some(finished),
            LoopEvent::Error(e) => return Err(fatal(e, target)),
        }
    }

    let report = report.context("generation loop ended without a report")?;
    info!(outcome = ?report.outcome, cycles = report.cycles, "run finished");
    print_summary(&report);
    Ok(ExitCode::from(exit_status(report.outcome)))
}

fn fatal(e: CoreError, target: &str) -> anyhow::Error {
    anyhow::Error::new(e).context(format!("generation loop for {target} aborted"))
}

fn print_summary(report: &RunReport) {
    let session = &report.session;
    match report.outcome {
        Outcome::Success => {
            println!(
                "Successfully generated and tested parser: {}",
                session.artifact_path.display()
            );
        }
        Outcome::Exhausted | Outcome::GenerationFailed => {
            println!(
                "Failed to generate a working parser after {} attempts.",
                session.attempt
            );
            println!(
                "Last test result:\n{}",
                session.feedback.as_deref().unwrap_or("(none)")
            );
        }
    }
}

/// Process exit status for a finished run. Fatal errors exit with 1 via
/// `main` returning `Err`.
fn exit_status(outcome: Outcome) -> u8 {
    match outcome {
        Outcome::Success => 0,
        Outcome::Exhausted => EXIT_EXHAUSTED,
        Outcome::GenerationFailed => EXIT_GENERATION_FAILED,
    }
}

async fn check_setup(config: EngineConfig, target: Option<&str>) -> Result<ExitCode> {
    let engine = Engine::new(config)
        .await
        .context("failed to initialize engine")?;
    let report = engine.check(target);

    println!("Configuration Validation");
    println!("{}", "-".repeat(30));
    println!("Valid: {}", report.is_valid());

    if !report.issues.is_empty() {
        println!("Issues:");
        for issue in &report.issues {
            println!("  - {issue}");
        }
    }
    if !report.warnings.is_empty() {
        println!("Warnings:");
        for warning in &report.warnings {
            println!("  - {warning}");
        }
    }

    let project = engine.project_config();
    println!(
        "\nSupported targets: {}",
        project.supported_targets.join(", ")
    );
    println!("Required columns: {}", project.required_columns.join(", "));

    let created = engine
        .create_directories()
        .context("failed to create project directories")?;
    for dir in &created {
        println!("Created {}", dir.display());
    }

    if let Some(target) = target
        && validate_target(target).is_ok()
    {
        let paths = engine.target_paths(target);
        println!("\nPaths for {target}:");
        println!("  pdf_path: {}", paths.pdf_path.display());
        println!("  csv_path: {}", paths.csv_path.display());
        println!("  parser_path: {}", paths.parser_path.display());
    }

    println!("\nGenerator:");
    println!("  Provider: {}", engine.provider());
    println!(
        "  Model: {}",
        engine.model().as_deref().unwrap_or("(backend default)")
    );
    println!(
        "  API Key Set: {}",
        if engine.config().api_key().is_some() { "yes" } else { "no" }
    );
    println!("  Max Attempts: {}", engine.max_attempts());
    println!("  Timeout: {}s", project.verification.timeout_secs);

    Ok(if report.is_valid() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
