//! Core execution engine.
//!
//! The [`Engine`] is the entry point for all parsegen-core operations. It
//! merges CLI overrides with the project configuration, owns the prompt
//! manager, and assembles a [`Controller`] for each run.

use std::path::PathBuf;

use parsegen_pm::PromptManager;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

use crate::claude::ClaudeGenerator;
use crate::config::{
    EngineConfig, ProjectConfig, Provider, TargetPaths, load_project_config, validate_target,
};
use crate::controller::Controller;
use crate::error::CoreError;
use crate::events::{EVENT_CHANNEL_SIZE, EventSink, LoopEvent, RunStream};
use crate::gemini::GeminiGenerator;
use crate::generator::Backend;
use crate::session::Session;
use crate::setup::{SetupReport, create_directories, validate_setup};
use crate::verifier::CommandVerifier;

/// Drives parser generation for a project directory.
///
/// # Examples
///
/// ```no_run
/// use std::path::PathBuf;
/// use parsegen_core::{Engine, EngineConfig, LoopEvent};
///
/// # async fn example() -> Result<(), parsegen_core::CoreError> {
/// let config = EngineConfig::builder()
///     .root(PathBuf::from("."))
///     .build();
///
/// let engine = Engine::new(config).await?;
/// let mut stream = engine.run("icici").await?;
/// while let Some(event) = stream.next().await {
///     if let LoopEvent::Finished(report) = event {
///         println!("{:?}", report.outcome);
///     }
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Engine {
    /// CLI-level configuration.
    config: EngineConfig,
    /// Project-level configuration from `.parsegen/config.yaml`.
    project_config: ProjectConfig,
    /// Built-in templates plus any project overrides.
    prompts: PromptManager,
}

impl Engine {
    /// Create an engine for the configured project root.
    ///
    /// Loads `.parsegen/config.yaml` (defaults if absent) and the prompt
    /// templates, including override directories listed in the config.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Yaml` or `CoreError::Io` if the config file is
    /// invalid or unreadable.
    /// Returns `CoreError::Prompt` if a prompt template cannot be loaded.
    #[instrument(skip_all)]
    pub async fn new(config: EngineConfig) -> Result<Self, CoreError> {
        info!(root = %config.root().display(), "initializing engine");

        let project_config = load_project_config(&config.config_path())?;

        let mut prompts = PromptManager::new()?;
        for dir in &project_config.prompts.include {
            let resolved = if dir.is_absolute() {
                dir.clone()
            } else {
                config.root().join(dir)
            };
            if resolved.is_dir() {
                prompts.load_dir(&resolved)?;
                debug!(dir = %resolved.display(), "loaded custom prompt directory");
            } else {
                warn!(dir = %resolved.display(), "prompt include directory not found");
            }
        }

        Ok(Self {
            config,
            project_config,
            prompts,
        })
    }

    /// Start the generate/test/fix loop for `target`.
    ///
    /// The loop runs on a background task; progress and the final
    /// [`RunReport`](crate::RunReport) arrive through the returned stream.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidTarget` if `target` is not a plain name.
    /// Returns `CoreError::Config` if the backend or verifier cannot be set
    /// up (e.g. missing API key, empty test command).
    #[instrument(skip(self))]
    pub async fn run(&self, target: &str) -> Result<RunStream, CoreError> {
        let session = self.session(target)?;
        let controller = self.controller()?;

        if !self.project_config.supported_targets.iter().any(|t| t == target) {
            warn!(target, "target is not in supportedTargets");
        }

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let sink = EventSink::new(event_tx);

        tokio::spawn(async move {
            match controller.run(session, &sink).await {
                Ok(report) => sink.emit(LoopEvent::Finished(report)).await,
                Err(e) => {
                    error!(error = %e, "loop aborted");
                    sink.emit(LoopEvent::Error(e)).await;
                }
            }
        });

        Ok(RunStream::new(event_rx))
    }

    /// Build a fresh session for `target`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidTarget` if `target` is empty or contains
    /// anything besides ASCII letters, digits, `-` and `_`.
    pub fn session(&self, target: &str) -> Result<Session, CoreError> {
        validate_target(target)?;
        let paths = self.target_paths(target);
        Ok(Session::builder()
            .target(target)
            .artifact_path(paths.parser_path)
            .reference_path(paths.csv_path)
            .attempt_limit(self.max_attempts())
            .build())
    }

    /// Assemble the controller from the resolved configuration.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Config` if the Gemini backend has no API key or
    /// the verification command is empty.
    /// Returns `CoreError::Io` if the project root cannot be resolved.
    pub fn controller(&self) -> Result<Controller<Backend, CommandVerifier>, CoreError> {
        let cwd = self.working_dir()?;
        let generator_config = self.project_config.generator.clone();
        let model = self.model();

        let backend = match self.provider() {
            Provider::Gemini => {
                let api_key = self.config.api_key().cloned().ok_or_else(|| {
                    CoreError::Config(
                        "missing API key for the gemini backend; pass --api-key or set GEMINI_API_KEY"
                            .to_owned(),
                    )
                })?;
                Backend::Gemini(GeminiGenerator::new(api_key, model, generator_config)?)
            }
            Provider::Claude => Backend::Claude(ClaudeGenerator::new(model, cwd.clone())),
        };

        let verification = &self.project_config.verification;
        let verifier = CommandVerifier::new(&verification.command, cwd, verification.timeout())?;

        Ok(Controller::new(
            backend,
            verifier,
            self.prompts.clone(),
            self.project_config.required_columns.clone(),
        ))
    }

    /// Absolute project root. The test command and the Claude session run
    /// here, so relative paths in the test suite resolve against the same
    /// directory the artifact is written under.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Io` if the current directory cannot be read while
    /// resolving a relative root.
    pub fn working_dir(&self) -> Result<PathBuf, CoreError> {
        Ok(std::path::absolute(self.config.root())?)
    }

    /// Validate the project setup, optionally for a specific target.
    pub fn check(&self, target: Option<&str>) -> SetupReport {
        validate_setup(&self.config, &self.project_config, target)
    }

    /// Create the project directories. Returns the ones that were missing.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Io` if a directory cannot be created.
    pub fn create_directories(&self) -> Result<Vec<PathBuf>, CoreError> {
        create_directories(self.config.root(), &self.project_config)
    }

    /// Paths belonging to `target` under the project root.
    pub fn target_paths(&self, target: &str) -> TargetPaths {
        self.project_config
            .paths
            .target_paths(self.config.root(), target)
    }

    /// Backend in effect (CLI override, then config).
    pub fn provider(&self) -> Provider {
        self.config
            .provider()
            .unwrap_or(self.project_config.generator.provider)
    }

    /// Model in effect (CLI override, then config). `None` is the backend default.
    pub fn model(&self) -> Option<String> {
        self.config
            .model()
            .map(String::from)
            .or_else(|| self.project_config.generator.model.clone())
    }

    /// Attempt limit in effect (CLI override, then config).
    pub fn max_attempts(&self) -> u32 {
        self.config
            .max_attempts()
            .unwrap_or(self.project_config.retry.max_attempts)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn project_config(&self) -> &ProjectConfig {
        &self.project_config
    }
}
