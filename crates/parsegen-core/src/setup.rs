//! Project setup validation and directory scaffolding.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, instrument};

use crate::config::{EngineConfig, ProjectConfig, Provider, validate_target};
use crate::error::CoreError;

/// Findings of a setup check. Issues block a run; warnings do not.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SetupReport {
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
}

impl SetupReport {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }
}

pub(crate) fn validate_setup(
    config: &EngineConfig,
    project: &ProjectConfig,
    target: Option<&str>,
) -> SetupReport {
    let mut report = SetupReport::default();
    let root = config.root();

    let provider = config.provider().unwrap_or(project.generator.provider);
    if provider == Provider::Gemini && config.api_key().is_none() {
        report
            .issues
            .push("GEMINI_API_KEY not set (pass --api-key or export GEMINI_API_KEY)".to_owned());
    }
    if project.verification.command.is_empty() {
        report
            .issues
            .push("verification command is empty".to_owned());
    }
    if config.max_attempts().unwrap_or(project.retry.max_attempts) == 0 {
        report
            .issues
            .push("max attempts must be at least 1".to_owned());
    }
    if project.required_columns.is_empty() {
        report
            .issues
            .push("required columns list is empty".to_owned());
    }

    for dir in [&project.paths.data_dir, &project.paths.parsers_dir] {
        let path = root.join(dir);
        if !path.exists() {
            report
                .warnings
                .push(format!("Directory will be created: {}", path.display()));
        }
    }

    for supported in &project.supported_targets {
        if !root.join(&project.paths.data_dir).join(supported).exists() {
            report
                .warnings
                .push(format!("Data directory missing for {supported}"));
        }
    }

    if let Some(target) = target {
        if let Err(e) = validate_target(target) {
            report.issues.push(e.to_string());
            return report;
        }
        if !project.supported_targets.iter().any(|t| t == target) {
            report
                .warnings
                .push(format!("Target {target} is not in supportedTargets"));
        }
        let paths = project.paths.target_paths(root, target);
        if !paths.csv_path.exists() {
            report.warnings.push(format!(
                "Reference CSV missing for {target}: {}",
                paths.csv_path.display()
            ));
        }
    }

    report
}

/// Create the data, parsers and tests directories plus one data directory
/// per supported target. Returns the directories that did not exist before.
#[instrument(skip(project))]
pub(crate) fn create_directories(
    root: &Path,
    project: &ProjectConfig,
) -> Result<Vec<PathBuf>, CoreError> {
    let data_dir = root.join(&project.paths.data_dir);
    let mut dirs = vec![
        data_dir.clone(),
        root.join(&project.paths.parsers_dir),
        root.join(&project.paths.tests_dir),
    ];
    dirs.extend(project.supported_targets.iter().map(|t| data_dir.join(t)));

    let mut created = Vec::new();
    for dir in dirs {
        if dir.is_dir() {
            continue;
        }
        std::fs::create_dir_all(&dir)?;
        debug!(dir = %dir.display(), "created directory");
        created.push(dir);
    }
    Ok(created)
}
