//! Configuration types for parsegen-core.
//!
//! [`EngineConfig`] carries CLI-level overrides, [`ProjectConfig`] is read
//! from `.parsegen/config.yaml`. The engine merges the two when it starts a
//! run, with CLI values taking precedence over the file, and the file over
//! the built-in defaults. Nothing here is global; the merged values are
//! handed to the controller explicitly.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::error::CoreError;

/// Directory (relative to the project root) holding parsegen state.
pub const STATE_DIR: &str = ".parsegen";

/// Default Gemini model, used when neither CLI nor config names one.
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-pro";

// ── Engine Configuration (CLI-level) ─────────────────────────

/// API credential for the generation service.
///
/// Kept in a newtype so that `Debug` output and serialized configs never
/// contain the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

/// Engine configuration provided by the CLI layer.
///
/// # Examples
///
/// ```
/// use std::path::PathBuf;
/// use parsegen_core::EngineConfig;
///
/// let config = EngineConfig::builder()
///     .root(PathBuf::from("/tmp/statements"))
///     .max_attempts(Some(5))
///     .build();
/// assert_eq!(config.max_attempts(), Some(5));
/// ```
#[derive(Debug, Clone, Serialize, TypedBuilder)]
pub struct EngineConfig {
    /// Project root containing `data/`, `custom_parsers/` and `.parsegen/`.
    root: PathBuf,

    /// Override the generation model.
    #[builder(default, setter(into))]
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<String>,

    /// Override the generation backend.
    #[builder(default, setter(into))]
    #[serde(skip_serializing_if = "Option::is_none")]
    provider: Option<Provider>,

    /// Override the attempt limit.
    #[builder(default, setter(into))]
    #[serde(skip_serializing_if = "Option::is_none")]
    max_attempts: Option<u32>,

    /// Credential for the Gemini backend.
    #[builder(default, setter(into))]
    #[serde(skip)]
    api_key: Option<ApiKey>,
}

impl EngineConfig {
    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn provider(&self) -> Option<Provider> {
        self.provider
    }

    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    pub fn api_key(&self) -> Option<&ApiKey> {
        self.api_key.as_ref()
    }

    /// Returns the `.parsegen` directory for this project.
    pub fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR)
    }

    /// Returns the path to `config.yaml` inside the state directory.
    pub fn config_path(&self) -> PathBuf {
        self.state_dir().join("config.yaml")
    }
}

// ── Project Configuration (.parsegen/config.yaml) ───────────

/// Project-level configuration, deserialized from `.parsegen/config.yaml`.
///
/// Every field has a serde default so a partial (or empty) file still
/// yields a complete configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfig {
    #[serde(default)]
    pub generator: GeneratorConfig,

    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub verification: VerificationConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub prompts: PromptsConfig,

    /// Exact, ordered column list every generated parser must return.
    #[serde(default = "default_required_columns")]
    pub required_columns: Vec<String>,

    /// Targets with sample data shipped in the project.
    #[serde(default = "default_supported_targets")]
    pub supported_targets: Vec<String>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            generator: GeneratorConfig::default(),
            paths: PathsConfig::default(),
            verification: VerificationConfig::default(),
            retry: RetryConfig::default(),
            prompts: PromptsConfig::default(),
            required_columns: default_required_columns(),
            supported_targets: default_supported_targets(),
        }
    }
}

// ── Sub-configuration types ──────────────────────────────────

/// Which text-generation service produces parser code.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Provider {
    /// Google Gemini `generateContent` API. Needs an API key.
    #[default]
    Gemini,
    /// Claude via the agent SDK. Uses the local Claude CLI credentials.
    Claude,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gemini => f.write_str("gemini"),
            Self::Claude => f.write_str("claude"),
        }
    }
}

/// Generation settings. Applied uniformly to every request of a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GeneratorConfig {
    #[serde(default)]
    pub provider: Provider,

    /// Model name. `None` picks the backend default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    #[serde(default = "default_top_p")]
    pub top_p: f32,

    /// Threshold applied to every Gemini harm category.
    #[serde(default = "default_safety_threshold")]
    pub safety_threshold: String,

    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// HTTP request timeout for the Gemini backend.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            provider: Provider::default(),
            model: None,
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
            top_p: default_top_p(),
            safety_threshold: default_safety_threshold(),
            api_base_url: default_api_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Directory layout, relative to the project root.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathsConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_parsers_dir")]
    pub parsers_dir: PathBuf,

    #[serde(default = "default_tests_dir")]
    pub tests_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            parsers_dir: default_parsers_dir(),
            tests_dir: default_tests_dir(),
        }
    }
}

impl PathsConfig {
    /// Resolve the per-target file paths under `root`.
    pub fn target_paths(&self, root: &Path, target: &str) -> TargetPaths {
        let target_dir = root.join(&self.data_dir).join(target);
        TargetPaths {
            pdf_path: target_dir.join(format!("{target}_sample.pdf")),
            csv_path: target_dir.join(format!("{target}_sample.csv")),
            parser_path: root
                .join(&self.parsers_dir)
                .join(format!("{target}_parser.py")),
        }
    }
}

/// Reject target names that could escape the data, parser or log
/// directories they are joined into.
///
/// # Errors
///
/// Returns `CoreError::InvalidTarget` if `target` is empty or contains
/// anything besides ASCII letters, digits, `-` and `_`.
pub fn validate_target(target: &str) -> Result<(), CoreError> {
    let valid = !target.is_empty()
        && target
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTarget(target.to_owned()))
    }
}

/// Files belonging to one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetPaths {
    /// Sample statement the generated parser is tested against.
    pub pdf_path: PathBuf,
    /// Ground-truth CSV; its header informs the prompt.
    pub csv_path: PathBuf,
    /// Where the generated parser is written.
    pub parser_path: PathBuf,
}

/// External test command settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationConfig {
    /// Program followed by its fixed arguments. Not run through a shell.
    #[serde(default = "default_test_command")]
    pub command: Vec<String>,

    #[serde(default = "default_test_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            command: default_test_command(),
            timeout_secs: default_test_timeout_secs(),
        }
    }
}

impl VerificationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Retry budget for the generate/test/fix loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
        }
    }
}

/// Extra prompt template directories, searched in order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptsConfig {
    #[serde(default)]
    pub include: Vec<PathBuf>,
}

// ── Default value functions for serde ────────────────────────

fn default_temperature() -> f32 {
    0.1
}

fn default_max_output_tokens() -> u32 {
    4000
}

fn default_top_p() -> f32 {
    0.8
}

fn default_safety_threshold() -> String {
    "BLOCK_NONE".to_owned()
}

fn default_api_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_owned()
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_parsers_dir() -> PathBuf {
    PathBuf::from("custom_parsers")
}

fn default_tests_dir() -> PathBuf {
    PathBuf::from("tests")
}

fn default_test_command() -> Vec<String> {
    ["python", "-m", "pytest", "test_parser.py"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_test_timeout_secs() -> u64 {
    60
}

fn default_max_attempts() -> u32 {
    3
}

fn default_required_columns() -> Vec<String> {
    ["Date", "Description", "Debit Amt", "Credit Amt", "Balance"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_supported_targets() -> Vec<String> {
    ["icici", "sbi", "hdfc", "axis", "kotak"]
        .into_iter()
        .map(String::from)
        .collect()
}

// ── Config loading ───────────────────────────────────────────

/// Load [`ProjectConfig`] from `config_path`, or the defaults if the file
/// does not exist.
///
/// # Errors
///
/// Returns `CoreError::Io` if the file exists but cannot be read.
/// Returns `CoreError::Yaml` if the file contains invalid YAML.
pub fn load_project_config(config_path: &Path) -> Result<ProjectConfig, CoreError> {
    if !config_path.exists() {
        return Ok(ProjectConfig::default());
    }
    let content = std::fs::read_to_string(config_path)?;
    if content.trim().is_empty() {
        return Ok(ProjectConfig::default());
    }
    let config: ProjectConfig = serde_yaml::from_str(&content)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_should_build_engine_config_with_defaults() {
        let config = EngineConfig::builder()
            .root(PathBuf::from("/tmp/project"))
            .build();

        assert_eq!(config.root(), &PathBuf::from("/tmp/project"));
        assert!(config.model().is_none());
        assert!(config.provider().is_none());
        assert!(config.max_attempts().is_none());
        assert!(config.api_key().is_none());
        assert_eq!(
            config.config_path(),
            PathBuf::from("/tmp/project/.parsegen/config.yaml")
        );
    }

    #[test]
    fn test_should_hide_api_key_in_debug_and_json() {
        let config = EngineConfig::builder()
            .root(PathBuf::from("/tmp/project"))
            .api_key(ApiKey::new("super-secret"))
            .model(Some("gemini-1.5-flash".to_owned()))
            .build();

        let debug = format!("{config:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("ApiKey(***)"));

        let value = serde_json::to_value(&config).expect("should serialize");
        assert!(value.get("api_key").is_none());
        assert_eq!(value["model"], json!("gemini-1.5-flash"));
        assert!(value.get("max_attempts").is_none());
    }

    #[test]
    fn test_should_deserialize_default_project_config() {
        let config: ProjectConfig = serde_yaml::from_str("{}").expect("should parse");

        assert_eq!(config.generator.provider, Provider::Gemini);
        assert!(config.generator.model.is_none());
        assert_eq!(config.generator.max_output_tokens, 4000);
        assert_eq!(config.generator.safety_threshold, "BLOCK_NONE");
        assert_eq!(config.paths.parsers_dir, PathBuf::from("custom_parsers"));
        assert_eq!(
            config.verification.command,
            vec!["python", "-m", "pytest", "test_parser.py"]
        );
        assert_eq!(config.verification.timeout(), Duration::from_secs(60));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(
            config.required_columns,
            vec!["Date", "Description", "Debit Amt", "Credit Amt", "Balance"]
        );
        assert_eq!(config.supported_targets.len(), 5);
    }

    #[test]
    fn test_should_deserialize_full_project_config() {
        let yaml = r#"
generator:
  provider: claude
  model: claude-sonnet-4-20250514
  temperature: 0.0
  maxOutputTokens: 8000
paths:
  dataDir: fixtures
  parsersDir: out
verification:
  command: ["pytest", "-x", "tests/test_parser.py"]
  timeoutSecs: 30
retry:
  maxAttempts: 5
prompts:
  include:
    - prompts
requiredColumns: [Date, Amount]
supportedTargets: [icici]
"#;
        let config: ProjectConfig = serde_yaml::from_str(yaml).expect("should parse YAML");

        assert_eq!(config.generator.provider, Provider::Claude);
        assert_eq!(
            config.generator.model.as_deref(),
            Some("claude-sonnet-4-20250514")
        );
        assert_eq!(config.generator.max_output_tokens, 8000);
        // unspecified generator fields keep their defaults
        assert_eq!(config.generator.top_p, 0.8);
        assert_eq!(config.paths.data_dir, PathBuf::from("fixtures"));
        assert_eq!(config.paths.tests_dir, PathBuf::from("tests"));
        assert_eq!(config.verification.command[0], "pytest");
        assert_eq!(config.verification.timeout_secs, 30);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.prompts.include, vec![PathBuf::from("prompts")]);
        assert_eq!(config.required_columns, vec!["Date", "Amount"]);
        assert_eq!(config.supported_targets, vec!["icici"]);
    }

    #[test]
    fn test_should_derive_target_paths() {
        let paths = PathsConfig::default().target_paths(Path::new("/work"), "icici");

        assert_eq!(
            paths.pdf_path,
            PathBuf::from("/work/data/icici/icici_sample.pdf")
        );
        assert_eq!(
            paths.csv_path,
            PathBuf::from("/work/data/icici/icici_sample.csv")
        );
        assert_eq!(
            paths.parser_path,
            PathBuf::from("/work/custom_parsers/icici_parser.py")
        );
    }

    #[test]
    fn test_should_load_default_when_config_file_missing() {
        let config = load_project_config(Path::new("/nonexistent/config.yaml"))
            .expect("should return default");
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_should_load_default_when_config_file_empty() {
        let dir = tempfile::TempDir::new().expect("should create temp dir");
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "\n").expect("should write config");

        let config = load_project_config(&path).expect("should load");
        assert_eq!(config.generator.provider, Provider::Gemini);
    }

    #[test]
    fn test_should_reject_invalid_yaml() {
        let dir = tempfile::TempDir::new().expect("should create temp dir");
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "retry: [not, a, map").expect("should write config");

        let result = load_project_config(&path);
        assert!(matches!(result, Err(crate::CoreError::Yaml(_))));
    }

    #[test]
    fn test_should_display_provider_names() {
        assert_eq!(Provider::Gemini.to_string(), "gemini");
        assert_eq!(Provider::Claude.to_string(), "claude");
    }

    #[test]
    fn test_should_reject_targets_that_escape_directories() {
        for bad in ["", "..", "../../../escaped", "/tmp/outside", "a/b", "a\\b", "icici "] {
            assert!(
                matches!(validate_target(bad), Err(CoreError::InvalidTarget(_))),
                "{bad:?} should be rejected"
            );
        }
        for good in ["icici", "hdfc_2024-v2", "SBI"] {
            assert!(validate_target(good).is_ok(), "{good:?} should be accepted");
        }
    }
}
