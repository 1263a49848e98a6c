mod claude;
mod config;
mod controller;
mod engine;
mod error;
mod events;
mod extract;
mod gemini;
mod generator;
mod reference;
mod session;
mod setup;
mod verifier;

pub use claude::ClaudeGenerator;
pub use config::{
    ApiKey, DEFAULT_GEMINI_MODEL, EngineConfig, GeneratorConfig, PathsConfig, ProjectConfig,
    PromptsConfig, Provider, RetryConfig, STATE_DIR, TargetPaths, VerificationConfig,
    load_project_config, validate_target,
};
pub use controller::{
    ARTIFACT_LANGUAGE, Controller, Outcome, Phase, RunReport, next_after_generation,
    next_after_testing,
};
pub use engine::Engine;
pub use error::CoreError;
pub use events::{EventSink, LoopEvent, RunStream};
pub use extract::extract_code;
pub use gemini::GeminiGenerator;
pub use generator::{Backend, Generator};
pub use session::Session;
pub use setup::SetupReport;
pub use verifier::{CommandVerifier, Verdict, Verifier};
