//! Text-generation service boundary.
//!
//! The controller only needs "prompt in, free-form text out". [`Generator`]
//! is that seam; [`Backend`] dispatches to the configured service.

use std::future::Future;

use crate::claude::ClaudeGenerator;
use crate::error::CoreError;
use crate::gemini::GeminiGenerator;

/// A text-generation service.
///
/// Implementations apply their generation settings uniformly to every call.
/// An `Err` is a service failure; an empty `Ok` is a valid (if useless)
/// response and is handled by code extraction.
pub trait Generator: Send + Sync {
    fn generate(&self, prompt: &str) -> impl Future<Output = Result<String, CoreError>> + Send;
}

/// The generation service selected by configuration.
#[derive(Debug)]
pub enum Backend {
    Gemini(GeminiGenerator),
    Claude(ClaudeGenerator),
}

impl Generator for Backend {
    async fn generate(&self, prompt: &str) -> Result<String, CoreError> {
        match self {
            Self::Gemini(generator) => generator.generate(prompt).await,
            Self::Claude(generator) => generator.generate(prompt).await,
        }
    }
}
