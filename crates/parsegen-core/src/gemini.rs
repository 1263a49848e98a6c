//! Gemini `generateContent` backend.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument};

use crate::config::{ApiKey, DEFAULT_GEMINI_MODEL, GeneratorConfig};
use crate::error::CoreError;
use crate::generator::Generator;

/// Harm categories that receive the configured safety threshold.
const HARM_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

/// Generates text through the Gemini REST API.
#[derive(Debug)]
pub struct GeminiGenerator {
    client: reqwest::Client,
    api_key: ApiKey,
    model: String,
    config: GeneratorConfig,
}

impl GeminiGenerator {
    /// # Errors
    ///
    /// Returns `CoreError::Generator` if the HTTP client cannot be built.
    pub fn new(
        api_key: ApiKey,
        model: Option<String>,
        config: GeneratorConfig,
    ) -> Result<Self, CoreError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| CoreError::Generator(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_owned()),
            config,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.api_base_url.trim_end_matches('/'),
            self.model
        )
    }

    fn build_request<'a>(&'a self, prompt: &'a str) -> GenerateContentRequest<'a> {
        GenerateContentRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![Part { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: self.config.temperature,
                max_output_tokens: self.config.max_output_tokens,
                top_p: self.config.top_p,
            },
            safety_settings: HARM_CATEGORIES
                .iter()
                .map(|&category| SafetySetting {
                    category,
                    threshold: &self.config.safety_threshold,
                })
                .collect(),
        }
    }
}

impl Generator for GeminiGenerator {
    #[instrument(skip_all, fields(model = %self.model))]
    async fn generate(&self, prompt: &str) -> Result<String, CoreError> {
        let request = self.build_request(prompt);

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", self.api_key.expose())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "gemini request failed");
                CoreError::Generator(format!(
                    "gemini request failed: {e}. Check your network connection and API key."
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(%status, "gemini returned an error status");
            return Err(CoreError::Generator(format!(
                "gemini API error ({status}): {body}"
            )));
        }

        let body: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| CoreError::Generator(format!("invalid gemini response: {e}")))?;

        let text = response_text(body)?;
        debug!(chars = text.len(), "gemini response received");
        Ok(text)
    }
}

/// Concatenate the text parts of the first candidate.
///
/// A response without candidates means the prompt itself was blocked.
fn response_text(response: GenerateContentResponse) -> Result<String, CoreError> {
    let Some(candidate) = response.candidates.into_iter().next() else {
        let reason = response
            .prompt_feedback
            .and_then(|feedback| feedback.block_reason)
            .unwrap_or_else(|| "no candidates returned".to_owned());
        return Err(CoreError::Generator(format!(
            "gemini returned no candidates: {reason}"
        )));
    };

    let text = candidate
        .content
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect::<String>()
        })
        .unwrap_or_default();

    if text.is_empty()
        && let Some(reason) = candidate.finish_reason.filter(|r| r != "STOP")
    {
        return Err(CoreError::Generator(format!(
            "gemini returned no text (finish reason: {reason})"
        )));
    }

    Ok(text)
}

// ── Wire types ───────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
    safety_settings: Vec<SafetySetting<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
    top_p: f32,
}

#[derive(Debug, Serialize)]
struct SafetySetting<'a> {
    category: &'a str,
    threshold: &'a str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}
