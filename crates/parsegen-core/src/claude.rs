//! Claude backend, running one-shot queries through `claude-agent-sdk-rs`.

use std::path::PathBuf;

use claude_agent_sdk_rs::{
    ClaudeAgentOptions, ContentBlock, Message, PermissionMode as SdkPermissionMode, SystemPrompt,
};
use tracing::{debug, error, instrument};

use crate::error::CoreError;
use crate::generator::Generator;

const SYSTEM_PROMPT: &str = "You write complete, runnable Python modules. \
Reply with a single ```python fenced code block and nothing else. Do not use tools.";

/// Generates text with a Claude agent session in plan (read-only) mode.
#[derive(Debug)]
pub struct ClaudeGenerator {
    /// Model name. `None` lets the SDK choose.
    model: Option<String>,
    /// Working directory of the agent session.
    cwd: PathBuf,
}

impl ClaudeGenerator {
    pub fn new(model: Option<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            model,
            cwd: cwd.into(),
        }
    }

    fn build_options(&self) -> ClaudeAgentOptions {
        ClaudeAgentOptions {
            system_prompt: Some(SystemPrompt::Text(SYSTEM_PROMPT.to_owned())),
            permission_mode: Some(SdkPermissionMode::Plan),
            model: self.model.clone(),
            cwd: Some(self.cwd.clone()),
            ..Default::default()
        }
    }
}

impl Generator for ClaudeGenerator {
    #[instrument(skip_all, fields(model = ?self.model))]
    async fn generate(&self, prompt: &str) -> Result<String, CoreError> {
        let messages = claude_agent_sdk_rs::query(prompt, Some(self.build_options()))
            .await
            .map_err(|e| {
                error!(error = %e, "claude query failed");
                CoreError::Generator(format!(
                    "claude query failed: {e}. Check that the Claude CLI is installed and logged in."
                ))
            })?;

        if messages
            .iter()
            .any(|msg| matches!(msg, Message::Result(result) if result.is_error))
        {
            return Err(CoreError::Generator(
                "claude session ended with an error result".to_owned(),
            ));
        }

        let text = assistant_text(&messages);
        debug!(chars = text.len(), "claude response received");
        Ok(text)
    }
}

/// Concatenate the text blocks of all assistant messages.
fn assistant_text(messages: &[Message]) -> String {
    let mut text = String::new();
    for msg in messages {
        if let Message::Assistant(assistant) = msg {
            for block in &assistant.message.content {
                if let ContentBlock::Text(text_block) = block {
                    if !text.is_empty() {
                        text.push('\n');
                    }
                    text.push_str(&text_block.text);
                }
            }
        }
    }
    text
}
