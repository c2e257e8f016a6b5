//! Prompt generator agent: asks the text provider for the next prompt to send.

use anyhow::{Context, Result};
use tracing::{debug, instrument};

use crate::core::types::{AttemptRecord, StageInfo};
use crate::io::prompt::PromptBuilder;
use crate::io::provider::{ChatMessage, CompletionRequest, TextProvider};

/// Fixed user turn appended after the rendered system prompt.
pub const GENERATOR_REQUEST: &str = "Generate a friendly prompt for this game level.";

/// Generator settings forwarded to every completion request.
#[derive(Debug, Clone)]
pub struct PromptGenerator {
    builder: PromptBuilder,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl PromptGenerator {
    pub fn new(prompt_budget_bytes: usize, temperature: Option<f32>, max_tokens: Option<u32>) -> Self {
        Self {
            builder: PromptBuilder::new(prompt_budget_bytes),
            temperature,
            max_tokens,
        }
    }

    /// Build the completion request for `stage` from this stage's attempts.
    pub fn request(&self, stage: &StageInfo, attempts: &[AttemptRecord]) -> Result<CompletionRequest> {
        let system = self.builder.build_generator(stage, attempts)?;
        Ok(CompletionRequest {
            messages: vec![ChatMessage::system(system), ChatMessage::user(GENERATOR_REQUEST)],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        })
    }

    /// Produce the next prompt. The provider's text is returned verbatim,
    /// including empty output.
    #[instrument(skip_all, fields(stage = %stage.key, level = stage.level, prior = attempts.len()))]
    pub fn generate<P: TextProvider + ?Sized>(
        &self,
        provider: &P,
        stage: &StageInfo,
        attempts: &[AttemptRecord],
    ) -> Result<String> {
        let request = self.request(stage, attempts)?;
        let prompt = provider
            .complete(&request)
            .with_context(|| format!("generate prompt for stage {}", stage.key))?;
        debug!(prompt_len = prompt.len(), "prompt generated");
        Ok(prompt)
    }
}
