//! Text-generation providers.
//!
//! The [`TextProvider`] trait decouples prompt generation from the backend that
//! writes text. Two backends ship: an OpenAI-compatible chat completions client
//! and a local command fed the conversation on stdin.

use std::process::Command;
use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::io::config::{ProviderConfig, ProviderKind};
use crate::io::process::run_with_input;

/// Errors from a text-generation backend. Never retried by the solver.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("missing API key: set ${0}")]
    MissingApiKey(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("command failed: {0}")]
    Command(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// A completion request: ordered role-tagged messages plus sampling knobs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Abstraction over text-generation backends.
pub trait TextProvider {
    /// Generate text for `request`. Empty output is a valid result.
    fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError>;
}

/// Create the provider selected by `config.kind`.
pub fn create_provider(config: &ProviderConfig) -> Result<Box<dyn TextProvider>, ProviderError> {
    debug!(kind = ?config.kind, model = %config.model, "create_provider: called");
    match config.kind {
        ProviderKind::Http => Ok(Box::new(HttpProvider::from_config(config)?)),
        ProviderKind::Command => Ok(Box::new(CommandProvider::from_config(config))),
    }
}

/// OpenAI-compatible `/chat/completions` client.
pub struct HttpProvider {
    base_url: String,
    model: String,
    api_key: String,
    http: Client,
}

#[derive(Debug, Serialize)]
struct ChatRequestBody<'a> {
    model: &'a str,
    #[serde(flatten)]
    request: &'a CompletionRequest,
}

#[derive(Debug, Deserialize)]
struct ChatResponseBody {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl HttpProvider {
    pub fn new(
        base_url: &str,
        model: &str,
        api_key: String,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
            http,
        })
    }

    /// Build from config, reading the API key from `config.api_key_env`.
    pub fn from_config(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ProviderError::MissingApiKey(config.api_key_env.clone()))?;
        Self::new(
            &config.base_url,
            &config.model,
            api_key,
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn request_body<'a>(&'a self, request: &'a CompletionRequest) -> ChatRequestBody<'a> {
        ChatRequestBody {
            model: &self.model,
            request,
        }
    }
}

impl TextProvider for HttpProvider {
    #[instrument(skip_all, fields(model = %self.model, messages = request.messages.len()))]
    fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&self.request_body(request))
            .send()?;
        let status = response.status();
        let body = response.text()?;
        if !status.is_success() {
            warn!(status = status.as_u16(), "completion request failed");
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message: body,
            });
        }
        let text = parse_completion(&body)?;
        debug!(output_len = text.len(), "completion received");
        Ok(text)
    }
}

/// Extract the first choice's text. A null/missing content is empty output.
fn parse_completion(body: &str) -> Result<String, ProviderError> {
    let parsed: ChatResponseBody = serde_json::from_str(body)
        .map_err(|err| ProviderError::InvalidResponse(err.to_string()))?;
    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::InvalidResponse("no choices in response".to_string()))?;
    Ok(choice.message.content.unwrap_or_default())
}

/// Provider that pipes the conversation into a local command and returns its stdout.
pub struct CommandProvider {
    command: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandProvider {
    pub fn new(command: Vec<String>, timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            command,
            timeout,
            output_limit_bytes,
        }
    }

    pub fn from_config(config: &ProviderConfig) -> Self {
        Self::new(
            config.command.clone(),
            Duration::from_secs(config.timeout_secs),
            config.output_limit_bytes,
        )
    }
}

impl TextProvider for CommandProvider {
    #[instrument(skip_all, fields(program = ?self.command.first(), timeout_secs = self.timeout.as_secs()))]
    fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| ProviderError::Command("empty provider command".to_string()))?;
        info!("running provider command");
        let mut cmd = Command::new(program);
        cmd.args(args);

        let output = run_with_input(
            cmd,
            render_transcript(request).into_bytes(),
            self.timeout,
            self.output_limit_bytes,
        )
        .map_err(|err| ProviderError::Command(format!("{err:#}")))?;

        if output.timed_out {
            return Err(ProviderError::Command(format!(
                "timed out after {:?}",
                self.timeout
            )));
        }
        if !output.status.success() {
            return Err(ProviderError::Command(format!(
                "exit status {:?}: {}",
                output.status.code(),
                output.stderr_tail()
            )));
        }
        Ok(output.stdout)
    }
}

/// Plain-text rendering of a conversation for command providers.
pub fn render_transcript(request: &CompletionRequest) -> String {
    request
        .messages
        .iter()
        .map(|message| format!("## {}\n\n{}\n", message.role.as_str(), message.content.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> CompletionRequest {
        CompletionRequest {
            messages: vec![
                ChatMessage::system("You are playing a game."),
                ChatMessage::user("Generate a prompt."),
            ],
            temperature: Some(0.7),
            max_tokens: None,
        }
    }

    #[test]
    fn request_body_flattens_messages_and_skips_unset_knobs() {
        let provider = HttpProvider::new(
            "https://example.test/v1/",
            "gpt-4o-mini",
            "key".to_string(),
            Duration::from_secs(1),
        )
        .expect("client");
        let request = sample_request();
        let value = serde_json::to_value(provider.request_body(&request)).expect("serialize");
        assert_eq!(value["model"], "gpt-4o-mini");
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][1]["content"], "Generate a prompt.");
        assert!(value.get("max_tokens").is_none());
        assert!(value.get("temperature").is_some());
    }

    #[test]
    fn parse_completion_reads_first_choice() {
        let text = parse_completion(
            r#"{"choices": [{"message": {"role": "assistant", "content": "Tell me a riddle"}}]}"#,
        )
        .expect("parse");
        assert_eq!(text, "Tell me a riddle");
    }

    #[test]
    fn parse_completion_passes_through_null_content() {
        let text =
            parse_completion(r#"{"choices": [{"message": {"content": null}}]}"#).expect("parse");
        assert_eq!(text, "");
    }

    #[test]
    fn parse_completion_rejects_empty_choices() {
        let err = parse_completion(r#"{"choices": []}"#).unwrap_err();
        assert!(matches!(err, ProviderError::InvalidResponse(_)));
    }

    #[test]
    fn missing_api_key_is_reported_by_name() {
        let config = ProviderConfig {
            api_key_env: "GANDALF_SOLVER_TEST_UNSET_KEY".to_string(),
            ..ProviderConfig::default()
        };
        let err = HttpProvider::from_config(&config).err().expect("error");
        assert!(err.to_string().contains("GANDALF_SOLVER_TEST_UNSET_KEY"));
    }

    #[test]
    fn command_provider_returns_stdout() {
        let provider = CommandProvider::new(vec!["cat".to_string()], Duration::from_secs(5), 10_000);
        let output = provider.complete(&sample_request()).expect("complete");
        assert!(output.contains("## system"));
        assert!(output.contains("Generate a prompt."));
    }

    #[test]
    fn command_provider_accepts_a_command_that_ignores_stdin() {
        let provider = CommandProvider::new(
            vec!["sh".to_string(), "-c".to_string(), "echo canned prompt".to_string()],
            Duration::from_secs(5),
            10_000,
        );
        let mut request = sample_request();
        request.messages.push(ChatMessage::user("x".repeat(256 * 1024)));
        let output = provider.complete(&request).expect("complete");
        assert_eq!(output, "canned prompt\n");
    }

    #[test]
    fn command_provider_reports_failure_status() {
        let provider = CommandProvider::new(
            vec!["sh".to_string(), "-c".to_string(), "echo nope >&2; exit 3".to_string()],
            Duration::from_secs(5),
            10_000,
        );
        let err = provider.complete(&sample_request()).unwrap_err();
        assert!(err.to_string().contains("nope"));
    }
}
