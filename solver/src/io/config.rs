//! Solver configuration stored under `.solver/config.toml`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Solver configuration (TOML).
///
/// Intended to be edited by humans. Missing fields take the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SolverConfig {
    /// Base URL of the game API (no trailing slash).
    pub base_url: String,

    /// Stage key to start from when the ledger is empty.
    pub start_stage: String,

    /// Attempt ceiling across all stages in one run.
    pub max_total_attempts: u32,

    /// Attempt ceiling for a single stage.
    pub max_attempts_per_level: u32,

    /// Per-request timeout for game API calls, in seconds.
    pub request_timeout_secs: u64,

    /// Byte budget for the rendered generator system prompt.
    pub prompt_budget_bytes: usize,

    pub provider: ProviderConfig,
}

/// Which text-generation backend to use.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI-compatible chat completions over HTTP.
    Http,
    /// A local command fed the conversation on stdin.
    Command,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    /// Base URL of the chat completions API.
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub timeout_secs: u64,
    /// Command for `kind = "command"` (e.g. `["llm", "-m", "gpt-4o-mini"]`).
    pub command: Vec<String>,
    /// Truncate command stdout beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Http,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: None,
            max_tokens: None,
            timeout_secs: 120,
            command: Vec::new(),
            output_limit_bytes: 100_000,
        }
    }
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            base_url: "https://gandalf.lakera.ai/api".to_string(),
            start_stage: "baseline".to_string(),
            max_total_attempts: 10,
            max_attempts_per_level: 3,
            request_timeout_secs: 60,
            prompt_budget_bytes: 16_000,
            provider: ProviderConfig::default(),
        }
    }
}

impl SolverConfig {
    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(anyhow!("base_url must be non-empty"));
        }
        if self.start_stage.trim().is_empty() {
            return Err(anyhow!("start_stage must be non-empty"));
        }
        if self.max_total_attempts == 0 {
            return Err(anyhow!("max_total_attempts must be > 0"));
        }
        if self.max_attempts_per_level == 0 {
            return Err(anyhow!("max_attempts_per_level must be > 0"));
        }
        if self.request_timeout_secs == 0 {
            return Err(anyhow!("request_timeout_secs must be > 0"));
        }
        if self.prompt_budget_bytes == 0 {
            return Err(anyhow!("prompt_budget_bytes must be > 0"));
        }
        self.provider.validate()
    }
}

impl ProviderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            return Err(anyhow!("provider.timeout_secs must be > 0"));
        }
        if let Some(temperature) = self.temperature
            && !(0.0..=2.0).contains(&temperature)
        {
            return Err(anyhow!("provider.temperature must be within 0.0..=2.0"));
        }
        match self.kind {
            ProviderKind::Http => {
                if self.base_url.trim().is_empty() || self.model.trim().is_empty() {
                    return Err(anyhow!("provider.base_url and provider.model must be set"));
                }
            }
            ProviderKind::Command => {
                if self.command.is_empty() || self.command[0].trim().is_empty() {
                    return Err(anyhow!("provider.command must be a non-empty array"));
                }
                if self.output_limit_bytes == 0 {
                    return Err(anyhow!("provider.output_limit_bytes must be > 0"));
                }
            }
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `SolverConfig::default()`.
pub fn load_config(path: &Path) -> Result<SolverConfig> {
    if !path.exists() {
        let cfg = SolverConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: SolverConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &SolverConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
