use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Retry settings for outbound model calls
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    /// Total attempts per call, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry, doubled on every further attempt
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound for a single backoff delay (before jitter)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// Settings shared by every grading pipeline
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunConfig {
    /// OpenAI-compatible API endpoint
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Environment variable name containing the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Chat model used for scoring and follow-up turns
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    /// Chat model used to translate Spanish answers
    #[serde(default = "default_translation_model")]
    pub translation_model: String,
    /// Fine-tuned text-completion model for the legacy pipeline
    #[serde(default = "default_completion_model")]
    pub completion_model: String,
    /// Sampling temperature for every call
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Second user turn sent when the double-prompt trigger fires
    #[serde(default = "default_followup_prompt")]
    pub followup_prompt: String,
    /// Directory receiving the timestamped report
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_chat_model() -> String {
    "gpt-3.5-turbo-0613".to_string()
}

fn default_translation_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_completion_model() -> String {
    "davinci:ft-edovo:question-with-prompt-62873-2023-07-03-16-08-03".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_followup_prompt() -> String {
    "Why did you score it a 0?".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_max_attempts() -> u32 {
    10
}

fn default_base_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            api_key_env: default_api_key_env(),
            chat_model: default_chat_model(),
            translation_model: default_translation_model(),
            completion_model: default_completion_model(),
            temperature: default_temperature(),
            followup_prompt: default_followup_prompt(),
            output_dir: default_output_dir(),
            retry: RetryConfig::default(),
        }
    }
}

impl RunConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config: {}", path.display()))
    }

    /// Load from `path` when given, otherwise fall back to defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    /// Read the API key from the configured environment variable
    pub fn api_key(&self) -> Result<String> {
        std::env::var(&self.api_key_env)
            .with_context(|| format!("Environment variable {} not found", self.api_key_env))
    }
}
