//! Agent configuration
//!
//! The agent is configured once per deployment: persona preamble, optional greeting,
//! and the chat model it is backed by. Every session shares it.

use serde::{Deserialize, Serialize};

use crate::constants::{endpoints, env_keys, persona};

/// Agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Greeting spoken when a session starts (empty string disables it)
    #[serde(default = "default_initial_message")]
    pub initial_message: Option<String>,

    /// Persona / system prompt preamble
    #[serde(default = "default_prompt_preamble")]
    pub prompt_preamble: String,

    /// Chat model backing the agent
    #[serde(default)]
    pub llm: LlmConfig,

    /// Process-wide cap on concurrent generations across all sessions
    #[serde(default = "default_max_concurrent_generations")]
    pub max_concurrent_generations: usize,
}

fn default_initial_message() -> Option<String> {
    Some(persona::INITIAL_MESSAGE.to_string())
}
fn default_prompt_preamble() -> String {
    persona::PROMPT_PREAMBLE.to_string()
}
fn default_max_concurrent_generations() -> usize {
    32
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            initial_message: default_initial_message(),
            prompt_preamble: default_prompt_preamble(),
            llm: LlmConfig::default(),
            max_concurrent_generations: default_max_concurrent_generations(),
        }
    }
}

impl AgentConfig {
    /// Greeting with blank values treated as "no greeting"
    pub fn greeting(&self) -> Option<&str> {
        self.initial_message
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
    }
}

/// Chat model configuration (OpenAI-compatible API)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Model name/ID
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// API root
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,

    /// API key (falls back to OPENAI_API_KEY)
    #[serde(default = "default_openai_api_key")]
    pub api_key: Option<String>,

    /// Maximum tokens to generate
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Temperature for generation
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// HTTP request timeout (seconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_llm_model() -> String {
    "gpt-3.5-turbo".to_string()
}
fn default_llm_endpoint() -> String {
    endpoints::OPENAI_DEFAULT.to_string()
}
pub(crate) fn default_openai_api_key() -> Option<String> {
    std::env::var(env_keys::OPENAI_API_KEY).ok()
}
fn default_max_tokens() -> usize {
    256
}
fn default_temperature() -> f32 {
    0.7
}
fn default_request_timeout() -> u64 {
    30
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_llm_model(),
            endpoint: default_llm_endpoint(),
            api_key: default_openai_api_key(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}
