//! Configuration management for the parley voice pipeline
//!
//! Settings are layered from:
//! - config/default.{toml,yaml,json}
//! - config/{env}.{toml,yaml,json}
//! - Environment variables (PARLEY__ prefix, e.g. `PARLEY__SESSION__AGENT_TIMEOUT_MS`)
//!
//! Vendor credentials additionally fall back to their conventional variables
//! (`OPENAI_API_KEY`, `DEEPGRAM_API_KEY`, `ELEVEN_LABS_API_KEY`).

pub mod agent;
pub mod constants;
pub mod session;
pub mod settings;
pub mod speech;

pub use agent::{AgentConfig, LlmConfig};
pub use session::SessionSettings;
pub use settings::{
    load_settings, load_settings_from, ObservabilityConfig, RuntimeEnvironment, ServerConfig,
    Settings,
};
pub use speech::{
    ElevenLabsConfig, OpenAiSpeechConfig, StreamElementsConfig, SynthesizerConfig,
    TranscriberConfig,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}
