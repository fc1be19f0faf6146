//! Chat-model response agent
//!
//! Features:
//! - OpenAI-compatible streaming chat backend
//! - Prompt assembly from persona, greeting and conversation history
//! - Sentence chunking so speech can start before generation finishes
//! - Process-wide cap on concurrent generations

pub mod agent;
pub mod backend;
pub mod prompt;
pub mod sentence;

pub use agent::ChatAgent;
pub use backend::{LlmBackend, OpenAIBackend, TokenStream};
pub use prompt::{Message, PromptBuilder, Role};
pub use sentence::SentenceChunker;

use parley_core::Capability;
use thiserror::Error;

/// LLM errors
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Generation error: {0}")]
    Generation(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timeout")]
    Timeout,

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

impl From<LlmError> for parley_core::Error {
    fn from(err: LlmError) -> Self {
        parley_core::Error::failure(Capability::ResponseAgent, err.to_string())
    }
}
