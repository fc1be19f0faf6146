//! Error types shared across the workspace

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// External capability a session depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Transcriber,
    ResponseAgent,
    SpeechSynthesizer,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Transcriber => "transcriber",
            Capability::ResponseAgent => "response_agent",
            Capability::SpeechSynthesizer => "speech_synthesizer",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Workspace-wide error
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Audio buffer overflow (max depth {max_depth})")]
    BufferOverflow { max_depth: usize },

    #[error("{capability} timed out after {timeout_ms}ms")]
    CapabilityTimeout {
        capability: Capability,
        timeout_ms: u64,
    },

    #[error("{capability} failed: {message}")]
    CapabilityFailure {
        capability: Capability,
        message: String,
    },

    #[error("Cancelled")]
    Cancelled,

    #[error("Consecutive failure limit exceeded ({failures} failures)")]
    ConsecutiveFailureLimitExceeded { failures: u32 },

    #[error("Closed")]
    Closed,

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Session error: {0}")]
    Session(String),
}

impl Error {
    pub fn failure(capability: Capability, message: impl Into<String>) -> Self {
        Error::CapabilityFailure {
            capability,
            message: message.into(),
        }
    }

    pub fn timeout(capability: Capability, timeout: std::time::Duration) -> Self {
        Error::CapabilityTimeout {
            capability,
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// The capability at fault, for timeouts and failures
    pub fn capability(&self) -> Option<Capability> {
        match self {
            Error::CapabilityTimeout { capability, .. }
            | Error::CapabilityFailure { capability, .. } => Some(*capability),
            _ => None,
        }
    }

    pub fn is_capability_error(&self) -> bool {
        self.capability().is_some()
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled | Error::Closed)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
