//! Real-time conversation pipeline
//!
//! This crate provides the per-call machinery:
//! - Bounded audio frame buses between stages
//! - Turn-taking state machine (listening, thinking, speaking, interrupted)
//! - Conversation sessions wiring transcriber, agent and synthesizer together
//! - Session routing for transport connections
//! - Hosted capability adapters (Deepgram, StreamElements, ElevenLabs, OpenAI speech)

pub mod bus;
mod playback;
pub mod router;
pub mod session;
pub mod stt;
pub mod tts;
pub mod turn;

pub use bus::{AudioFrameBus, BusStats};
pub use router::{InboundMessage, OutboundMessage, RouterConfig, SessionRouter, TransportConnection};
pub use session::{ConversationSession, SessionConfig, SessionEvent, SessionParts};
pub use stt::DeepgramTranscriber;
pub use tts::{
    ElevenLabsSynthesizer, OpenAiSynthesizer, StreamElementsSynthesizer, SynthesizerBackend,
};
pub use turn::{ResponseId, ResponseKind, TurnAction, TurnConfig, TurnController, TurnEvent};

use parley_core::Capability;
use thiserror::Error;

/// Pipeline errors
#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    #[error("Transcriber error: {0}")]
    Transcriber(String),

    #[error("Synthesizer error: {0}")]
    Synthesizer(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Session limit reached ({0} active)")]
    SessionLimit(usize),

    #[error("Session already exists: {0}")]
    DuplicateSession(String),

    #[error(transparent)]
    Core(#[from] parley_core::Error),
}

impl From<PipelineError> for parley_core::Error {
    fn from(err: PipelineError) -> Self {
        use parley_core::Error;

        match err {
            PipelineError::Transcriber(msg) => Error::failure(Capability::Transcriber, msg),
            PipelineError::Synthesizer(msg) => Error::failure(Capability::SpeechSynthesizer, msg),
            PipelineError::Config(msg) => Error::Config(msg),
            err @ (PipelineError::SessionLimit(_) | PipelineError::DuplicateSession(_)) => {
                Error::Session(err.to_string())
            },
            PipelineError::Core(err) => err,
        }
    }
}
