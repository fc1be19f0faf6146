//! Core traits and types for the parley voice pipeline
//!
//! This crate provides foundational types used across all other crates:
//! - Audio frames, fixed-size framing and wire codecs
//! - Conversation types (utterances, response chunks, turns, history)
//! - Session state and end reasons
//! - Error types
//! - Capability traits for pluggable backends (transcription, generation, synthesis)

pub mod audio;
pub mod codec;
pub mod conversation;
pub mod error;
pub mod state;
pub mod traits;

pub use audio::{AudioEncoding, AudioFormat, AudioFrame, Channels, FrameAssembler, SampleRate};
pub use conversation::{
    ConversationHistory, ConversationTurn, ResponseChunk, Role, TurnKind, Utterance,
};
pub use error::{Capability, Error, Result};
pub use state::{EndReason, SessionState};

pub use traits::{
    AudioStream, ResponseAgent, ResponseStream, SpeechSynthesizer, SynthesisStream,
    SynthesizerProvider, Transcriber, UtteranceStream,
};
