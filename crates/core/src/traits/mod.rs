//! Capability traits consumed by the conversation pipeline
//!
//! ```text
//! Transcriber:       audio frames  -> utterances (partial + final)
//! ResponseAgent:     history + utterance -> response chunks
//! SpeechSynthesizer: text chunk    -> audio frames
//! ```
//!
//! All three return lazy streams so the pipeline can start speaking before a reply
//! is complete, and can cancel any of them by dropping the stream.

mod agent;
mod speech;

pub use agent::{ResponseAgent, ResponseStream};
pub use speech::{
    AudioStream, SpeechSynthesizer, SynthesisStream, SynthesizerProvider, Transcriber,
    UtteranceStream,
};
