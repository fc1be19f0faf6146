//! Speech-to-text backends

mod deepgram;

pub use deepgram::DeepgramTranscriber;
