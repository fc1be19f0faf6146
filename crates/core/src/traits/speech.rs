//! Speech capability traits

use crate::{AudioFormat, AudioFrame, Result, Utterance};
use futures::Stream;
use std::pin::Pin;

/// Audio frames flowing into a transcriber
pub type AudioStream = Pin<Box<dyn Stream<Item = AudioFrame> + Send>>;

/// Partial and final utterances flowing out of a transcriber
pub type UtteranceStream = Pin<Box<dyn Stream<Item = Result<Utterance>> + Send>>;

/// Synthesized audio for one text chunk
pub type SynthesisStream = Pin<Box<dyn Stream<Item = Result<AudioFrame>> + Send>>;

/// Speech-to-Text capability
///
/// Implementations:
/// - `DeepgramTranscriber` - hosted streaming recognition over a websocket
///
/// The end-of-utterance heuristic belongs to the implementation: an utterance is
/// final when the engine says the caller finished speaking.
///
/// # Example
///
/// ```ignore
/// let stt: Arc<dyn Transcriber> = Arc::new(DeepgramTranscriber::new(config)?);
/// let mut utterances = stt.transcribe_stream(format, Box::pin(bus.into_stream()));
/// while let Some(utterance) = utterances.next().await {
///     println!("heard: {}", utterance?.text);
/// }
/// ```
pub trait Transcriber: Send + Sync + 'static {
    /// Stream transcription as audio arrives
    ///
    /// Returns partial utterances followed by a final one for every stretch of speech.
    /// The returned stream owns all connection state; dropping it tears the connection
    /// down. It ends when `audio` ends.
    fn transcribe_stream(&self, format: AudioFormat, audio: AudioStream) -> UtteranceStream;

    /// Get model name for logging
    fn model_name(&self) -> &str;
}

/// Text-to-Speech capability, bound to one session's output format
///
/// Implementations:
/// - `ElevenLabsSynthesizer` - streamed PCM over HTTP
/// - `OpenAiSynthesizer` - `/audio/speech` PCM, resampled to the session rate
pub trait SpeechSynthesizer: Send + Sync + 'static {
    /// Synthesize one chunk of reply text
    ///
    /// Frames come back in playback order at `output_format().sample_rate`.
    fn synthesize(&self, text: &str) -> SynthesisStream;

    /// Format every produced frame is in
    fn output_format(&self) -> AudioFormat;

    /// Get model name for logging
    fn model_name(&self) -> &str;
}

/// Creates a synthesizer for a negotiated output format
///
/// Backs the `Custom` synthesizer backend so embedders can supply their own engine.
pub trait SynthesizerProvider: Send + Sync + 'static {
    fn create(&self, format: AudioFormat) -> Result<Box<dyn SpeechSynthesizer>>;

    fn name(&self) -> &str;
}
