//! Speech synthesis backends
//!
//! The backend is chosen once per deployment and instantiated once per session with
//! the session's negotiated output format.

mod elevenlabs;
mod openai;
mod stream_elements;

pub use elevenlabs::ElevenLabsSynthesizer;
pub use openai::OpenAiSynthesizer;
pub use stream_elements::StreamElementsSynthesizer;

use futures::{Stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;

use parley_config::constants::audio::FRAME_MS;
use parley_config::{
    ElevenLabsConfig, OpenAiSpeechConfig, StreamElementsConfig, SynthesizerConfig,
};
use parley_core::{
    codec, AudioFormat, AudioFrame, Capability, Channels, Error, FrameAssembler, SampleRate,
    SpeechSynthesizer, SynthesisStream, SynthesizerProvider,
};

use crate::PipelineError;

/// Synthesizer selection, resolved to a concrete synthesizer per session
#[derive(Clone)]
pub enum SynthesizerBackend {
    StreamElements(StreamElementsConfig),
    ElevenLabs(ElevenLabsConfig),
    OpenAi(OpenAiSpeechConfig),
    /// Embedder-supplied engine
    Custom(Arc<dyn SynthesizerProvider>),
}

impl SynthesizerBackend {
    pub fn from_config(config: &SynthesizerConfig) -> Self {
        match config {
            SynthesizerConfig::StreamElements(c) => SynthesizerBackend::StreamElements(c.clone()),
            SynthesizerConfig::ElevenLabs(c) => SynthesizerBackend::ElevenLabs(c.clone()),
            SynthesizerConfig::OpenAi(c) => SynthesizerBackend::OpenAi(c.clone()),
        }
    }

    pub fn custom(provider: impl SynthesizerProvider) -> Self {
        SynthesizerBackend::Custom(Arc::new(provider))
    }

    pub fn name(&self) -> &str {
        match self {
            SynthesizerBackend::StreamElements(_) => "stream_elements",
            SynthesizerBackend::ElevenLabs(_) => "eleven_labs",
            SynthesizerBackend::OpenAi(_) => "open_ai",
            SynthesizerBackend::Custom(provider) => provider.name(),
        }
    }

    /// Instantiate a synthesizer producing frames in `format`
    pub fn create(&self, format: AudioFormat) -> Result<Box<dyn SpeechSynthesizer>, PipelineError> {
        tracing::debug!(
            backend = self.name(),
            sample_rate = format.sample_rate.as_u32(),
            "Creating synthesizer"
        );

        match self {
            SynthesizerBackend::StreamElements(config) => Ok(Box::new(
                StreamElementsSynthesizer::new(config.clone(), format)?,
            )),
            SynthesizerBackend::ElevenLabs(config) => {
                Ok(Box::new(ElevenLabsSynthesizer::new(config.clone(), format)?))
            },
            SynthesizerBackend::OpenAi(config) => {
                Ok(Box::new(OpenAiSynthesizer::new(config.clone(), format)?))
            },
            SynthesizerBackend::Custom(provider) => provider
                .create(format)
                .map_err(|e| PipelineError::Synthesizer(e.to_string())),
        }
    }
}

impl std::fmt::Debug for SynthesizerBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SynthesizerBackend").field(&self.name()).finish()
    }
}

fn synth_error(message: impl Into<String>) -> Error {
    Error::failure(Capability::SpeechSynthesizer, message)
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, PipelineError> {
    reqwest::Client::builder()
        .connect_timeout(timeout)
        .build()
        .map_err(|e| PipelineError::Config(format!("HTTP client: {}", e)))
}

/// Send a speech request and stream its raw PCM16 body as frames at `target`
pub(crate) fn stream_pcm(
    request: reqwest::RequestBuilder,
    native: SampleRate,
    target: SampleRate,
) -> SynthesisStream {
    Box::pin(pcm_frames(request, native, target))
}

fn pcm_frames(
    request: reqwest::RequestBuilder,
    native: SampleRate,
    target: SampleRate,
) -> impl Stream<Item = Result<AudioFrame, Error>> + Send + 'static {
    async_stream::try_stream! {
        let response = request
            .send()
            .await
            .map_err(|e| synth_error(format!("request failed: {}", e)))?;
        let response = check_status(response).await?;

        let mut body = response.bytes_stream();
        let mut assembler =
            FrameAssembler::new(native, Channels::Mono, Duration::from_millis(FRAME_MS));
        let mut decoder = Pcm16Decoder::default();

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| synth_error(format!("body stream: {}", e)))?;
            for frame in assembler.push_samples(&decoder.decode(&chunk)) {
                yield frame.resample(target);
            }
        }

        if let Some(frame) = assembler.flush() {
            yield frame.resample(target);
        }
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, Error> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(synth_error(format!("HTTP {}: {}", status, body)))
}

/// PCM16 decoding across arbitrary body chunk boundaries
#[derive(Debug, Default)]
struct Pcm16Decoder {
    carry: Option<u8>,
}

impl Pcm16Decoder {
    fn decode(&mut self, chunk: &[u8]) -> Vec<f32> {
        let mut bytes = Vec::with_capacity(chunk.len() + 1);
        if let Some(byte) = self.carry.take() {
            bytes.push(byte);
        }
        bytes.extend_from_slice(chunk);

        if bytes.len() % 2 == 1 {
            self.carry = bytes.pop();
        }
        codec::pcm16_to_f32(&bytes)
    }
}
