//! ElevenLabs streaming text-to-speech

use serde_json::json;
use std::time::Duration;

use parley_config::ElevenLabsConfig;
use parley_core::{AudioFormat, SampleRate, SpeechSynthesizer, SynthesisStream};

use super::{http_client, stream_pcm};
use crate::PipelineError;

/// Synthesizer backed by the ElevenLabs `/stream` endpoint with raw PCM output
pub struct ElevenLabsSynthesizer {
    config: ElevenLabsConfig,
    api_key: String,
    format: AudioFormat,
    /// Rate requested from the service
    native_rate: SampleRate,
    client: reqwest::Client,
}

impl ElevenLabsSynthesizer {
    pub fn new(config: ElevenLabsConfig, format: AudioFormat) -> Result<Self, PipelineError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| PipelineError::Config("ElevenLabs API key not configured".into()))?;

        Ok(Self {
            native_rate: Self::native_rate(format.sample_rate),
            client: http_client(Duration::from_secs(10))?,
            config,
            api_key,
            format,
        })
    }

    /// Closest PCM rate the service can produce; anything else is resampled locally
    fn native_rate(rate: SampleRate) -> SampleRate {
        match rate {
            SampleRate::Hz48000 => SampleRate::Hz44100,
            other => other,
        }
    }

    fn request(&self, text: &str) -> reqwest::RequestBuilder {
        let url = format!(
            "{}/{}/stream",
            self.config.url.trim_end_matches('/'),
            self.config.voice_id
        );

        self.client
            .post(url)
            .query(&[("output_format", format!("pcm_{}", self.native_rate.as_u32()))])
            .header("xi-api-key", &self.api_key)
            .header("accept", "audio/pcm")
            .json(&json!({
                "text": text,
                "model_id": self.config.model_id,
                "voice_settings": {
                    "stability": self.config.stability,
                    "similarity_boost": self.config.similarity_boost,
                },
            }))
    }
}

impl SpeechSynthesizer for ElevenLabsSynthesizer {
    fn synthesize(&self, text: &str) -> SynthesisStream {
        tracing::debug!(voice_id = %self.config.voice_id, chars = text.len(), "ElevenLabs synthesis");
        stream_pcm(self.request(text), self.native_rate, self.format.sample_rate)
    }

    fn output_format(&self) -> AudioFormat {
        self.format
    }

    fn model_name(&self) -> &str {
        &self.config.model_id
    }
}
