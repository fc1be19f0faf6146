//! OpenAI `/audio/speech` synthesis

use serde::Serialize;
use std::time::Duration;

use parley_config::OpenAiSpeechConfig;
use parley_core::{AudioFormat, SampleRate, SpeechSynthesizer, SynthesisStream};

use super::{http_client, stream_pcm};
use crate::PipelineError;

/// `response_format = "pcm"` is always 24 kHz mono PCM16
const OPENAI_PCM_RATE: SampleRate = SampleRate::Hz24000;

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'static str,
    speed: f32,
}

/// Synthesizer backed by OpenAI speech, resampled to the session rate
pub struct OpenAiSynthesizer {
    config: OpenAiSpeechConfig,
    api_key: String,
    format: AudioFormat,
    client: reqwest::Client,
}

impl OpenAiSynthesizer {
    pub fn new(config: OpenAiSpeechConfig, format: AudioFormat) -> Result<Self, PipelineError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| PipelineError::Config("OpenAI API key not configured".into()))?;

        Ok(Self {
            client: http_client(Duration::from_secs(10))?,
            config,
            api_key,
            format,
        })
    }

    fn speech_url(&self) -> String {
        format!("{}/audio/speech", self.config.endpoint.trim_end_matches('/'))
    }

    fn request(&self, text: &str) -> reqwest::RequestBuilder {
        self.client
            .post(self.speech_url())
            .bearer_auth(&self.api_key)
            .json(&SpeechRequest {
                model: &self.config.model,
                input: text,
                voice: &self.config.voice,
                response_format: "pcm",
                speed: self.config.speed,
            })
    }
}

impl SpeechSynthesizer for OpenAiSynthesizer {
    fn synthesize(&self, text: &str) -> SynthesisStream {
        tracing::debug!(voice = %self.config.voice, chars = text.len(), "OpenAI speech synthesis");
        stream_pcm(self.request(text), OPENAI_PCM_RATE, self.format.sample_rate)
    }

    fn output_format(&self) -> AudioFormat {
        self.format
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shape() {
        let config = OpenAiSpeechConfig {
            endpoint: "http://localhost:8080/v1/".to_string(),
            api_key: Some("sk-test".to_string()),
            ..Default::default()
        };
        let format = AudioFormat::new(SampleRate::Hz8000, Default::default());
        let synth = OpenAiSynthesizer::new(config, format).unwrap();

        let request = synth.request("Yo").build().unwrap();
        assert_eq!(request.url().as_str(), "http://localhost:8080/v1/audio/speech");
        assert_eq!(
            request.headers().get("authorization").unwrap(),
            "Bearer sk-test"
        );

        let body: serde_json::Value =
            serde_json::from_slice(request.body().unwrap().as_bytes().unwrap()).unwrap();
        assert_eq!(body["response_format"], "pcm");
        assert_eq!(body["voice"], "alloy");
        assert_eq!(body["input"], "Yo");
    }
}
