//! StreamElements speech synthesis
//!
//! The service answers a GET with a complete MP3 clip. The clip is decoded to mono
//! samples off the runtime, then cut into frames and resampled to the session rate.

use std::io::Cursor;
use std::time::Duration;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as DecodeError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use parley_config::constants::audio::FRAME_MS;
use parley_config::StreamElementsConfig;
use parley_core::{
    AudioFormat, Channels, Error, FrameAssembler, SampleRate, SpeechSynthesizer, SynthesisStream,
};

use super::{check_status, synth_error};
use crate::PipelineError;

/// Synthesizer backed by StreamElements hosted voices
pub struct StreamElementsSynthesizer {
    config: StreamElementsConfig,
    format: AudioFormat,
    client: reqwest::Client,
}

impl StreamElementsSynthesizer {
    pub fn new(config: StreamElementsConfig, format: AudioFormat) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| PipelineError::Config(format!("HTTP client: {}", e)))?;

        Ok(Self {
            config,
            format,
            client,
        })
    }

    fn request(&self, text: &str) -> reqwest::RequestBuilder {
        self.client
            .get(&self.config.url)
            .query(&[("voice", self.config.voice.as_str()), ("text", text)])
    }
}

impl SpeechSynthesizer for StreamElementsSynthesizer {
    fn synthesize(&self, text: &str) -> SynthesisStream {
        tracing::debug!(voice = %self.config.voice, chars = text.len(), "StreamElements synthesis");

        let request = self.request(text);
        let target = self.format.sample_rate;

        Box::pin(async_stream::try_stream! {
            let response = request
                .send()
                .await
                .map_err(|e| synth_error(format!("request failed: {}", e)))?;
            let body = check_status(response)
                .await?
                .bytes()
                .await
                .map_err(|e| synth_error(format!("body: {}", e)))?;

            let (samples, native) = tokio::task::spawn_blocking(move || decode_mp3(body.to_vec()))
                .await
                .map_err(|e| synth_error(format!("decoder task: {}", e)))??;

            let mut assembler =
                FrameAssembler::new(native, Channels::Mono, Duration::from_millis(FRAME_MS));
            for frame in assembler.push_samples(&samples) {
                yield frame.resample(target);
            }
            if let Some(frame) = assembler.flush() {
                yield frame.resample(target);
            }
        })
    }

    fn output_format(&self) -> AudioFormat {
        self.format
    }

    fn model_name(&self) -> &str {
        &self.config.voice
    }
}

/// Decode an MP3 clip to mono samples at its native rate
fn decode_mp3(bytes: Vec<u8>) -> Result<(Vec<f32>, SampleRate), Error> {
    let source = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());
    let mut hint = Hint::new();
    hint.with_extension("mp3");

    let probed = symphonia::default::get_probe()
        .format(&hint, source, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| synth_error(format!("unreadable audio: {}", e)))?;
    let mut reader = probed.format;

    let track = reader
        .tracks()
        .iter()
        .find(|track| track.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| synth_error("no audio track"))?;
    let track_id = track.id;
    let mut rate = track.codec_params.sample_rate;
    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| synth_error(format!("unsupported codec: {}", e)))?;

    let mut samples = Vec::new();
    loop {
        let packet = match reader.next_packet() {
            Ok(packet) => packet,
            Err(DecodeError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(synth_error(format!("demux: {}", e))),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            // Corrupt frame; the rest of the clip is still playable
            Err(DecodeError::DecodeError(_)) => continue,
            Err(e) => return Err(synth_error(format!("decode: {}", e))),
        };

        let spec = *decoded.spec();
        rate.get_or_insert(spec.rate);
        let channels = spec.channels.count().max(1);
        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buffer.copy_interleaved_ref(decoded);
        samples.extend(
            buffer
                .samples()
                .chunks(channels)
                .map(|frame| frame.iter().sum::<f32>() / channels as f32),
        );
    }

    let rate = rate.ok_or_else(|| synth_error("clip has no sample rate"))?;
    let rate = SampleRate::try_from(rate).map_err(|e| synth_error(e.to_string()))?;
    Ok((samples, rate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use parley_core::Capability;

    fn synth() -> StreamElementsSynthesizer {
        let config = StreamElementsConfig {
            url: "http://localhost:9/kappa/v2/speech".to_string(),
            ..Default::default()
        };
        let format = AudioFormat::new(SampleRate::Hz8000, Default::default());
        StreamElementsSynthesizer::new(config, format).unwrap()
    }

    #[test]
    fn test_request_shape() {
        let request = synth().request("Yo, what's good").build().unwrap();
        assert_eq!(request.method(), reqwest::Method::GET);

        let url = request.url();
        assert_eq!(url.path(), "/kappa/v2/speech");
        let query: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            query,
            vec![
                ("voice".to_string(), "Brian".to_string()),
                ("text".to_string(), "Yo, what's good".to_string()),
            ]
        );
    }

    #[test]
    fn test_garbage_is_not_audio() {
        let error = decode_mp3(b"<html>rate limited</html>".to_vec()).unwrap_err();
        assert_eq!(error.capability(), Some(Capability::SpeechSynthesizer));
    }

    #[tokio::test]
    async fn test_unreachable_service_fails_the_stream() {
        let mut stream = synth().synthesize("hello");
        match stream.next().await {
            Some(Err(error)) => assert!(error.to_string().contains("request failed")),
            other => panic!("expected a request failure, got {:?}", other.map(|r| r.is_ok())),
        }
    }
}
