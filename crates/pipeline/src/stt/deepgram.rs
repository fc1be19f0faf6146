//! Deepgram live transcription over a websocket
//!
//! One websocket per `transcribe_stream` call. Audio goes out as raw little-endian
//! PCM16 binary messages; results come back as JSON. A caller's turn ends when
//! Deepgram reports `speech_final` or an `UtteranceEnd`.

use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use url::Url;

use parley_config::TranscriberConfig;
use parley_core::{
    AudioEncoding, AudioFormat, AudioStream, Capability, Error, Result, Transcriber, Utterance,
    UtteranceStream,
};

use crate::PipelineError;

/// Gap after the last finalized word that produces an `UtteranceEnd` (ms)
const UTTERANCE_END_MS: u32 = 1000;

/// Deepgram drops idle connections after ~10s without audio
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5);

/// Streaming transcriber backed by Deepgram
pub struct DeepgramTranscriber {
    config: TranscriberConfig,
    api_key: String,
}

impl DeepgramTranscriber {
    pub fn new(config: TranscriberConfig) -> std::result::Result<Self, PipelineError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| PipelineError::Config("Deepgram API key not configured".into()))?;

        Url::parse(&config.url)
            .map_err(|e| PipelineError::Config(format!("invalid Deepgram URL: {}", e)))?;

        Ok(Self { config, api_key })
    }

    /// Listen URL with the audio and feature parameters for `format`
    fn listen_url(&self, format: AudioFormat) -> Result<Url> {
        let mut url = Url::parse(&self.config.url)
            .map_err(|e| Error::Config(format!("invalid Deepgram URL: {}", e)))?;

        let encoding = match format.encoding {
            AudioEncoding::Pcm16 => "linear16",
            AudioEncoding::Mulaw => "mulaw",
        };

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("encoding", encoding);
            query.append_pair("sample_rate", &format.sample_rate.as_u32().to_string());
            query.append_pair("channels", &format.channels.count().to_string());
            query.append_pair("model", &self.config.model);
            query.append_pair("language", &self.config.language);
            query.append_pair("punctuate", &self.config.punctuate.to_string());
            query.append_pair("interim_results", &self.config.interim_results.to_string());
            query.append_pair("endpointing", &self.config.endpointing_ms.to_string());
            if self.config.interim_results {
                query.append_pair("utterance_end_ms", &UTTERANCE_END_MS.to_string());
            }
        }

        Ok(url)
    }

    fn utterances(
        &self,
        format: AudioFormat,
        audio: AudioStream,
    ) -> impl Stream<Item = Result<Utterance>> + Send + 'static {
        let url = self.listen_url(format);
        let api_key = self.api_key.clone();
        let connect_timeout = Duration::from_millis(self.config.connect_timeout_ms);

        async_stream::try_stream! {
            let url = url?;
            let mut request = url
                .as_str()
                .into_client_request()
                .map_err(|e| stt_error(format!("invalid request: {}", e)))?;
            let token = HeaderValue::from_str(&format!("Token {}", api_key))
                .map_err(|e| Error::Config(format!("invalid Deepgram API key: {}", e)))?;
            request.headers_mut().insert("Authorization", token);

            let (socket, _) = tokio::time::timeout(
                connect_timeout,
                tokio_tungstenite::connect_async(request),
            )
            .await
            .map_err(|_| Error::timeout(Capability::Transcriber, connect_timeout))?
            .map_err(|e| stt_error(format!("connect failed: {}", e)))?;

            tracing::debug!(host = url.host_str().unwrap_or_default(), "Connected to Deepgram");

            let (sink, mut source) = socket.split();
            let _writer = AbortOnDrop(tokio::spawn(write_audio(sink, audio, format.encoding)));
            let mut transcript = TranscriptAssembler::default();

            while let Some(message) = source.next().await {
                let message = message.map_err(|e| stt_error(format!("websocket error: {}", e)))?;
                match message {
                    Message::Text(text) => {
                        if let Some(utterance) = transcript.handle(text.as_str())? {
                            yield utterance;
                        }
                    },
                    Message::Close(frame) => {
                        tracing::debug!(?frame, "Deepgram closed the stream");
                        break;
                    },
                    _ => {},
                }
            }

            if let Some(utterance) = transcript.flush() {
                yield utterance;
            }
        }
    }
}

impl Transcriber for DeepgramTranscriber {
    fn transcribe_stream(&self, format: AudioFormat, audio: AudioStream) -> UtteranceStream {
        Box::pin(self.utterances(format, audio))
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

fn stt_error(message: impl Into<String>) -> Error {
    Error::failure(Capability::Transcriber, message)
}

/// Aborts the wrapped task when dropped
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Forward audio to the socket, then ask Deepgram to flush and close
async fn write_audio<S>(mut sink: S, mut audio: AudioStream, encoding: AudioEncoding)
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let format = AudioFormat {
        encoding,
        ..AudioFormat::default()
    };
    let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
    keepalive.tick().await;

    loop {
        let message = tokio::select! {
            frame = audio.next() => match frame {
                Some(frame) => {
                    keepalive.reset();
                    Message::Binary(format.encode(&frame).into())
                },
                None => break,
            },
            _ = keepalive.tick() => Message::Text(r#"{"type":"KeepAlive"}"#.into()),
        };

        if let Err(e) = sink.send(message).await {
            tracing::warn!(error = %e, "Failed to send audio to Deepgram");
            return;
        }
    }

    if let Err(e) = sink.send(Message::Text(r#"{"type":"CloseStream"}"#.into())).await {
        tracing::debug!(error = %e, "Failed to close Deepgram stream");
    }
}

#[derive(Debug, Deserialize)]
struct DeepgramMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    channel: Option<DeepgramChannel>,
    #[serde(default)]
    is_final: bool,
    #[serde(default)]
    speech_final: bool,
    #[serde(default)]
    start: f64,
    #[serde(default)]
    duration: f64,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(Debug, Deserialize)]
struct DeepgramAlternative {
    transcript: String,
    #[serde(default)]
    confidence: f32,
}

/// Builds utterances from Deepgram's segment results
///
/// `is_final` segments are committed text for the current turn; interim results
/// extend it for partials. `speech_final` or `UtteranceEnd` closes the turn.
#[derive(Debug, Default)]
struct TranscriptAssembler {
    committed: Vec<String>,
    start: Option<f64>,
    end: f64,
    confidence: Option<f32>,
}

impl TranscriptAssembler {
    fn handle(&mut self, raw: &str) -> Result<Option<Utterance>> {
        let message: DeepgramMessage = serde_json::from_str(raw)
            .map_err(|e| stt_error(format!("malformed result: {}", e)))?;

        match message.kind.as_str() {
            "Results" => Ok(self.on_results(message)),
            "UtteranceEnd" => Ok(self.flush()),
            "Error" => Err(stt_error(
                message
                    .description
                    .or(message.message)
                    .unwrap_or_else(|| "unknown Deepgram error".to_string()),
            )),
            other => {
                tracing::trace!(kind = other, "Ignoring Deepgram message");
                Ok(None)
            },
        }
    }

    fn on_results(&mut self, message: DeepgramMessage) -> Option<Utterance> {
        let alternative = message.channel?.alternatives.into_iter().next()?;
        let text = alternative.transcript.trim().to_string();

        if !text.is_empty() {
            self.start.get_or_insert(message.start);
            self.end = message.start + message.duration;
        }

        if message.is_final {
            if !text.is_empty() {
                self.committed.push(text);
                self.confidence = Some(alternative.confidence);
            }
            if message.speech_final {
                return self.flush();
            }
            return self.partial(None);
        }

        if text.is_empty() {
            return None;
        }
        self.partial(Some(&text))
    }

    fn partial(&self, interim: Option<&str>) -> Option<Utterance> {
        let mut text = self.committed.join(" ");
        if let Some(interim) = interim {
            if !text.is_empty() {
                text.push(' ');
            }
            text.push_str(interim);
        }
        if text.is_empty() {
            return None;
        }
        Some(Utterance::partial(text).with_span(self.span_start(), secs(self.end)))
    }

    /// Close the current turn, if anything was committed
    fn flush(&mut self) -> Option<Utterance> {
        if self.committed.is_empty() {
            self.start = None;
            return None;
        }

        let mut utterance = Utterance::final_text(self.committed.join(" "))
            .with_span(self.span_start(), secs(self.end));
        utterance.confidence = self.confidence.take();

        self.committed.clear();
        self.start = None;
        Some(utterance)
    }

    fn span_start(&self) -> Duration {
        secs(self.start.unwrap_or(self.end))
    }
}

fn secs(value: f64) -> Duration {
    Duration::from_secs_f64(value.max(0.0))
}
