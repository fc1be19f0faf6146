//! Transcriber and synthesizer backend configuration

use serde::{Deserialize, Serialize};

use crate::agent::default_openai_api_key;
use crate::constants::{endpoints, env_keys};

/// Deepgram live transcription settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriberConfig {
    /// Listen websocket URL
    #[serde(default = "default_deepgram_url")]
    pub url: String,

    /// API key (falls back to DEEPGRAM_API_KEY)
    #[serde(default = "default_deepgram_api_key")]
    pub api_key: Option<String>,

    #[serde(default = "default_deepgram_model")]
    pub model: String,

    #[serde(default = "default_language")]
    pub language: String,

    /// Trailing silence that ends an utterance (ms)
    #[serde(default = "default_endpointing")]
    pub endpointing_ms: u32,

    /// Emit partial results while the caller speaks
    #[serde(default = "default_true")]
    pub interim_results: bool,

    #[serde(default = "default_true")]
    pub punctuate: bool,

    /// Connection handshake timeout (ms)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

fn default_deepgram_url() -> String {
    endpoints::DEEPGRAM_LISTEN.to_string()
}
fn default_deepgram_api_key() -> Option<String> {
    std::env::var(env_keys::DEEPGRAM_API_KEY).ok()
}
fn default_deepgram_model() -> String {
    "nova-2".to_string()
}
fn default_language() -> String {
    "en-US".to_string()
}
fn default_endpointing() -> u32 {
    300
}
fn default_true() -> bool {
    true
}
fn default_connect_timeout() -> u64 {
    5000
}

impl Default for TranscriberConfig {
    fn default() -> Self {
        Self {
            url: default_deepgram_url(),
            api_key: default_deepgram_api_key(),
            model: default_deepgram_model(),
            language: default_language(),
            endpointing_ms: default_endpointing(),
            interim_results: true,
            punctuate: true,
            connect_timeout_ms: default_connect_timeout(),
        }
    }
}

/// Synthesizer backend selection, resolved once per session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum SynthesizerConfig {
    /// StreamElements hosted voices
    StreamElements(StreamElementsConfig),
    /// OpenAI `/audio/speech`
    OpenAi(OpenAiSpeechConfig),
    /// ElevenLabs streaming text-to-speech
    ElevenLabs(ElevenLabsConfig),
}

impl Default for SynthesizerConfig {
    fn default() -> Self {
        SynthesizerConfig::StreamElements(StreamElementsConfig::default())
    }
}

impl SynthesizerConfig {
    pub fn provider(&self) -> &'static str {
        match self {
            SynthesizerConfig::StreamElements(_) => "stream_elements",
            SynthesizerConfig::OpenAi(_) => "open_ai",
            SynthesizerConfig::ElevenLabs(_) => "eleven_labs",
        }
    }

    /// Whether the backend rejects unauthenticated requests
    pub fn needs_api_key(&self) -> bool {
        !matches!(self, SynthesizerConfig::StreamElements(_))
    }

    pub fn api_key(&self) -> Option<&str> {
        match self {
            SynthesizerConfig::StreamElements(_) => None,
            SynthesizerConfig::OpenAi(c) => c.api_key.as_deref(),
            SynthesizerConfig::ElevenLabs(c) => c.api_key.as_deref(),
        }
    }
}

/// StreamElements settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamElementsConfig {
    #[serde(default = "default_stream_elements_url")]
    pub url: String,

    #[serde(default = "default_stream_elements_voice")]
    pub voice: String,

    /// Request timeout (ms)
    #[serde(default = "default_stream_elements_timeout")]
    pub timeout_ms: u64,
}

fn default_stream_elements_url() -> String {
    endpoints::STREAM_ELEMENTS_SPEECH.to_string()
}
fn default_stream_elements_voice() -> String {
    "Brian".to_string()
}
fn default_stream_elements_timeout() -> u64 {
    10_000
}

impl Default for StreamElementsConfig {
    fn default() -> Self {
        Self {
            url: default_stream_elements_url(),
            voice: default_stream_elements_voice(),
            timeout_ms: default_stream_elements_timeout(),
        }
    }
}

/// OpenAI speech settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiSpeechConfig {
    #[serde(default = "default_openai_endpoint")]
    pub endpoint: String,

    /// API key (falls back to OPENAI_API_KEY)
    #[serde(default = "default_openai_api_key")]
    pub api_key: Option<String>,

    #[serde(default = "default_openai_tts_model")]
    pub model: String,

    #[serde(default = "default_openai_voice")]
    pub voice: String,

    /// Playback speed (0.25 - 4.0)
    #[serde(default = "default_speed")]
    pub speed: f32,
}

fn default_openai_endpoint() -> String {
    endpoints::OPENAI_DEFAULT.to_string()
}
fn default_openai_tts_model() -> String {
    "tts-1".to_string()
}
fn default_openai_voice() -> String {
    "alloy".to_string()
}
fn default_speed() -> f32 {
    1.0
}

impl Default for OpenAiSpeechConfig {
    fn default() -> Self {
        Self {
            endpoint: default_openai_endpoint(),
            api_key: default_openai_api_key(),
            model: default_openai_tts_model(),
            voice: default_openai_voice(),
            speed: default_speed(),
        }
    }
}

/// ElevenLabs settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElevenLabsConfig {
    #[serde(default = "default_elevenlabs_url")]
    pub url: String,

    /// API key (falls back to ELEVEN_LABS_API_KEY)
    #[serde(default = "default_elevenlabs_api_key")]
    pub api_key: Option<String>,

    #[serde(default = "default_voice_id")]
    pub voice_id: String,

    #[serde(default = "default_elevenlabs_model")]
    pub model_id: String,

    /// Voice stability (0.0 - 1.0)
    #[serde(default = "default_stability")]
    pub stability: f32,

    /// Voice similarity boost (0.0 - 1.0)
    #[serde(default = "default_similarity_boost")]
    pub similarity_boost: f32,
}

fn default_elevenlabs_url() -> String {
    endpoints::ELEVENLABS_TTS.to_string()
}
fn default_elevenlabs_api_key() -> Option<String> {
    std::env::var(env_keys::ELEVEN_LABS_API_KEY).ok()
}
fn default_voice_id() -> String {
    "EXAVITQu4vr4xnSDxMaL".to_string()
}
fn default_elevenlabs_model() -> String {
    "eleven_turbo_v2".to_string()
}
fn default_stability() -> f32 {
    0.5
}
fn default_similarity_boost() -> f32 {
    0.75
}

impl Default for ElevenLabsConfig {
    fn default() -> Self {
        Self {
            url: default_elevenlabs_url(),
            api_key: default_elevenlabs_api_key(),
            voice_id: default_voice_id(),
            model_id: default_elevenlabs_model(),
            stability: default_stability(),
            similarity_boost: default_similarity_boost(),
        }
    }
}
