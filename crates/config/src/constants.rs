//! Centralized constants for the voice pipeline
//!
//! Single source of truth for vendor endpoints and the stock deployment's persona.

/// Service endpoints
pub mod endpoints {
    /// OpenAI-compatible API root (chat completions and speech)
    pub const OPENAI_DEFAULT: &str = "https://api.openai.com/v1";

    /// Deepgram live transcription websocket
    pub const DEEPGRAM_LISTEN: &str = "wss://api.deepgram.com/v1/listen";

    /// ElevenLabs text-to-speech root
    pub const ELEVENLABS_TTS: &str = "https://api.elevenlabs.io/v1/text-to-speech";

    /// StreamElements speech (MP3, no key required)
    pub const STREAM_ELEMENTS_SPEECH: &str = "https://api.streamelements.com/kappa/v2/speech";
}

/// Stock agent persona
pub mod persona {
    pub const INITIAL_MESSAGE: &str = "How's your day been?";

    pub const PROMPT_PREAMBLE: &str =
        "You are impersonating Drake. You answer every question by rapping.";

    /// Spoken when a response could not be produced
    pub const APOLOGY: &str = "Sorry, I lost my train of thought. Could you say that again?";

    /// Spoken before a session is closed for repeated failures
    pub const CLOSING_NOTICE: &str =
        "Sorry, I'm having technical trouble right now. Let's talk again later. Goodbye!";
}

/// Conventional vendor credential variables, read as config fallbacks
pub mod env_keys {
    pub const OPENAI_API_KEY: &str = "OPENAI_API_KEY";
    pub const DEEPGRAM_API_KEY: &str = "DEEPGRAM_API_KEY";
    pub const ELEVEN_LABS_API_KEY: &str = "ELEVEN_LABS_API_KEY";
}

/// Audio defaults
pub mod audio {
    /// Duration of every frame on the internal buses
    pub const FRAME_MS: u64 = 20;

    /// Default bus depth (1 second of 20ms frames)
    pub const BUS_DEPTH: usize = 50;

    /// Agent audio handed to the transport ahead of the playback clock
    pub const PLAYBACK_LEAD_MS: u64 = 100;
}
