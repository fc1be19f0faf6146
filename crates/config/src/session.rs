//! Per-session pipeline settings

use serde::{Deserialize, Serialize};

use crate::constants::{audio, persona};

/// Timing, backpressure and failure policy applied to every session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Maximum frames buffered on each audio bus
    #[serde(default = "default_bus_depth")]
    pub bus_depth: usize,

    /// Duration of each frame on the buses (ms)
    #[serde(default = "default_frame_ms")]
    pub frame_ms: u64,

    /// Max wait between transcriber outputs once the caller is mid-utterance (ms)
    #[serde(default = "default_transcriber_timeout")]
    pub transcriber_timeout_ms: u64,

    /// Max wait for each next chunk of a reply, including the first (ms)
    #[serde(default = "default_agent_timeout")]
    pub agent_timeout_ms: u64,

    /// Max wait for each next synthesized frame (ms)
    #[serde(default = "default_synthesizer_timeout")]
    pub synthesizer_timeout_ms: u64,

    /// Capability failures in a row that close the session
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,

    /// Let the caller cut the agent off mid-response
    #[serde(default = "default_true")]
    pub allow_interruptions: bool,

    /// Spoken when a response cannot be produced
    #[serde(default = "default_apology")]
    pub apology: String,

    /// Spoken before closing for repeated failures (empty disables it)
    #[serde(default = "default_closing_notice")]
    pub closing_notice: String,

    /// Delay before restarting a failed transcriber stream (ms)
    #[serde(default = "default_transcriber_restart")]
    pub transcriber_restart_ms: u64,

    /// How far agent audio may run ahead of playback on the transport (ms)
    #[serde(default = "default_playback_lead")]
    pub playback_lead_ms: u64,
}

fn default_bus_depth() -> usize {
    audio::BUS_DEPTH
}
fn default_frame_ms() -> u64 {
    audio::FRAME_MS
}
fn default_transcriber_timeout() -> u64 {
    5000
}
fn default_agent_timeout() -> u64 {
    8000
}
fn default_synthesizer_timeout() -> u64 {
    5000
}
fn default_max_consecutive_failures() -> u32 {
    3
}
fn default_true() -> bool {
    true
}
fn default_apology() -> String {
    persona::APOLOGY.to_string()
}
fn default_closing_notice() -> String {
    persona::CLOSING_NOTICE.to_string()
}
fn default_transcriber_restart() -> u64 {
    250
}
fn default_playback_lead() -> u64 {
    audio::PLAYBACK_LEAD_MS
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            bus_depth: default_bus_depth(),
            frame_ms: default_frame_ms(),
            transcriber_timeout_ms: default_transcriber_timeout(),
            agent_timeout_ms: default_agent_timeout(),
            synthesizer_timeout_ms: default_synthesizer_timeout(),
            max_consecutive_failures: default_max_consecutive_failures(),
            allow_interruptions: true,
            apology: default_apology(),
            closing_notice: default_closing_notice(),
            transcriber_restart_ms: default_transcriber_restart(),
            playback_lead_ms: default_playback_lead(),
        }
    }
}
