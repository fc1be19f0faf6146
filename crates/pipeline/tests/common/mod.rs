//! Scripted capabilities for driving sessions end to end

#![allow(dead_code)]

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::ReceiverStream;

use parley_core::{
    AudioFormat, AudioFrame, AudioStream, Capability, Channels, ConversationTurn, Error,
    ResponseAgent, ResponseChunk, ResponseStream, Result, Role, SampleRate, SessionState,
    SpeechSynthesizer, SynthesisStream, SynthesizerProvider, Transcriber, TurnKind, Utterance,
    UtteranceStream,
};
use parley_pipeline::{
    ConversationSession, SessionConfig, SessionEvent, SessionParts, SynthesizerBackend,
};

pub const GREETING: &str = "How's your day been?";
pub const PERSONA: &str = "respond by rapping";

pub fn output_format() -> AudioFormat {
    AudioFormat::new(SampleRate::Hz8000, Default::default())
}

/// Transcriber whose utterances are pushed by the test
///
/// The first stream replays the script; any restarted stream stays silent.
pub struct ScriptedTranscriber {
    script: Mutex<Option<mpsc::Receiver<Result<Utterance>>>>,
}

impl ScriptedTranscriber {
    pub fn new() -> (Arc<Self>, mpsc::Sender<Result<Utterance>>) {
        let (tx, rx) = mpsc::channel(16);
        let transcriber = Arc::new(Self {
            script: Mutex::new(Some(rx)),
        });
        (transcriber, tx)
    }
}

impl Transcriber for ScriptedTranscriber {
    fn transcribe_stream(&self, _format: AudioFormat, _audio: AudioStream) -> UtteranceStream {
        match self.script.lock().take() {
            Some(rx) => Box::pin(ReceiverStream::new(rx).chain(futures::stream::pending())),
            None => Box::pin(futures::stream::pending()),
        }
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// Transcriber whose first stream fails at once; restarted streams replay the script
pub struct FlakyTranscriber {
    calls: Mutex<usize>,
    script: Mutex<Option<mpsc::Receiver<Result<Utterance>>>>,
}

impl FlakyTranscriber {
    pub fn new() -> (Arc<Self>, mpsc::Sender<Result<Utterance>>) {
        let (tx, rx) = mpsc::channel(16);
        let transcriber = Arc::new(Self {
            calls: Mutex::new(0),
            script: Mutex::new(Some(rx)),
        });
        (transcriber, tx)
    }

    /// Streams opened so far
    pub fn calls(&self) -> usize {
        *self.calls.lock()
    }
}

impl Transcriber for FlakyTranscriber {
    fn transcribe_stream(&self, _format: AudioFormat, _audio: AudioStream) -> UtteranceStream {
        let call = {
            let mut calls = self.calls.lock();
            *calls += 1;
            *calls
        };
        if call == 1 {
            return Box::pin(futures::stream::once(async {
                Err(Error::failure(Capability::Transcriber, "socket dropped"))
            }));
        }
        match self.script.lock().take() {
            Some(rx) => Box::pin(ReceiverStream::new(rx).chain(futures::stream::pending())),
            None => Box::pin(futures::stream::pending()),
        }
    }

    fn model_name(&self) -> &str {
        "flaky"
    }
}

/// Agent answering every utterance with a fixed list of chunks, in turn
pub struct ScriptedAgent {
    greeting: Option<String>,
    replies: Mutex<Vec<Vec<String>>>,
    heard: Mutex<Vec<(usize, String)>>,
}

impl ScriptedAgent {
    /// `replies[n]` answers the n-th utterance; the last entry repeats
    pub fn new(greeting: Option<&str>, replies: Vec<Vec<&str>>) -> Arc<Self> {
        Arc::new(Self {
            greeting: greeting.map(str::to_string),
            replies: Mutex::new(
                replies
                    .into_iter()
                    .map(|chunks| chunks.into_iter().map(str::to_string).collect())
                    .collect(),
            ),
            heard: Mutex::new(Vec::new()),
        })
    }

    /// (history length, utterance text) for every `respond` call
    pub fn heard(&self) -> Vec<(usize, String)> {
        self.heard.lock().clone()
    }
}

#[async_trait]
impl ResponseAgent for ScriptedAgent {
    fn respond(&self, history: &[ConversationTurn], utterance: &Utterance) -> ResponseStream {
        self.heard
            .lock()
            .push((history.len(), utterance.text.clone()));

        let chunks = {
            let mut replies = self.replies.lock();
            if replies.len() > 1 {
                replies.remove(0)
            } else {
                replies.first().cloned().unwrap_or_default()
            }
        };
        let last = chunks.len().saturating_sub(1);
        let chunks: Vec<Result<ResponseChunk>> = chunks
            .into_iter()
            .enumerate()
            .map(|(i, text)| Ok(ResponseChunk::new(i, text, i == last)))
            .collect();
        Box::pin(futures::stream::iter(chunks))
    }

    fn initial_message(&self) -> Option<&str> {
        self.greeting.as_deref()
    }

    fn persona(&self) -> &str {
        PERSONA
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Agent that never produces a chunk
pub struct HangingAgent;

#[async_trait]
impl ResponseAgent for HangingAgent {
    fn respond(&self, _history: &[ConversationTurn], _utterance: &Utterance) -> ResponseStream {
        Box::pin(futures::stream::pending())
    }

    fn initial_message(&self) -> Option<&str> {
        None
    }

    fn persona(&self) -> &str {
        PERSONA
    }

    fn name(&self) -> &str {
        "hanging"
    }
}

/// Agent whose every call fails
pub struct FailingAgent;

#[async_trait]
impl ResponseAgent for FailingAgent {
    fn respond(&self, _history: &[ConversationTurn], _utterance: &Utterance) -> ResponseStream {
        Box::pin(futures::stream::once(async {
            Err(Error::failure(Capability::ResponseAgent, "model unavailable"))
        }))
    }

    fn initial_message(&self) -> Option<&str> {
        None
    }

    fn persona(&self) -> &str {
        PERSONA
    }

    fn name(&self) -> &str {
        "failing"
    }
}

/// Synthesizer emitting one 20ms frame per byte of text
///
/// Frames are filled with `tag(text)` and, when `pace` is set, spaced out in time
/// like real playback.
pub struct LengthSynth {
    format: AudioFormat,
    pace: Option<Duration>,
    tag: fn(&str) -> f32,
}

impl SpeechSynthesizer for LengthSynth {
    fn synthesize(&self, text: &str) -> SynthesisStream {
        let rate = self.format.sample_rate;
        let samples = rate.samples_for(Duration::from_millis(20));
        let value = (self.tag)(text);
        let count = text.len() as u64;
        let pace = self.pace;

        Box::pin(async_stream::stream! {
            for seq in 0..count {
                if let Some(pace) = pace {
                    tokio::time::sleep(pace).await;
                }
                yield Ok::<_, Error>(AudioFrame::new(vec![value; samples], rate, Channels::Mono, seq));
            }
        })
    }

    fn output_format(&self) -> AudioFormat {
        self.format
    }

    fn model_name(&self) -> &str {
        "length"
    }
}

pub struct LengthSynthProvider {
    pub pace: Option<Duration>,
    pub tag: fn(&str) -> f32,
}

impl SynthesizerProvider for LengthSynthProvider {
    fn create(&self, format: AudioFormat) -> Result<Box<dyn SpeechSynthesizer>> {
        Ok(Box::new(LengthSynth {
            format,
            pace: self.pace,
            tag: self.tag,
        }))
    }

    fn name(&self) -> &str {
        "length"
    }
}

/// How a `BrokenSynth` gives up
#[derive(Debug, Clone, Copy)]
pub enum Breakage {
    Error,
    Stall,
}

/// Synthesizer producing `frames` frames per chunk, then breaking
pub struct BrokenSynthProvider {
    pub frames: u64,
    pub breakage: Breakage,
}

struct BrokenSynth {
    format: AudioFormat,
    frames: u64,
    breakage: Breakage,
}

impl SpeechSynthesizer for BrokenSynth {
    fn synthesize(&self, _text: &str) -> SynthesisStream {
        let rate = self.format.sample_rate;
        let samples = rate.samples_for(Duration::from_millis(20));
        let frames = self.frames;
        let breakage = self.breakage;

        Box::pin(async_stream::stream! {
            for seq in 0..frames {
                yield Ok::<_, Error>(AudioFrame::new(vec![0.1; samples], rate, Channels::Mono, seq));
            }
            match breakage {
                Breakage::Error => {
                    yield Err(Error::failure(Capability::SpeechSynthesizer, "voice unavailable"));
                },
                Breakage::Stall => futures::future::pending::<()>().await,
            }
        })
    }

    fn output_format(&self) -> AudioFormat {
        self.format
    }

    fn model_name(&self) -> &str {
        "broken"
    }
}

impl SynthesizerProvider for BrokenSynthProvider {
    fn create(&self, format: AudioFormat) -> Result<Box<dyn SpeechSynthesizer>> {
        Ok(Box::new(BrokenSynth {
            format,
            frames: self.frames,
            breakage: self.breakage,
        }))
    }

    fn name(&self) -> &str {
        "broken"
    }
}

/// Capability failures reported so far
pub fn failures(events: &mut broadcast::Receiver<SessionEvent>) -> Vec<(Capability, String)> {
    let mut reported = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::CapabilityFailed { capability, message } = event {
            reported.push((capability, message));
        }
    }
    reported
}

/// (role, kind, text) of every committed turn
pub fn turns(session: &ConversationSession) -> Vec<(Role, TurnKind, String)> {
    session
        .history()
        .into_iter()
        .map(|turn| (turn.role, turn.kind, turn.text))
        .collect()
}

fn untagged(_text: &str) -> f32 {
    0.1
}

pub fn length_backend() -> SynthesizerBackend {
    SynthesizerBackend::custom(LengthSynthProvider {
        pace: None,
        tag: untagged,
    })
}

pub fn session_with(
    id: &str,
    transcriber: Arc<dyn Transcriber>,
    agent: Arc<dyn ResponseAgent>,
    synthesizer: SynthesizerBackend,
    config: SessionConfig,
) -> ConversationSession {
    ConversationSession::new(
        SessionParts {
            id: id.to_string(),
            input_format: AudioFormat::new(SampleRate::Hz16000, Default::default()),
            output_format: output_format(),
            transcriber,
            agent,
            synthesizer,
        },
        config,
    )
    .expect("session")
}

/// Collect outbound frames until the session closes
pub fn collect_audio(
    session: &ConversationSession,
) -> tokio::task::JoinHandle<Vec<AudioFrame>> {
    let audio = session.outbound_audio().expect("outbound audio");
    tokio::spawn(audio.collect::<Vec<_>>())
}

/// Wait for the `from -> to` transition
pub async fn wait_for_transition(
    events: &mut broadcast::Receiver<SessionEvent>,
    from: SessionState,
    to: SessionState,
) {
    tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            match events.recv().await {
                Ok(SessionEvent::StateChanged { from: f, to: t }) if f == from && t == to => {
                    return
                },
                Ok(_) => {},
                Err(e) => panic!("event stream failed: {}", e),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("no transition {} -> {}", from, to));
}

/// Every state transition published so far, in order
pub fn transitions(events: &mut broadcast::Receiver<SessionEvent>) -> Vec<(SessionState, SessionState)> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::StateChanged { from, to } = event {
            seen.push((from, to));
        }
    }
    seen
}

pub fn spoken(text: &str) -> Result<Utterance> {
    Ok(Utterance::final_text(text))
}
